/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Cooperative cancellation for a running `Sync`. `Sync` is not cancelable
//! mid-flight; a shutdown signal is only observed at the suspension points
//! between steps, where it surfaces as `Interrupted` (mapped by the caller
//! to `RetryLater`).

use std::sync::atomic::{AtomicUsize, Ordering};

pub trait Interruptee {
    fn was_interrupted(&self) -> bool;

    fn err_if_interrupted(&self) -> Result<(), Interrupted> {
        if self.was_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("the operation was interrupted")]
pub struct Interrupted;

/// Stands in for callers (mostly tests) that never cancel.
pub struct NeverInterrupts;

impl Interruptee for NeverInterrupts {
    fn was_interrupted(&self) -> bool {
        false
    }
}

/// A cancellation scope shared across threads. Every live `InterruptScope`
/// observes `interrupt_all()` the next time it's polled, regardless of which
/// scope called it.
#[derive(Debug)]
pub struct InterruptScope {
    generation: usize,
}

static COUNTER: AtomicUsize = AtomicUsize::new(0);

impl InterruptScope {
    pub fn new() -> Self {
        Self {
            generation: COUNTER.load(Ordering::SeqCst),
        }
    }

    pub fn interrupt_all() {
        COUNTER.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for InterruptScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Interruptee for InterruptScope {
    fn was_interrupted(&self) -> bool {
        COUNTER.load(Ordering::SeqCst) != self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_interrupts_is_never_interrupted() {
        assert!(!NeverInterrupts.was_interrupted());
        assert!(NeverInterrupts.err_if_interrupted().is_ok());
    }

    #[test]
    fn scope_interrupts_every_live_scope() {
        let a = InterruptScope::new();
        let b = InterruptScope::new();
        assert!(!a.was_interrupted());
        assert!(!b.was_interrupted());
        InterruptScope::interrupt_all();
        assert!(a.was_interrupted());
        assert!(b.was_interrupted());
        assert!(a.err_if_interrupted().is_err());
    }

    #[test]
    fn new_scope_after_interrupt_is_not_interrupted() {
        InterruptScope::interrupt_all();
        let c = InterruptScope::new();
        assert!(!c.was_interrupted());
    }
}
