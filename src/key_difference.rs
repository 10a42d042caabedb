/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The key-difference computer (C1): given the remote manifest's id set and
//! the local store's id set, reports which ids need to be fetched and which
//! need to be dropped locally.

use std::collections::HashSet;

use crate::storage_id::StorageId;

#[derive(Debug, Clone)]
pub struct KeyDifference {
    pub remote_only: HashSet<StorageId>,
    pub local_only: HashSet<StorageId>,
    /// Set when an id's raw bytes appear on both sides but tagged with a
    /// different `RecordType` — a sign the two sides have diverged badly
    /// enough that a force-push is warranted rather than a merge.
    pub has_type_mismatches: bool,
}

impl KeyDifference {
    pub fn is_empty(&self) -> bool {
        self.remote_only.is_empty() && self.local_only.is_empty()
    }
}

pub fn compute(remote: &HashSet<StorageId>, local: &HashSet<StorageId>) -> KeyDifference {
    let remote_only: HashSet<StorageId> = remote.difference(local).cloned().collect();
    let local_only: HashSet<StorageId> = local.difference(remote).cloned().collect();

    let mut has_type_mismatches = false;
    'outer: for r in &remote_only {
        for l in &local_only {
            if r.as_bytes() == l.as_bytes() && r.kind() != l.kind() {
                has_type_mismatches = true;
                break 'outer;
            }
        }
    }

    KeyDifference {
        remote_only,
        local_only,
        has_type_mismatches,
    }
}
