/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `StorageId`: opaque, type-tagged, fresh-per-update record identifiers.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Which kind of entity a [`StorageId`] was minted for. Two ids with
/// identical bytes but different tags are distinct records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    Contact,
    GroupV1,
    GroupV2,
    Account,
    Unknown,
}

/// Opaque fixed-width byte string carrying a [`RecordType`] tag. Equality is
/// by raw bytes *and* type: two ids with identical bytes but different types
/// are distinct. Minted fresh on every logical update; never reused.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageId {
    kind: RecordType,
    bytes: Vec<u8>,
}

impl StorageId {
    pub fn new(kind: RecordType, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    #[inline]
    pub fn kind(&self) -> RecordType {
        self.kind
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageId({:?}, {})", self.kind, hex(&self.bytes))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Mints fresh [`StorageId`]s. Every logical update to a record gets a new
/// id, even one that changes no visible field.
pub trait StorageKeyGenerator: Send + Sync {
    fn generate(&self, kind: RecordType) -> StorageId;
}

/// Fills a fixed-width buffer with random bytes for each new id, the way the
/// on-device key generator does it.
pub struct RandomKeyGenerator {
    width: usize,
}

impl RandomKeyGenerator {
    pub fn new(width: usize) -> Self {
        Self { width }
    }
}

impl Default for RandomKeyGenerator {
    fn default() -> Self {
        Self::new(16)
    }
}

impl StorageKeyGenerator for RandomKeyGenerator {
    fn generate(&self, kind: RecordType) -> StorageId {
        let mut bytes = vec![0u8; self.width];
        rand::thread_rng().fill_bytes(&mut bytes);
        StorageId::new(kind, bytes)
    }
}
