/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The tagged union of record kinds this engine reconciles, the semantic-key
//! type used to detect duplicates, and the generic per-type processor
//! contract (C2) plus the batch algorithm that drives it.

use std::collections::HashSet;

use crate::error::Result;
use crate::records::account::AccountRecord;
use crate::records::contact::ContactRecord;
use crate::records::group_v1::GroupV1Record;
use crate::records::group_v2::GroupV2Record;
use crate::records::unknown::UnknownRecord;
use crate::storage_id::{RecordType, StorageId};

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Contact(ContactRecord),
    GroupV1(GroupV1Record),
    GroupV2(GroupV2Record),
    Account(AccountRecord),
    Unknown(UnknownRecord),
}

impl Record {
    pub fn storage_id(&self) -> &StorageId {
        match self {
            Record::Contact(r) => &r.storage_id,
            Record::GroupV1(r) => &r.storage_id,
            Record::GroupV2(r) => &r.storage_id,
            Record::Account(r) => &r.storage_id,
            Record::Unknown(r) => &r.storage_id,
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.storage_id().kind()
    }

    /// The key used to detect "the same logical entity" across a merge,
    /// independent of `StorageId`. Only meaningful for validation and tests;
    /// per-type processors compute it themselves during a merge.
    pub fn semantic_key(&self) -> SemanticKey {
        match self {
            Record::Contact(r) => SemanticKey::Text(r.service_address.clone()),
            Record::GroupV1(r) => SemanticKey::Bytes(r.group_id.clone()),
            Record::GroupV2(r) => SemanticKey::Bytes(r.master_key.clone()),
            Record::Account(r) => SemanticKey::Text(r.self_id.clone()),
            Record::Unknown(r) => SemanticKey::Bytes(r.storage_id.as_bytes().to_vec()),
        }
    }
}

/// A stand-in for the `compare`/ordered-set duplicate check described for
/// the record processor: rather than rely on a per-type comparator (which,
/// for some record kinds, is not a total order), duplicates within a merge
/// batch are detected by looking up this key in a map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemanticKey {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for SemanticKey {
    fn from(s: &str) -> Self {
        SemanticKey::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for SemanticKey {
    fn from(b: Vec<u8>) -> Self {
        SemanticKey::Bytes(b)
    }
}

/// A local row whose `StorageId` is about to change carries both the old
/// and new projection so the caller can retire the old id and adopt the new
/// one in the same write.
pub trait HasStorageId {
    fn storage_id(&self) -> &StorageId;
    fn set_storage_id(&mut self, id: StorageId);
}

/// What a merge decided for one matched remote/local pair. Mirrors the three
/// outcomes a processor's merge step can reach: the remote copy already won,
/// the local copy already won (and nothing changed), or neither did and a
/// fresh record with a new `StorageId` replaces both.
pub enum MergeOutcome<R> {
    KeepRemote,
    KeepLocal,
    Replace(R),
}

pub struct StorageRecordUpdate<R> {
    pub old: R,
    pub new: R,
}

pub struct ProcessResult<R> {
    pub remote_updates: Vec<StorageRecordUpdate<R>>,
    pub remote_deletes: Vec<R>,
    /// How many remote records had no local match and were inserted fresh.
    pub inserted_local: usize,
    /// How many local rows were touched by `update_local`, whether the
    /// merge kept the remote copy, kept local as-is, or replaced both.
    pub updated_local: usize,
}

/// Per-record-type operations the batch algorithm below drives. Each
/// concrete record kind (contact, group v1/v2, account) implements this
/// against its own local-store matcher and merge policy.
pub trait RecordProcessor {
    type Record: Clone + PartialEq;

    fn record_type(&self) -> RecordType;

    /// Remote records failing basic structural checks are dropped rather
    /// than merged.
    fn is_invalid(&self, remote: &Self::Record) -> bool;

    fn semantic_key(&self, record: &Self::Record) -> SemanticKey;

    fn get_matching(&self, remote: &Self::Record) -> Result<Option<Self::Record>>;

    fn merge(&self, remote: &Self::Record, local: &Self::Record) -> MergeOutcome<Self::Record>;

    fn insert_local(&self, record: &Self::Record) -> Result<()>;

    fn update_local(&self, old: &Self::Record, new: &Self::Record) -> Result<()>;
}

/// Runs every fetched remote record of one type through its processor:
/// invalid records are dropped, unmatched records are inserted as new local
/// rows, and matched records are merged. Duplicate semantic keys within the
/// batch (two remote records resolving to the same local row) are coalesced
/// by deleting the later one.
pub fn process_batch<P: RecordProcessor>(
    processor: &P,
    remotes: Vec<P::Record>,
) -> Result<ProcessResult<P::Record>> {
    let mut matched: HashSet<SemanticKey> = HashSet::new();
    let mut remote_deletes = Vec::new();
    let mut remote_updates = Vec::new();
    let mut inserted_local = 0;
    let mut updated_local = 0;

    for remote in remotes {
        if processor.is_invalid(&remote) {
            log::warn!("{:?}: dropping invalid remote record", processor.record_type());
            remote_deletes.push(remote);
            continue;
        }

        let local = match processor.get_matching(&remote)? {
            Some(local) => local,
            None => {
                processor.insert_local(&remote)?;
                inserted_local += 1;
                continue;
            }
        };

        let outcome = processor.merge(&remote, &local);
        let key = processor.semantic_key(&local);

        if matched.contains(&key) {
            log::warn!(
                "{:?}: coalescing duplicate semantic key within batch",
                processor.record_type()
            );
            remote_deletes.push(remote);
            continue;
        }
        matched.insert(key);

        match outcome {
            MergeOutcome::KeepRemote => {
                processor.update_local(&local, &remote)?;
                updated_local += 1;
            }
            MergeOutcome::KeepLocal => {}
            MergeOutcome::Replace(merged) => {
                processor.update_local(&local, &merged)?;
                updated_local += 1;
                remote_updates.push(StorageRecordUpdate { old: remote, new: merged });
            }
        }
    }

    Ok(ProcessResult {
        remote_updates,
        remote_deletes,
        inserted_local,
        updated_local,
    })
}

/// `OR`-merges a sticky boolean flag: once either side sets it, the merged
/// record carries it forward.
pub fn or_merge(remote: bool, local: bool) -> bool {
    remote || local
}

/// Takes the larger of two monotonic timestamps.
pub fn max_u64(remote: u64, local: u64) -> u64 {
    remote.max(local)
}

/// Carries an opaque, not-locally-understood byte blob through a merge
/// unchanged. Remote wins: a newer client may have written fields into it
/// that this one doesn't parse, and those must not be dropped.
pub fn carry_unknown_fields(remote: &[u8], _local: &[u8]) -> Vec<u8> {
    remote.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq)]
    struct DupTestRecord {
        key: String,
        value: u32,
    }

    /// A minimal processor whose local store is keyed by semantic key, so
    /// two remote records sharing a key both resolve to the same local row
    /// — the shape `process_batch` must coalesce rather than apply twice.
    struct DupProcessor {
        local: RefCell<HashMap<String, DupTestRecord>>,
    }

    impl RecordProcessor for DupProcessor {
        type Record = DupTestRecord;

        fn record_type(&self) -> RecordType {
            RecordType::Contact
        }

        fn is_invalid(&self, _remote: &DupTestRecord) -> bool {
            false
        }

        fn semantic_key(&self, record: &DupTestRecord) -> SemanticKey {
            SemanticKey::Text(record.key.clone())
        }

        fn get_matching(&self, remote: &DupTestRecord) -> Result<Option<DupTestRecord>> {
            Ok(self.local.borrow().get(&remote.key).cloned())
        }

        fn merge(&self, remote: &DupTestRecord, _local: &DupTestRecord) -> MergeOutcome<DupTestRecord> {
            MergeOutcome::Replace(remote.clone())
        }

        fn insert_local(&self, record: &DupTestRecord) -> Result<()> {
            self.local.borrow_mut().insert(record.key.clone(), record.clone());
            Ok(())
        }

        fn update_local(&self, _old: &DupTestRecord, new: &DupTestRecord) -> Result<()> {
            self.local.borrow_mut().insert(new.key.clone(), new.clone());
            Ok(())
        }
    }

    #[test]
    fn process_batch_coalesces_two_remotes_matching_the_same_semantic_key() {
        let mut seed = HashMap::new();
        seed.insert("dup".to_owned(), DupTestRecord { key: "dup".into(), value: 1 });
        let processor = DupProcessor { local: RefCell::new(seed) };

        let remotes = vec![
            DupTestRecord { key: "dup".into(), value: 2 },
            DupTestRecord { key: "dup".into(), value: 3 },
        ];

        let result = process_batch(&processor, remotes).unwrap();

        // One of the two remotes was applied, the other coalesced away as a
        // duplicate rather than both being merged in turn.
        assert_eq!(result.updated_local, 1);
        assert_eq!(result.remote_deletes.len(), 1);
        assert_eq!(processor.local.borrow().get("dup").unwrap().value, 2);
    }

    #[test]
    fn or_merge_is_sticky() {
        assert!(or_merge(true, false));
        assert!(or_merge(false, true));
        assert!(!or_merge(false, false));
    }

    #[test]
    fn max_u64_takes_larger() {
        assert_eq!(max_u64(5, 9), 9);
        assert_eq!(max_u64(9, 5), 9);
    }

    #[test]
    fn carry_unknown_fields_prefers_remote_bytes() {
        assert_eq!(carry_unknown_fields(&[1, 2], &[3, 4]), vec![1, 2]);
    }
}
