/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::error::Result;
use crate::local_store::LocalStore;
use crate::record::{carry_unknown_fields, max_u64, or_merge, HasStorageId, MergeOutcome, RecordProcessor, SemanticKey};
use crate::storage_id::{RecordType, StorageId, StorageKeyGenerator};

/// A v1 (legacy, non-E2E-capable) group. `group_id` is a 16-byte identifier;
/// anything else is malformed.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupV1Record {
    pub storage_id: StorageId,
    pub group_id: Vec<u8>,
    pub migrated_to_group_v2: bool,
    pub blocked: bool,
    pub profile_sharing: bool,
    pub archived: bool,
    pub forced_unread: bool,
    pub mute_until: u64,
    pub unknown_fields: Vec<u8>,
}

const GROUP_V1_ID_LEN: usize = 16;

impl HasStorageId for GroupV1Record {
    fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    fn set_storage_id(&mut self, id: StorageId) {
        self.storage_id = id;
    }
}

fn attrs_eq(a: &GroupV1Record, b: &GroupV1Record) -> bool {
    a.blocked == b.blocked
        && a.profile_sharing == b.profile_sharing
        && a.archived == b.archived
        && a.forced_unread == b.forced_unread
        && a.mute_until == b.mute_until
        && a.unknown_fields == b.unknown_fields
}

pub struct GroupV1Processor<'a> {
    store: &'a dyn LocalStore,
    key_gen: &'a dyn StorageKeyGenerator,
}

impl<'a> GroupV1Processor<'a> {
    pub fn new(store: &'a dyn LocalStore, key_gen: &'a dyn StorageKeyGenerator) -> Self {
        Self { store, key_gen }
    }
}

impl<'a> RecordProcessor for GroupV1Processor<'a> {
    type Record = GroupV1Record;

    fn record_type(&self) -> RecordType {
        RecordType::GroupV1
    }

    fn is_invalid(&self, remote: &GroupV1Record) -> bool {
        remote.group_id.len() != GROUP_V1_ID_LEN || remote.migrated_to_group_v2
    }

    fn semantic_key(&self, record: &GroupV1Record) -> SemanticKey {
        SemanticKey::Bytes(record.group_id.clone())
    }

    fn get_matching(&self, remote: &GroupV1Record) -> Result<Option<GroupV1Record>> {
        self.store.get_group_v1_by_group_id(&remote.group_id)
    }

    fn merge(&self, remote: &GroupV1Record, local: &GroupV1Record) -> MergeOutcome<GroupV1Record> {
        // Every mergeable attribute here is sticky (OR) or monotonic (max);
        // `profile_sharing` in particular merges against its own remote/local
        // value, not against `blocked`.
        let merged_attrs = GroupV1Record {
            storage_id: remote.storage_id.clone(),
            group_id: remote.group_id.clone(),
            migrated_to_group_v2: remote.migrated_to_group_v2,
            blocked: or_merge(remote.blocked, local.blocked),
            profile_sharing: or_merge(remote.profile_sharing, local.profile_sharing),
            archived: or_merge(remote.archived, local.archived),
            forced_unread: or_merge(remote.forced_unread, local.forced_unread),
            mute_until: max_u64(remote.mute_until, local.mute_until),
            unknown_fields: carry_unknown_fields(&remote.unknown_fields, &local.unknown_fields),
        };

        if attrs_eq(&merged_attrs, remote) {
            MergeOutcome::KeepRemote
        } else if attrs_eq(&merged_attrs, local) {
            MergeOutcome::KeepLocal
        } else {
            MergeOutcome::Replace(GroupV1Record {
                storage_id: self.key_gen.generate(RecordType::GroupV1),
                ..merged_attrs
            })
        }
    }

    fn insert_local(&self, record: &GroupV1Record) -> Result<()> {
        self.store.insert_group_v1(record)
    }

    fn update_local(&self, old: &GroupV1Record, new: &GroupV1Record) -> Result<()> {
        self.store.update_group_v1(old, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::test_support::InMemoryStore;

    fn group(id: u8, blocked: bool, profile_sharing: bool) -> GroupV1Record {
        GroupV1Record {
            storage_id: StorageId::new(RecordType::GroupV1, vec![id; GROUP_V1_ID_LEN]),
            group_id: vec![id; GROUP_V1_ID_LEN],
            migrated_to_group_v2: false,
            blocked,
            profile_sharing,
            archived: false,
            forced_unread: false,
            mute_until: 0,
            unknown_fields: Vec::new(),
        }
    }

    #[test]
    fn profile_sharing_merges_independently_of_blocked() {
        let store = InMemoryStore::new();
        let key_gen = crate::storage_id::RandomKeyGenerator::default();
        let processor = GroupV1Processor::new(&store, &key_gen);

        let remote = group(7, false, true);
        let local = group(7, true, false);

        match processor.merge(&remote, &local) {
            MergeOutcome::Replace(merged) => {
                assert!(merged.blocked);
                assert!(merged.profile_sharing);
            }
            other => panic!("expected Replace, got something else: {:?}", matches_name(&other)),
        }
    }

    fn matches_name<R>(o: &MergeOutcome<R>) -> &'static str {
        match o {
            MergeOutcome::KeepRemote => "KeepRemote",
            MergeOutcome::KeepLocal => "KeepLocal",
            MergeOutcome::Replace(_) => "Replace",
        }
    }

    #[test]
    fn is_invalid_rejects_malformed_or_migrated_groups() {
        let store = InMemoryStore::new();
        let key_gen = crate::storage_id::RandomKeyGenerator::default();
        let processor = GroupV1Processor::new(&store, &key_gen);

        let mut g = group(1, false, false);
        assert!(!processor.is_invalid(&g));

        g.migrated_to_group_v2 = true;
        assert!(processor.is_invalid(&g));

        let mut bad_len = group(1, false, false);
        bad_len.group_id = vec![1, 2, 3];
        assert!(processor.is_invalid(&bad_len));
    }
}
