/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::error::Result;
use crate::local_store::LocalStore;
use crate::record::{carry_unknown_fields, max_u64, or_merge, HasStorageId, MergeOutcome, RecordProcessor, SemanticKey};
use crate::storage_id::{RecordType, StorageId, StorageKeyGenerator};

/// A v2 group, identified by its (group-specific) master key rather than a
/// server-assigned id. Deriving the wire-level group identifier from the
/// master key is a cryptographic concern and out of scope here; the key
/// itself is already a stable, collision-resistant semantic key.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupV2Record {
    pub storage_id: StorageId,
    pub master_key: Vec<u8>,
    pub blocked: bool,
    pub profile_sharing: bool,
    pub archived: bool,
    pub forced_unread: bool,
    pub mute_until: u64,
    pub unknown_fields: Vec<u8>,
}

impl HasStorageId for GroupV2Record {
    fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    fn set_storage_id(&mut self, id: StorageId) {
        self.storage_id = id;
    }
}

fn attrs_eq(a: &GroupV2Record, b: &GroupV2Record) -> bool {
    a.blocked == b.blocked
        && a.profile_sharing == b.profile_sharing
        && a.archived == b.archived
        && a.forced_unread == b.forced_unread
        && a.mute_until == b.mute_until
        && a.unknown_fields == b.unknown_fields
}

pub struct GroupV2Processor<'a> {
    store: &'a dyn LocalStore,
    key_gen: &'a dyn StorageKeyGenerator,
}

impl<'a> GroupV2Processor<'a> {
    pub fn new(store: &'a dyn LocalStore, key_gen: &'a dyn StorageKeyGenerator) -> Self {
        Self { store, key_gen }
    }
}

impl<'a> RecordProcessor for GroupV2Processor<'a> {
    type Record = GroupV2Record;

    fn record_type(&self) -> RecordType {
        RecordType::GroupV2
    }

    fn is_invalid(&self, remote: &GroupV2Record) -> bool {
        remote.master_key.is_empty()
    }

    fn semantic_key(&self, record: &GroupV2Record) -> SemanticKey {
        SemanticKey::Bytes(record.master_key.clone())
    }

    fn get_matching(&self, remote: &GroupV2Record) -> Result<Option<GroupV2Record>> {
        self.store.get_group_v2_by_master_key(&remote.master_key)
    }

    fn merge(&self, remote: &GroupV2Record, local: &GroupV2Record) -> MergeOutcome<GroupV2Record> {
        let merged_attrs = GroupV2Record {
            storage_id: remote.storage_id.clone(),
            master_key: remote.master_key.clone(),
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
            MergeOutcome::Replace(GroupV2Record {
                storage_id: self.key_gen.generate(RecordType::GroupV2),
                ..merged_attrs
            })
        }
    }

    fn insert_local(&self, record: &GroupV2Record) -> Result<()> {
        self.store.insert_group_v2(record)
    }

    fn update_local(&self, old: &GroupV2Record, new: &GroupV2Record) -> Result<()> {
        self.store.update_group_v2(old, new)
    }
}
