/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::error::Result;
use crate::local_store::LocalStore;
use crate::record::{carry_unknown_fields, max_u64, or_merge, HasStorageId, MergeOutcome, RecordProcessor, SemanticKey};
use crate::storage_id::{RecordType, StorageId, StorageKeyGenerator};

#[derive(Debug, Clone, PartialEq)]
pub struct ContactRecord {
    pub storage_id: StorageId,
    pub service_address: String,
    pub blocked: bool,
    pub profile_sharing_enabled: bool,
    pub archived: bool,
    pub forced_unread: bool,
    pub mute_until: u64,
    pub unknown_fields: Vec<u8>,
}

impl HasStorageId for ContactRecord {
    fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    fn set_storage_id(&mut self, id: StorageId) {
        self.storage_id = id;
    }
}

fn attrs_eq(a: &ContactRecord, b: &ContactRecord) -> bool {
    a.blocked == b.blocked
        && a.profile_sharing_enabled == b.profile_sharing_enabled
        && a.archived == b.archived
        && a.forced_unread == b.forced_unread
        && a.mute_until == b.mute_until
        && a.unknown_fields == b.unknown_fields
}

pub struct ContactProcessor<'a> {
    store: &'a dyn LocalStore,
    key_gen: &'a dyn StorageKeyGenerator,
}

impl<'a> ContactProcessor<'a> {
    pub fn new(store: &'a dyn LocalStore, key_gen: &'a dyn StorageKeyGenerator) -> Self {
        Self { store, key_gen }
    }
}

impl<'a> RecordProcessor for ContactProcessor<'a> {
    type Record = ContactRecord;

    fn record_type(&self) -> RecordType {
        RecordType::Contact
    }

    fn is_invalid(&self, remote: &ContactRecord) -> bool {
        remote.service_address.trim().is_empty()
    }

    fn semantic_key(&self, record: &ContactRecord) -> SemanticKey {
        SemanticKey::Text(record.service_address.clone())
    }

    fn get_matching(&self, remote: &ContactRecord) -> Result<Option<ContactRecord>> {
        self.store.get_contact_by_service_address(&remote.service_address)
    }

    fn merge(&self, remote: &ContactRecord, local: &ContactRecord) -> MergeOutcome<ContactRecord> {
        let merged_attrs = ContactRecord {
            storage_id: remote.storage_id.clone(),
            service_address: remote.service_address.clone(),
            blocked: or_merge(remote.blocked, local.blocked),
            profile_sharing_enabled: or_merge(remote.profile_sharing_enabled, local.profile_sharing_enabled),
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
            MergeOutcome::Replace(ContactRecord {
                storage_id: self.key_gen.generate(RecordType::Contact),
                ..merged_attrs
            })
        }
    }

    fn insert_local(&self, record: &ContactRecord) -> Result<()> {
        self.store.insert_contact(record)
    }

    fn update_local(&self, old: &ContactRecord, new: &ContactRecord) -> Result<()> {
        self.store.update_contact(old, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::test_support::InMemoryStore;

    fn contact(addr: &str, blocked: bool, mute_until: u64) -> ContactRecord {
        ContactRecord {
            storage_id: StorageId::new(RecordType::Contact, addr.as_bytes().to_vec()),
            service_address: addr.to_owned(),
            blocked,
            profile_sharing_enabled: false,
            archived: false,
            forced_unread: false,
            mute_until,
            unknown_fields: Vec::new(),
        }
    }

    #[test]
    fn merge_or_merges_blocked_and_takes_newer_mute() {
        let store = InMemoryStore::new();
        let key_gen = crate::storage_id::RandomKeyGenerator::default();
        let processor = ContactProcessor::new(&store, &key_gen);

        let remote = contact("+15550100", false, 100);
        let local = contact("+15550100", true, 50);

        match processor.merge(&remote, &local) {
            MergeOutcome::Replace(merged) => {
                assert!(merged.blocked);
                assert_eq!(merged.mute_until, 100);
                assert_ne!(merged.storage_id, remote.storage_id);
            }
            _ => panic!("expected a replacement record"),
        }
    }

    #[test]
    fn merge_keeps_remote_when_attributes_already_match() {
        let store = InMemoryStore::new();
        let key_gen = crate::storage_id::RandomKeyGenerator::default();
        let processor = ContactProcessor::new(&store, &key_gen);

        let remote = contact("+15550100", true, 100);
        let local = contact("+15550100", true, 100);

        assert!(matches!(processor.merge(&remote, &local), MergeOutcome::KeepRemote));
    }

    #[test]
    fn is_invalid_rejects_empty_address() {
        let store = InMemoryStore::new();
        let key_gen = crate::storage_id::RandomKeyGenerator::default();
        let processor = ContactProcessor::new(&store, &key_gen);
        assert!(processor.is_invalid(&contact("", false, 0)));
        assert!(!processor.is_invalid(&contact("+15550100", false, 0)));
    }
}
