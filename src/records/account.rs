/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::error::Result;
use crate::local_store::LocalStore;
use crate::record::{carry_unknown_fields, or_merge, HasStorageId, MergeOutcome, RecordProcessor, SemanticKey};
use crate::storage_id::{RecordType, StorageId, StorageKeyGenerator};

/// The single, per-account settings record. There is exactly one of these
/// per account, keyed by the account's own identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub storage_id: StorageId,
    pub self_id: String,
    pub read_receipts_enabled: bool,
    pub typing_indicators_enabled: bool,
    pub link_previews_enabled: bool,
    pub unknown_fields: Vec<u8>,
}

impl HasStorageId for AccountRecord {
    fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    fn set_storage_id(&mut self, id: StorageId) {
        self.storage_id = id;
    }
}

fn attrs_eq(a: &AccountRecord, b: &AccountRecord) -> bool {
    a.read_receipts_enabled == b.read_receipts_enabled
        && a.typing_indicators_enabled == b.typing_indicators_enabled
        && a.link_previews_enabled == b.link_previews_enabled
        && a.unknown_fields == b.unknown_fields
}

pub struct AccountProcessor<'a> {
    store: &'a dyn LocalStore,
    key_gen: &'a dyn StorageKeyGenerator,
    self_id: &'a str,
}

impl<'a> AccountProcessor<'a> {
    pub fn new(store: &'a dyn LocalStore, key_gen: &'a dyn StorageKeyGenerator, self_id: &'a str) -> Self {
        Self { store, key_gen, self_id }
    }
}

impl<'a> RecordProcessor for AccountProcessor<'a> {
    type Record = AccountRecord;

    fn record_type(&self) -> RecordType {
        RecordType::Account
    }

    /// Rejects an empty identifier and, cross-account sync being out of
    /// scope, any remote account record authored by someone other than us.
    fn is_invalid(&self, remote: &AccountRecord) -> bool {
        remote.self_id.trim().is_empty() || remote.self_id != self.self_id
    }

    fn semantic_key(&self, record: &AccountRecord) -> SemanticKey {
        SemanticKey::Text(record.self_id.clone())
    }

    fn get_matching(&self, _remote: &AccountRecord) -> Result<Option<AccountRecord>> {
        self.store.get_account()
    }

    fn merge(&self, remote: &AccountRecord, local: &AccountRecord) -> MergeOutcome<AccountRecord> {
        let merged_attrs = AccountRecord {
            storage_id: remote.storage_id.clone(),
            self_id: remote.self_id.clone(),
            read_receipts_enabled: or_merge(remote.read_receipts_enabled, local.read_receipts_enabled),
            typing_indicators_enabled: or_merge(remote.typing_indicators_enabled, local.typing_indicators_enabled),
            link_previews_enabled: or_merge(remote.link_previews_enabled, local.link_previews_enabled),
            unknown_fields: carry_unknown_fields(&remote.unknown_fields, &local.unknown_fields),
        };

        if attrs_eq(&merged_attrs, remote) {
            MergeOutcome::KeepRemote
        } else if attrs_eq(&merged_attrs, local) {
            MergeOutcome::KeepLocal
        } else {
            MergeOutcome::Replace(AccountRecord {
                storage_id: self.key_gen.generate(RecordType::Account),
                ..merged_attrs
            })
        }
    }

    fn insert_local(&self, record: &AccountRecord) -> Result<()> {
        self.store.insert_account(record)
    }

    fn update_local(&self, old: &AccountRecord, new: &AccountRecord) -> Result<()> {
        self.store.update_account(old, new)
    }
}
