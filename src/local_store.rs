/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The contract this engine reconciles against. The engine owns neither the
//! schema nor the transaction mechanics beyond the boundary enforced here:
//! everything between `begin_transaction` and `end_transaction` must be pure
//! local storage, no network calls.

use std::collections::HashMap;

use crate::error::Result;
use crate::record::Record;
use crate::records::account::AccountRecord;
use crate::records::contact::ContactRecord;
use crate::records::group_v1::GroupV1Record;
use crate::records::group_v2::GroupV2Record;
use crate::storage_id::StorageId;

/// A stable reference to a local row, independent of its current
/// `StorageId` (which rotates on every update). Opaque to this crate; the
/// store chooses its own representation (primary key, UUID, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowRef(pub u64);

/// The dirty-flag-driven changes a store has accumulated locally since the
/// last successful sync, for one record type.
#[derive(Debug)]
pub struct PendingChanges<R> {
    pub inserts: Vec<R>,
    pub updates: Vec<(R, R)>,
    pub deletes: Vec<R>,
}

impl<R> Default for PendingChanges<R> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

pub trait LocalStore {
    // -- per-type matchers (getMatching) --
    fn get_contact_by_service_address(&self, service_address: &str) -> Result<Option<ContactRecord>>;
    fn get_group_v1_by_group_id(&self, group_id: &[u8]) -> Result<Option<GroupV1Record>>;
    fn get_group_v2_by_master_key(&self, master_key: &[u8]) -> Result<Option<GroupV2Record>>;
    fn get_account(&self) -> Result<Option<AccountRecord>>;

    // -- insert/update side effects driven by a processor's merge outcome --
    fn insert_contact(&self, record: &ContactRecord) -> Result<()>;
    fn update_contact(&self, old: &ContactRecord, new: &ContactRecord) -> Result<()>;
    fn insert_group_v1(&self, record: &GroupV1Record) -> Result<()>;
    fn update_group_v1(&self, old: &GroupV1Record, new: &GroupV1Record) -> Result<()>;
    fn insert_group_v2(&self, record: &GroupV2Record) -> Result<()>;
    fn update_group_v2(&self, old: &GroupV2Record, new: &GroupV2Record) -> Result<()>;
    /// Establishes the local account row the first time a remote one is
    /// seen with no local counterpart yet.
    fn insert_account(&self, record: &AccountRecord) -> Result<()>;
    fn update_account(&self, old: &AccountRecord, new: &AccountRecord) -> Result<()>;

    /// Looks a row up by its current `StorageId`, regardless of type. Used
    /// to materialize local-only leftovers after per-type merges have run.
    fn get_by_storage_id(&self, id: &StorageId) -> Result<Option<Record>>;

    // -- unknown-type bulk bookkeeping --
    fn insert_unknown_ids(&self, ids: &[StorageId]) -> Result<()>;
    fn delete_unknown_ids(&self, ids: &[StorageId]) -> Result<()>;

    /// Every `StorageId` this store currently believes it holds, across all
    /// record types.
    fn get_all_local_storage_ids(&self) -> Result<Vec<StorageId>>;

    // -- dirty-flag driven local-change collection --
    fn get_pending_contact_changes(&self) -> Result<PendingChanges<ContactRecord>>;
    fn get_pending_group_v1_changes(&self) -> Result<PendingChanges<GroupV1Record>>;
    fn get_pending_group_v2_changes(&self) -> Result<PendingChanges<GroupV2Record>>;
    fn get_pending_account_change(&self) -> Result<Option<(AccountRecord, AccountRecord)>>;

    fn clear_dirty_state_for_storage_ids(&self, ids: &[StorageId]) -> Result<()>;

    /// Associates rows with freshly minted `StorageId`s after a local push,
    /// keyed by the store's own stable row reference.
    fn update_storage_ids(&self, rotations: &HashMap<RowRef, StorageId>) -> Result<()>;

    fn get_storage_manifest_version(&self) -> Result<u64>;
    fn set_storage_manifest_version(&self, version: u64) -> Result<()>;

    // -- transaction boundary: never call the remote client while a
    // transaction is open. --
    fn begin_transaction(&self) -> Result<()>;
    fn set_transaction_successful(&self) -> Result<()>;
    fn end_transaction(&self) -> Result<()>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap as Map;

    /// A minimal, non-persistent `LocalStore` for unit tests: a handful of
    /// `RefCell`-guarded maps standing in for tables.
    #[derive(Default)]
    pub struct InMemoryStore {
        contacts: RefCell<Map<String, ContactRecord>>,
        group_v1s: RefCell<Map<Vec<u8>, GroupV1Record>>,
        group_v2s: RefCell<Map<Vec<u8>, GroupV2Record>>,
        account: RefCell<Option<AccountRecord>>,
        unknown_ids: RefCell<Vec<StorageId>>,
        manifest_version: RefCell<u64>,
        in_transaction: RefCell<bool>,
        transaction_ok: RefCell<bool>,
        pending_contacts: RefCell<PendingChanges<ContactRecord>>,
        pending_group_v1s: RefCell<PendingChanges<GroupV1Record>>,
        pending_group_v2s: RefCell<PendingChanges<GroupV2Record>>,
        pending_account: RefCell<Option<(AccountRecord, AccountRecord)>>,
        cleared_dirty_ids: RefCell<Vec<StorageId>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_contact(&self, record: ContactRecord) {
            self.contacts.borrow_mut().insert(record.service_address.clone(), record);
        }

        pub fn seed_group_v1(&self, record: GroupV1Record) {
            self.group_v1s.borrow_mut().insert(record.group_id.clone(), record);
        }

        pub fn seed_group_v2(&self, record: GroupV2Record) {
            self.group_v2s.borrow_mut().insert(record.master_key.clone(), record);
        }

        pub fn seed_account(&self, record: AccountRecord) {
            *self.account.borrow_mut() = Some(record);
        }

        pub fn contact(&self, service_address: &str) -> Option<ContactRecord> {
            self.contacts.borrow().get(service_address).cloned()
        }

        /// Marks a locally-created row as pending, to be picked up by the
        /// next `push_local_changes` call.
        pub fn mark_pending_contact_insert(&self, record: ContactRecord) {
            self.pending_contacts.borrow_mut().inserts.push(record);
        }

        pub fn mark_pending_contact_update(&self, old: ContactRecord, new: ContactRecord) {
            self.pending_contacts.borrow_mut().updates.push((old, new));
        }

        pub fn mark_pending_contact_delete(&self, record: ContactRecord) {
            self.pending_contacts.borrow_mut().deletes.push(record);
        }

        pub fn mark_pending_group_v1_insert(&self, record: GroupV1Record) {
            self.pending_group_v1s.borrow_mut().inserts.push(record);
        }

        pub fn mark_pending_group_v2_insert(&self, record: GroupV2Record) {
            self.pending_group_v2s.borrow_mut().inserts.push(record);
        }

        pub fn mark_pending_account_change(&self, old: AccountRecord, new: AccountRecord) {
            *self.pending_account.borrow_mut() = Some((old, new));
        }

        /// Every `StorageId` passed to `clear_dirty_state_for_storage_ids` so
        /// far, for tests to assert a local push actually cleared dirty
        /// flags after a successful write.
        pub fn cleared_dirty_ids(&self) -> Vec<StorageId> {
            self.cleared_dirty_ids.borrow().clone()
        }
    }

    impl LocalStore for InMemoryStore {
        fn get_contact_by_service_address(&self, service_address: &str) -> Result<Option<ContactRecord>> {
            Ok(self.contacts.borrow().get(service_address).cloned())
        }

        fn get_group_v1_by_group_id(&self, group_id: &[u8]) -> Result<Option<GroupV1Record>> {
            Ok(self.group_v1s.borrow().get(group_id).cloned())
        }

        fn get_group_v2_by_master_key(&self, master_key: &[u8]) -> Result<Option<GroupV2Record>> {
            Ok(self.group_v2s.borrow().get(master_key).cloned())
        }

        fn get_account(&self) -> Result<Option<AccountRecord>> {
            Ok(self.account.borrow().clone())
        }

        fn insert_contact(&self, record: &ContactRecord) -> Result<()> {
            self.contacts.borrow_mut().insert(record.service_address.clone(), record.clone());
            Ok(())
        }

        fn update_contact(&self, old: &ContactRecord, new: &ContactRecord) -> Result<()> {
            self.contacts.borrow_mut().remove(&old.service_address);
            self.contacts.borrow_mut().insert(new.service_address.clone(), new.clone());
            Ok(())
        }

        fn insert_group_v1(&self, record: &GroupV1Record) -> Result<()> {
            self.group_v1s.borrow_mut().insert(record.group_id.clone(), record.clone());
            Ok(())
        }

        fn update_group_v1(&self, old: &GroupV1Record, new: &GroupV1Record) -> Result<()> {
            self.group_v1s.borrow_mut().remove(&old.group_id);
            self.group_v1s.borrow_mut().insert(new.group_id.clone(), new.clone());
            Ok(())
        }

        fn insert_group_v2(&self, record: &GroupV2Record) -> Result<()> {
            self.group_v2s.borrow_mut().insert(record.master_key.clone(), record.clone());
            Ok(())
        }

        fn update_group_v2(&self, old: &GroupV2Record, new: &GroupV2Record) -> Result<()> {
            self.group_v2s.borrow_mut().remove(&old.master_key);
            self.group_v2s.borrow_mut().insert(new.master_key.clone(), new.clone());
            Ok(())
        }

        fn insert_account(&self, record: &AccountRecord) -> Result<()> {
            *self.account.borrow_mut() = Some(record.clone());
            Ok(())
        }

        fn update_account(&self, _old: &AccountRecord, new: &AccountRecord) -> Result<()> {
            *self.account.borrow_mut() = Some(new.clone());
            Ok(())
        }

        fn get_by_storage_id(&self, id: &StorageId) -> Result<Option<Record>> {
            if let Some(r) = self.contacts.borrow().values().find(|r| &r.storage_id == id) {
                return Ok(Some(Record::Contact(r.clone())));
            }
            if let Some(r) = self.group_v1s.borrow().values().find(|r| &r.storage_id == id) {
                return Ok(Some(Record::GroupV1(r.clone())));
            }
            if let Some(r) = self.group_v2s.borrow().values().find(|r| &r.storage_id == id) {
                return Ok(Some(Record::GroupV2(r.clone())));
            }
            if let Some(r) = self.account.borrow().as_ref() {
                if &r.storage_id == id {
                    return Ok(Some(Record::Account(r.clone())));
                }
            }
            Ok(None)
        }

        fn insert_unknown_ids(&self, ids: &[StorageId]) -> Result<()> {
            self.unknown_ids.borrow_mut().extend(ids.iter().cloned());
            Ok(())
        }

        fn delete_unknown_ids(&self, ids: &[StorageId]) -> Result<()> {
            self.unknown_ids.borrow_mut().retain(|id| !ids.contains(id));
            Ok(())
        }

        fn get_all_local_storage_ids(&self) -> Result<Vec<StorageId>> {
            let mut ids: Vec<StorageId> = Vec::new();
            ids.extend(self.contacts.borrow().values().map(|r| r.storage_id.clone()));
            ids.extend(self.group_v1s.borrow().values().map(|r| r.storage_id.clone()));
            ids.extend(self.group_v2s.borrow().values().map(|r| r.storage_id.clone()));
            if let Some(a) = self.account.borrow().as_ref() {
                ids.push(a.storage_id.clone());
            }
            ids.extend(self.unknown_ids.borrow().iter().cloned());
            Ok(ids)
        }

        fn get_pending_contact_changes(&self) -> Result<PendingChanges<ContactRecord>> {
            Ok(std::mem::take(&mut *self.pending_contacts.borrow_mut()))
        }

        fn get_pending_group_v1_changes(&self) -> Result<PendingChanges<GroupV1Record>> {
            Ok(std::mem::take(&mut *self.pending_group_v1s.borrow_mut()))
        }

        fn get_pending_group_v2_changes(&self) -> Result<PendingChanges<GroupV2Record>> {
            Ok(std::mem::take(&mut *self.pending_group_v2s.borrow_mut()))
        }

        fn get_pending_account_change(&self) -> Result<Option<(AccountRecord, AccountRecord)>> {
            Ok(self.pending_account.borrow_mut().take())
        }

        fn clear_dirty_state_for_storage_ids(&self, ids: &[StorageId]) -> Result<()> {
            self.cleared_dirty_ids.borrow_mut().extend(ids.iter().cloned());
            Ok(())
        }

        fn update_storage_ids(&self, _rotations: &HashMap<RowRef, StorageId>) -> Result<()> {
            Ok(())
        }

        fn get_storage_manifest_version(&self) -> Result<u64> {
            Ok(*self.manifest_version.borrow())
        }

        fn set_storage_manifest_version(&self, version: u64) -> Result<()> {
            *self.manifest_version.borrow_mut() = version;
            Ok(())
        }

        fn begin_transaction(&self) -> Result<()> {
            *self.in_transaction.borrow_mut() = true;
            *self.transaction_ok.borrow_mut() = false;
            Ok(())
        }

        fn set_transaction_successful(&self) -> Result<()> {
            *self.transaction_ok.borrow_mut() = true;
            Ok(())
        }

        fn end_transaction(&self) -> Result<()> {
            *self.in_transaction.borrow_mut() = false;
            Ok(())
        }
    }
}
