/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The sync orchestrator (C4): drives one pull-merge-push cycle. Owns the
//! transaction boundary (nothing between `begin_transaction` and
//! `end_transaction` is allowed to touch the network) and the overall
//! control flow; the actual merge logic lives in the per-type processors.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::interrupt::Interruptee;
use crate::key_difference;
use crate::local_store::LocalStore;
use crate::manifest::Manifest;
use crate::record::{process_batch, HasStorageId, ProcessResult, Record};
use crate::records::account::{AccountProcessor, AccountRecord};
use crate::records::contact::ContactProcessor;
use crate::records::group_v1::GroupV1Processor;
use crate::records::group_v2::GroupV2Processor;
use crate::remote_client::{PushOutcome, RemoteStorageClient};
use crate::storage_id::{RecordType, StorageId, StorageKeyGenerator};
use crate::telemetry::{SyncTelemetry, TypeOutcome};
use crate::write_operation::{self, Contribution, WriteOperationResult};

/// Terminal state of one `synchronize()` call.
#[derive(Debug)]
pub enum SyncOutcome {
    Done { needs_multi_device_sync: bool },
    RetryLater(String),
}

pub struct SyncContext<'a> {
    pub storage_key: &'a [u8],
    /// Precondition check (registration, provisioning, ...) the caller has
    /// already done; `synchronize` just honors it.
    pub is_ready: bool,
    /// This device's own account identifier. A remote `Account` record
    /// authored by anyone else is rejected; cross-account sync is out of
    /// scope.
    pub self_id: &'a str,
    pub remote: &'a dyn RemoteStorageClient,
    pub local: &'a dyn LocalStore,
    pub key_gen: &'a dyn StorageKeyGenerator,
    pub interruptee: &'a dyn Interruptee,
}

/// Runs one pull-merge-push cycle, recording what it did into `telemetry` for
/// the caller to forward to its own telemetry pipeline.
pub fn synchronize(ctx: &SyncContext<'_>, telemetry: &mut SyncTelemetry) -> Result<SyncOutcome> {
    if !ctx.is_ready {
        log::info!("account not ready for sync, skipping");
        telemetry.finish();
        return Ok(SyncOutcome::Done { needs_multi_device_sync: false });
    }

    let mut needs_force_push = false;
    let mut needs_multi_device_sync = false;

    // Step 1: where did we leave off.
    let local_version = ctx.local.get_storage_manifest_version()?;

    // Step 2: ask the server whether anything has changed.
    ctx.interruptee.err_if_interrupted()?;
    let remote_manifest = ctx
        .remote
        .get_storage_manifest_if_different_version(ctx.storage_key, local_version)?;

    let remote_manifest = match remote_manifest {
        Some(m) => m,
        None => {
            log::info!("remote manifest unchanged at version {local_version}");
            let outcome = push_local_changes(ctx, local_version, false, telemetry);
            telemetry.finish();
            return outcome;
        }
    };

    // Step 3: our own view of what we hold.
    let local_ids_before: HashSet<StorageId> = ctx.local.get_all_local_storage_ids()?.into_iter().collect();

    // Step 4: what's different.
    let diff = key_difference::compute(&remote_manifest.storage_ids, &local_ids_before);
    if diff.has_type_mismatches {
        log::warn!("key difference has type mismatches, will force-push");
        needs_force_push = true;
    }

    // Step 5: nothing to merge.
    if diff.is_empty() {
        ctx.local.set_storage_manifest_version(remote_manifest.version)?;
        log::info!("remote manifest version {} carries no new ids", remote_manifest.version);
        telemetry.forced_full_push = needs_force_push;
        let outcome = push_local_changes(ctx, remote_manifest.version, needs_force_push, telemetry);
        telemetry.finish();
        return outcome;
    }

    // Step 6: fetch what we're missing.
    ctx.interruptee.err_if_interrupted()?;
    let requested: Vec<StorageId> = diff.remote_only.iter().cloned().collect();
    let fetched = ctx.remote.read_storage_records(ctx.storage_key, &requested)?;
    if fetched.len() < requested.len() {
        log::warn!(
            "server returned {} of {} requested records, will force-push",
            fetched.len(),
            requested.len()
        );
        needs_force_push = true;
    }

    let mut contacts = Vec::new();
    let mut group_v1s = Vec::new();
    let mut group_v2s = Vec::new();
    let mut accounts = Vec::new();
    let mut unknown_inserts = Vec::new();
    for record in fetched {
        match record {
            Record::Contact(r) => contacts.push(r),
            Record::GroupV1(r) => group_v1s.push(r),
            Record::GroupV2(r) => group_v2s.push(r),
            Record::Account(r) => accounts.push(r),
            Record::Unknown(r) => unknown_inserts.push(r),
        }
    }

    // Steps 7-8: merge, entirely inside a local transaction. No network
    // calls are permitted in this closure.
    ctx.local.begin_transaction()?;
    let merge_result = run_merge_transaction(
        ctx,
        &remote_manifest,
        &diff,
        contacts,
        group_v1s,
        group_v2s,
        accounts,
        unknown_inserts.iter().map(|r| r.storage_id.clone()).collect(),
        telemetry,
    );

    let merge_write = match merge_result {
        Ok(write) => {
            ctx.local.set_transaction_successful()?;
            ctx.local.end_transaction()?;
            write
        }
        Err(e) => {
            ctx.local.end_transaction()?;
            telemetry.record_failure(e.to_string());
            telemetry.finish();
            return Err(e);
        }
    };

    // Step 9: push the merge result, if there's anything to push.
    if !merge_write.is_empty() {
        merge_write.validate(
            &Manifest::new(remote_manifest.version, remote_manifest.storage_ids.clone()),
            needs_force_push,
        )?;
        ctx.interruptee.err_if_interrupted()?;
        match ctx.remote.write_storage_records(ctx.storage_key, &merge_write)? {
            PushOutcome::Accepted => {
                ctx.local.set_storage_manifest_version(merge_write.manifest.version)?;
                needs_multi_device_sync = true;
                log::info!("merge push accepted at version {}", merge_write.manifest.version);
            }
            PushOutcome::Conflict { server_manifest } => {
                log::warn!("merge push conflicted, server moved to version {}", server_manifest.version);
                telemetry.finish();
                return Ok(SyncOutcome::RetryLater("remote conflict on merge push".into()));
            }
        }
    } else {
        ctx.local.set_storage_manifest_version(remote_manifest.version)?;
    }

    // Step 10: push whatever the user changed locally since last sync.
    let local_outcome = push_local_changes(
        ctx,
        ctx.local.get_storage_manifest_version()?,
        needs_force_push,
        telemetry,
    )?;
    let local_flag = match local_outcome {
        SyncOutcome::Done { needs_multi_device_sync: f } => f,
        retry => {
            telemetry.finish();
            return Ok(retry);
        }
    };
    needs_multi_device_sync = needs_multi_device_sync || local_flag;

    // Step 11: escalate to an out-of-band force-push if we detected
    // corruption or partial data earlier.
    telemetry.forced_full_push = needs_force_push;
    if needs_force_push {
        schedule_force_push();
    }

    // Step 12.
    telemetry.finish();
    Ok(SyncOutcome::Done { needs_multi_device_sync })
}

#[allow(clippy::too_many_arguments)]
fn run_merge_transaction(
    ctx: &SyncContext<'_>,
    remote_manifest: &Manifest,
    diff: &key_difference::KeyDifference,
    contacts: Vec<crate::records::contact::ContactRecord>,
    group_v1s: Vec<crate::records::group_v1::GroupV1Record>,
    group_v2s: Vec<crate::records::group_v2::GroupV2Record>,
    accounts: Vec<AccountRecord>,
    unknown_insert_ids: Vec<StorageId>,
    telemetry: &mut SyncTelemetry,
) -> Result<WriteOperationResult> {
    let contact_processor = ContactProcessor::new(ctx.local, ctx.key_gen);
    let contact_result = process_batch(&contact_processor, contacts)?;
    telemetry.contacts = merge_outcome(&contact_result);

    let group_v1_processor = GroupV1Processor::new(ctx.local, ctx.key_gen);
    let group_v1_result = process_batch(&group_v1_processor, group_v1s)?;
    telemetry.group_v1s = merge_outcome(&group_v1_result);

    let group_v2_processor = GroupV2Processor::new(ctx.local, ctx.key_gen);
    let group_v2_result = process_batch(&group_v2_processor, group_v2s)?;
    telemetry.group_v2s = merge_outcome(&group_v2_result);

    let account_processor = AccountProcessor::new(ctx.local, ctx.key_gen, ctx.self_id);
    let account_result = process_batch(&account_processor, accounts)?;
    telemetry.account_updated = account_result.inserted_local > 0 || account_result.updated_local > 0;

    ctx.local.insert_unknown_ids(&unknown_insert_ids)?;
    let unknown_deletes: Vec<StorageId> = diff
        .local_only
        .iter()
        .filter(|id| id.kind() == RecordType::Unknown)
        .cloned()
        .collect();
    ctx.local.delete_unknown_ids(&unknown_deletes)?;

    let contributions = vec![
        to_contribution(contact_result, Record::Contact),
        to_contribution(group_v1_result, Record::GroupV1),
        to_contribution(group_v2_result, Record::GroupV2),
        to_contribution(account_result, Record::Account),
    ];

    let local_ids_after: HashSet<StorageId> = ctx.local.get_all_local_storage_ids()?.into_iter().collect();

    let mut merge_write = write_operation::assemble(
        remote_manifest.version + 1,
        local_ids_after.clone(),
        contributions,
        unknown_deletes,
    );

    // Step 8: reconcile whatever neither side's processor touched — local
    // rows the remote side never heard of, and remote ids nothing local
    // claimed. These didn't go through a processor at all, so materialize
    // them directly from the local store.
    let leftover_diff = key_difference::compute(&remote_manifest.storage_ids, &local_ids_after);
    let already_inserted: HashSet<&StorageId> = merge_write.inserts.iter().map(Record::storage_id).collect();
    let already_deleted: HashSet<&StorageId> = merge_write.deletes.iter().collect();

    let mut newly_cleared = Vec::new();
    for id in &leftover_diff.local_only {
        if already_inserted.contains(id) {
            continue;
        }
        let record = ctx
            .local
            .get_by_storage_id(id)?
            .ok_or_else(|| Error::MissingLocalModel(id.clone()))?;
        if let Record::GroupV2(g) = &record {
            if g.master_key.is_empty() {
                return Err(Error::MissingGv2MasterKey);
            }
        }
        newly_cleared.push(record.storage_id().clone());
        merge_write.inserts.push(record);
    }
    if !newly_cleared.is_empty() {
        ctx.local.clear_dirty_state_for_storage_ids(&newly_cleared)?;
    }

    for id in &leftover_diff.remote_only {
        if already_deleted.contains(id) {
            continue;
        }
        merge_write.deletes.push(id.clone());
    }

    Ok(merge_write)
}

fn to_contribution<R, F>(result: ProcessResult<R>, wrap: F) -> Contribution
where
    F: Fn(R) -> Record,
{
    Contribution {
        updates: result
            .remote_updates
            .into_iter()
            .map(|u| (wrap(u.old), wrap(u.new)))
            .collect(),
        deletes: result.remote_deletes.into_iter().map(wrap).collect(),
    }
}

fn merge_outcome<R>(result: &ProcessResult<R>) -> TypeOutcome {
    TypeOutcome {
        inserted_local: result.inserted_local as u32,
        updated_local: result.updated_local as u32,
        pushed_remote: result.remote_updates.len() as u32,
        deleted_remote: result.remote_deletes.len() as u32,
    }
}

fn push_local_changes(
    ctx: &SyncContext<'_>,
    base_version: u64,
    needs_force_push: bool,
    telemetry: &mut SyncTelemetry,
) -> Result<SyncOutcome> {
    ctx.interruptee.err_if_interrupted()?;

    let mut inserts: Vec<Record> = Vec::new();
    let mut deletes: Vec<StorageId> = Vec::new();
    let mut clear_ids: Vec<StorageId> = Vec::new();

    let contact_changes = ctx.local.get_pending_contact_changes()?;
    telemetry.contacts.pushed_remote += (contact_changes.inserts.len() + contact_changes.updates.len()) as u32;
    telemetry.contacts.deleted_remote += contact_changes.deletes.len() as u32;
    collect_pending(
        &mut inserts,
        &mut deletes,
        &mut clear_ids,
        contact_changes,
        Record::Contact,
        ctx.key_gen,
        RecordType::Contact,
    );

    let group_v1_changes = ctx.local.get_pending_group_v1_changes()?;
    telemetry.group_v1s.pushed_remote += (group_v1_changes.inserts.len() + group_v1_changes.updates.len()) as u32;
    telemetry.group_v1s.deleted_remote += group_v1_changes.deletes.len() as u32;
    collect_pending(
        &mut inserts,
        &mut deletes,
        &mut clear_ids,
        group_v1_changes,
        Record::GroupV1,
        ctx.key_gen,
        RecordType::GroupV1,
    );

    let group_v2_changes = ctx.local.get_pending_group_v2_changes()?;
    telemetry.group_v2s.pushed_remote += (group_v2_changes.inserts.len() + group_v2_changes.updates.len()) as u32;
    telemetry.group_v2s.deleted_remote += group_v2_changes.deletes.len() as u32;
    collect_pending(
        &mut inserts,
        &mut deletes,
        &mut clear_ids,
        group_v2_changes,
        Record::GroupV2,
        ctx.key_gen,
        RecordType::GroupV2,
    );

    if let Some((old, new)) = ctx.local.get_pending_account_change()? {
        telemetry.account_updated = true;
        let mut rotated = new;
        rotated.set_storage_id(ctx.key_gen.generate(RecordType::Account));
        deletes.push(old.storage_id.clone());
        clear_ids.push(rotated.storage_id.clone());
        inserts.push(Record::Account(rotated));
    }

    if inserts.is_empty() && deletes.is_empty() {
        log::debug!("no pending local changes to push");
        return Ok(SyncOutcome::Done { needs_multi_device_sync: false });
    }

    let prior_ids: HashSet<StorageId> = ctx.local.get_all_local_storage_ids()?.into_iter().collect();
    let mut next_ids = prior_ids.clone();
    for id in &deletes {
        next_ids.remove(id);
    }
    for r in &inserts {
        next_ids.insert(r.storage_id().clone());
    }

    let write = WriteOperationResult {
        manifest: Manifest::new(base_version + 1, next_ids),
        inserts,
        deletes,
    };

    write.validate(&Manifest::new(base_version, prior_ids), needs_force_push)?;

    ctx.interruptee.err_if_interrupted()?;
    match ctx.remote.write_storage_records(ctx.storage_key, &write)? {
        PushOutcome::Accepted => {
            ctx.local.clear_dirty_state_for_storage_ids(&clear_ids)?;
            ctx.local.set_storage_manifest_version(write.manifest.version)?;
            log::info!("local push accepted at version {}", write.manifest.version);
            Ok(SyncOutcome::Done { needs_multi_device_sync: true })
        }
        PushOutcome::Conflict { server_manifest } => {
            log::warn!(
                "local push conflicted, server at version {}; dirty flags left untouched",
                server_manifest.version
            );
            Ok(SyncOutcome::RetryLater("remote conflict on local push".into()))
        }
    }
}

fn collect_pending<R, F>(
    inserts: &mut Vec<Record>,
    deletes: &mut Vec<StorageId>,
    clear_ids: &mut Vec<StorageId>,
    changes: crate::local_store::PendingChanges<R>,
    wrap: F,
    key_gen: &dyn StorageKeyGenerator,
    kind: RecordType,
) where
    R: HasStorageId,
    F: Fn(R) -> Record,
{
    for mut record in changes.inserts {
        record.set_storage_id(key_gen.generate(kind));
        clear_ids.push(record.storage_id().clone());
        inserts.push(wrap(record));
    }
    for (old, mut new) in changes.updates {
        deletes.push(old.storage_id().clone());
        new.set_storage_id(key_gen.generate(kind));
        clear_ids.push(new.storage_id().clone());
        inserts.push(wrap(new));
    }
    for record in changes.deletes {
        deletes.push(record.storage_id().clone());
        clear_ids.push(record.storage_id().clone());
    }
}

/// A full rebuild of the remote manifest from our local state, bypassing
/// the normal carried-over/inserted/deleted accounting. This engine detects
/// when one is needed (corrupted id sets, partial fetches) but the rebuild
/// itself runs as a separate, out-of-band job.
fn schedule_force_push() {
    log::warn!("scheduling an out-of-band force-push; not performed by this sync cycle");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::NeverInterrupts;
    use crate::local_store::test_support::InMemoryStore;
    use crate::records::contact::ContactRecord;
    use crate::storage_id::RandomKeyGenerator;
    use std::cell::RefCell;

    struct FakeRemote {
        manifest: RefCell<Option<Manifest>>,
        records: RefCell<Vec<Record>>,
        accept_writes: bool,
        last_write: RefCell<Option<WriteOperationResult>>,
    }

    impl FakeRemote {
        fn new(manifest: Manifest, records: Vec<Record>) -> Self {
            Self {
                manifest: RefCell::new(Some(manifest)),
                records: RefCell::new(records),
                accept_writes: true,
                last_write: RefCell::new(None),
            }
        }
    }

    impl RemoteStorageClient for FakeRemote {
        fn get_storage_manifest_if_different_version(
            &self,
            _storage_key: &[u8],
            known_version: u64,
        ) -> Result<Option<Manifest>> {
            let m = self.manifest.borrow();
            match m.as_ref() {
                Some(manifest) if manifest.version != known_version => Ok(Some(manifest.clone())),
                _ => Ok(None),
            }
        }

        fn read_storage_records(&self, _storage_key: &[u8], ids: &[StorageId]) -> Result<Vec<Record>> {
            Ok(self
                .records
                .borrow()
                .iter()
                .filter(|r| ids.contains(r.storage_id()))
                .cloned()
                .collect())
        }

        fn write_storage_records(&self, _storage_key: &[u8], write: &WriteOperationResult) -> Result<PushOutcome> {
            *self.last_write.borrow_mut() = Some(write.clone());
            if self.accept_writes {
                *self.manifest.borrow_mut() = Some(write.manifest.clone());
                Ok(PushOutcome::Accepted)
            } else {
                Ok(PushOutcome::Conflict {
                    server_manifest: self.manifest.borrow().clone().unwrap(),
                })
            }
        }
    }

    fn contact_record(id: u8, addr: &str, blocked: bool) -> ContactRecord {
        ContactRecord {
            storage_id: StorageId::new(RecordType::Contact, vec![id]),
            service_address: addr.to_owned(),
            blocked,
            profile_sharing_enabled: false,
            archived: false,
            forced_unread: false,
            mute_until: 0,
            unknown_fields: Vec::new(),
        }
    }

    #[test]
    fn not_ready_skips_silently() {
        let local = InMemoryStore::new();
        let remote = FakeRemote::new(Manifest::new(0, HashSet::new()), Vec::new());
        let key_gen = RandomKeyGenerator::default();
        let ctx = SyncContext {
            storage_key: b"key",
            is_ready: false,
            self_id: "self-1",
            remote: &remote,
            local: &local,
            key_gen: &key_gen,
            interruptee: &NeverInterrupts,
        };

        let mut telemetry = SyncTelemetry::new();
        match synchronize(&ctx, &mut telemetry).unwrap() {
            SyncOutcome::Done { needs_multi_device_sync } => assert!(!needs_multi_device_sync),
            SyncOutcome::RetryLater(_) => panic!("expected Done"),
        }
    }

    #[test]
    fn new_remote_contact_is_merged_into_empty_local_store() {
        let local = InMemoryStore::new();
        let remote_record = contact_record(1, "+15550100", true);
        let remote_id = remote_record.storage_id.clone();
        let manifest = Manifest::new(7, [remote_id].into_iter().collect());
        let remote = FakeRemote::new(manifest, vec![Record::Contact(remote_record)]);
        let key_gen = RandomKeyGenerator::default();
        let ctx = SyncContext {
            storage_key: b"key",
            is_ready: true,
            self_id: "self-1",
            remote: &remote,
            local: &local,
            key_gen: &key_gen,
            interruptee: &NeverInterrupts,
        };

        let mut telemetry = SyncTelemetry::new();
        let outcome = synchronize(&ctx, &mut telemetry).unwrap();
        assert!(matches!(outcome, SyncOutcome::Done { .. }));
        assert!(local.contact("+15550100").is_some());
        assert_eq!(local.get_storage_manifest_version().unwrap(), 7);
        assert_eq!(telemetry.contacts.inserted_local, 1);
    }

    #[test]
    fn conflicting_merge_push_returns_retry_later() {
        let local = InMemoryStore::new();
        let local_record = contact_record(2, "+15550199", false);
        local.seed_contact(local_record);

        let remote_record = contact_record(3, "+15550199", true);
        let remote_id = remote_record.storage_id.clone();
        let manifest = Manifest::new(4, [remote_id].into_iter().collect());
        let mut remote = FakeRemote::new(manifest, vec![Record::Contact(remote_record)]);
        remote.accept_writes = false;
        let key_gen = RandomKeyGenerator::default();
        let ctx = SyncContext {
            storage_key: b"key",
            is_ready: true,
            self_id: "self-1",
            remote: &remote,
            local: &local,
            key_gen: &key_gen,
            interruptee: &NeverInterrupts,
        };

        let mut telemetry = SyncTelemetry::new();
        match synchronize(&ctx, &mut telemetry).unwrap() {
            SyncOutcome::RetryLater(_) => {}
            SyncOutcome::Done { .. } => panic!("expected a conflict to surface as RetryLater"),
        }
    }

    #[test]
    fn dirty_local_contact_is_pushed_when_remote_manifest_is_unchanged() {
        let local = InMemoryStore::new();
        local.set_storage_manifest_version(4).unwrap();
        let manifest = Manifest::new(4, HashSet::new());
        let remote = FakeRemote::new(manifest, Vec::new());

        let pending = contact_record(9, "+15550111", true);
        local.mark_pending_contact_insert(pending.clone());

        let key_gen = RandomKeyGenerator::default();
        let ctx = SyncContext {
            storage_key: b"key",
            is_ready: true,
            self_id: "self-1",
            remote: &remote,
            local: &local,
            key_gen: &key_gen,
            interruptee: &NeverInterrupts,
        };

        let mut telemetry = SyncTelemetry::new();
        let outcome = synchronize(&ctx, &mut telemetry).unwrap();
        match outcome {
            SyncOutcome::Done { needs_multi_device_sync } => assert!(needs_multi_device_sync),
            SyncOutcome::RetryLater(_) => panic!("expected Done"),
        }
        assert_eq!(telemetry.contacts.pushed_remote, 1);
        assert_eq!(local.get_storage_manifest_version().unwrap(), 5);
        assert_eq!(local.cleared_dirty_ids().len(), 1);
        assert_ne!(local.cleared_dirty_ids()[0], pending.storage_id);
    }
}
