/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The write-operation builder (C3): assembles per-type processor outputs
//! into a single, validated manifest-plus-delta ready to push.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::record::Record;
use crate::storage_id::StorageId;

#[derive(Debug, Clone)]
pub struct WriteOperationResult {
    pub manifest: Manifest,
    pub inserts: Vec<Record>,
    pub deletes: Vec<StorageId>,
}

impl WriteOperationResult {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }

    /// Checks the invariants that must hold before this is ever sent over
    /// the network: `manifest` only names ids that were either carried over
    /// from `prior_manifest` or freshly inserted, inserts and deletes never
    /// overlap, and no two inserted records of the same type collide on
    /// semantic key. A force-push in progress relaxes all three — it's
    /// rebuilding the manifest from scratch, so "carried over" and
    /// "collides with the old copy" don't apply.
    pub fn validate(&self, prior_manifest: &Manifest, needs_force_push: bool) -> Result<()> {
        if needs_force_push {
            return Ok(());
        }

        let insert_ids: HashSet<&StorageId> = self.inserts.iter().map(Record::storage_id).collect();
        let delete_ids: HashSet<&StorageId> = self.deletes.iter().collect();

        for id in &self.manifest.storage_ids {
            if !prior_manifest.storage_ids.contains(id) && !insert_ids.contains(id) {
                return Err(Error::Validation(format!(
                    "manifest names {id:?}, which is neither carried over nor newly inserted"
                )));
            }
        }

        for id in &insert_ids {
            if delete_ids.contains(id) {
                return Err(Error::Validation(format!(
                    "{id:?} appears in both inserts and deletes"
                )));
            }
        }

        let mut seen = HashMap::new();
        for record in &self.inserts {
            let key = (record.record_type(), record.semantic_key());
            if seen.insert(key, ()).is_some() {
                return Err(Error::Validation(
                    "two inserted records of the same type share a semantic key".into(),
                ));
            }
        }

        Ok(())
    }
}

/// One record type's contribution to a merge write: the updates it asked
/// for (old record to retire, new record to insert) and the records it
/// asked to delete outright (invalid or coalesced duplicates).
pub struct Contribution {
    pub updates: Vec<(Record, Record)>,
    pub deletes: Vec<Record>,
}

/// Combines every type's contribution, plus unknown-type deletes, into one
/// `WriteOperationResult` against `post_merge_local_ids` (the full local id
/// set after every processor has run).
pub fn assemble(
    version: u64,
    post_merge_local_ids: HashSet<StorageId>,
    contributions: Vec<Contribution>,
    unknown_deletes: Vec<StorageId>,
) -> WriteOperationResult {
    let mut inserts = Vec::new();
    let mut deletes = Vec::new();

    for contribution in contributions {
        for (old, new) in contribution.updates {
            deletes.push(old.storage_id().clone());
            inserts.push(new);
        }
        for invalid in contribution.deletes {
            deletes.push(invalid.storage_id().clone());
        }
    }
    deletes.extend(unknown_deletes);

    WriteOperationResult {
        manifest: Manifest::new(version, post_merge_local_ids),
        inserts,
        deletes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::contact::ContactRecord;
    use crate::storage_id::RecordType;

    fn contact(id: u8, addr: &str) -> Record {
        Record::Contact(ContactRecord {
            storage_id: StorageId::new(RecordType::Contact, vec![id]),
            service_address: addr.to_owned(),
            blocked: false,
            profile_sharing_enabled: false,
            archived: false,
            forced_unread: false,
            mute_until: 0,
            unknown_fields: Vec::new(),
        })
    }

    #[test]
    fn validate_rejects_insert_not_reflected_in_manifest_gap() {
        let old_id = StorageId::new(RecordType::Contact, vec![1]);
        let prior = Manifest::new(5, [old_id].into_iter().collect());

        let stray_id = StorageId::new(RecordType::Contact, vec![99]);
        let write = WriteOperationResult {
            manifest: Manifest::new(6, [stray_id].into_iter().collect()),
            inserts: Vec::new(),
            deletes: Vec::new(),
        };

        assert!(write.validate(&prior, false).is_err());
    }

    #[test]
    fn validate_accepts_consistent_write() {
        let old_id = StorageId::new(RecordType::Contact, vec![1]);
        let prior = Manifest::new(5, [old_id.clone()].into_iter().collect());

        let new = contact(2, "+15550100");
        let new_id = new.storage_id().clone();
        let write = WriteOperationResult {
            manifest: Manifest::new(6, [new_id].into_iter().collect()),
            inserts: vec![new],
            deletes: vec![old_id],
        };

        assert!(write.validate(&prior, false).is_ok());
    }

    #[test]
    fn validate_rejects_id_in_both_inserts_and_deletes() {
        let record = contact(3, "+15550100");
        let id = record.storage_id().clone();
        let prior = Manifest::new(1, HashSet::new());
        let write = WriteOperationResult {
            manifest: Manifest::new(2, [id.clone()].into_iter().collect()),
            inserts: vec![record],
            deletes: vec![id],
        };

        assert!(write.validate(&prior, false).is_err());
    }

    #[test]
    fn force_push_bypasses_carryover_check() {
        let stray_id = StorageId::new(RecordType::Contact, vec![99]);
        let prior = Manifest::new(1, HashSet::new());
        let write = WriteOperationResult {
            manifest: Manifest::new(2, [stray_id].into_iter().collect()),
            inserts: Vec::new(),
            deletes: Vec::new(),
        };

        assert!(write.validate(&prior, true).is_ok());
    }
}
