/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The network boundary. Nothing on the other side of this trait may be
//! called while a local transaction is open.

use crate::error::Result;
use crate::manifest::Manifest;
use crate::record::Record;
use crate::storage_id::StorageId;
use crate::write_operation::WriteOperationResult;

/// What the server did with a pushed `WriteOperationResult`.
#[derive(Debug)]
pub enum PushOutcome {
    /// The compare-and-set succeeded; the caller's own manifest is now
    /// canonical.
    Accepted,
    /// Another client raced us; the server's current manifest is returned
    /// so the caller can retry against it.
    Conflict { server_manifest: Manifest },
}

pub trait RemoteStorageClient {
    /// Returns `None` if the server's manifest is already at
    /// `known_version`; otherwise returns the current manifest.
    fn get_storage_manifest_if_different_version(
        &self,
        storage_key: &[u8],
        known_version: u64,
    ) -> Result<Option<Manifest>>;

    /// Fetches and decrypts the requested ids. May return fewer records
    /// than requested if the server no longer has some of them.
    fn read_storage_records(&self, storage_key: &[u8], ids: &[StorageId]) -> Result<Vec<Record>>;

    /// Atomically applies `write` if and only if the server's manifest is
    /// still at the version `write` was built against.
    fn write_storage_records(
        &self,
        storage_key: &[u8],
        write: &WriteOperationResult,
    ) -> Result<PushOutcome>;
}
