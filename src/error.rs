/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::storage_id::StorageId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The account isn't ready to sync (not registered, still provisioning,
    /// ...). Callers should skip the cycle silently rather than treat this
    /// as a failure.
    #[error("account is not ready for sync")]
    NotReady,

    /// Transient transport failure talking to the storage service. Callers
    /// should treat this as retryable.
    #[error("network error during sync: {0}")]
    Network(#[source] anyhow::Error),

    /// The server rejected a compare-and-set write because another client
    /// moved the manifest first. The caller should retry later.
    #[error("remote manifest moved under us")]
    RemoteConflict,

    /// A remote record could not be decrypted. Raised by a
    /// `RemoteStorageClient` implementation that owns decryption; this
    /// crate doesn't implement any crypto itself.
    #[error("could not decrypt a remote record")]
    DecryptFailure,

    /// The key-difference computer found the same id bytes tagged with two
    /// different record types on the two sides.
    #[error("key difference reports a record-type mismatch")]
    TypeMismatch,

    /// The server returned fewer records than we asked for.
    #[error("server did not return all requested records")]
    MissingRecord,

    /// A `StorageId` the key-difference computer says is local-only has no
    /// backing row in the local store.
    #[error("no local row backs storage id {0:?}")]
    MissingLocalModel(StorageId),

    /// A GroupV2 row has no master key, so no stable semantic key can be
    /// derived for it.
    #[error("GroupV2 row is missing its master key")]
    MissingGv2MasterKey,

    /// A write operation failed one of its pre-push invariants.
    #[error("write operation failed validation: {0}")]
    Validation(String),

    /// The sync was cancelled at a suspension point.
    #[error("sync was cancelled")]
    Cancelled,

    /// Everything else: local store failures surfaced through `anyhow`,
    /// since this crate doesn't own the store's implementation.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<crate::interrupt::Interrupted> for Error {
    fn from(_: crate::interrupt::Interrupted) -> Self {
        Error::Cancelled
    }
}

pub type Result<T> = std::result::Result<T, Error>;
