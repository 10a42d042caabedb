/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![allow(unknown_lints)]

mod error;
mod interrupt;
mod key_difference;
mod local_store;
mod manifest;
mod record;
mod records;
mod remote_client;
mod storage_id;
mod sync;
pub mod telemetry;
mod write_operation;

pub use crate::error::{Error, Result};
pub use crate::interrupt::{InterruptScope, Interruptee, NeverInterrupts};
pub use crate::key_difference::KeyDifference;
pub use crate::local_store::{LocalStore, PendingChanges, RowRef};
pub use crate::manifest::Manifest;
pub use crate::record::{MergeOutcome, ProcessResult, Record, RecordProcessor, SemanticKey};
pub use crate::records::account::{AccountProcessor, AccountRecord};
pub use crate::records::contact::{ContactProcessor, ContactRecord};
pub use crate::records::group_v1::{GroupV1Processor, GroupV1Record};
pub use crate::records::group_v2::{GroupV2Processor, GroupV2Record};
pub use crate::records::unknown::UnknownRecord;
pub use crate::remote_client::{PushOutcome, RemoteStorageClient};
pub use crate::storage_id::{RandomKeyGenerator, RecordType, StorageId, StorageKeyGenerator};
pub use crate::sync::{synchronize, SyncContext, SyncOutcome};
