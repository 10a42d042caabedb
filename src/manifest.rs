/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;

use crate::storage_id::StorageId;

/// A versioned enumeration of every `StorageId` the server currently holds
/// for an account. `version` increases monotonically with each accepted
/// write.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub version: u64,
    pub storage_ids: HashSet<StorageId>,
}

impl Manifest {
    pub fn new(version: u64, storage_ids: HashSet<StorageId>) -> Self {
        Self {
            version,
            storage_ids,
        }
    }
}
