/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::storage_id::StorageId;

/// A record of a type this version of the engine doesn't understand.
/// Carried through verbatim: never merged, never interpreted, just tracked
/// so it can be preserved (or dropped, if the server drops it) across syncs.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownRecord {
    pub storage_id: StorageId,
    pub raw_type: u8,
    pub blob: Vec<u8>,
}
