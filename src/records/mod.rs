/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub mod account;
pub mod contact;
pub mod group_v1;
pub mod group_v2;
pub mod unknown;
