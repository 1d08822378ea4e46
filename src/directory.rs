// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Account label resolution.
//!
//! The node reports the wallet account label a deposit landed on; the
//! directory maps that label to the ledger account.

use crate::base::AccountId;
use crate::error::StoreError;
use dashmap::DashMap;

pub trait AccountDirectory: Send + Sync {
    /// Resolves a label, `Ok(None)` when nothing is registered under it.
    fn resolve(&self, label: &str) -> Result<Option<AccountId>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    labels: DashMap<String, AccountId>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            labels: DashMap::new(),
        }
    }

    /// Binds `label` to `account_id`, replacing any previous binding.
    pub fn register(&self, label: impl Into<String>, account_id: AccountId) {
        self.labels.insert(label.into(), account_id);
    }
}

impl AccountDirectory for MemoryDirectory {
    fn resolve(&self, label: &str) -> Result<Option<AccountId>, StoreError> {
        Ok(self.labels.get(label).map(|entry| *entry))
    }
}
