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

//! Per-account confirmed/unconfirmed balances.

use crate::account::{Account, Balance, Effect, Pool};
use crate::base::{AccountId, TxId};
use crate::error::StoreError;
use dashmap::DashMap;
use std::sync::Arc;

/// Storage contract for account balances.
///
/// Every mutation is a single atomic step at the storage layer and is
/// idempotent per transaction, so a retried notification can complete a
/// missing step without applying it twice.
pub trait BalanceStore: Send + Sync {
    /// Adds `amount` to `pool` of `account`.
    ///
    /// # Errors
    ///
    /// [`StoreError::AccountNotFound`] if the account is not provisioned.
    fn credit(
        &self,
        account: AccountId,
        pool: Pool,
        amount: u64,
        tx: &TxId,
    ) -> Result<Effect, StoreError>;

    /// Moves `amount` from the unconfirmed pool to the confirmed pool.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AccountNotFound`] if the account is not provisioned.
    /// - [`StoreError::InsufficientUnconfirmed`] if the move would underflow.
    fn move_to_confirmed(
        &self,
        account: AccountId,
        amount: u64,
        tx: &TxId,
    ) -> Result<Effect, StoreError>;

    /// Current balance, or `None` for an unknown account.
    fn balance(&self, account: AccountId) -> Result<Option<Balance>, StoreError>;
}

/// In-memory balance store.
///
/// Accounts are held behind `Arc` so the map shard lock is released before
/// the per-account mutex is taken.
#[derive(Debug, Default)]
pub struct MemoryBalances {
    accounts: DashMap<AccountId, Arc<Account>>,
}

impl MemoryBalances {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Provisions an empty account. Returns `false` if it already existed.
    pub fn open_account(&self, account_id: AccountId) -> bool {
        let mut created = false;
        self.accounts.entry(account_id).or_insert_with(|| {
            created = true;
            Arc::new(Account::new(account_id))
        });
        created
    }

    pub fn get_account(&self, account_id: AccountId) -> Option<Arc<Account>> {
        self.accounts.get(&account_id).map(|entry| Arc::clone(&entry))
    }

    /// All accounts ordered by ID.
    pub fn accounts(&self) -> Vec<Arc<Account>> {
        let mut accounts: Vec<_> = self
            .accounts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        accounts.sort_by_key(|account| account.id());
        accounts
    }

    fn account(&self, account_id: AccountId) -> Result<Arc<Account>, StoreError> {
        self.get_account(account_id)
            .ok_or(StoreError::AccountNotFound)
    }
}

impl BalanceStore for MemoryBalances {
    fn credit(
        &self,
        account: AccountId,
        pool: Pool,
        amount: u64,
        tx: &TxId,
    ) -> Result<Effect, StoreError> {
        self.account(account)?.credit(pool, amount, tx)
    }

    fn move_to_confirmed(
        &self,
        account: AccountId,
        amount: u64,
        tx: &TxId,
    ) -> Result<Effect, StoreError> {
        self.account(account)?.move_to_confirmed(amount, tx)
    }

    fn balance(&self, account: AccountId) -> Result<Option<Balance>, StoreError> {
        Ok(self.get_account(account).map(|account| account.balance()))
    }
}
