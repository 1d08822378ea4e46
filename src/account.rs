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

//! Account balances.
//!
//! Each account holds two pools, both in smallest currency units:
//!
//! ```text
//!  credit(Unconfirmed) ──► unconfirmed ──move_to_confirmed──► confirmed ◄── credit(Confirmed)
//! ```
//!
//! Every balance step is keyed by `(transaction, movement)` and journaled under
//! the same lock as the balance change, so replaying a step is a no-op.
//!
//! # Example
//!
//! ```
//! use deposit_ledger::{Account, AccountId, Effect, Pool, TxId};
//!
//! let account = Account::new(AccountId(1));
//! let tx = TxId::from("a1");
//! assert_eq!(account.credit(Pool::Unconfirmed, 500, &tx).unwrap(), Effect::Applied);
//! assert_eq!(account.credit(Pool::Unconfirmed, 500, &tx).unwrap(), Effect::Replayed);
//! assert_eq!(account.unconfirmed(), 500);
//! ```

use crate::base::{AccountId, TxId};
use crate::error::StoreError;
use crate::transaction::ConfirmationState;
use parking_lot::Mutex;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Balance pool of an account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Unconfirmed,
    Confirmed,
}

impl From<ConfirmationState> for Pool {
    fn from(state: ConfirmationState) -> Self {
        match state {
            ConfirmationState::Unconfirmed => Pool::Unconfirmed,
            ConfirmationState::Confirmed => Pool::Confirmed,
        }
    }
}

/// A single balance step taken on behalf of a transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    /// Initial credit into the pool chosen at first sight.
    Credit,
    /// Unconfirmed → confirmed transfer.
    Confirm,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Credit => "credit",
            MovementKind::Confirm => "confirm",
        }
    }
}

/// What a balance operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The balance changed.
    Applied,
    /// This step was already applied for the transaction; nothing changed.
    Replayed,
}

/// Point-in-time view of an account's pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
}

impl Balance {
    pub fn total(&self) -> u64 {
        self.confirmed.saturating_add(self.unconfirmed)
    }
}

#[derive(Debug)]
struct AccountData {
    account_id: AccountId,
    confirmed: u64,
    unconfirmed: u64,
    /// Balance steps already applied, for replay detection.
    movements: HashSet<(TxId, MovementKind)>,
}

impl AccountData {
    fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            confirmed: 0,
            unconfirmed: 0,
            movements: HashSet::new(),
        }
    }

    /// Adds to one pool.
    fn credit(&mut self, pool: Pool, amount: u64) -> Result<(), StoreError> {
        let slot = match pool {
            Pool::Confirmed => &mut self.confirmed,
            Pool::Unconfirmed => &mut self.unconfirmed,
        };
        *slot = slot
            .checked_add(amount)
            .ok_or_else(|| StoreError::Unavailable("balance overflow".to_string()))?;
        Ok(())
    }

    /// Moves funds from unconfirmed to confirmed.
    fn confirm(&mut self, amount: u64) -> Result<(), StoreError> {
        if self.unconfirmed < amount {
            return Err(StoreError::InsufficientUnconfirmed);
        }
        let confirmed = self
            .confirmed
            .checked_add(amount)
            .ok_or_else(|| StoreError::Unavailable("balance overflow".to_string()))?;
        let total_before = self.total();
        self.unconfirmed -= amount;
        self.confirmed = confirmed;
        debug_assert_eq!(
            total_before,
            self.total(),
            "Invariant violated: confirming changed the total balance"
        );
        Ok(())
    }

    fn total(&self) -> u128 {
        self.confirmed as u128 + self.unconfirmed as u128
    }

    fn apply(
        &mut self,
        tx: &TxId,
        kind: MovementKind,
        step: impl FnOnce(&mut Self) -> Result<(), StoreError>,
    ) -> Result<Effect, StoreError> {
        let key = (tx.clone(), kind);
        if self.movements.contains(&key) {
            return Ok(Effect::Replayed);
        }
        step(self)?;
        self.movements.insert(key);
        Ok(Effect::Applied)
    }
}

/// Ledger account.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(account_id)),
        }
    }

    pub fn id(&self) -> AccountId {
        self.inner.lock().account_id
    }

    pub fn confirmed(&self) -> u64 {
        self.inner.lock().confirmed
    }

    pub fn unconfirmed(&self) -> u64 {
        self.inner.lock().unconfirmed
    }

    /// Consistent snapshot of both pools.
    pub fn balance(&self) -> Balance {
        let data = self.inner.lock();
        Balance {
            confirmed: data.confirmed,
            unconfirmed: data.unconfirmed,
        }
    }

    /// Credits `amount` to `pool` once per transaction.
    pub fn credit(&self, pool: Pool, amount: u64, tx: &TxId) -> Result<Effect, StoreError> {
        self.inner
            .lock()
            .apply(tx, MovementKind::Credit, |data| data.credit(pool, amount))
    }

    /// Moves `amount` from unconfirmed to confirmed once per transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::InsufficientUnconfirmed`] if the unconfirmed pool is
    /// smaller than `amount`. Nothing is journaled in that case.
    pub fn move_to_confirmed(&self, amount: u64, tx: &TxId) -> Result<Effect, StoreError> {
        self.inner
            .lock()
            .apply(tx, MovementKind::Confirm, |data| data.confirm(amount))
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Account", 4)?;
        state.serialize_field("account", &data.account_id)?;
        state.serialize_field("confirmed", &data.confirmed)?;
        state.serialize_field("unconfirmed", &data.unconfirmed)?;
        state.serialize_field("total", &data.confirmed.saturating_add(data.unconfirmed))?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str) -> TxId {
        TxId::from(id)
    }

    // === AccountData Internal Tests ===

    #[test]
    fn account_data_credit_targets_pool() {
        let mut data = AccountData::new(AccountId(1));
        data.credit(Pool::Unconfirmed, 30).unwrap();
        data.credit(Pool::Confirmed, 70).unwrap();
        assert_eq!(data.unconfirmed, 30);
        assert_eq!(data.confirmed, 70);
    }

    #[test]
    fn account_data_confirm_moves_funds() {
        let mut data = AccountData::new(AccountId(1));
        data.credit(Pool::Unconfirmed, 100).unwrap();
        data.confirm(40).unwrap();
        assert_eq!(data.unconfirmed, 60);
        assert_eq!(data.confirmed, 40);
    }

    #[test]
    fn account_data_confirm_underflow_returns_error() {
        let mut data = AccountData::new(AccountId(1));
        data.credit(Pool::Unconfirmed, 10).unwrap();
        assert_eq!(data.confirm(11), Err(StoreError::InsufficientUnconfirmed));
        assert_eq!(data.unconfirmed, 10);
        assert_eq!(data.confirmed, 0);
    }

    #[test]
    fn account_data_credit_overflow_returns_error() {
        let mut data = AccountData::new(AccountId(1));
        data.credit(Pool::Confirmed, u64::MAX).unwrap();
        assert!(matches!(
            data.credit(Pool::Confirmed, 1),
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(data.confirmed, u64::MAX);
    }

    // === Journal Tests ===

    #[test]
    fn credit_is_idempotent_per_transaction() {
        let account = Account::new(AccountId(1));
        assert_eq!(
            account.credit(Pool::Unconfirmed, 5, &tx("a")).unwrap(),
            Effect::Applied
        );
        assert_eq!(
            account.credit(Pool::Unconfirmed, 5, &tx("a")).unwrap(),
            Effect::Replayed
        );
        assert_eq!(
            account.credit(Pool::Unconfirmed, 5, &tx("b")).unwrap(),
            Effect::Applied
        );
        assert_eq!(account.unconfirmed(), 10);
    }

    #[test]
    fn move_is_idempotent_per_transaction() {
        let account = Account::new(AccountId(1));
        account.credit(Pool::Unconfirmed, 5, &tx("a")).unwrap();
        assert_eq!(account.move_to_confirmed(5, &tx("a")).unwrap(), Effect::Applied);
        assert_eq!(account.move_to_confirmed(5, &tx("a")).unwrap(), Effect::Replayed);
        assert_eq!(account.balance(), Balance { confirmed: 5, unconfirmed: 0 });
    }

    #[test]
    fn failed_move_is_not_journaled() {
        let account = Account::new(AccountId(1));
        assert_eq!(
            account.move_to_confirmed(5, &tx("a")),
            Err(StoreError::InsufficientUnconfirmed)
        );
        account.credit(Pool::Unconfirmed, 5, &tx("a")).unwrap();
        assert_eq!(account.move_to_confirmed(5, &tx("a")).unwrap(), Effect::Applied);
    }

    // === Serialization Tests ===

    #[test]
    fn serializer_reports_pools_and_total() {
        let account = Account::new(AccountId(7));
        account.credit(Pool::Confirmed, 1_000_000, &tx("a")).unwrap();
        account.credit(Pool::Unconfirmed, 250, &tx("b")).unwrap();

        let json = serde_json::to_string(&account).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["account"], 7);
        assert_eq!(parsed["confirmed"], 1_000_000);
        assert_eq!(parsed["unconfirmed"], 250);
        assert_eq!(parsed["total"], 1_000_250);
    }

    #[test]
    fn pool_follows_confirmation_state() {
        assert_eq!(Pool::from(ConfirmationState::Confirmed), Pool::Confirmed);
        assert_eq!(Pool::from(ConfirmationState::Unconfirmed), Pool::Unconfirmed);
    }
}
