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

//! Transaction ledger with deduplication.
//!
//! The ledger is the source of truth for "have we seen this transaction, and
//! is it confirmed". Uniqueness and the confirm transition are enforced by the
//! store itself, never by a check-then-act in the caller.

use crate::base::TxId;
use crate::error::StoreError;
use crate::transaction::{ConfirmationState, Presence, TransactionRecord};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Storage contract for transaction records.
pub trait LedgerStore: Send + Sync {
    /// Looks a transaction up. Errors only on storage failure.
    fn lookup(&self, id: &TxId) -> Result<Presence, StoreError>;

    /// Records a new transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::Duplicate`] if the ID is already recorded. Callers treat
    /// this as "someone else processed it".
    fn insert(&self, record: TransactionRecord) -> Result<(), StoreError>;

    /// Transitions an unconfirmed record to confirmed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyConfirmed`] if another caller won the transition.
    /// - [`StoreError::TransactionNotFound`] if the ID is unknown.
    fn mark_confirmed(&self, id: &TxId) -> Result<(), StoreError>;
}

/// A thread-safe in-memory ledger.
///
/// The [`DashMap`] entry API gives an atomic check-and-insert, and
/// `get_mut` holds the shard lock across the state check and the update.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    transactions: DashMap<TxId, TransactionRecord>,
}

impl MemoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl LedgerStore for MemoryLedger {
    fn lookup(&self, id: &TxId) -> Result<Presence, StoreError> {
        Ok(self
            .transactions
            .get(id)
            .map(|record| Presence::Seen(record.clone()))
            .unwrap_or(Presence::Absent))
    }

    fn insert(&self, record: TransactionRecord) -> Result<(), StoreError> {
        match self.transactions.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    fn mark_confirmed(&self, id: &TxId) -> Result<(), StoreError> {
        let mut record = self
            .transactions
            .get_mut(id)
            .ok_or(StoreError::TransactionNotFound)?;
        match record.state {
            ConfirmationState::Confirmed => Err(StoreError::AlreadyConfirmed),
            ConfirmationState::Unconfirmed => {
                record.state = ConfirmationState::Confirmed;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::AccountId;

    fn record(id: &str, state: ConfirmationState) -> TransactionRecord {
        TransactionRecord::inbound(TxId::from(id), AccountId(1), 100, state)
    }

    #[test]
    fn lookup_unknown_is_absent() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.lookup(&TxId::from("nope")), Ok(Presence::Absent));
    }

    #[test]
    fn insert_then_lookup() {
        let ledger = MemoryLedger::new();
        let rec = record("a", ConfirmationState::Unconfirmed);
        ledger.insert(rec.clone()).unwrap();
        assert_eq!(ledger.lookup(&rec.id), Ok(Presence::Seen(rec)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn second_insert_is_duplicate() {
        let ledger = MemoryLedger::new();
        ledger
            .insert(record("a", ConfirmationState::Unconfirmed))
            .unwrap();
        assert_eq!(
            ledger.insert(record("a", ConfirmationState::Confirmed)),
            Err(StoreError::Duplicate)
        );
        // Original record untouched.
        let Presence::Seen(stored) = ledger.lookup(&TxId::from("a")).unwrap() else {
            panic!("record vanished");
        };
        assert_eq!(stored.state, ConfirmationState::Unconfirmed);
    }

    #[test]
    fn mark_confirmed_transitions_once() {
        let ledger = MemoryLedger::new();
        ledger
            .insert(record("a", ConfirmationState::Unconfirmed))
            .unwrap();
        let id = TxId::from("a");
        assert_eq!(ledger.mark_confirmed(&id), Ok(()));
        assert_eq!(ledger.mark_confirmed(&id), Err(StoreError::AlreadyConfirmed));
    }

    #[test]
    fn mark_confirmed_unknown_is_not_found() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            ledger.mark_confirmed(&TxId::from("ghost")),
            Err(StoreError::TransactionNotFound)
        );
    }
}
