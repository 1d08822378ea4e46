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

//! Deposit reconciliation engine.
//!
//! The [`Reconciler`] turns a transaction notification into ledger and balance
//! effects:
//!
//! - **First sight**: record the transaction and credit the unconfirmed (or,
//!   with enough confirmations, the confirmed) pool.
//! - **Confirmation**: flip the record to confirmed and move the amount from
//!   the unconfirmed to the confirmed pool.
//! - **Anything else**: no-op.
//!
//! # Thread Safety
//!
//! The engine holds no locks of its own. Uniqueness of the ledger record and
//! of the confirm transition is enforced by the [`LedgerStore`]; balance steps
//! are atomic and idempotent in the [`BalanceStore`]. Any number of callers may
//! process the same transaction concurrently and the balance still moves
//! exactly once per state transition.

use crate::account::{Effect, Pool};
use crate::balances::BalanceStore;
use crate::base::TxId;
use crate::config::Config;
use crate::directory::AccountDirectory;
use crate::error::{ReconcileError, StoreError};
use crate::ledger::LedgerStore;
use crate::node::{NodeClient, NodeTransaction};
use crate::transaction::{ConfirmationState, Presence, TransactionRecord, to_smallest_units};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of processing a deposit notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A ledger transition or balance step was applied.
    Accepted,
    /// Not a deposit; nothing to book.
    NoOpOutbound,
    /// Already confirmed and fully booked.
    NoOpAlreadyConfirmed,
    /// Known, still below the confirmation threshold, fully booked.
    Pending,
}

impl Outcome {
    pub fn is_noop(self) -> bool {
        !matches!(self, Outcome::Accepted)
    }
}

/// Reconciles node notifications against the ledger and balances.
///
/// # Invariants
///
/// - At most one ledger record per transaction ID.
/// - A record moves `Unconfirmed` → `Confirmed` at most once, and only the
///   caller that performed that transition is entitled to move the balance.
/// - Each balance step (initial credit, confirm move) is applied at most once
///   per transaction, however many times it is retried.
pub struct Reconciler {
    confirm_after: i64,
    deposit_category: String,
    unit_decimals: u32,
    node: Arc<dyn NodeClient>,
    ledger: Arc<dyn LedgerStore>,
    balances: Arc<dyn BalanceStore>,
    directory: Arc<dyn AccountDirectory>,
}

impl Reconciler {
    pub fn new(
        config: &Config,
        node: Arc<dyn NodeClient>,
        ledger: Arc<dyn LedgerStore>,
        balances: Arc<dyn BalanceStore>,
        directory: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self {
            confirm_after: config.confirm_after,
            deposit_category: config.deposit_category.clone(),
            unit_decimals: config.unit_decimals,
            node,
            ledger,
            balances,
            directory,
        }
    }

    /// Processes a transaction notification.
    ///
    /// | Ledger | Node | Effect | Outcome |
    /// |--------|------|--------|---------|
    /// | any | not a deposit | none | `NoOpOutbound` |
    /// | absent | deposit | insert + credit | `Accepted` |
    /// | unconfirmed | confirmed | mark confirmed + move | `Accepted` |
    /// | unconfirmed | unconfirmed | none | `Pending` |
    /// | confirmed | any | none | `NoOpAlreadyConfirmed` |
    ///
    /// A balance step left incomplete by an earlier failed call is completed
    /// on the next call for the same transaction, which then reports
    /// `Accepted`.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::NodeUnavailable`] - node lookup failed (retryable).
    /// - [`ReconcileError::StorageUnavailable`] - storage failed (retryable).
    /// - [`ReconcileError::AccountNotFound`] - label or account not provisioned.
    /// - [`ReconcileError::InvalidAmount`] - amount not representable in smallest units.
    /// - [`ReconcileError::InsufficientUnconfirmed`] - balances disagree with the ledger.
    #[tracing::instrument(skip(self, id), fields(tx_id = %id))]
    pub fn process_deposit(&self, id: &TxId) -> Result<Outcome, ReconcileError> {
        let tx = self.node.get_transaction(id).map_err(|err| {
            warn!(error = %err, "node lookup failed");
            ReconcileError::from(err)
        })?;

        if tx.category != self.deposit_category {
            debug!(category = %tx.category, "not a deposit, nothing to book");
            return Ok(Outcome::NoOpOutbound);
        }

        let outcome = match self.ledger.lookup(id)? {
            Presence::Absent => self.first_seen(id, &tx)?,
            Presence::Seen(record) => self.already_seen(&record, &tx)?,
        };
        debug!(?outcome, "deposit reconciled");
        Ok(outcome)
    }

    fn first_seen(&self, id: &TxId, tx: &NodeTransaction) -> Result<Outcome, ReconcileError> {
        let account_id = self
            .directory
            .resolve(&tx.account)?
            .ok_or_else(|| ReconcileError::AccountNotFound(tx.account.clone()))?;
        let amount = to_smallest_units(tx.amount, self.unit_decimals)
            .ok_or(ReconcileError::InvalidAmount(tx.amount))?;
        let state = ConfirmationState::from_confirmations(tx.confirmations, self.confirm_after);
        let record = TransactionRecord::inbound(id.clone(), account_id, amount, state);

        match self.ledger.insert(record.clone()) {
            Ok(()) => {}
            Err(StoreError::Duplicate) => {
                debug!("concurrent notification recorded the transaction first");
                return match self.ledger.lookup(id)? {
                    Presence::Seen(existing) => self.already_seen(&existing, tx),
                    Presence::Absent => Err(ReconcileError::StorageUnavailable(format!(
                        "transaction {id} reported duplicate but cannot be read back"
                    ))),
                };
            }
            Err(err) => return Err(err.into()),
        }

        self.credit(&record)?;
        info!(
            account = %record.account_id,
            amount = record.amount,
            pool = ?record.credited_pool,
            "deposit recorded"
        );
        Ok(Outcome::Accepted)
    }

    fn already_seen(
        &self,
        record: &TransactionRecord,
        tx: &NodeTransaction,
    ) -> Result<Outcome, ReconcileError> {
        // Completes the initial credit if the call that inserted the record
        // failed before booking it.
        let repaired = self.credit(record)? == Effect::Applied;
        let reported = ConfirmationState::from_confirmations(tx.confirmations, self.confirm_after);

        match (record.state, reported) {
            (ConfirmationState::Confirmed, ConfirmationState::Unconfirmed) => {
                warn!(
                    confirmations = tx.confirmations,
                    "node reports fewer confirmations than the ledger; reorgs are not handled"
                );
                self.settle_confirmed(record, repaired)
            }
            (ConfirmationState::Confirmed, ConfirmationState::Confirmed) => {
                self.settle_confirmed(record, repaired)
            }
            (ConfirmationState::Unconfirmed, ConfirmationState::Unconfirmed) => {
                Ok(if repaired {
                    Outcome::Accepted
                } else {
                    Outcome::Pending
                })
            }
            (ConfirmationState::Unconfirmed, ConfirmationState::Confirmed) => {
                match self.ledger.mark_confirmed(&record.id) {
                    Ok(()) => {
                        // Only the caller that won the transition gets here.
                        self.confirm(record)?;
                        info!(
                            account = %record.account_id,
                            amount = record.amount,
                            "deposit confirmed"
                        );
                        Ok(Outcome::Accepted)
                    }
                    Err(StoreError::AlreadyConfirmed) => {
                        debug!("concurrent notification confirmed the transaction first");
                        self.settle_confirmed(record, repaired)
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Confirmed record: make sure the confirm move happened, otherwise no-op.
    fn settle_confirmed(
        &self,
        record: &TransactionRecord,
        repaired: bool,
    ) -> Result<Outcome, ReconcileError> {
        let moved = match record.credited_pool {
            Pool::Unconfirmed => self.confirm(record)? == Effect::Applied,
            Pool::Confirmed => false,
        };
        if repaired || moved {
            info!(account = %record.account_id, "completed an interrupted balance step");
            Ok(Outcome::Accepted)
        } else {
            Ok(Outcome::NoOpAlreadyConfirmed)
        }
    }

    fn credit(&self, record: &TransactionRecord) -> Result<Effect, ReconcileError> {
        self.balances
            .credit(
                record.account_id,
                record.credited_pool,
                record.amount,
                &record.id,
            )
            .map_err(|err| self.balance_error(record, err))
    }

    fn confirm(&self, record: &TransactionRecord) -> Result<Effect, ReconcileError> {
        self.balances
            .move_to_confirmed(record.account_id, record.amount, &record.id)
            .map_err(|err| self.balance_error(record, err))
    }

    fn balance_error(&self, record: &TransactionRecord, err: StoreError) -> ReconcileError {
        match err {
            StoreError::AccountNotFound => {
                ReconcileError::AccountNotFound(format!("account {}", record.account_id))
            }
            StoreError::InsufficientUnconfirmed => {
                warn!(
                    account = %record.account_id,
                    amount = record.amount,
                    "unconfirmed pool lower than the amount being confirmed"
                );
                ReconcileError::InsufficientUnconfirmed
            }
            other => other.into(),
        }
    }
}
