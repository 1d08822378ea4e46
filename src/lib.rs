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

//! # Deposit Ledger
//!
//! This library reconciles wallet-node deposit notifications into per-account
//! balances split into a *confirmed* and an *unconfirmed* pool. Notifications
//! may arrive duplicated, concurrently and out of order; each transaction is
//! still booked exactly once and confirmed exactly once.
//!
//! ## Core Components
//!
//! - [`Reconciler`]: Classifies notifications and drives the state transitions
//! - [`LedgerStore`]: Deduplicated transaction records and their confirmation state
//! - [`BalanceStore`]: Atomic, idempotent per-account balance steps
//! - [`NodeClient`]: Transaction lookups against the wallet node
//! - [`SqliteStore`]: Persistent backend implementing every storage contract
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use deposit_ledger::{
//!     AccountId, Config, FixtureNode, MemoryBalances, MemoryDirectory, MemoryLedger,
//!     NodeTransaction, Outcome, Reconciler, TxId,
//! };
//! use rust_decimal_macros::dec;
//!
//! let node = Arc::new(FixtureNode::new());
//! let balances = Arc::new(MemoryBalances::new());
//! let directory = Arc::new(MemoryDirectory::new());
//! balances.open_account(AccountId(1));
//! directory.register("alice", AccountId(1));
//!
//! let engine = Reconciler::new(
//!     &Config::default(),
//!     node.clone(),
//!     Arc::new(MemoryLedger::new()),
//!     balances.clone(),
//!     directory,
//! );
//!
//! // Seen in the mempool
//! let tx = TxId::from("tx1");
//! node.set(tx.clone(), NodeTransaction::receive("alice", dec!(0.01), 0));
//! assert_eq!(engine.process_deposit(&tx), Ok(Outcome::Accepted));
//!
//! // Six blocks later
//! node.confirm(&tx, 6);
//! assert_eq!(engine.process_deposit(&tx), Ok(Outcome::Accepted));
//!
//! let account = balances.get_account(AccountId(1)).unwrap();
//! assert_eq!(account.confirmed(), 1_000_000);
//! assert_eq!(account.unconfirmed(), 0);
//! ```

pub mod account;
mod balances;
mod base;
pub mod config;
mod directory;
mod engine;
pub mod error;
mod ledger;
pub mod node;
mod notify;
pub mod sqlite;
mod transaction;

pub use account::{Account, Balance, Effect, MovementKind, Pool};
pub use balances::{BalanceStore, MemoryBalances};
pub use base::{AccountId, TxId};
pub use config::Config;
pub use directory::{AccountDirectory, MemoryDirectory};
pub use engine::{Outcome, Reconciler};
pub use error::{ConfigError, NodeError, ReconcileError, StoreError};
pub use ledger::{LedgerStore, MemoryLedger};
pub use node::{FixtureNode, NodeClient, NodeTransaction, RpcNode};
pub use notify::{NotifyResponse, NotifyStatus};
pub use sqlite::SqliteStore;
pub use transaction::{
    ConfirmationState, Direction, Presence, TransactionRecord, to_smallest_units,
};
