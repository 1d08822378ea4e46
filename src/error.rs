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

//! Error types for reconciliation, storage, node access and configuration.

use rust_decimal::Decimal;
use thiserror::Error;

/// Reconciliation failures surfaced to the caller of the engine.
///
/// Every variant maps to an operational failure of the notification.
/// Deduplication races never show up here: they are folded into
/// [`Outcome`](crate::Outcome) values by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Node lookup failed or timed out
    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    /// Account label does not resolve to a provisioned account
    #[error("related account cannot be found: {0}")]
    AccountNotFound(String),

    /// Storage failure or timeout
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Node amount cannot be expressed in whole smallest units
    #[error("invalid amount {0} (must be non-negative and fit the smallest unit)")]
    InvalidAmount(Decimal),

    /// Confirming would drive the unconfirmed pool negative
    #[error("unconfirmed balance is lower than the amount to confirm")]
    InsufficientUnconfirmed,
}

impl ReconcileError {
    /// Whether retrying the same notification later may succeed without
    /// any external fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NodeUnavailable(_) | Self::StorageUnavailable(_))
    }
}

/// Ledger and balance store errors.
///
/// [`StoreError::Duplicate`] and [`StoreError::AlreadyConfirmed`] are the
/// constraint-violation family: they signal that a concurrent caller got there
/// first and are part of normal control flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A transaction with the same ID is already recorded
    #[error("duplicate transaction ID")]
    Duplicate,

    /// Transaction is already confirmed
    #[error("transaction already confirmed")]
    AlreadyConfirmed,

    /// Referenced transaction ID does not exist
    #[error("transaction not found")]
    TransactionNotFound,

    /// Referenced account does not exist
    #[error("account not found")]
    AccountNotFound,

    /// Unconfirmed pool holds less than the requested amount
    #[error("insufficient unconfirmed funds")]
    InsufficientUnconfirmed,

    /// Backend failure (I/O, lock timeout, pool exhaustion)
    #[error("storage backend failure: {0}")]
    Unavailable(String),
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Unavailable(format!("connection pool: {err}"))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Node client errors. All of them are retryable from the engine's view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Request exceeded the configured timeout
    #[error("node request timed out")]
    Timeout,

    /// Connection or HTTP level failure
    #[error("node transport error: {0}")]
    Transport(String),

    /// Node answered with a JSON-RPC error object
    #[error("node RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Node answered with something we cannot interpret
    #[error("malformed node response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for NodeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NodeError::Timeout
        } else if err.is_decode() {
            NodeError::Malformed(err.to_string())
        } else {
            NodeError::Transport(err.to_string())
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientUnconfirmed => ReconcileError::InsufficientUnconfirmed,
            other => ReconcileError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<NodeError> for ReconcileError {
    fn from(err: NodeError) -> Self {
        ReconcileError::NodeUnavailable(err.to_string())
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
