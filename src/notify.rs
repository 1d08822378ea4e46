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

//! Transport-neutral notification entry points.
//!
//! Node hooks (`walletnotify`, `blocknotify`, HTTP callbacks) call into these
//! and translate the [`NotifyResponse`] into their own status codes.

use crate::base::TxId;
use crate::engine::{Outcome, Reconciler};
use serde::Serialize;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyStatus {
    Ok,
    NoOp,
    Error,
    /// The notification kind is not handled (block notifications).
    Unsupported,
}

/// Reply to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotifyResponse {
    pub status: NotifyStatus,
    pub message: String,
    /// Whether the sender should redeliver later.
    pub retryable: bool,
}

impl NotifyResponse {
    fn new(status: NotifyStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retryable: false,
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self.status {
            NotifyStatus::Ok | NotifyStatus::NoOp => 200,
            NotifyStatus::Error => 500,
            NotifyStatus::Unsupported => 501,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, NotifyStatus::Ok | NotifyStatus::NoOp)
    }
}

impl From<Outcome> for NotifyResponse {
    fn from(outcome: Outcome) -> Self {
        let message = match outcome {
            Outcome::Accepted => "Transaction processed",
            Outcome::NoOpOutbound => "Outbound transaction requires no balance bookkeeping",
            Outcome::NoOpAlreadyConfirmed => "Transaction already confirmed",
            Outcome::Pending => "Transaction awaiting confirmations",
        };
        let status = if outcome.is_noop() {
            NotifyStatus::NoOp
        } else {
            NotifyStatus::Ok
        };
        NotifyResponse::new(status, message)
    }
}

impl Reconciler {
    /// Handles a transaction notification and reports the result.
    pub fn notify_transaction(&self, id: &str) -> NotifyResponse {
        let id = id.trim();
        if id.is_empty() {
            warn!("transaction notification without an identifier");
            return NotifyResponse::new(NotifyStatus::Error, "Missing transaction identifier");
        }

        match self.process_deposit(&TxId::from(id)) {
            Ok(outcome) => outcome.into(),
            Err(err) => {
                error!(tx_id = %id, error = %err, "transaction notification failed");
                NotifyResponse {
                    status: NotifyStatus::Error,
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                }
            }
        }
    }

    /// Block notifications are acknowledged but not acted on: confirmations
    /// are picked up when the node re-notifies each transaction.
    pub fn notify_block(&self, hash: &str) -> NotifyResponse {
        debug!(block = %hash.trim(), "block notification ignored");
        NotifyResponse::new(
            NotifyStatus::Unsupported,
            "Block notifications are not processed",
        )
    }
}
