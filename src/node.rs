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

//! Node client adapters.
//!
//! - [`RpcNode`]: bitcoind-compatible JSON-RPC `gettransaction` over HTTP.
//! - [`FixtureNode`]: in-process canned responses, for tests and demos.

use crate::base::TxId;
use crate::config::NodeConfig;
use crate::error::NodeError;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transaction details as reported by the node's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTransaction {
    /// Negative for conflicted transactions.
    pub confirmations: i64,
    /// `receive`, `send`, `generate`, ...
    pub category: String,
    /// Wallet account label the transfer is attributed to.
    pub account: String,
    pub address: Option<String>,
    pub amount: Decimal,
}

impl NodeTransaction {
    pub fn receive(account: impl Into<String>, amount: Decimal, confirmations: i64) -> Self {
        Self {
            confirmations,
            category: "receive".to_string(),
            account: account.into(),
            address: None,
            amount,
        }
    }

    pub fn send(account: impl Into<String>, amount: Decimal, confirmations: i64) -> Self {
        Self {
            confirmations,
            category: "send".to_string(),
            account: account.into(),
            address: None,
            amount,
        }
    }
}

pub trait NodeClient: Send + Sync {
    fn get_transaction(&self, id: &TxId) -> Result<NodeTransaction, NodeError>;
}

// === JSON-RPC adapter ===

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WalletTransaction {
    confirmations: i64,
    #[serde(default)]
    details: Vec<WalletDetail>,
}

#[derive(Debug, Deserialize)]
struct WalletDetail {
    // Older nodes report `account`, newer ones `label`; some report both.
    account: Option<String>,
    label: Option<String>,
    address: Option<String>,
    category: String,
    amount: serde_json::Number,
}

/// JSON-RPC client for a bitcoind-compatible wallet node.
#[derive(Debug)]
pub struct RpcNode {
    client: reqwest::blocking::Client,
    url: String,
    user: String,
    password: String,
    next_id: AtomicU64,
}

impl RpcNode {
    pub fn new(config: &NodeConfig) -> Result<Self, NodeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        param: &str,
    ) -> Result<T, NodeError> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: [param],
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if !self.user.is_empty() {
            builder = builder.basic_auth(&self.user, Some(&self.password));
        }
        let response = builder.send()?;
        let status = response.status();
        let body = response.text()?;

        // bitcoind reports RPC errors with a 500 status and a JSON body.
        let parsed: RpcResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(NodeError::Transport(format!("HTTP {status}")));
            }
            Err(err) => return Err(NodeError::Malformed(err.to_string())),
        };

        if let Some(error) = parsed.error {
            return Err(NodeError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| NodeError::Malformed(format!("{method} returned no result")))
    }
}

impl NodeClient for RpcNode {
    fn get_transaction(&self, id: &TxId) -> Result<NodeTransaction, NodeError> {
        let tx: WalletTransaction = self.call("gettransaction", id.as_str())?;
        let confirmations = tx.confirmations;

        let mut details = tx.details;
        if details.is_empty() {
            return Err(NodeError::Malformed(format!(
                "transaction {id} has no wallet details"
            )));
        }
        // A self-send lists both legs; the inbound one decides attribution.
        let index = details
            .iter()
            .position(|detail| detail.category == "receive")
            .unwrap_or(0);
        let detail = details.swap_remove(index);

        Ok(NodeTransaction {
            confirmations,
            category: detail.category,
            account: detail.account.or(detail.label).unwrap_or_default(),
            address: detail.address,
            amount: parse_amount(&detail.amount)?,
        })
    }
}

/// Parses a JSON number into an exact decimal.
///
/// Float formatting may produce exponent notation (`1e-8`), which plain
/// decimal parsing rejects.
fn parse_amount(number: &serde_json::Number) -> Result<Decimal, NodeError> {
    let text = number.to_string();
    let parsed = if text.contains(['e', 'E']) {
        Decimal::from_scientific(&text)
    } else {
        Decimal::from_str(&text)
    };
    parsed.map_err(|err| NodeError::Malformed(format!("amount {text}: {err}")))
}

// === Fixture adapter ===

/// In-process node returning canned responses.
///
/// Unknown IDs answer like bitcoind does for a non-wallet transaction.
#[derive(Debug, Default)]
pub struct FixtureNode {
    responses: DashMap<TxId, Result<NodeTransaction, NodeError>>,
}

impl FixtureNode {
    pub fn new() -> Self {
        Self {
            responses: DashMap::new(),
        }
    }

    /// Sets (or replaces) the node's view of a transaction.
    pub fn set(&self, id: impl Into<TxId>, tx: NodeTransaction) {
        self.responses.insert(id.into(), Ok(tx));
    }

    /// Makes lookups of `id` fail with `error`.
    pub fn fail(&self, id: impl Into<TxId>, error: NodeError) {
        self.responses.insert(id.into(), Err(error));
    }

    /// Updates the confirmation count of a known transaction.
    pub fn confirm(&self, id: &TxId, confirmations: i64) {
        if let Some(mut entry) = self.responses.get_mut(id) {
            if let Ok(tx) = entry.value_mut() {
                tx.confirmations = confirmations;
            }
        }
    }
}

impl NodeClient for FixtureNode {
    fn get_transaction(&self, id: &TxId) -> Result<NodeTransaction, NodeError> {
        self.responses
            .get(id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| {
                Err(NodeError::Rpc {
                    code: -5,
                    message: "Invalid or non-wallet transaction id".to_string(),
                })
            })
    }
}
