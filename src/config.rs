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

//! Configuration.
//!
//! Loaded from a TOML file, with environment overrides for the settings an
//! operator usually injects at deploy time.
//!
//! ```toml
//! confirm_after = 6
//!
//! [node]
//! url = "http://127.0.0.1:8332"
//! user = "rpc"
//! password = "secret"
//!
//! [database]
//! path = "/var/lib/deposit-ledger/ledger.db"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Confirmations required before funds count as confirmed.
    pub confirm_after: i64,

    /// Node category that marks an inbound transfer.
    pub deposit_category: String,

    /// Decimal places of the smallest currency unit (8 for satoshi).
    pub unit_decimals: u32,

    pub node: NodeConfig,

    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            confirm_after: 6,
            deposit_category: "receive".to_string(),
            unit_decimals: 8,
            node: NodeConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Node JSON-RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    /// Request timeout (milliseconds)
    pub timeout_ms: u64,
}

impl NodeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".to_string(),
            user: String::new(),
            password: String::new(),
            timeout_ms: 5_000,
        }
    }
}

/// SQLite storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Idle connections kept for reuse
    pub pool_size: usize,
    /// How long a statement waits on a locked database (milliseconds)
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("deposit-ledger.db"),
            pool_size: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `var`.
    ///
    /// Recognised keys: `DEPOSIT_LEDGER_DB`, `DEPOSIT_LEDGER_RPC_URL`,
    /// `DEPOSIT_LEDGER_RPC_USER`, `DEPOSIT_LEDGER_RPC_PASSWORD`,
    /// `DEPOSIT_LEDGER_CONFIRM_AFTER`.
    pub fn with_env_overrides(
        mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = var("DEPOSIT_LEDGER_DB") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(url) = var("DEPOSIT_LEDGER_RPC_URL") {
            self.node.url = url;
        }
        if let Some(user) = var("DEPOSIT_LEDGER_RPC_USER") {
            self.node.user = user;
        }
        if let Some(password) = var("DEPOSIT_LEDGER_RPC_PASSWORD") {
            self.node.password = password;
        }
        if let Some(value) = var("DEPOSIT_LEDGER_CONFIRM_AFTER") {
            let parsed = value.trim().parse::<i64>();
            self.confirm_after = parsed.map_err(|_| ConfigError::InvalidValue {
                key: "DEPOSIT_LEDGER_CONFIRM_AFTER",
                value,
            })?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.confirm_after, 6);
        assert_eq!(config.deposit_category, "receive");
        assert_eq!(config.unit_decimals, 8);
        assert_eq!(config.node.timeout(), Duration::from_secs(5));
        assert_eq!(config.database.pool_size, 4);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            confirm_after = 3

            [node]
            user = "rpc"
            "#,
        )
        .unwrap();
        assert_eq!(config.confirm_after, 3);
        assert_eq!(config.node.user, "rpc");
        assert_eq!(config.node.url, "http://127.0.0.1:8332");
        assert_eq!(config.database.path, PathBuf::from("deposit-ledger.db"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            Config::from_toml("confirm_after = \"six\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DEPOSIT_LEDGER_DB", "/tmp/ledger.db"),
            ("DEPOSIT_LEDGER_RPC_URL", "http://node:18332"),
            ("DEPOSIT_LEDGER_CONFIRM_AFTER", "2"),
        ]);
        let config = Config::default()
            .with_env_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.node.url, "http://node:18332");
        assert_eq!(config.confirm_after, 2);
        assert_eq!(config.node.user, "");
    }

    #[test]
    fn invalid_env_threshold_is_rejected() {
        let result = Config::default().with_env_overrides(|key| {
            (key == "DEPOSIT_LEDGER_CONFIRM_AFTER").then(|| "many".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "DEPOSIT_LEDGER_CONFIRM_AFTER",
                ..
            })
        ));
    }
}
