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

//! SQLite-backed ledger, balances and account directory.
//!
//! Every operation checks a connection out of an `r2d2` pool. Concurrency
//! guarantees come from the database, not from the caller:
//!
//! - `transactions.tx_hash` is the primary key; inserts use `ON CONFLICT DO NOTHING`.
//! - The confirm transition is `UPDATE ... WHERE confirmed = 0`.
//! - Balance steps run in one `IMMEDIATE` transaction that journals the step
//!   in `balance_movements` and increments the pool in place. Increments are
//!   guarded against `i64` overflow, which SQLite would otherwise turn into a
//!   REAL column value.

use crate::account::{Balance, Effect, MovementKind, Pool};
use crate::balances::BalanceStore;
use crate::base::{AccountId, TxId};
use crate::config::DatabaseConfig;
use crate::directory::AccountDirectory;
use crate::error::StoreError;
use crate::ledger::LedgerStore;
use crate::transaction::{ConfirmationState, Direction, Presence, TransactionRecord};
use r2d2::{Pool as ConnectionPool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use std::path::{Path, PathBuf};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS account_holders (
    account_id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_name TEXT NOT NULL UNIQUE,
    confirmed_satoshi_balance INTEGER NOT NULL DEFAULT 0
        CHECK (confirmed_satoshi_balance >= 0),
    unconfirmed_satoshi_balance INTEGER NOT NULL DEFAULT 0
        CHECK (unconfirmed_satoshi_balance >= 0)
);

CREATE TABLE IF NOT EXISTS transactions (
    tx_hash TEXT PRIMARY KEY,
    matched_user_id INTEGER NOT NULL REFERENCES account_holders(account_id),
    inbound INTEGER NOT NULL,
    confirmed INTEGER NOT NULL,
    credited_confirmed INTEGER NOT NULL,
    amount_satoshi INTEGER NOT NULL CHECK (amount_satoshi >= 0)
);

CREATE TABLE IF NOT EXISTS balance_movements (
    tx_hash TEXT NOT NULL,
    kind TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    amount_satoshi INTEGER NOT NULL,
    PRIMARY KEY (tx_hash, kind)
);

CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(matched_user_id);
";

/// Account row as stored, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRow {
    pub account: AccountId,
    pub name: String,
    pub confirmed: u64,
    pub unconfirmed: u64,
}

/// Pooled SQLite store implementing all storage contracts.
pub struct SqliteStore {
    path: PathBuf,
    pool: ConnectionPool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and its schema.
    pub fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let busy_timeout = config.busy_timeout();
        let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", true)
        });
        let max_size = u32::try_from(config.pool_size.max(1)).unwrap_or(u32::MAX);
        let pool = ConnectionPool::builder()
            .max_size(max_size)
            .build(manager)?;

        let conn = pool.get()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);

        tracing::info!(path = %config.path.display(), max_size, "opened SQLite ledger");
        Ok(Self {
            path: config.path.clone(),
            pool,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Provisions an account under `name`, returning the existing one if the
    /// name is taken.
    pub fn open_account(&self, name: &str) -> Result<AccountId, StoreError> {
        let conn = self.acquire()?;
        conn.execute(
            "INSERT INTO account_holders (account_name) VALUES (?1)
             ON CONFLICT(account_name) DO NOTHING",
            params![name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT account_id FROM account_holders WHERE account_name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(AccountId(id))
    }

    /// All accounts ordered by ID.
    pub fn accounts(&self) -> Result<Vec<AccountRow>, StoreError> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT account_id, account_name, confirmed_satoshi_balance, unconfirmed_satoshi_balance
             FROM account_holders ORDER BY account_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut accounts = Vec::new();
        for row in rows {
            let (id, name, confirmed, unconfirmed) = row?;
            accounts.push(AccountRow {
                account: AccountId(id),
                name,
                confirmed: from_sql_amount(confirmed)?,
                unconfirmed: from_sql_amount(unconfirmed)?,
            });
        }
        Ok(accounts)
    }

    /// Journals a balance step and applies `update` in one transaction.
    ///
    /// `update` returns the number of account rows it changed; zero rolls the
    /// step back and is resolved into an error by `on_miss`.
    fn apply_movement(
        &self,
        account: AccountId,
        kind: MovementKind,
        amount: u64,
        tx_id: &TxId,
        update: impl FnOnce(&rusqlite::Transaction<'_>, i64) -> rusqlite::Result<usize>,
        on_miss: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<StoreError, StoreError>,
    ) -> Result<Effect, StoreError> {
        let amount = to_sql_amount(amount)?;
        let mut conn = self.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let journaled = tx.execute(
            "INSERT INTO balance_movements (tx_hash, kind, account_id, amount_satoshi)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tx_hash, kind) DO NOTHING",
            params![tx_id.as_str(), kind.as_str(), account.0, amount],
        )?;
        if journaled == 0 {
            return Ok(Effect::Replayed);
        }

        if update(&tx, amount)? == 0 {
            return Err(on_miss(&tx)?);
        }
        tx.commit()?;
        Ok(Effect::Applied)
    }
}

fn to_sql_amount(amount: u64) -> Result<i64, StoreError> {
    i64::try_from(amount)
        .map_err(|_| StoreError::Unavailable(format!("amount {amount} exceeds storage range")))
}

fn from_sql_amount(amount: i64) -> Result<u64, StoreError> {
    u64::try_from(amount)
        .map_err(|_| StoreError::Unavailable(format!("negative amount {amount} in storage")))
}

/// `(confirmed, unconfirmed)` of an account, or `None` if it doesn't exist.
fn pools(conn: &Connection, account: AccountId) -> Result<Option<(i64, i64)>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT confirmed_satoshi_balance, unconfirmed_satoshi_balance
             FROM account_holders WHERE account_id = ?1",
            params![account.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn overflow() -> StoreError {
    StoreError::Unavailable("balance overflow".to_string())
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

impl LedgerStore for SqliteStore {
    fn lookup(&self, id: &TxId) -> Result<Presence, StoreError> {
        let conn = self.acquire()?;
        let row = conn
            .query_row(
                "SELECT matched_user_id, inbound, confirmed, credited_confirmed, amount_satoshi
                 FROM transactions WHERE tx_hash = ?1",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((account, inbound, confirmed, credited_confirmed, amount)) = row else {
            return Ok(Presence::Absent);
        };
        Ok(Presence::Seen(TransactionRecord {
            id: id.clone(),
            account_id: AccountId(account),
            direction: if inbound {
                Direction::Inbound
            } else {
                Direction::Outbound
            },
            amount: from_sql_amount(amount)?,
            state: if confirmed {
                ConfirmationState::Confirmed
            } else {
                ConfirmationState::Unconfirmed
            },
            credited_pool: if credited_confirmed {
                Pool::Confirmed
            } else {
                Pool::Unconfirmed
            },
        }))
    }

    fn insert(&self, record: TransactionRecord) -> Result<(), StoreError> {
        let amount = to_sql_amount(record.amount)?;
        let conn = self.acquire()?;
        let inserted = conn
            .execute(
                "INSERT INTO transactions
                    (tx_hash, matched_user_id, inbound, confirmed, credited_confirmed, amount_satoshi)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(tx_hash) DO NOTHING",
                params![
                    record.id.as_str(),
                    record.account_id.0,
                    record.direction == Direction::Inbound,
                    record.state.is_confirmed(),
                    record.credited_pool == Pool::Confirmed,
                    amount,
                ],
            )
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    StoreError::AccountNotFound
                } else {
                    err.into()
                }
            })?;

        match inserted {
            0 => Err(StoreError::Duplicate),
            _ => Ok(()),
        }
    }

    fn mark_confirmed(&self, id: &TxId) -> Result<(), StoreError> {
        let conn = self.acquire()?;
        let updated = conn.execute(
            "UPDATE transactions SET confirmed = 1 WHERE tx_hash = ?1 AND confirmed = 0",
            params![id.as_str()],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE tx_hash = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Err(if exists {
            StoreError::AlreadyConfirmed
        } else {
            StoreError::TransactionNotFound
        })
    }
}

impl BalanceStore for SqliteStore {
    fn credit(
        &self,
        account: AccountId,
        pool: Pool,
        amount: u64,
        tx: &TxId,
    ) -> Result<Effect, StoreError> {
        self.apply_movement(
            account,
            MovementKind::Credit,
            amount,
            tx,
            |conn, amount| match pool {
                Pool::Confirmed => conn.execute(
                    "UPDATE account_holders
                     SET confirmed_satoshi_balance = confirmed_satoshi_balance + ?1
                     WHERE account_id = ?2
                       AND confirmed_satoshi_balance <= 9223372036854775807 - ?1",
                    params![amount, account.0],
                ),
                Pool::Unconfirmed => conn.execute(
                    "UPDATE account_holders
                     SET unconfirmed_satoshi_balance = unconfirmed_satoshi_balance + ?1
                     WHERE account_id = ?2
                       AND unconfirmed_satoshi_balance <= 9223372036854775807 - ?1",
                    params![amount, account.0],
                ),
            },
            |conn| {
                Ok(match pools(conn, account)? {
                    Some(_) => overflow(),
                    None => StoreError::AccountNotFound,
                })
            },
        )
    }

    fn move_to_confirmed(
        &self,
        account: AccountId,
        amount: u64,
        tx: &TxId,
    ) -> Result<Effect, StoreError> {
        self.apply_movement(
            account,
            MovementKind::Confirm,
            amount,
            tx,
            |conn, amount| {
                conn.execute(
                    "UPDATE account_holders
                     SET unconfirmed_satoshi_balance = unconfirmed_satoshi_balance - ?1,
                         confirmed_satoshi_balance = confirmed_satoshi_balance + ?1
                     WHERE account_id = ?2
                       AND unconfirmed_satoshi_balance >= ?1
                       AND confirmed_satoshi_balance <= 9223372036854775807 - ?1",
                    params![amount, account.0],
                )
            },
            |conn| {
                Ok(match pools(conn, account)? {
                    Some((_, unconfirmed)) if i128::from(unconfirmed) < i128::from(amount) => {
                        StoreError::InsufficientUnconfirmed
                    }
                    Some(_) => overflow(),
                    None => StoreError::AccountNotFound,
                })
            },
        )
    }

    fn balance(&self, account: AccountId) -> Result<Option<Balance>, StoreError> {
        let conn = self.acquire()?;
        let row = conn
            .query_row(
                "SELECT confirmed_satoshi_balance, unconfirmed_satoshi_balance
                 FROM account_holders WHERE account_id = ?1",
                params![account.0],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        row.map(|(confirmed, unconfirmed)| {
            Ok(Balance {
                confirmed: from_sql_amount(confirmed)?,
                unconfirmed: from_sql_amount(unconfirmed)?,
            })
        })
        .transpose()
    }
}

impl AccountDirectory for SqliteStore {
    fn resolve(&self, label: &str) -> Result<Option<AccountId>, StoreError> {
        let conn = self.acquire()?;
        Ok(conn
            .query_row(
                "SELECT account_id FROM account_holders WHERE account_name = ?1",
                params![label],
                |row| row.get(0),
            )
            .optional()?
            .map(AccountId))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::open(&DatabaseConfig {
            path: dir.path().join("ledger.db"),
            pool_size: 2,
            busy_timeout_ms: 1_000,
        })
        .unwrap()
    }

    #[test]
    fn pool_is_bounded_by_pool_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        {
            let _a = store.acquire().unwrap();
            let _b = store.acquire().unwrap();
            assert!(store.pool.try_get().is_none());
            assert_eq!(store.pool.state().idle_connections, 0);
        }
        assert_eq!(store.pool.state().connections, 2);
        assert_eq!(store.pool.state().idle_connections, 2);
    }

    #[test]
    fn pooled_connections_enforce_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let conn = store.acquire().unwrap();
        let enabled: bool = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert!(enabled);
    }

    #[test]
    fn reopening_keeps_schema_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let id = store(&dir).open_account("alice").unwrap();
        let reopened = store(&dir);
        assert_eq!(reopened.resolve("alice"), Ok(Some(id)));
    }

    #[test]
    fn amounts_beyond_i64_are_rejected() {
        assert!(to_sql_amount(u64::MAX).is_err());
        assert_eq!(to_sql_amount(1_000_000), Ok(1_000_000));
        assert!(from_sql_amount(-1).is_err());
    }

    #[test]
    fn movement_kinds_are_journaled_separately() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let account = store.open_account("alice").unwrap();
        let tx = TxId::from("tx");

        store.credit(account, Pool::Unconfirmed, 10, &tx).unwrap();
        store.move_to_confirmed(account, 10, &tx).unwrap();

        let conn = store.acquire().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM balance_movements WHERE tx_hash = ?1",
                params!["tx"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
