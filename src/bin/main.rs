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

use clap::{Parser, Subcommand};
use csv::Writer;
use deposit_ledger::sqlite::AccountRow;
use deposit_ledger::{Config, NotifyResponse, NotifyStatus, Reconciler, RpcNode, SqliteStore};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Deposit Ledger - Wallet node notification hook
///
/// Meant to be wired into the node's notification hooks:
///
///   walletnotify=deposit-ledger --config /etc/deposit-ledger.toml notify-tx %s
///   blocknotify=deposit-ledger --config /etc/deposit-ledger.toml notify-block %s
#[derive(Parser, Debug)]
#[command(name = "deposit-ledger")]
#[command(about = "Books wallet deposits into confirmed/unconfirmed balances", long_about = None)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the configuration)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a transaction notification
    NotifyTx {
        #[arg(value_name = "TXID")]
        txid: String,
    },
    /// Acknowledge a block notification
    NotifyBlock {
        #[arg(value_name = "HASH")]
        hash: String,
    },
    /// Provision an account for a wallet label
    OpenAccount {
        #[arg(value_name = "LABEL")]
        label: String,
    },
    /// Write all account balances as CSV to stdout
    Balances,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = match SqliteStore::open(&config.database) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!(
                "Error opening database '{}': {}",
                config.database.path.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    let reconciler = || -> Result<Reconciler, deposit_ledger::NodeError> {
        let node = Arc::new(RpcNode::new(&config.node)?);
        Ok(Reconciler::new(
            &config,
            node,
            store.clone(),
            store.clone(),
            store.clone(),
        ))
    };

    match args.command {
        Command::NotifyTx { txid } => match reconciler() {
            Ok(engine) => report(engine.notify_transaction(&txid)),
            Err(e) => {
                eprintln!("Error creating node client: {}", e);
                ExitCode::FAILURE
            }
        },
        Command::NotifyBlock { hash } => match reconciler() {
            Ok(engine) => report(engine.notify_block(&hash)),
            Err(e) => {
                eprintln!("Error creating node client: {}", e);
                ExitCode::FAILURE
            }
        },
        Command::OpenAccount { label } => match store.open_account(&label) {
            Ok(id) => {
                println!("{}", id);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error provisioning account '{}': {}", label, e);
                ExitCode::FAILURE
            }
        },
        Command::Balances => match print_balances(&store) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error writing balances: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn print_balances(store: &SqliteStore) -> Result<(), Box<dyn std::error::Error>> {
    let rows = store.accounts()?;
    write_accounts(&rows, std::io::stdout())?;
    Ok(())
}

fn load_config(args: &Args) -> Result<Config, deposit_ledger::ConfigError> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let mut config = config.with_env_overrides(|key| std::env::var(key).ok())?;
    if let Some(db) = &args.db {
        config.database.path = db.clone();
    }
    Ok(config)
}

/// Prints the response and maps it to the process exit code the node hook sees.
fn report(response: NotifyResponse) -> ExitCode {
    if response.is_success() {
        println!("{}", response.message);
    } else {
        eprintln!("{}", response.message);
    }
    ExitCode::from(exit_code(&response))
}

fn exit_code(response: &NotifyResponse) -> u8 {
    match response.status {
        NotifyStatus::Ok | NotifyStatus::NoOp => 0,
        NotifyStatus::Error => 1,
        NotifyStatus::Unsupported => 2,
    }
}

/// Write account balances to a CSV writer
///
/// # CSV Format
///
/// Columns: `account, name, confirmed, unconfirmed` (smallest units)
///
/// ```csv
/// account,name,confirmed,unconfirmed
/// 1,alice,1000000,0
/// ```
pub fn write_accounts<W: Write>(accounts: &[AccountRow], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for account in accounts {
        wtr.serialize(account)?;
    }

    wtr.flush()?;
    Ok(())
}
