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

//! HTTP callback server for wallet node notifications.
//!
//! Run with: `cargo run --example server`
//!
//! Configuration comes from the environment (`DEPOSIT_LEDGER_DB`,
//! `DEPOSIT_LEDGER_RPC_URL`, ...). Point the node's hooks at it:
//!
//! ```bash
//! # bitcoin.conf
//! walletnotify=curl -s -X POST http://127.0.0.1:3000/callbacks/tx/%s
//! blocknotify=curl -s -X POST http://127.0.0.1:3000/callbacks/block/%s
//!
//! # Provision an account for a wallet label
//! curl -X POST http://127.0.0.1:3000/accounts/alice
//!
//! # Balances
//! curl http://127.0.0.1:3000/accounts
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use deposit_ledger::sqlite::AccountRow;
use deposit_ledger::{Config, NotifyResponse, NotifyStatus, Reconciler, RpcNode, SqliteStore};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct OpenedAccount {
    pub account: i64,
    pub name: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Reconciler>,
    pub store: Arc<SqliteStore>,
}

// === Error Handling ===

/// Notification reply carrying its own HTTP status.
pub struct Notified(NotifyResponse);

impl IntoResponse for Notified {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

fn internal(err: impl ToString) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

// === Handlers ===

/// POST /callbacks/tx/{id}
///
/// The engine blocks on the node and the database, so it runs off the
/// async workers.
async fn notify_tx(State(state): State<AppState>, Path(id): Path<String>) -> Notified {
    let engine = state.engine.clone();
    match tokio::task::spawn_blocking(move || engine.notify_transaction(&id)).await {
        Ok(response) => Notified(response),
        Err(err) => Notified(NotifyResponse {
            status: NotifyStatus::Error,
            message: err.to_string(),
            retryable: true,
        }),
    }
}

/// POST /callbacks/block/{hash}
async fn notify_block(State(state): State<AppState>, Path(hash): Path<String>) -> Notified {
    Notified(state.engine.notify_block(&hash))
}

/// POST /accounts/{name}
async fn open_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<OpenedAccount>), (StatusCode, Json<ErrorResponse>)> {
    let store = state.store.clone();
    let label = name.clone();
    let account = tokio::task::spawn_blocking(move || store.open_account(&label))
        .await
        .map_err(internal)?
        .map_err(internal)?;
    Ok((
        StatusCode::CREATED,
        Json(OpenedAccount {
            account: account.0,
            name,
        }),
    ))
}

/// GET /accounts
async fn list_accounts(
    State(state): State<AppState>,
) -> Result<Json<Vec<AccountRow>>, (StatusCode, Json<ErrorResponse>)> {
    let store = state.store.clone();
    let rows = tokio::task::spawn_blocking(move || store.accounts())
        .await
        .map_err(internal)?
        .map_err(internal)?;
    Ok(Json(rows))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/callbacks/tx/{id}", post(notify_tx))
        .route("/callbacks/block/{hash}", post(notify_block))
        .route("/accounts", get(list_accounts))
        .route("/accounts/{name}", post(open_account))
        .with_state(state)
}

// === Main ===

/// The node client is blocking, so everything is wired up before the async
/// runtime starts and outlives it.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let store = Arc::new(SqliteStore::open(&config.database)?);
    let node = Arc::new(RpcNode::new(&config.node)?);
    let engine = Arc::new(Reconciler::new(
        &config,
        node,
        store.clone(),
        store.clone(),
        store.clone(),
    ));

    let state = AppState {
        engine: engine.clone(),
        store: store.clone(),
    };
    tokio::runtime::Runtime::new()?.block_on(serve(state, &store))
}

async fn serve(state: AppState, store: &SqliteStore) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!(
        addr = "127.0.0.1:3000",
        db = %store.path().display(),
        "deposit callback server listening"
    );
    println!("Endpoints:");
    println!("  POST /callbacks/tx/:id      - Transaction notification");
    println!("  POST /callbacks/block/:hash - Block notification");
    println!("  POST /accounts/:name        - Provision an account");
    println!("  GET  /accounts              - List balances");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
