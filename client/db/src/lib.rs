// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0
// This file is part of FilBeam.
//
// Copyright (c) 2025 FilBeam contributors.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The FilBeam relational store.
//!
//! One SQLite database per environment holds the chain-derived view
//! (data sets, pieces, providers, wallets, quotas) next to the gateway's
//! retrieval logs and the reporter's watermarks. Writers are separated by
//! convention: the indexer owns the chain-derived rows, the gateway owns
//! egress counters and logs, the reporter owns watermarks and pending
//! transaction hashes. Correctness under concurrent tasks relies on
//! statement-level atomicity of the conditional upserts, not on in-process
//! locks.

#![warn(unused_crate_dependencies)]

use sqlx::{
	sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteQueryResult},
	ConnectOptions, Error,
};
use std::str::FromStr;

// Callers match on store errors without naming the driver crate
// themselves.
pub use sqlx;

pub mod events;
pub mod logs;
pub mod retrieval;
pub mod usage;
pub mod wallets;

pub use logs::NewRetrievalLog;
pub use retrieval::{RetrievalCandidate, RetrievalRejection};
pub use usage::UsageRollup;

pub struct SqliteBackendConfig<'a> {
	pub path: &'a str,
	pub create_if_missing: bool,
}

pub enum BackendConfig<'a> {
	Sqlite(SqliteBackendConfig<'a>),
}

#[derive(Clone)]
pub struct Backend {
	pool: SqlitePool,
}

impl Backend {
	pub async fn new(config: BackendConfig<'_>, pool_size: u32) -> Result<Self, Error> {
		let pool = SqlitePoolOptions::new()
			.max_connections(pool_size)
			.connect_lazy_with(
				Self::connect_options(&config)?
					.disable_statement_logging()
					.clone(),
			);
		let _ = Self::create_if_not_exists(&pool).await?;
		Ok(Self { pool })
	}

	fn connect_options(config: &BackendConfig) -> Result<SqliteConnectOptions, Error> {
		match config {
			BackendConfig::Sqlite(config) => {
				let config = SqliteConnectOptions::from_str(config.path)?
					.create_if_missing(config.create_if_missing);
				Ok(config)
			}
		}
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	async fn create_if_not_exists(pool: &SqlitePool) -> Result<SqliteQueryResult, Error> {
		sqlx::query(
			"BEGIN;
            CREATE TABLE IF NOT EXISTS data_sets (
                id TEXT PRIMARY KEY,
                service_provider_id TEXT NOT NULL,
                payer_address TEXT NOT NULL,
                with_cdn INTEGER NOT NULL DEFAULT 0,
                with_ipfs_indexing INTEGER NOT NULL DEFAULT 0,
                total_egress_bytes_used INTEGER NOT NULL DEFAULT 0,
                usage_reported_until INTEGER NOT NULL DEFAULT 0,
                cdn_payments_settled_until INTEGER NOT NULL DEFAULT 0,
                pending_usage_report_tx_hash TEXT,
                terminate_service_tx_hash TEXT,
                lockup_unlocks_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS data_set_egress_quotas (
                data_set_id TEXT PRIMARY KEY,
                cdn_egress_quota INTEGER NOT NULL DEFAULT 0,
                cache_miss_egress_quota INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS pieces (
                id TEXT PRIMARY KEY,
                data_set_id TEXT NOT NULL,
                cid TEXT NOT NULL,
                ipfs_root_cid TEXT,
                x402_price TEXT,
                is_deleted INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS service_providers (
                id TEXT PRIMARY KEY,
                service_url TEXT,
                block_number INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS wallet_details (
                address TEXT PRIMARY KEY,
                is_sanctioned INTEGER NOT NULL DEFAULT 0,
                last_screened_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS retrieval_logs (
                id INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                response_status INTEGER NOT NULL,
                egress_bytes INTEGER,
                cache_miss INTEGER,
                fetch_ttfb INTEGER,
                fetch_ttlb INTEGER,
                worker_ttfb INTEGER,
                request_country_code TEXT,
                data_set_id TEXT,
                bot_name TEXT
            );
            CREATE TABLE IF NOT EXISTS processed_events (
                event_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                processed_at INTEGER NOT NULL,
                PRIMARY KEY (
                    event_type,
                    entity_id
                )
            );
            CREATE TABLE IF NOT EXISTS piece_price_quotes (
                quote_key TEXT PRIMARY KEY,
                price TEXT NOT NULL,
                block_number INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS bad_bits (
                anchor TEXT PRIMARY KEY
            );
            CREATE INDEX IF NOT EXISTS pieces_cid_idx ON pieces (
                cid
            );
            CREATE INDEX IF NOT EXISTS pieces_data_set_idx ON pieces (
                data_set_id
            );
            CREATE INDEX IF NOT EXISTS data_sets_payer_idx ON data_sets (
                payer_address
            );
            CREATE INDEX IF NOT EXISTS data_sets_pending_tx_idx ON data_sets (
                pending_usage_report_tx_hash
            );
            CREATE INDEX IF NOT EXISTS retrieval_logs_ts_idx ON retrieval_logs (
                data_set_id,
                timestamp
            );
            COMMIT;",
		)
		.execute(pool)
		.await
	}
}
