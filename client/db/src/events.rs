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

//! Idempotent chain-event upserts.
//!
//! Event delivery is at-least-once and unordered. Every statement here is
//! commutative under its predicate: `INSERT OR IGNORE` for create-once
//! rows, `ON CONFLICT DO UPDATE ... WHERE` with a strict block-number
//! comparison for registry rows, `MAX(old, new)` for watermarks, and a
//! `processed_events` guard for quota top-ups.

use sqlx::{QueryBuilder, Row, Sqlite};

use fb_types::PayerAddress;

use crate::Backend;

impl Backend {
	/// `DataSetCreated`. The payer is stored lowercased; replays are
	/// ignored.
	pub async fn insert_data_set(
		&self,
		id: &str,
		service_provider_id: &str,
		payer: &PayerAddress,
		with_cdn: bool,
		with_ipfs_indexing: bool,
	) -> Result<(), sqlx::Error> {
		sqlx::query(
			"INSERT OR IGNORE INTO data_sets(
				id,
				service_provider_id,
				payer_address,
				with_cdn,
				with_ipfs_indexing)
			VALUES (?, ?, ?, ?, ?)",
		)
		.bind(id)
		.bind(service_provider_id)
		.bind(payer.as_str())
		.bind(with_cdn)
		.bind(with_ipfs_indexing)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// `PieceAdded`. Re-adding a previously deleted piece revives it.
	pub async fn upsert_piece(
		&self,
		id: &str,
		data_set_id: &str,
		cid: &str,
		ipfs_root_cid: Option<&str>,
		x402_price: Option<&str>,
	) -> Result<(), sqlx::Error> {
		sqlx::query(
			"INSERT INTO pieces(
				id,
				data_set_id,
				cid,
				ipfs_root_cid,
				x402_price,
				is_deleted)
			VALUES (?, ?, ?, ?, ?, 0)
			ON CONFLICT(id) DO UPDATE SET
				data_set_id = excluded.data_set_id,
				cid = excluded.cid,
				ipfs_root_cid = excluded.ipfs_root_cid,
				x402_price = excluded.x402_price,
				is_deleted = 0",
		)
		.bind(id)
		.bind(data_set_id)
		.bind(cid)
		.bind(ipfs_root_cid)
		.bind(x402_price)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// The payer behind a data set, if the set is known yet.
	pub async fn data_set_payer(&self, data_set_id: &str) -> Result<Option<String>, sqlx::Error> {
		let row = sqlx::query("SELECT payer_address FROM data_sets WHERE id = ?")
			.bind(data_set_id)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.map(|row| row.get(0)))
	}

	/// `PiecesRemoved`. Marks the pieces deleted and drops the x402 price
	/// quote for any cid that no longer has a live copy under the same
	/// payer.
	pub async fn remove_pieces(
		&self,
		data_set_id: &str,
		piece_ids: &[String],
	) -> Result<(), sqlx::Error> {
		if piece_ids.is_empty() {
			return Ok(());
		}
		let mut tx = self.pool.begin().await?;

		let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
			"SELECT DISTINCT p.cid, d.payer_address
			FROM pieces p
			JOIN data_sets d ON d.id = p.data_set_id
			WHERE p.data_set_id = ",
		);
		builder.push_bind(data_set_id);
		builder.push(" AND p.id IN (");
		{
			let mut ids = builder.separated(", ");
			for id in piece_ids {
				ids.push_bind(id);
			}
		}
		builder.push(")");
		let removed: Vec<(String, String)> = builder
			.build()
			.fetch_all(&mut *tx)
			.await?
			.iter()
			.map(|row| (row.get(0), row.get(1)))
			.collect();

		let mut builder: QueryBuilder<Sqlite> =
			QueryBuilder::new("UPDATE pieces SET is_deleted = 1 WHERE data_set_id = ");
		builder.push_bind(data_set_id);
		builder.push(" AND id IN (");
		{
			let mut ids = builder.separated(", ");
			for id in piece_ids {
				ids.push_bind(id);
			}
		}
		builder.push(")");
		builder.build().execute(&mut *tx).await?;

		for (cid, payer) in removed {
			let live_copies: i64 = sqlx::query(
				"SELECT COUNT(*)
				FROM pieces p
				JOIN data_sets d ON d.id = p.data_set_id
				WHERE p.cid = ? AND d.payer_address = ? AND p.is_deleted = 0",
			)
			.bind(&cid)
			.bind(&payer)
			.fetch_one(&mut *tx)
			.await?
			.get(0);
			if live_copies == 0 {
				sqlx::query("DELETE FROM piece_price_quotes WHERE quote_key = ?")
					.bind(format!("{payer}:{cid}"))
					.execute(&mut *tx)
					.await?;
			}
		}

		tx.commit().await
	}

	/// `ServiceTerminated` / `CDNServiceTerminated`.
	pub async fn terminate_cdn_service(
		&self,
		data_set_id: &str,
		tx_hash: &str,
		lockup_unlocks_at: i64,
	) -> Result<(), sqlx::Error> {
		sqlx::query(
			"UPDATE data_sets SET
				with_cdn = 0,
				terminate_service_tx_hash = ?,
				lockup_unlocks_at = ?
			WHERE id = ?",
		)
		.bind(tx_hash)
		.bind(lockup_unlocks_at)
		.bind(data_set_id)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// `CDNPaymentRailsToppedUp`. Returns `false` when the event entity id
	/// was already processed (replay); the quota increments happen at most
	/// once per entity id. The quotas row may predate `DataSetCreated`.
	pub async fn add_egress_quotas(
		&self,
		event_type: &str,
		entity_id: &str,
		data_set_id: &str,
		cdn_bytes: i64,
		cache_miss_bytes: i64,
		processed_at: i64,
	) -> Result<bool, sqlx::Error> {
		let mut tx = self.pool.begin().await?;

		let inserted = sqlx::query(
			"INSERT INTO processed_events(event_type, entity_id, processed_at)
			VALUES (?, ?, ?)
			ON CONFLICT(event_type, entity_id) DO NOTHING",
		)
		.bind(event_type)
		.bind(entity_id)
		.bind(processed_at)
		.execute(&mut *tx)
		.await?;
		if inserted.rows_affected() == 0 {
			return Ok(false);
		}

		sqlx::query(
			"INSERT INTO data_set_egress_quotas(
				data_set_id,
				cdn_egress_quota,
				cache_miss_egress_quota)
			VALUES (?, ?, ?)
			ON CONFLICT(data_set_id) DO UPDATE SET
				cdn_egress_quota = cdn_egress_quota + excluded.cdn_egress_quota,
				cache_miss_egress_quota = cache_miss_egress_quota + excluded.cache_miss_egress_quota",
		)
		.bind(data_set_id)
		.bind(cdn_bytes)
		.bind(cache_miss_bytes)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(true)
	}

	/// Registry `ProductAdded`/`ProductUpdated`. Out-of-order updates are
	/// ignored: only a strictly greater block number replaces the stored
	/// row.
	pub async fn upsert_service_provider(
		&self,
		id: &str,
		service_url: &str,
		block_number: i64,
	) -> Result<(), sqlx::Error> {
		sqlx::query(
			"INSERT INTO service_providers(id, service_url, block_number, is_deleted)
			VALUES (?, ?, ?, 0)
			ON CONFLICT(id) DO UPDATE SET
				service_url = excluded.service_url,
				block_number = excluded.block_number,
				is_deleted = 0
			WHERE excluded.block_number > service_providers.block_number",
		)
		.bind(id)
		.bind(service_url)
		.bind(block_number)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Registry `ProductRemoved` / `ProviderRemoved`.
	pub async fn remove_service_provider(&self, id: &str) -> Result<(), sqlx::Error> {
		sqlx::query("UPDATE service_providers SET is_deleted = 1 WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// `CDNPaymentSettled`. The watermark only moves forward.
	pub async fn settle_cdn_payments(
		&self,
		data_set_id: &str,
		settled_until: i64,
	) -> Result<(), sqlx::Error> {
		sqlx::query(
			"UPDATE data_sets SET
				cdn_payments_settled_until = MAX(cdn_payments_settled_until, ?)
			WHERE id = ?",
		)
		.bind(settled_until)
		.bind(data_set_id)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// x402 price quote for `<payer>:<cid>`, replaced only by a strictly
	/// newer block.
	pub async fn upsert_piece_price_quote(
		&self,
		quote_key: &str,
		price: &str,
		block_number: i64,
	) -> Result<(), sqlx::Error> {
		sqlx::query(
			"INSERT INTO piece_price_quotes(quote_key, price, block_number)
			VALUES (?, ?, ?)
			ON CONFLICT(quote_key) DO UPDATE SET
				price = excluded.price,
				block_number = excluded.block_number
			WHERE excluded.block_number > piece_price_quotes.block_number",
		)
		.bind(quote_key)
		.bind(price)
		.bind(block_number)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	pub async fn piece_price_quote(
		&self,
		quote_key: &str,
	) -> Result<Option<(String, i64)>, sqlx::Error> {
		let row = sqlx::query(
			"SELECT price, block_number FROM piece_price_quotes WHERE quote_key = ?",
		)
		.bind(quote_key)
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.map(|row| (row.get(0), row.get(1))))
	}
}
