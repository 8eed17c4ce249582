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

//! Retrieval logging and per-data-set egress accounting.

use sqlx::Row;

use crate::Backend;

/// An append-only retrieval log row. Measurement fields stay `None` for
/// requests rejected before any body was fetched.
#[derive(Clone, Debug, Default)]
pub struct NewRetrievalLog {
	pub timestamp: i64,
	pub response_status: u16,
	pub egress_bytes: Option<i64>,
	pub cache_miss: Option<bool>,
	pub fetch_ttfb: Option<i64>,
	pub fetch_ttlb: Option<i64>,
	pub worker_ttfb: Option<i64>,
	pub request_country_code: Option<String>,
	pub data_set_id: Option<String>,
	pub bot_name: Option<String>,
}

impl Backend {
	pub async fn insert_retrieval_log(&self, entry: &NewRetrievalLog) -> Result<(), sqlx::Error> {
		sqlx::query(
			"INSERT INTO retrieval_logs(
				timestamp,
				response_status,
				egress_bytes,
				cache_miss,
				fetch_ttfb,
				fetch_ttlb,
				worker_ttfb,
				request_country_code,
				data_set_id,
				bot_name)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(entry.timestamp)
		.bind(entry.response_status as i64)
		.bind(entry.egress_bytes)
		.bind(entry.cache_miss)
		.bind(entry.fetch_ttfb)
		.bind(entry.fetch_ttlb)
		.bind(entry.worker_ttfb)
		.bind(entry.request_country_code.as_deref())
		.bind(entry.data_set_id.as_deref())
		.bind(entry.bot_name.as_deref())
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Accounts measured egress against a data set. The lifetime counter
	/// always grows; with `enforce` the quotas are decremented
	/// unconditionally (CDN) and on cache misses (cache-miss), and are
	/// allowed to go negative — a stream that was already in flight when
	/// the quota ran out is never cut short.
	pub async fn update_data_set_stats(
		&self,
		data_set_id: &str,
		egress_bytes: i64,
		cache_miss: bool,
		enforce: bool,
	) -> Result<(), sqlx::Error> {
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			"UPDATE data_sets SET total_egress_bytes_used = total_egress_bytes_used + ?
			WHERE id = ?",
		)
		.bind(egress_bytes)
		.bind(data_set_id)
		.execute(&mut *tx)
		.await?;

		if enforce {
			let cache_miss_bytes = if cache_miss { egress_bytes } else { 0 };
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
			.bind(-egress_bytes)
			.bind(-cache_miss_bytes)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await
	}
}
