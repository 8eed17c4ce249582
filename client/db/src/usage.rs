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

//! Usage-reporting support: aggregation of unreported egress and the
//! pending-transaction-hash workflow.
//!
//! Double counting is prevented by the `pending_usage_report_tx_hash IS
//! NULL` predicate in the aggregation: once a batch is in flight its rows
//! are invisible to the next aggregation until the hash is cleared (on
//! confirmation) or rewritten (on retry).

use sqlx::{QueryBuilder, Row, Sqlite};

use crate::Backend;

/// Aggregated unreported egress for one data set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UsageRollup {
	pub data_set_id: String,
	pub cdn_bytes: i64,
	pub cache_miss_bytes: i64,
}

impl Backend {
	/// Sums measured egress per data set in the window
	/// `(usage_reported_until, up_to_timestamp]`, skipping data sets with a
	/// report already in flight.
	pub async fn aggregate_unreported_usage(
		&self,
		up_to_timestamp: i64,
	) -> Result<Vec<UsageRollup>, sqlx::Error> {
		let rows = sqlx::query(
			"SELECT
				r.data_set_id,
				SUM(r.egress_bytes) AS cdn_bytes,
				SUM(CASE WHEN r.cache_miss THEN r.egress_bytes ELSE 0 END) AS cache_miss_bytes
			FROM retrieval_logs r
			JOIN data_sets d ON r.data_set_id = d.id
			WHERE r.timestamp > d.usage_reported_until
				AND r.timestamp <= ?
				AND r.egress_bytes IS NOT NULL
				AND d.pending_usage_report_tx_hash IS NULL
			GROUP BY r.data_set_id
			HAVING cdn_bytes > 0 OR cache_miss_bytes > 0
			ORDER BY r.data_set_id",
		)
		.bind(up_to_timestamp)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.iter()
			.map(|row| UsageRollup {
				data_set_id: row.get(0),
				cdn_bytes: row.get(1),
				cache_miss_bytes: row.get(2),
			})
			.collect())
	}

	/// Marks a submitted batch as in flight. Rows that already carry a
	/// pending hash are left untouched.
	pub async fn set_pending_tx_hash(
		&self,
		data_set_ids: &[String],
		tx_hash: &str,
	) -> Result<(), sqlx::Error> {
		if data_set_ids.is_empty() {
			return Ok(());
		}
		let mut builder: QueryBuilder<Sqlite> =
			QueryBuilder::new("UPDATE data_sets SET pending_usage_report_tx_hash = ");
		builder.push_bind(tx_hash);
		builder.push(" WHERE pending_usage_report_tx_hash IS NULL AND id IN (");
		{
			let mut ids = builder.separated(", ");
			for id in data_set_ids {
				ids.push_bind(id);
			}
		}
		builder.push(")");
		builder.build().execute(&self.pool).await?;
		Ok(())
	}

	/// Confirmation: advances the watermark and clears the pending hash for
	/// every row whose in-flight hash matches. Returns the number of rows
	/// settled.
	pub async fn confirm_usage_reported(
		&self,
		tx_hash: &str,
		up_to_timestamp: i64,
	) -> Result<u64, sqlx::Error> {
		let result = sqlx::query(
			"UPDATE data_sets SET
				usage_reported_until = MAX(usage_reported_until, ?),
				pending_usage_report_tx_hash = NULL
			WHERE pending_usage_report_tx_hash = ?",
		)
		.bind(up_to_timestamp)
		.bind(tx_hash)
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}

	/// Retry: atomically rewrites the in-flight hash so that only the
	/// replacement transaction can ever confirm this batch.
	pub async fn replace_pending_tx_hash(
		&self,
		old_tx_hash: &str,
		new_tx_hash: &str,
	) -> Result<u64, sqlx::Error> {
		let result = sqlx::query(
			"UPDATE data_sets SET pending_usage_report_tx_hash = ?
			WHERE pending_usage_report_tx_hash = ?",
		)
		.bind(new_tx_hash)
		.bind(old_tx_hash)
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}

	/// The CDN data set whose usage has gone unreported the longest, for
	/// the settlement-lag metric.
	pub async fn oldest_unsettled_data_set(&self) -> Result<Option<(String, i64)>, sqlx::Error> {
		let row = sqlx::query(
			"SELECT id, usage_reported_until FROM data_sets
			WHERE with_cdn = 1
			ORDER BY usage_reported_until ASC, id ASC
			LIMIT 1",
		)
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.map(|row| (row.get(0), row.get(1))))
	}
}
