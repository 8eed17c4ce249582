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

//! Wallet sanction-screening state.

use sqlx::Row;

use crate::Backend;

impl Backend {
	pub async fn upsert_wallet(
		&self,
		address: &str,
		is_sanctioned: bool,
		screened_at: i64,
	) -> Result<(), sqlx::Error> {
		sqlx::query(
			"INSERT INTO wallet_details(address, is_sanctioned, last_screened_at)
			VALUES (?, ?, ?)
			ON CONFLICT(address) DO UPDATE SET
				is_sanctioned = excluded.is_sanctioned,
				last_screened_at = excluded.last_screened_at",
		)
		.bind(address)
		.bind(is_sanctioned)
		.bind(screened_at)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// Wallets that were never screened or whose last screening predates
	/// `stale_before`, oldest first.
	pub async fn wallets_due_for_screening(
		&self,
		stale_before: i64,
		limit: u32,
	) -> Result<Vec<String>, sqlx::Error> {
		let rows = sqlx::query(
			"SELECT address FROM wallet_details
			WHERE last_screened_at IS NULL OR last_screened_at < ?
			ORDER BY IFNULL(last_screened_at, 0) ASC
			LIMIT ?",
		)
		.bind(stale_before)
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.iter().map(|row| row.get(0)).collect())
	}
}
