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

//! Retrieval-candidate selection.
//!
//! One join query pulls every row linking a piece CID to a data set, its
//! service provider, the payer's wallet record and the egress quotas. The
//! rows then pass through an ordered rejection ladder; the earliest check
//! that empties the surviving set decides the response status.

use sqlx::Row;

use fb_types::{PayerAddress, PieceCid};

use crate::Backend;

/// A storage provider a piece can be fetched from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetrievalCandidate {
	pub data_set_id: String,
	pub service_provider_id: String,
	pub service_url: String,
}

/// Why no candidate survived, in ladder order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RetrievalRejection {
	UnknownPiece(PieceCid),
	NoServiceProvider,
	NoPayingDataSet(PayerAddress),
	CdnDisabled(PayerAddress),
	PayerSanctioned(PayerAddress),
	NoApprovedProvider,
	CdnQuotaExhausted,
	CacheMissQuotaExhausted,
}

impl RetrievalRejection {
	pub fn status(&self) -> u16 {
		match self {
			Self::UnknownPiece(_) | Self::NoServiceProvider | Self::NoApprovedProvider => 404,
			Self::NoPayingDataSet(_)
			| Self::CdnDisabled(_)
			| Self::CdnQuotaExhausted
			| Self::CacheMissQuotaExhausted => 402,
			Self::PayerSanctioned(_) => 403,
		}
	}

	pub fn message(&self) -> String {
		match self {
			Self::UnknownPiece(cid) => format!("Piece CID {cid} is not known to FilBeam"),
			Self::NoServiceProvider => {
				"No service provider is associated with this piece".to_string()
			}
			Self::NoPayingDataSet(payer) => {
				format!("Wallet {payer} has not paid for CDN retrievals of this piece")
			}
			Self::CdnDisabled(payer) => {
				format!("CDN delivery is not enabled for the data sets of wallet {payer}")
			}
			Self::PayerSanctioned(payer) => format!("Wallet {payer} is sanctioned"),
			Self::NoApprovedProvider => {
				"No approved service provider can serve this piece".to_string()
			}
			Self::CdnQuotaExhausted => "CDN egress quota exhausted".to_string(),
			Self::CacheMissQuotaExhausted => "Cache-miss egress quota exhausted".to_string(),
		}
	}
}

/// One row of the candidate join, before the ladder runs.
#[derive(Clone, Debug)]
pub(crate) struct CandidateRow {
	data_set_id: String,
	payer_address: String,
	with_cdn: bool,
	provider_id: Option<String>,
	service_url: Option<String>,
	provider_deleted: bool,
	is_sanctioned: bool,
	cdn_egress_quota: i64,
	cache_miss_egress_quota: i64,
}

impl Backend {
	/// Resolves the candidate providers for `cid` paid for by `payer`, or
	/// the rejection that decides the response status.
	pub async fn retrieval_candidates(
		&self,
		cid: &PieceCid,
		payer: &PayerAddress,
		enforce_quotas: bool,
	) -> Result<Result<Vec<RetrievalCandidate>, RetrievalRejection>, sqlx::Error> {
		let rows = sqlx::query(
			"SELECT
				d.id, d.payer_address, d.with_cdn,
				sp.id, sp.service_url, IFNULL(sp.is_deleted, 0),
				IFNULL(w.is_sanctioned, 0),
				IFNULL(q.cdn_egress_quota, 0), IFNULL(q.cache_miss_egress_quota, 0)
			FROM pieces p
			JOIN data_sets d ON d.id = p.data_set_id
			LEFT JOIN service_providers sp ON sp.id = d.service_provider_id
			LEFT JOIN wallet_details w ON w.address = d.payer_address
			LEFT JOIN data_set_egress_quotas q ON q.data_set_id = d.id
			WHERE p.cid = ? AND p.is_deleted = 0",
		)
		.bind(cid.as_str())
		.fetch_all(&self.pool)
		.await?;

		let rows = rows
			.iter()
			.map(|row| CandidateRow {
				data_set_id: row.get(0),
				payer_address: row.get(1),
				with_cdn: row.get::<i64, _>(2) != 0,
				provider_id: row.get(3),
				service_url: row.get(4),
				provider_deleted: row.get::<i64, _>(5) != 0,
				is_sanctioned: row.get::<i64, _>(6) != 0,
				cdn_egress_quota: row.get(7),
				cache_miss_egress_quota: row.get(8),
			})
			.collect();

		Ok(select_candidates(rows, cid, payer, enforce_quotas))
	}

	/// Denylist membership check for the gateway's bad-bits lookup.
	pub async fn is_bad_bits(&self, anchor: &str) -> Result<bool, sqlx::Error> {
		let row = sqlx::query("SELECT anchor FROM bad_bits WHERE anchor = ?")
			.bind(anchor)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.is_some())
	}

	pub async fn add_bad_bits(&self, anchor: &str) -> Result<(), sqlx::Error> {
		sqlx::query("INSERT OR IGNORE INTO bad_bits(anchor) VALUES (?)")
			.bind(anchor)
			.execute(&self.pool)
			.await?;
		Ok(())
	}
}

/// The §4.1 ladder: each step narrows the surviving set; the step that
/// empties it decides the rejection. Order matters — `with_cdn` is checked
/// before the sanction screen.
pub(crate) fn select_candidates(
	rows: Vec<CandidateRow>,
	cid: &PieceCid,
	payer: &PayerAddress,
	enforce_quotas: bool,
) -> Result<Vec<RetrievalCandidate>, RetrievalRejection> {
	if rows.is_empty() {
		return Err(RetrievalRejection::UnknownPiece(cid.clone()));
	}

	let rows: Vec<_> = rows.into_iter().filter(|r| r.provider_id.is_some()).collect();
	if rows.is_empty() {
		return Err(RetrievalRejection::NoServiceProvider);
	}

	let rows: Vec<_> = rows
		.into_iter()
		.filter(|r| r.payer_address == payer.as_str())
		.collect();
	if rows.is_empty() {
		return Err(RetrievalRejection::NoPayingDataSet(payer.clone()));
	}

	let rows: Vec<_> = rows.into_iter().filter(|r| r.with_cdn).collect();
	if rows.is_empty() {
		return Err(RetrievalRejection::CdnDisabled(payer.clone()));
	}

	let rows: Vec<_> = rows.into_iter().filter(|r| !r.is_sanctioned).collect();
	if rows.is_empty() {
		return Err(RetrievalRejection::PayerSanctioned(payer.clone()));
	}

	let rows: Vec<_> = rows
		.into_iter()
		.filter(|r| !r.provider_deleted && r.service_url.as_deref().is_some_and(|u| !u.is_empty()))
		.collect();
	if rows.is_empty() {
		return Err(RetrievalRejection::NoApprovedProvider);
	}

	let rows = if enforce_quotas {
		let rows: Vec<_> = rows.into_iter().filter(|r| r.cdn_egress_quota > 0).collect();
		if rows.is_empty() {
			return Err(RetrievalRejection::CdnQuotaExhausted);
		}
		let rows: Vec<_> = rows
			.into_iter()
			.filter(|r| r.cache_miss_egress_quota > 0)
			.collect();
		if rows.is_empty() {
			return Err(RetrievalRejection::CacheMissQuotaExhausted);
		}
		rows
	} else {
		rows
	};

	Ok(rows
		.into_iter()
		.map(|r| RetrievalCandidate {
			data_set_id: r.data_set_id,
			service_provider_id: r.provider_id.expect("filtered above; qed"),
			service_url: r.service_url.expect("filtered above; qed"),
		})
		.collect())
}
