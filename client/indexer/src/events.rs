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

//! Webhook payloads and their handlers.
//!
//! Each path gets its own serde struct; a body that fails to deserialize
//! is a `400`, a handled event is a `200`. The store writes are the
//! idempotent upserts in `fb-db` so replaying any payload is harmless.

use std::sync::Arc;

use axum::{
	extract::{rejection::JsonRejection, State},
	http::StatusCode,
	Json,
};
use ethereum_types::U256;
use serde::Deserialize;

use fb_types::{calculate_egress_quota, epoch_to_timestamp_ms, now_ms, PayerAddress, PieceCid};

use crate::{Indexer, IndexerError, RetryJob};

const MS_PER_DAY: i64 = 86_400_000;

/// PDP in the provider registry's product enumeration.
const PRODUCT_TYPE_PDP: u64 = 0;

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, IndexerError> {
	body.map(|Json(payload)| payload)
		.map_err(|e| IndexerError::bad_request(e.body_text()))
}

fn parse_payer(raw: &str) -> Result<PayerAddress, IndexerError> {
	raw.parse()
		.map_err(|_| IndexerError::bad_request(format!("invalid payer address {raw:?}")))
}

fn parse_amount(raw: &str, field: &str) -> Result<U256, IndexerError> {
	U256::from_dec_str(raw)
		.map_err(|_| IndexerError::bad_request(format!("invalid {field} amount {raw:?}")))
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetCreatedEvent {
	pub data_set_id: String,
	pub service_provider_id: String,
	pub payer_address: String,
	#[serde(rename = "withCDN")]
	pub with_cdn: bool,
	#[serde(rename = "withIPFSIndexing", default)]
	pub with_ipfs_indexing: bool,
}

/// Screens the payer, records the wallet, inserts the data set. Failures
/// after schema validation are queued for a delayed retry instead of
/// bouncing the webhook.
pub async fn handle_data_set_created(
	State(indexer): State<Arc<Indexer>>,
	body: Result<Json<DataSetCreatedEvent>, JsonRejection>,
) -> Result<StatusCode, IndexerError> {
	let event = parse_body(body)?;
	parse_payer(&event.payer_address)?;

	if let Err(e) = apply_data_set_created(&indexer, &event).await {
		log::warn!(
			target: "filbeam-indexer",
			"data-set-created for {} failed, scheduling retry: {}",
			event.data_set_id,
			e,
		);
		indexer.enqueue_retry(RetryJob { event, attempt: 1 });
	}
	Ok(StatusCode::OK)
}

pub(crate) async fn apply_data_set_created(
	indexer: &Indexer,
	event: &DataSetCreatedEvent,
) -> Result<(), IndexerError> {
	let payer = parse_payer(&event.payer_address)?;
	let is_sanctioned = indexer
		.screening
		.is_sanctioned(payer.as_str())
		.await
		.map_err(|e| IndexerError::internal(e.to_string()))?;
	indexer
		.store
		.upsert_wallet(payer.as_str(), is_sanctioned, now_ms())
		.await?;
	indexer
		.store
		.insert_data_set(
			&event.data_set_id,
			&event.service_provider_id,
			&payer,
			event.with_cdn,
			event.with_ipfs_indexing,
		)
		.await?;
	Ok(())
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceAddedEvent {
	pub data_set_id: String,
	pub piece_id: String,
	/// Hex-encoded binary CID.
	pub piece_cid: String,
	#[serde(default)]
	pub keys: Vec<String>,
	#[serde(default)]
	pub values: Vec<String>,
	#[serde(default)]
	pub block_number: Option<i64>,
}

impl PieceAddedEvent {
	/// The parallel key/value arrays carry optional piece metadata.
	fn metadata(&self, key: &str) -> Option<&str> {
		self.keys
			.iter()
			.position(|k| k == key)
			.and_then(|i| self.values.get(i))
			.map(String::as_str)
	}
}

pub async fn handle_piece_added(
	State(indexer): State<Arc<Indexer>>,
	body: Result<Json<PieceAddedEvent>, JsonRejection>,
) -> Result<StatusCode, IndexerError> {
	let event = parse_body(body)?;
	let cid = PieceCid::from_hex_bytes(&event.piece_cid)
		.map_err(|e| IndexerError::bad_request(format!("invalid piece CID: {e}")))?;

	let ipfs_root_cid = event.metadata("ipfsRootCID");
	let x402_price = match event.metadata("x402Price") {
		Some(raw) => Some(parse_amount(raw, "x402Price")?),
		None => None,
	};
	let price_string = x402_price.map(|p| p.to_string());

	indexer
		.store
		.upsert_piece(
			&event.piece_id,
			&event.data_set_id,
			cid.as_str(),
			ipfs_root_cid,
			price_string.as_deref(),
		)
		.await?;

	// The external price quote is keyed by payer, so it only exists once
	// the data set does; a strictly newer block replaces it.
	if let (Some(price), Some(block_number)) = (price_string, event.block_number) {
		if let Some(payer) = indexer.store.data_set_payer(&event.data_set_id).await? {
			indexer
				.store
				.upsert_piece_price_quote(&format!("{payer}:{cid}"), &price, block_number)
				.await?;
		}
	}
	Ok(StatusCode::OK)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiecesRemovedEvent {
	pub data_set_id: String,
	pub piece_ids: Vec<String>,
}

pub async fn handle_pieces_removed(
	State(indexer): State<Arc<Indexer>>,
	body: Result<Json<PiecesRemovedEvent>, JsonRejection>,
) -> Result<StatusCode, IndexerError> {
	let event = parse_body(body)?;
	indexer
		.store
		.remove_pieces(&event.data_set_id, &event.piece_ids)
		.await?;
	Ok(StatusCode::OK)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTerminatedEvent {
	pub data_set_id: String,
	pub block_number: u64,
	#[serde(default)]
	pub transaction_hash: Option<String>,
}

pub async fn handle_service_terminated(
	State(indexer): State<Arc<Indexer>>,
	body: Result<Json<ServiceTerminatedEvent>, JsonRejection>,
) -> Result<StatusCode, IndexerError> {
	let event = parse_body(body)?;
	let terminated_at = epoch_to_timestamp_ms(indexer.genesis_ms, event.block_number);
	let lockup_unlocks_at =
		terminated_at + indexer.config.default_lockup_period_days * MS_PER_DAY;
	indexer
		.store
		.terminate_cdn_service(
			&event.data_set_id,
			event.transaction_hash.as_deref().unwrap_or_default(),
			lockup_unlocks_at,
		)
		.await?;
	Ok(StatusCode::OK)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnPaymentRailsToppedUpEvent {
	/// Subgraph entity id; the idempotency key for this top-up.
	pub id: String,
	pub data_set_id: String,
	pub cdn_lockup_added: String,
	pub cache_miss_lockup_added: String,
	pub cdn_rate_per_tib: String,
	pub cache_miss_rate_per_tib: String,
}

pub async fn handle_cdn_payment_rails_topped_up(
	State(indexer): State<Arc<Indexer>>,
	body: Result<Json<CdnPaymentRailsToppedUpEvent>, JsonRejection>,
) -> Result<StatusCode, IndexerError> {
	let event = parse_body(body)?;
	let cdn_bytes = calculate_egress_quota(
		parse_amount(&event.cdn_lockup_added, "cdnLockupAdded")?,
		parse_amount(&event.cdn_rate_per_tib, "cdnRatePerTib")?,
	);
	let cache_miss_bytes = calculate_egress_quota(
		parse_amount(&event.cache_miss_lockup_added, "cacheMissLockupAdded")?,
		parse_amount(&event.cache_miss_rate_per_tib, "cacheMissRatePerTib")?,
	);

	let applied = indexer
		.store
		.add_egress_quotas(
			"cdn-payment-rails-topped-up",
			&event.id,
			&event.data_set_id,
			cdn_bytes,
			cache_miss_bytes,
			now_ms(),
		)
		.await?;
	if !applied {
		log::debug!(
			target: "filbeam-indexer",
			"top-up {} already processed, skipping",
			event.id,
		);
	}
	Ok(StatusCode::OK)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProductEvent {
	pub provider_id: String,
	pub product_type: u64,
	#[serde(default)]
	pub capability_keys: Vec<String>,
	#[serde(default)]
	pub capability_values: Vec<String>,
	#[serde(default)]
	pub block_number: Option<i64>,
}

impl ProviderProductEvent {
	/// Capability values arrive as hex-encoded UTF-8.
	fn capability(&self, key: &str) -> Option<Result<String, IndexerError>> {
		let index = self.capability_keys.iter().position(|k| k == key)?;
		let raw = self.capability_values.get(index)?;
		let decoded = hex::decode(raw.trim_start_matches("0x"))
			.map_err(|_| IndexerError::bad_request(format!("capability {key} is not hex")))
			.and_then(|bytes| {
				String::from_utf8(bytes).map_err(|_| {
					IndexerError::bad_request(format!("capability {key} is not UTF-8"))
				})
			});
		Some(decoded)
	}
}

pub async fn handle_provider_product_upserted(
	State(indexer): State<Arc<Indexer>>,
	body: Result<Json<ProviderProductEvent>, JsonRejection>,
) -> Result<StatusCode, IndexerError> {
	let event = parse_body(body)?;
	if event.product_type != PRODUCT_TYPE_PDP {
		return Ok(StatusCode::OK);
	}
	let service_url = event
		.capability("serviceURL")
		.ok_or_else(|| IndexerError::bad_request("missing serviceURL capability"))??;
	url::Url::parse(&service_url).map_err(|_| {
		IndexerError::bad_request(format!("serviceURL {service_url:?} is not a valid URL"))
	})?;
	indexer
		.store
		.upsert_service_provider(
			&event.provider_id,
			&service_url,
			event.block_number.unwrap_or_default(),
		)
		.await?;
	Ok(StatusCode::OK)
}

pub async fn handle_provider_product_removed(
	State(indexer): State<Arc<Indexer>>,
	body: Result<Json<ProviderProductEvent>, JsonRejection>,
) -> Result<StatusCode, IndexerError> {
	let event = parse_body(body)?;
	if event.product_type != PRODUCT_TYPE_PDP {
		return Ok(StatusCode::OK);
	}
	indexer.store.remove_service_provider(&event.provider_id).await?;
	Ok(StatusCode::OK)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRemovedEvent {
	pub provider_id: String,
}

pub async fn handle_provider_removed(
	State(indexer): State<Arc<Indexer>>,
	body: Result<Json<ProviderRemovedEvent>, JsonRejection>,
) -> Result<StatusCode, IndexerError> {
	let event = parse_body(body)?;
	indexer.store.remove_service_provider(&event.provider_id).await?;
	Ok(StatusCode::OK)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnPaymentSettledEvent {
	pub data_set_id: String,
	pub block_number: u64,
}

pub async fn handle_cdn_payment_settled(
	State(indexer): State<Arc<Indexer>>,
	body: Result<Json<CdnPaymentSettledEvent>, JsonRejection>,
) -> Result<StatusCode, IndexerError> {
	let event = parse_body(body)?;
	let settled_until = epoch_to_timestamp_ms(indexer.genesis_ms, event.block_number);
	indexer
		.store
		.settle_cdn_payments(&event.data_set_id, settled_until)
		.await?;
	Ok(StatusCode::OK)
}
