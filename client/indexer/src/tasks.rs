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

//! The indexer's scheduled tick.
//!
//! Three tasks run concurrently on every tick. Upstream hiccups (subgraph,
//! sanctions API) are logged and suppressed; store failures are collected
//! and surfaced together so one broken sibling never cancels the others.

use std::time::Instant;

use serde::Deserialize;

use fb_types::now_ms;

use crate::Indexer;

/// Every failing sibling of one tick, surfaced as a single error.
#[derive(Debug, thiserror::Error)]
#[error("{} scheduled task(s) failed: {}", failures.len(), failures.join("; "))]
pub struct AggregateTaskError {
	pub failures: Vec<String>,
}

pub async fn run_scheduled_tasks(indexer: &Indexer) -> Result<(), AggregateTaskError> {
	let (subgraph, screening, settlement) = futures::join!(
		probe_subgraph(indexer),
		screen_stale_wallets(indexer),
		report_settlement_lag(indexer),
	);

	let failures: Vec<String> = [
		subgraph.err().map(|e| format!("subgraph probe: {e}")),
		screening.err().map(|e| format!("wallet screening: {e}")),
		settlement.err().map(|e| format!("settlement stats: {e}")),
	]
	.into_iter()
	.flatten()
	.collect();

	if failures.is_empty() {
		Ok(())
	} else {
		Err(AggregateTaskError { failures })
	}
}

#[derive(Debug, Deserialize)]
struct SubgraphMeta {
	#[serde(rename = "hasIndexingErrors")]
	has_indexing_errors: bool,
	block: SubgraphBlock,
}

#[derive(Debug, Deserialize)]
struct SubgraphBlock {
	number: u64,
}

#[derive(Debug, Deserialize)]
struct SubgraphMetaData {
	#[serde(rename = "_meta")]
	meta: SubgraphMeta,
}

#[derive(Debug, Deserialize)]
struct SubgraphMetaResponse {
	data: SubgraphMetaData,
}

/// Asks the subgraph for its indexing health and head block; failures are
/// warnings, not tick failures.
async fn probe_subgraph(indexer: &Indexer) -> Result<(), String> {
	if indexer.config.subgraph_url.is_empty() {
		return Ok(());
	}
	let started = Instant::now();
	let response = indexer
		.http
		.post(&indexer.config.subgraph_url)
		.json(&serde_json::json!({
			"query": "{ _meta { hasIndexingErrors block { number } } }",
		}))
		.send()
		.await
		.and_then(reqwest::Response::error_for_status);
	let response = match response {
		Ok(response) => response,
		Err(e) => {
			log::warn!(target: "filbeam-indexer", "subgraph probe failed: {}", e);
			return Ok(());
		}
	};
	let parsed: SubgraphMetaResponse = match response.json().await {
		Ok(parsed) => parsed,
		Err(e) => {
			log::warn!(target: "filbeam-indexer", "subgraph probe returned junk: {}", e);
			return Ok(());
		}
	};
	indexer
		.analytics
		.write_point(
			"subgraph-health",
			serde_json::json!({
				"block_number": parsed.data.meta.block.number,
				"errors": if parsed.data.meta.has_indexing_errors { 1 } else { 0 },
				"lag_ms": started.elapsed().as_millis() as u64,
			}),
		)
		.await;
	Ok(())
}

/// Re-screens up to `screening_batch_size` wallets whose verdict has gone
/// stale. A screening-API failure skips the wallet; a store failure fails
/// the task.
async fn screen_stale_wallets(indexer: &Indexer) -> Result<(), String> {
	let stale_before = now_ms() - indexer.config.screening_stale_threshold_ms;
	let due = indexer
		.store
		.wallets_due_for_screening(stale_before, indexer.config.screening_batch_size)
		.await
		.map_err(|e| e.to_string())?;

	for address in due {
		match indexer.screening.is_sanctioned(&address).await {
			Ok(is_sanctioned) => {
				indexer
					.store
					.upsert_wallet(&address, is_sanctioned, now_ms())
					.await
					.map_err(|e| e.to_string())?;
			}
			Err(e) => {
				log::warn!(
					target: "filbeam-indexer",
					"screening {} failed, keeping previous verdict: {}",
					address,
					e,
				);
			}
		}
	}
	Ok(())
}

/// Emits how far behind the least recently reported CDN data set is.
async fn report_settlement_lag(indexer: &Indexer) -> Result<(), String> {
	let Some((data_set_id, usage_reported_until)) = indexer
		.store
		.oldest_unsettled_data_set()
		.await
		.map_err(|e| e.to_string())?
	else {
		return Ok(());
	};
	indexer
		.analytics
		.write_point(
			"settlement-lag",
			serde_json::json!({
				"usage_reported_until_ms": usage_reported_until,
				"lag_ms": now_ms() - usage_reported_until,
				"data_set_id": data_set_id,
			}),
		)
		.await;
	Ok(())
}
