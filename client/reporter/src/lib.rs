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

//! The usage reporter.
//!
//! On every tick the reporter rolls up unreported egress, submits one
//! `recordUsageRollups` transaction and hands the hash to a monitor
//! workflow. Watermarks only move once that transaction confirms; a stuck
//! transaction is replaced fee-bumped under the same nonce, and the
//! pending hash is rewritten atomically so each batch can only ever be
//! confirmed once.

#![warn(unused_crate_dependencies)]

use std::sync::Arc;

use ethereum_types::{H256, U256};
use tokio::sync::mpsc;

use fb_chain::{
	gas, spawn_monitor, ChainError, MonitorConfig, OperatorChain, UsageRollupBatch,
};
use fb_types::{epoch_to_timestamp_ms, now_ms, AnalyticsSink, TxQueueMessage};


/// Usage-reporter knobs.
#[derive(Clone, Debug, clap::Parser)]
pub struct ReporterConfig {
	/// Seconds between reporting runs.
	#[arg(long, default_value = "3600")]
	pub reporter_tick_secs: u64,

	/// Seconds between receipt polls of a pending report.
	#[arg(long, default_value = "30")]
	pub monitor_poll_interval_secs: u64,

	/// Receipt polls before a pending report is considered stuck.
	#[arg(long, default_value = "20")]
	pub monitor_max_attempts: u32,
}

impl ReporterConfig {
	pub fn monitor_config(&self) -> MonitorConfig {
		MonitorConfig {
			poll_interval: std::time::Duration::from_secs(self.monitor_poll_interval_secs),
			max_attempts: self.monitor_max_attempts,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
	#[error(transparent)]
	Chain(#[from] ChainError),
	#[error("store failure: {0}")]
	Store(#[from] fb_db::sqlx::Error),
	#[error("data set id {0:?} is not a uint256")]
	BadDataSetId(String),
}

pub struct Reporter {
	pub store: fb_db::Backend,
	pub chain: Arc<dyn OperatorChain>,
	pub analytics: Arc<dyn AnalyticsSink>,
	pub genesis_ms: i64,
	pub monitor: MonitorConfig,
	queue_tx: mpsc::Sender<TxQueueMessage>,
}

impl Reporter {
	/// Builds the reporter and the receiver end of its queue; the node
	/// feeds the receiver to [`run_queue_consumer`].
	pub fn new(
		store: fb_db::Backend,
		chain: Arc<dyn OperatorChain>,
		analytics: Arc<dyn AnalyticsSink>,
		genesis_ms: i64,
		monitor: MonitorConfig,
	) -> (Arc<Self>, mpsc::Receiver<TxQueueMessage>) {
		let (queue_tx, queue_rx) = mpsc::channel(100);
		(
			Arc::new(Reporter {
				store,
				chain,
				analytics,
				genesis_ms,
				monitor,
				queue_tx,
			}),
			queue_rx,
		)
	}

	/// One reporting run. Returns the submitted hash, or `None` when there
	/// was nothing to report.
	pub async fn run_usage_report(&self) -> Result<Option<H256>, ReporterError> {
		let current_block = self.chain.current_block_number().await?;
		let Some(up_to_epoch) = current_block.checked_sub(1) else {
			return Ok(None);
		};
		let up_to_timestamp = epoch_to_timestamp_ms(self.genesis_ms, up_to_epoch);

		let rollups = self.store.aggregate_unreported_usage(up_to_timestamp).await?;
		if rollups.is_empty() {
			log::debug!(target: "filbeam-reporter", "no unreported usage");
			return Ok(None);
		}

		let mut data_set_ids = Vec::with_capacity(rollups.len());
		for rollup in &rollups {
			let id = U256::from_dec_str(&rollup.data_set_id)
				.map_err(|_| ReporterError::BadDataSetId(rollup.data_set_id.clone()))?;
			data_set_ids.push(id);
		}
		let batch = UsageRollupBatch {
			up_to_epoch,
			data_set_ids,
			cdn_bytes_used: rollups.iter().map(|r| U256::from(r.cdn_bytes)).collect(),
			cache_miss_bytes_used: rollups
				.iter()
				.map(|r| U256::from(r.cache_miss_bytes))
				.collect(),
		};

		// A submission failure leaves the store untouched; the next tick
		// retries from the same watermark.
		let tx_hash = self.chain.submit_usage_rollups(&batch).await?;

		let ids: Vec<String> = rollups.iter().map(|r| r.data_set_id.clone()).collect();
		self.store
			.set_pending_tx_hash(&ids, &format!("{tx_hash:?}"))
			.await?;

		spawn_monitor(
			self.chain.clone(),
			tx_hash,
			up_to_timestamp,
			self.monitor,
			self.queue_tx.clone(),
		);

		let cdn_total: i64 = rollups.iter().map(|r| r.cdn_bytes).sum();
		let cache_miss_total: i64 = rollups.iter().map(|r| r.cache_miss_bytes).sum();
		self.analytics
			.write_point(
				"usage-reports",
				serde_json::json!({
					"datasets_count": rollups.len(),
					"now_ms": now_ms(),
					"cdn_total": cdn_total,
					"cache_miss_total": cache_miss_total,
					"up_to_epoch": up_to_epoch,
				}),
			)
			.await;

		log::info!(
			target: "filbeam-reporter",
			"reported usage for {} data sets up to epoch {} in {:?}",
			rollups.len(),
			up_to_epoch,
			tx_hash,
		);
		Ok(Some(tx_hash))
	}

	pub async fn handle_queue_message(
		&self,
		message: TxQueueMessage,
	) -> Result<(), ReporterError> {
		match message {
			TxQueueMessage::TransactionConfirmed {
				transaction_hash,
				up_to_timestamp,
			} => {
				let settled = self
					.store
					.confirm_usage_reported(&format!("{transaction_hash:?}"), up_to_timestamp)
					.await?;
				log::info!(
					target: "filbeam-reporter",
					"confirmed {:?}, advanced {} watermarks to {}",
					transaction_hash,
					settled,
					up_to_timestamp,
				);
				Ok(())
			}
			TxQueueMessage::TransactionRetry {
				transaction_hash,
				up_to_timestamp,
			} => {
				self.handle_transaction_retry(transaction_hash, up_to_timestamp)
					.await
			}
		}
	}

	/// Replaces a stuck transaction: same nonce, bumped fees, pending
	/// hashes rewritten before the replacement monitor starts.
	async fn handle_transaction_retry(
		&self,
		transaction_hash: H256,
		up_to_timestamp: i64,
	) -> Result<(), ReporterError> {
		// The transaction may have landed while the retry message sat in
		// the queue.
		if let Some(receipt) = self.chain.transaction_receipt(transaction_hash).await? {
			if receipt.is_confirmed() {
				let message = TxQueueMessage::TransactionConfirmed {
					transaction_hash,
					up_to_timestamp,
				};
				if self.queue_tx.send(message).await.is_err() {
					log::error!(
						target: "filbeam-reporter",
						"queue closed, dropping late confirmation of {:?}",
						transaction_hash,
					);
				}
				return Ok(());
			}
		}

		let envelope = self
			.chain
			.transaction_by_hash(transaction_hash)
			.await?
			.ok_or(ChainError::TxNotFound(transaction_hash))?;

		let fresh_estimate = self.chain.estimate_replacement_gas(&envelope).await?;
		let fees = self.chain.estimate_fees().await?;

		let new_tip =
			gas::bump_priority_fee(envelope.max_priority_fee_per_gas.unwrap_or_default());
		let new_gas_limit = gas::bump_gas_limit(envelope.gas, fresh_estimate);
		let new_fee_cap = gas::bump_fee_cap(new_tip, fees.max_fee_per_gas);

		let replacement_hash = self
			.chain
			.send_replacement(&envelope, new_gas_limit, new_fee_cap, new_tip)
			.await?;

		let rewritten = self
			.store
			.replace_pending_tx_hash(
				&format!("{transaction_hash:?}"),
				&format!("{replacement_hash:?}"),
			)
			.await?;
		log::info!(
			target: "filbeam-reporter",
			"replaced stuck {:?} with {:?} ({} rows rewritten)",
			transaction_hash,
			replacement_hash,
			rewritten,
		);

		spawn_monitor(
			self.chain.clone(),
			replacement_hash,
			up_to_timestamp,
			self.monitor,
			self.queue_tx.clone(),
		);
		Ok(())
	}
}

/// Drains the reporter queue. Failures are logged and the consumer moves
/// on; nothing can poison the loop.
pub async fn run_queue_consumer(
	reporter: Arc<Reporter>,
	mut queue_rx: mpsc::Receiver<TxQueueMessage>,
) {
	while let Some(message) = queue_rx.recv().await {
		if let Err(e) = reporter.handle_queue_message(message).await {
			log::error!(
				target: "filbeam-reporter",
				"queue message failed: {}",
				e,
			);
		}
	}
}
