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

//! The transaction-monitor workflow.
//!
//! One spawned task per in-flight transaction hash. The task polls the
//! receipt at a bounded cadence; a confirmed receipt emits the
//! success message and terminates, a transaction that stays unseen for the
//! whole staleness window emits a retry message. A transaction is never
//! discarded without emitting one of the two.

use std::{sync::Arc, time::Duration};

use ethereum_types::H256;
use futures_timer::Delay;
use tokio::sync::mpsc;

use fb_types::TxQueueMessage;

use crate::OperatorChain;

#[derive(Clone, Copy, Debug)]
pub struct MonitorConfig {
	pub poll_interval: Duration,
	pub max_attempts: u32,
}

impl Default for MonitorConfig {
	fn default() -> Self {
		// One Filecoin epoch between polls, give up after ten minutes.
		MonitorConfig {
			poll_interval: Duration::from_secs(30),
			max_attempts: 20,
		}
	}
}

/// Spawns a monitor for `tx_hash`. `up_to_timestamp` travels with the
/// workflow and comes back in whichever message it emits.
pub fn spawn_monitor(
	chain: Arc<dyn OperatorChain>,
	tx_hash: H256,
	up_to_timestamp: i64,
	config: MonitorConfig,
	queue: mpsc::Sender<TxQueueMessage>,
) {
	tokio::spawn(async move {
		let message = watch_transaction(chain.as_ref(), tx_hash, up_to_timestamp, config).await;
		if queue.send(message).await.is_err() {
			log::error!(
				target: "filbeam-chain",
				"queue closed before monitor for {:?} could report",
				tx_hash,
			);
		}
	});
}

/// Polls until the transaction confirms or the attempt budget runs out.
pub async fn watch_transaction<C: OperatorChain + ?Sized>(
	chain: &C,
	tx_hash: H256,
	up_to_timestamp: i64,
	config: MonitorConfig,
) -> TxQueueMessage {
	for attempt in 0..config.max_attempts {
		if attempt > 0 {
			Delay::new(config.poll_interval).await;
		}
		match chain.transaction_receipt(tx_hash).await {
			Ok(Some(receipt)) if receipt.is_confirmed() => {
				log::debug!(
					target: "filbeam-chain",
					"transaction {:?} confirmed after {} polls",
					tx_hash,
					attempt + 1,
				);
				return TxQueueMessage::TransactionConfirmed {
					transaction_hash: tx_hash,
					up_to_timestamp,
				};
			}
			Ok(_) => {}
			Err(e) => {
				log::warn!(
					target: "filbeam-chain",
					"receipt lookup for {:?} failed: {}",
					tx_hash,
					e,
				);
			}
		}
	}
	log::warn!(
		target: "filbeam-chain",
		"transaction {:?} stale after {} polls, requesting retry",
		tx_hash,
		config.max_attempts,
	);
	TxQueueMessage::TransactionRetry {
		transaction_hash: tx_hash,
		up_to_timestamp,
	}
}
