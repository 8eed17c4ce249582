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

//! Chain access for the usage reporter.
//!
//! The reporter and the transaction monitor only ever talk to
//! [`OperatorChain`]; the ethers-backed implementation lives in
//! [`client`]. Keeping the seam here lets the retry workflow run against a
//! scripted chain in tests.

#![warn(unused_crate_dependencies)]

use async_trait::async_trait;
use ethereum_types::{H160, H256, U256};

pub mod client;
pub mod gas;
pub mod monitor;

pub use client::EthersChain;
pub use monitor::{spawn_monitor, MonitorConfig};

/// One `recordUsageRollups` submission, already in contract form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UsageRollupBatch {
	pub up_to_epoch: u64,
	pub data_set_ids: Vec<U256>,
	pub cdn_bytes_used: Vec<U256>,
	pub cache_miss_bytes_used: Vec<U256>,
}

/// The fields of a submitted transaction needed to build a same-nonce
/// replacement.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxEnvelope {
	pub to: Option<H160>,
	pub nonce: U256,
	pub value: U256,
	pub input: Vec<u8>,
	pub gas: U256,
	pub max_fee_per_gas: Option<U256>,
	pub max_priority_fee_per_gas: Option<U256>,
}

/// A receipt, reduced to what the monitor needs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReceiptInfo {
	pub block_number: Option<u64>,
}

impl ReceiptInfo {
	/// A transaction counts as confirmed once its receipt carries a
	/// non-zero block number.
	pub fn is_confirmed(&self) -> bool {
		self.block_number.is_some_and(|n| n > 0)
	}
}

/// Current EIP-1559 fee conditions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FeeEstimate {
	pub max_fee_per_gas: U256,
	pub max_priority_fee_per_gas: U256,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error("rpc error: {0}")]
	Rpc(String),
	#[error("contract error: {0}")]
	Contract(String),
	#[error("invalid chain configuration: {0}")]
	Config(String),
	#[error("transaction {0:?} not found on chain")]
	TxNotFound(H256),
}

/// Everything the reporter and the monitor need from the chain.
#[async_trait]
pub trait OperatorChain: Send + Sync {
	async fn current_block_number(&self) -> Result<u64, ChainError>;

	/// Simulates, then submits, `recordUsageRollups` and returns the
	/// transaction hash. A simulation failure aborts the submission.
	async fn submit_usage_rollups(&self, batch: &UsageRollupBatch) -> Result<H256, ChainError>;

	async fn transaction_receipt(&self, tx_hash: H256)
		-> Result<Option<ReceiptInfo>, ChainError>;

	async fn transaction_by_hash(&self, tx_hash: H256)
		-> Result<Option<TxEnvelope>, ChainError>;

	async fn estimate_fees(&self) -> Result<FeeEstimate, ChainError>;

	/// A fresh gas estimate for re-sending `envelope` as it stands.
	async fn estimate_replacement_gas(&self, envelope: &TxEnvelope) -> Result<U256, ChainError>;

	/// Re-sends `envelope` with the same nonce and the given bumped fees,
	/// returning the replacement hash.
	async fn send_replacement(
		&self,
		envelope: &TxEnvelope,
		gas_limit: U256,
		max_fee_per_gas: U256,
		max_priority_fee_per_gas: U256,
	) -> Result<H256, ChainError>;
}
