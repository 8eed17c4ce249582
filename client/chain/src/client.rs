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

//! The ethers-backed [`OperatorChain`] implementation.

use std::sync::Arc;

use async_trait::async_trait;
use ethereum_types::{H160, H256, U256};
use ethers::{
	middleware::SignerMiddleware,
	prelude::abigen,
	providers::{Http, Middleware, Provider},
	signers::{LocalWallet, Signer},
	types::{transaction::eip2718::TypedTransaction, Eip1559TransactionRequest},
};

use crate::{
	ChainError, FeeEstimate, OperatorChain, ReceiptInfo, TxEnvelope, UsageRollupBatch,
};

abigen!(
	FilBeamOperator,
	r#"[
		function recordUsageRollups(uint256 upToEpoch, uint256[] dataSetIds, uint256[] cdnBytesUsed, uint256[] cacheMissBytesUsed)
		function dataSetUsage(uint256 dataSetId) view returns (uint256 cdnUnsettled, uint256 cacheMissUnsettled, uint256 cdnSettledUntil, uint256 cacheMissSettledUntil)
	]"#
);

/// Chain connectivity for the usage reporter.
#[derive(Clone, Debug, clap::Parser)]
pub struct ChainConfig {
	/// Filecoin EVM JSON-RPC endpoint.
	#[arg(long, env = "FILBEAM_RPC_URL", default_value = "https://api.node.glif.io/rpc/v1")]
	pub rpc_url: String,

	/// Address of the FilBeam operator contract.
	#[arg(long, env = "FILBEAM_OPERATOR_ADDRESS")]
	pub operator_address: String,

	/// Hex private key of the controller wallet submitting rollups.
	#[arg(long, env = "FILBEAM_CONTROLLER_KEY", hide_env_values = true)]
	pub controller_key: String,

	/// Chain genesis in unix milliseconds; epoch n maps to
	/// `genesis + n * 30s`.
	#[arg(long, env = "FILBEAM_GENESIS_MS", default_value_t = fb_types::MAINNET_GENESIS_MS)]
	pub genesis_ms: i64,
}

type OperatorMiddleware = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EthersChain {
	client: Arc<OperatorMiddleware>,
	operator: FilBeamOperator<OperatorMiddleware>,
}

impl EthersChain {
	pub async fn new(config: &ChainConfig) -> Result<Self, ChainError> {
		let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
			.map_err(|e| ChainError::Config(e.to_string()))?;
		let chain_id = provider
			.get_chainid()
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))?;
		let wallet: LocalWallet = config
			.controller_key
			.parse()
			.map_err(|_| ChainError::Config("unparseable controller key".to_string()))?;
		let wallet = wallet.with_chain_id(chain_id.as_u64());
		let operator_address: H160 = config
			.operator_address
			.parse()
			.map_err(|_| ChainError::Config("unparseable operator address".to_string()))?;

		let client = Arc::new(SignerMiddleware::new(provider, wallet));
		let operator = FilBeamOperator::new(operator_address, client.clone());
		Ok(EthersChain { client, operator })
	}
}

#[async_trait]
impl OperatorChain for EthersChain {
	async fn current_block_number(&self) -> Result<u64, ChainError> {
		let number = self
			.client
			.get_block_number()
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))?;
		Ok(number.as_u64())
	}

	async fn submit_usage_rollups(&self, batch: &UsageRollupBatch) -> Result<H256, ChainError> {
		let call = self.operator.record_usage_rollups(
			U256::from(batch.up_to_epoch),
			batch.data_set_ids.clone(),
			batch.cdn_bytes_used.clone(),
			batch.cache_miss_bytes_used.clone(),
		);
		// Dry-run first so a revert never burns the nonce.
		call.call()
			.await
			.map_err(|e| ChainError::Contract(e.to_string()))?;
		let pending = call
			.send()
			.await
			.map_err(|e| ChainError::Contract(e.to_string()))?;
		Ok(pending.tx_hash())
	}

	async fn transaction_receipt(
		&self,
		tx_hash: H256,
	) -> Result<Option<ReceiptInfo>, ChainError> {
		let receipt = self
			.client
			.get_transaction_receipt(tx_hash)
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))?;
		Ok(receipt.map(|r| ReceiptInfo {
			block_number: r.block_number.map(|n| n.as_u64()),
		}))
	}

	async fn transaction_by_hash(
		&self,
		tx_hash: H256,
	) -> Result<Option<TxEnvelope>, ChainError> {
		let tx = self
			.client
			.get_transaction(tx_hash)
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))?;
		Ok(tx.map(|tx| TxEnvelope {
			to: tx.to,
			nonce: tx.nonce,
			value: tx.value,
			input: tx.input.to_vec(),
			gas: tx.gas,
			max_fee_per_gas: tx.max_fee_per_gas,
			max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
		}))
	}

	async fn estimate_fees(&self) -> Result<FeeEstimate, ChainError> {
		let (max_fee_per_gas, max_priority_fee_per_gas) = self
			.client
			.estimate_eip1559_fees(None)
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))?;
		Ok(FeeEstimate {
			max_fee_per_gas,
			max_priority_fee_per_gas,
		})
	}

	async fn estimate_replacement_gas(&self, envelope: &TxEnvelope) -> Result<U256, ChainError> {
		let mut request = Eip1559TransactionRequest::new()
			.value(envelope.value)
			.data(envelope.input.clone());
		if let Some(to) = envelope.to {
			request = request.to(to);
		}
		let typed: TypedTransaction = request.into();
		self.client
			.estimate_gas(&typed, None)
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))
	}

	async fn send_replacement(
		&self,
		envelope: &TxEnvelope,
		gas_limit: U256,
		max_fee_per_gas: U256,
		max_priority_fee_per_gas: U256,
	) -> Result<H256, ChainError> {
		let mut request = Eip1559TransactionRequest::new()
			.nonce(envelope.nonce)
			.value(envelope.value)
			.data(envelope.input.clone())
			.gas(gas_limit)
			.max_fee_per_gas(max_fee_per_gas)
			.max_priority_fee_per_gas(max_priority_fee_per_gas);
		if let Some(to) = envelope.to {
			request = request.to(to);
		}
		let pending = self
			.client
			.send_transaction(request, None)
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))?;
		Ok(pending.tx_hash())
	}
}
