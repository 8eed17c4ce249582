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

use ethereum_types::H256;
use serde::{Deserialize, Serialize};

/// Messages exchanged between the transaction monitor and the usage
/// reporter's queue consumer.
///
/// A `TransactionConfirmed` message is emitted at most once per reported
/// batch: the pending transaction hash is rewritten atomically before a
/// replacement monitor starts, so only one hash can ever match a batch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TxQueueMessage {
	TransactionConfirmed {
		transaction_hash: H256,
		up_to_timestamp: i64,
	},
	TransactionRetry {
		transaction_hash: H256,
		up_to_timestamp: i64,
	},
}

impl TxQueueMessage {
	pub fn transaction_hash(&self) -> H256 {
		match self {
			Self::TransactionConfirmed {
				transaction_hash, ..
			}
			| Self::TransactionRetry {
				transaction_hash, ..
			} => *transaction_hash,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_format_round_trips() {
		let msg = TxQueueMessage::TransactionConfirmed {
			transaction_hash: H256::repeat_byte(0xab),
			up_to_timestamp: 1_700_000_000_000,
		};
		let json = serde_json::to_string(&msg).unwrap();
		assert!(json.contains("transaction-confirmed"));
		assert_eq!(serde_json::from_str::<TxQueueMessage>(&json).unwrap(), msg);
	}

	#[test]
	fn unknown_message_type_is_rejected() {
		let err = serde_json::from_str::<TxQueueMessage>(
			r#"{"type":"transaction-exploded","transaction_hash":"0x00"}"#,
		);
		assert!(err.is_err());
	}
}
