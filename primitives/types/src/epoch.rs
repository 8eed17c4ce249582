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

//! Filecoin epoch arithmetic. An epoch is exactly 30 seconds, counted from
//! chain genesis.

/// Epoch duration in milliseconds.
pub const EPOCH_DURATION_MS: i64 = 30_000;

/// Filecoin mainnet genesis, 2020-08-24T22:00:00Z, in milliseconds.
pub const MAINNET_GENESIS_MS: i64 = 1_598_306_400_000;

/// Converts a block epoch to a unix timestamp in milliseconds.
pub fn epoch_to_timestamp_ms(genesis_ms: i64, epoch: u64) -> i64 {
	genesis_ms + epoch as i64 * EPOCH_DURATION_MS
}

/// Wall clock in unix milliseconds.
pub fn now_ms() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.expect("system clock after unix epoch; qed")
		.as_millis() as i64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn genesis_epoch_is_genesis() {
		assert_eq!(epoch_to_timestamp_ms(MAINNET_GENESIS_MS, 0), MAINNET_GENESIS_MS);
	}

	#[test]
	fn each_epoch_adds_thirty_seconds() {
		assert_eq!(
			epoch_to_timestamp_ms(MAINNET_GENESIS_MS, 100),
			MAINNET_GENESIS_MS + 3_000_000
		);
	}
}
