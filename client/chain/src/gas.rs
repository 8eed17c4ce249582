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

//! Fee bumping for replacement transactions.
//!
//! A replacement must beat the mempool's price floor, so the priority fee
//! grows by a factor of 1.252 (strictly more than the conventional 25%
//! replacement threshold) plus one attounit to break ties.

use ethereum_types::U256;

/// Hard ceiling on any replacement gas limit.
const MAX_GAS_LIMIT: u64 = 10_000_000_000;

fn div_ceil(a: U256, b: U256) -> U256 {
	(a + b - U256::one()) / b
}

/// `ceil(orig_tip * 1.252) + 1`.
pub fn bump_priority_fee(orig_tip: U256) -> U256 {
	div_ceil(orig_tip * U256::from(1252u64), U256::from(1000u64)) + U256::one()
}

/// `min(ceil(max(orig_gas, fresh_estimate) * 1.1), 1e10)`.
pub fn bump_gas_limit(orig_gas: U256, fresh_estimate: U256) -> U256 {
	let base = orig_gas.max(fresh_estimate);
	let bumped = div_ceil(base * U256::from(11u64), U256::from(10u64));
	bumped.min(U256::from(MAX_GAS_LIMIT))
}

/// The fee cap must cover the new tip and whatever the chain currently
/// charges.
pub fn bump_fee_cap(new_tip: U256, recent_fee_cap: U256) -> U256 {
	new_tip.max(recent_fee_cap)
}
