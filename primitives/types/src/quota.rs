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

//! Egress-quota arithmetic.
//!
//! Payment rails lock up funds denominated in units of `10^18` per TiB;
//! locked funds convert to byte allowances with `bytes = lockup * 2^40 /
//! rate_per_tib`, floor semantics. All intermediate arithmetic is `U256` so
//! repeated top-ups cannot overflow.

use ethereum_types::U256;

/// One TiB in bytes.
pub const BYTES_PER_TIB: u64 = 1 << 40;

/// Converts a locked-up amount to a byte quota given a rate per TiB.
///
/// Returns `0` when the rate is zero, and saturates at `i64::MAX` (quota
/// columns are signed so that streaming overruns can drive them negative).
pub fn calculate_egress_quota(lockup: U256, rate_per_tib: U256) -> i64 {
	if rate_per_tib.is_zero() {
		return 0;
	}
	let bytes = lockup * U256::from(BYTES_PER_TIB) / rate_per_tib;
	if bytes > U256::from(i64::MAX) {
		i64::MAX
	} else {
		bytes.as_u64() as i64
	}
}
