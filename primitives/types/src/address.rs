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

use std::{fmt, str::FromStr};

use ethereum_types::H160;
use serde::{Deserialize, Serialize};

/// A payer wallet address, held in its canonical lowercased `0x`-prefixed
/// hex form. Parsing is checksum-tolerant: any mix of letter cases is
/// accepted, the stored form is always lowercase.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayerAddress(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid wallet address: {0:?}")]
pub struct InvalidAddress(pub String);

impl PayerAddress {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn to_h160(&self) -> H160 {
		// Infallible: the constructor only admits 0x + 40 hex digits.
		H160::from_str(&self.0).expect("address validated on construction; qed")
	}
}

impl FromStr for PayerAddress {
	type Err = InvalidAddress;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let hex_part = s
			.strip_prefix("0x")
			.ok_or_else(|| InvalidAddress(s.to_string()))?;
		if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
			return Err(InvalidAddress(s.to_string()));
		}
		Ok(PayerAddress(s.to_lowercase()))
	}
}

impl From<H160> for PayerAddress {
	fn from(address: H160) -> Self {
		PayerAddress(format!("{address:?}"))
	}
}

impl fmt::Display for PayerAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
