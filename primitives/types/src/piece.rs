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

use serde::{Deserialize, Serialize};

/// A piece CID (CommP v1/v2) in its canonical string form.
///
/// Only the two prefixes used by storage pieces are admitted: `baga`
/// (fil-commitment-unsealed) and `bafk` (raw).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceCid(String);

#[derive(Debug, thiserror::Error)]
pub enum InvalidPieceCid {
	#[error("piece CID must start with baga or bafk: {0:?}")]
	BadPrefix(String),
	#[error("malformed binary piece CID: {0}")]
	BadBytes(#[from] cid::Error),
	#[error("malformed hex piece CID: {0}")]
	BadHex(#[from] hex::FromHexError),
}

impl PieceCid {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Decode the subgraph's binary CID representation (`0x`-prefixed hex
	/// bytes) and normalize to the canonical string form.
	pub fn from_hex_bytes(hex_bytes: &str) -> Result<Self, InvalidPieceCid> {
		let bytes = hex::decode(hex_bytes.trim_start_matches("0x"))?;
		let cid = cid::Cid::try_from(bytes.as_slice())?;
		cid.to_string().parse()
	}
}

impl FromStr for PieceCid {
	type Err = InvalidPieceCid;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if !s.starts_with("baga") && !s.starts_with("bafk") {
			return Err(InvalidPieceCid::BadPrefix(s.to_string()));
		}
		Ok(PieceCid(s.to_string()))
	}
}

impl fmt::Display for PieceCid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
