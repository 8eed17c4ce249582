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

//! Wallet sanction screening against an external API.
//!
//! A wallet counts as sanctioned when the screening service returns any
//! identification for it.

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
	#[error("screening request failed: {0}")]
	Transport(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct ScreeningClient {
	http: reqwest::Client,
	base_url: String,
	api_key: String,
}

#[derive(Debug, Deserialize)]
struct ScreeningVerdict {
	#[serde(default)]
	identifications: Vec<serde_json::Value>,
}

impl ScreeningClient {
	pub fn new(base_url: String, api_key: String) -> Self {
		ScreeningClient {
			http: reqwest::Client::new(),
			base_url,
			api_key,
		}
	}

	pub async fn is_sanctioned(&self, address: &str) -> Result<bool, ScreeningError> {
		let url = format!(
			"{}/api/v1/address/{}",
			self.base_url.trim_end_matches('/'),
			address,
		);
		let mut request = self.http.get(&url);
		if !self.api_key.is_empty() {
			request = request.header("X-API-Key", &self.api_key);
		}
		let verdict: ScreeningVerdict = request
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		Ok(!verdict.identifications.is_empty())
	}
}
