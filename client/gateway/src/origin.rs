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

//! Origin fetches and the bad-bits anchor derivation.

use axum::http::Method;
use sha2::{Digest, Sha256};

use fb_types::PieceCid;

/// Response headers worth forwarding to the client or the cache.
const FORWARDED_HEADERS: &[&str] = &[
	"content-type",
	"content-length",
	"content-range",
	"accept-ranges",
	"etag",
	"last-modified",
];

/// `<service_url>/piece/<cid>`.
pub fn retrieval_url(service_url: &str, cid: &PieceCid) -> String {
	format!("{}/piece/{}", service_url.trim_end_matches('/'), cid)
}

/// The denylist anchors entries by the sha256 of `"<cid>/"`.
pub fn bad_bits_anchor(cid: &PieceCid) -> String {
	let digest = Sha256::digest(format!("{cid}/").as_bytes());
	hex::encode(digest)
}

/// Issues the origin request, propagating the client's range header.
pub async fn fetch_origin(
	http: &reqwest::Client,
	url: &str,
	method: &Method,
	range: Option<&str>,
) -> Result<reqwest::Response, reqwest::Error> {
	let mut request = if method == Method::HEAD {
		http.head(url)
	} else {
		http.get(url)
	};
	if let Some(range) = range {
		request = request.header(reqwest::header::RANGE, range);
	}
	request.send().await
}

/// The subset of origin response headers the gateway forwards.
pub fn forwarded_headers(response: &reqwest::Response) -> Vec<(String, String)> {
	FORWARDED_HEADERS
		.iter()
		.filter_map(|name| {
			response
				.headers()
				.get(*name)
				.and_then(|value| value.to_str().ok())
				.map(|value| (name.to_string(), value.to_string()))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	const CID: &str = "baga6ea4seaqpkzbkcumwuhs26ykjcwbucgskisdvjyl66aiqp4usqil4a7badipa";

	#[test]
	fn retrieval_url_normalizes_trailing_slashes() {
		let cid: PieceCid = CID.parse().unwrap();
		assert_eq!(
			retrieval_url("https://sp.example/", &cid),
			format!("https://sp.example/piece/{CID}")
		);
		assert_eq!(
			retrieval_url("https://sp.example", &cid),
			format!("https://sp.example/piece/{CID}")
		);
	}

	#[test]
	fn anchor_is_sha256_of_cid_slash() {
		let cid: PieceCid = CID.parse().unwrap();
		let anchor = bad_bits_anchor(&cid);
		assert_eq!(anchor.len(), 64);
		assert!(anchor.chars().all(|c| c.is_ascii_hexdigit()));
		// Deterministic for equal CIDs.
		assert_eq!(anchor, bad_bits_anchor(&CID.parse().unwrap()));
	}
}
