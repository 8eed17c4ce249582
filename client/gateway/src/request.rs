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

//! Request parsing and the status-tagged failure value every pipeline
//! stage returns on rejection.

use axum::{
	body::Body,
	http::{header, StatusCode},
	response::{IntoResponse, Response},
};

use fb_types::{PayerAddress, PieceCid};

use crate::Gateway;

/// A rejected request: the status and message travel up the call stack as
/// a value and render as the response.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{status}: {message}")]
pub struct GatewayError {
	pub status: StatusCode,
	pub message: String,
}

impl GatewayError {
	pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
		GatewayError {
			status,
			message: message.into(),
		}
	}

	pub fn bad_request(message: impl Into<String>) -> Self {
		Self::new(StatusCode::BAD_REQUEST, message)
	}

	pub fn unauthorized(message: impl Into<String>) -> Self {
		Self::new(StatusCode::UNAUTHORIZED, message)
	}

	pub fn internal() -> Self {
		Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
	}
}

impl From<fb_db::sqlx::Error> for GatewayError {
	fn from(e: fb_db::sqlx::Error) -> Self {
		log::error!(target: "filbeam-gateway", "store failure: {}", e);
		Self::internal()
	}
}

impl IntoResponse for GatewayError {
	fn into_response(self) -> Response {
		Response::builder()
			.status(self.status)
			.header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
			.body(Body::from(self.message))
			.expect("static response parts; qed")
	}
}

/// The parsed retrieval request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetrievalRequest {
	pub payer: PayerAddress,
	pub cid: PieceCid,
	pub bot_name: Option<String>,
}

/// Strips an optional port from a Host header value.
pub fn host_without_port(host: &str) -> &str {
	host.rsplit_once(':')
		.map(|(name, port)| {
			if port.chars().all(|c| c.is_ascii_digit()) {
				name
			} else {
				host
			}
		})
		.unwrap_or(host)
}

/// Extracts the payer wallet from the virtual host. The host must be
/// exactly one label below the configured DNS root.
pub fn parse_payer_host(host: &str, dns_root: &str) -> Result<PayerAddress, GatewayError> {
	let host = host_without_port(host);
	let label = host
		.strip_suffix(dns_root)
		.and_then(|prefix| prefix.strip_suffix('.'))
		.ok_or_else(|| {
			GatewayError::bad_request(format!("Host {host:?} is not below the gateway domain"))
		})?;
	if label.is_empty() || label.contains('.') {
		return Err(GatewayError::bad_request(format!(
			"Host {host:?} must be <wallet>.{dns_root}"
		)));
	}
	label.parse().map_err(|_| {
		GatewayError::bad_request(format!("{label:?} is not a valid wallet address"))
	})
}

/// Parses the first path segment as a piece CID.
pub fn parse_piece_cid(segment: &str) -> Result<PieceCid, GatewayError> {
	segment.parse().map_err(|_| {
		GatewayError::bad_request(format!(
			"{segment:?} is not a valid piece CID (expected a baga or bafk prefix)"
		))
	})
}

/// Resolves an optional `Authorization: Bearer` header to a bot name.
pub fn parse_bot_header(
	gateway: &Gateway,
	authorization: Option<&str>,
) -> Result<Option<String>, GatewayError> {
	let Some(value) = authorization else {
		return Ok(None);
	};
	let token = value
		.strip_prefix("Bearer ")
		.ok_or_else(|| GatewayError::unauthorized("Unsupported Authorization scheme"))?;
	match gateway.bot_name(token.trim()) {
		Some(name) => Ok(Some(name.to_string())),
		None => Err(GatewayError::unauthorized("Unknown bearer token")),
	}
}
