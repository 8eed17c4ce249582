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

//! The FilBeam retrieval gateway.
//!
//! One HTTP surface: the payer wallet rides in the virtual-host subdomain,
//! the piece CID is the first path segment. Every qualifying request is
//! authorized against the store, fetched from a randomly chosen approved
//! provider through a process-wide cache, and streamed to the client while
//! a detached task meters the exact egress.

#![warn(unused_crate_dependencies)]

use std::{collections::HashMap, sync::Arc};

use axum::{routing::get, Router};
use tokio_util::task::TaskTracker;

pub mod cache;
pub mod handler;
pub mod origin;
pub mod request;
pub mod tee;

#[cfg(test)]
mod tests;

pub use cache::OriginCache;
pub use request::GatewayError;

/// Retrieval-gateway knobs.
#[derive(Clone, Debug, clap::Parser)]
pub struct GatewayConfig {
	/// Listen address for the retrieval surface.
	#[arg(long, env = "FILBEAM_GATEWAY_LISTEN", default_value = "0.0.0.0:8080")]
	pub gateway_listen: String,

	/// DNS root the gateway serves; the payer wallet is the label below it.
	#[arg(long, env = "FILBEAM_DNS_ROOT", default_value = "filbeam.io")]
	pub dns_root: String,

	/// Superseded DNS root; requests for it redirect permanently.
	#[arg(long, env = "FILBEAM_LEGACY_DNS_ROOT", default_value = "filcdn.io")]
	pub legacy_dns_root: String,

	/// Where pathless root requests are sent.
	#[arg(long, env = "FILBEAM_MARKETING_SITE", default_value = "https://filbeam.com/")]
	pub marketing_site: String,

	/// `max-age` handed to clients in `Cache-Control`.
	#[arg(long, default_value = "86400")]
	pub client_cache_ttl_secs: u64,

	/// How long a cached origin response stays usable.
	#[arg(long, default_value = "86400")]
	pub origin_cache_ttl_secs: u64,

	/// Maximum number of cached origin responses.
	#[arg(long, default_value = "256")]
	pub origin_cache_capacity: usize,

	/// Bodies larger than this are streamed but never cached.
	#[arg(long, default_value = "16777216")]
	pub origin_cache_max_body_bytes: usize,

	/// Reject retrievals once a payer's egress quotas are used up.
	#[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
	pub enforce_quotas: bool,

	/// Extra sources appended to the Content-Security-Policy.
	#[arg(long = "csp-extra")]
	pub csp_extra: Vec<String>,

	/// Bearer tokens identifying well-known bots, as `token=bot-name`
	/// pairs.
	#[arg(long = "bot-token", value_parser = parse_bot_token)]
	pub bot_tokens: Vec<(String, String)>,
}

fn parse_bot_token(raw: &str) -> Result<(String, String), String> {
	raw.split_once('=')
		.map(|(token, name)| (token.to_string(), name.to_string()))
		.ok_or_else(|| format!("expected token=bot-name, got {raw:?}"))
}

/// Shared state behind every gateway request.
pub struct Gateway {
	pub config: GatewayConfig,
	pub store: fb_db::Backend,
	pub http: reqwest::Client,
	pub cache: OriginCache,
	/// Detached metering tasks drain through this on shutdown.
	pub tracker: TaskTracker,
	bot_names: HashMap<String, String>,
}

impl Gateway {
	pub fn new(config: GatewayConfig, store: fb_db::Backend, tracker: TaskTracker) -> Self {
		let cache = OriginCache::new(
			config.origin_cache_capacity,
			std::time::Duration::from_secs(config.origin_cache_ttl_secs),
		);
		let bot_names = config.bot_tokens.iter().cloned().collect();
		Gateway {
			config,
			store,
			http: reqwest::Client::new(),
			cache,
			tracker,
			bot_names,
		}
	}

	pub fn bot_name(&self, token: &str) -> Option<&str> {
		self.bot_names.get(token).map(String::as_str)
	}
}

pub fn router(gateway: Arc<Gateway>) -> Router {
	Router::new()
		.route("/", get(handler::handle_root))
		.route("/:cid", get(handler::handle_retrieval))
		.with_state(gateway)
}
