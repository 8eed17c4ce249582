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

//! The retrieval pipeline: parse, authorize, pick, fetch, tee, meter.

use std::{sync::Arc, time::Instant};

use axum::{
	body::Body,
	extract::{Host, Path, State},
	http::{header, HeaderValue, Method, StatusCode},
	response::{IntoResponse, Response},
};
use futures::StreamExt;
use rand::Rng;

use fb_db::{NewRetrievalLog, RetrievalCandidate};
use fb_types::now_ms;

use crate::{
	cache::{CacheKey, CachedResponse},
	origin::{bad_bits_anchor, fetch_origin, forwarded_headers, retrieval_url},
	request::{parse_bot_header, parse_payer_host, parse_piece_cid, GatewayError},
	tee::metered_tee,
	Gateway, GatewayConfig,
};

/// Pathless root: send the visitor to the marketing site.
pub async fn handle_root(
	State(gateway): State<Arc<Gateway>>,
	Host(host): Host,
) -> Response {
	if let Some(location) = legacy_redirect(&gateway.config, &host, "") {
		return redirect(StatusCode::MOVED_PERMANENTLY, &location);
	}
	redirect(StatusCode::FOUND, &gateway.config.marketing_site)
}

pub async fn handle_retrieval(
	State(gateway): State<Arc<Gateway>>,
	Host(host): Host,
	method: Method,
	Path(cid_segment): Path<String>,
	headers: axum::http::HeaderMap,
) -> Response {
	let worker_start = Instant::now();

	if let Some(location) = legacy_redirect(&gateway.config, &host, &cid_segment) {
		return redirect(StatusCode::MOVED_PERMANENTLY, &location);
	}

	match retrieval_pipeline(&gateway, &host, &method, &cid_segment, &headers, worker_start)
		.await
	{
		Ok(response) => response,
		Err(error) => {
			log_terminal_failure(&gateway, &headers, error.status.as_u16(), None);
			error.into_response()
		}
	}
}

async fn retrieval_pipeline(
	gateway: &Arc<Gateway>,
	host: &str,
	method: &Method,
	cid_segment: &str,
	headers: &axum::http::HeaderMap,
	worker_start: Instant,
) -> Result<Response, GatewayError> {
	let payer = parse_payer_host(host, &gateway.config.dns_root)?;
	let cid = parse_piece_cid(cid_segment)?;
	let bot_name = parse_bot_header(
		gateway,
		headers
			.get(header::AUTHORIZATION)
			.and_then(|v| v.to_str().ok()),
	)?;
	let country_code = headers
		.get("cf-ipcountry")
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);

	// The denylist lookup runs alongside candidate selection.
	let anchor = bad_bits_anchor(&cid);
	let (denied, candidates) = tokio::join!(
		gateway.store.is_bad_bits(&anchor),
		gateway
			.store
			.retrieval_candidates(&cid, &payer, gateway.config.enforce_quotas),
	);
	if denied? {
		return Err(GatewayError::new(
			StatusCode::NOT_FOUND,
			format!("Piece CID {cid} is blocked on the Bad Bits denylist"),
		));
	}
	let mut candidates = candidates?.map_err(|rejection| {
		GatewayError::new(
			StatusCode::from_u16(rejection.status()).expect("ladder statuses are valid; qed"),
			rejection.message(),
		)
	})?;

	let range = headers
		.get(header::RANGE)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);

	let mut attempts: Vec<RetrievalCandidate> = Vec::new();
	while !candidates.is_empty() {
		let index = rand::thread_rng().gen_range(0..candidates.len());
		let candidate = candidates.swap_remove(index);
		let url = retrieval_url(&candidate.service_url, &cid);
		let key = CacheKey {
			url: url.clone(),
			range: range.clone(),
		};

		if let Some(hit) = gateway.cache.get(&key) {
			return Ok(serve_cached(
				gateway,
				candidate,
				hit,
				method,
				worker_start,
				country_code,
				bot_name,
			));
		}

		let fetch_start = Instant::now();
		match fetch_origin(&gateway.http, &url, method, range.as_deref()).await {
			Ok(response) if response.status().is_success() => {
				return Ok(serve_origin(
					gateway,
					candidate,
					key,
					response,
					method,
					fetch_start,
					worker_start,
					country_code,
					bot_name,
				));
			}
			Ok(response) => {
				log::warn!(
					target: "filbeam-gateway",
					"provider {} returned {} for {}",
					candidate.service_provider_id,
					response.status(),
					url,
				);
				attempts.push(candidate);
			}
			Err(e) => {
				log::warn!(
					target: "filbeam-gateway",
					"provider {} fetch failed for {}: {}",
					candidate.service_provider_id,
					url,
					e,
				);
				attempts.push(candidate);
			}
		}
	}

	Ok(all_origins_failed(gateway, headers, attempts))
}

/// Every provider failed: `502` carrying the full attempt list.
fn all_origins_failed(
	gateway: &Arc<Gateway>,
	headers: &axum::http::HeaderMap,
	attempts: Vec<RetrievalCandidate>,
) -> Response {
	let data_set_ids = attempts
		.iter()
		.map(|a| a.data_set_id.as_str())
		.collect::<Vec<_>>()
		.join(", ");
	let body = attempts
		.iter()
		.map(|a| format!("ID={}(Service URL={})", a.service_provider_id, a.service_url))
		.collect::<Vec<_>>()
		.join("\n");

	log_terminal_failure(gateway, headers, 502, None);

	let mut response = Response::builder()
		.status(StatusCode::BAD_GATEWAY)
		.header(header::CONTENT_TYPE, "text/plain; charset=utf-8");
	if !data_set_ids.is_empty() {
		response = response.header("x-data-set-id", data_set_ids);
	}
	response
		.body(Body::from(format!(
			"All storage providers failed to serve the piece:\n{body}"
		)))
		.expect("static response parts; qed")
}

/// Serves a shared-cache hit; metering happens in a detached task.
fn serve_cached(
	gateway: &Arc<Gateway>,
	candidate: RetrievalCandidate,
	hit: CachedResponse,
	method: &Method,
	worker_start: Instant,
	country_code: Option<String>,
	bot_name: Option<String>,
) -> Response {
	let is_head = method == Method::HEAD;
	let egress = if is_head { 0 } else { hit.body.len() as i64 };

	let store = gateway.store.clone();
	let enforce = gateway.config.enforce_quotas;
	let data_set_id = candidate.data_set_id.clone();
	let status = hit.status;
	gateway.tracker.spawn(async move {
		let entry = NewRetrievalLog {
			timestamp: now_ms(),
			response_status: status,
			egress_bytes: Some(egress),
			cache_miss: Some(false),
			worker_ttfb: Some(worker_start.elapsed().as_millis() as i64),
			request_country_code: country_code,
			data_set_id: Some(data_set_id.clone()),
			bot_name,
			..Default::default()
		};
		if let Err(e) = store.insert_retrieval_log(&entry).await {
			log::error!(target: "filbeam-gateway", "retrieval log write failed: {}", e);
		}
		if egress > 0 {
			if let Err(e) = store
				.update_data_set_stats(&data_set_id, egress, false, enforce)
				.await
			{
				log::error!(target: "filbeam-gateway", "stats update failed: {}", e);
			}
		}
	});

	let mut builder = Response::builder().status(hit.status);
	for (name, value) in &hit.headers {
		builder = builder.header(name.as_str(), value.as_str());
	}
	let builder = envelope(builder, gateway, &candidate.data_set_id);
	let body = if is_head {
		Body::empty()
	} else {
		Body::from(hit.body)
	};
	builder.body(body).expect("cached response parts; qed")
}

/// Streams an origin response to the client while the shadow branch
/// captures the body for the cache and meters the egress.
#[allow(clippy::too_many_arguments)]
fn serve_origin(
	gateway: &Arc<Gateway>,
	candidate: RetrievalCandidate,
	key: CacheKey,
	response: reqwest::Response,
	method: &Method,
	fetch_start: Instant,
	worker_start: Instant,
	country_code: Option<String>,
	bot_name: Option<String>,
) -> Response {
	let status = response.status().as_u16();
	let origin_headers = forwarded_headers(&response);

	if method == Method::HEAD {
		let store = gateway.store.clone();
		let data_set_id = candidate.data_set_id.clone();
		gateway.tracker.spawn(async move {
			let entry = NewRetrievalLog {
				timestamp: now_ms(),
				response_status: status,
				egress_bytes: Some(0),
				worker_ttfb: Some(worker_start.elapsed().as_millis() as i64),
				request_country_code: country_code,
				data_set_id: Some(data_set_id),
				bot_name,
				..Default::default()
			};
			if let Err(e) = store.insert_retrieval_log(&entry).await {
				log::error!(target: "filbeam-gateway", "retrieval log write failed: {}", e);
			}
		});

		let mut builder = Response::builder().status(status);
		for (name, value) in &origin_headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		return envelope(builder, gateway, &candidate.data_set_id)
			.body(Body::empty())
			.expect("origin response parts; qed");
	}

	let capture_limit = Some(gateway.config.origin_cache_max_body_bytes);
	let (client_stream, shadow) =
		metered_tee(response.bytes_stream().boxed(), fetch_start, capture_limit);

	let gateway_bg = gateway.clone();
	let cache_headers = rewrite_cache_control(&origin_headers, &gateway.config);
	let data_set_id = candidate.data_set_id.clone();
	gateway.tracker.spawn(async move {
		let measurement = shadow.await;

		if let Some(body) = measurement.body.clone() {
			gateway_bg.cache.insert(key, status, cache_headers, body);
		}

		let entry = NewRetrievalLog {
			timestamp: now_ms(),
			response_status: status,
			egress_bytes: Some(measurement.egress_bytes),
			cache_miss: Some(true),
			fetch_ttfb: measurement.fetch_ttfb,
			fetch_ttlb: measurement.fetch_ttlb,
			worker_ttfb: Some(worker_start.elapsed().as_millis() as i64),
			request_country_code: country_code,
			data_set_id: Some(data_set_id.clone()),
			bot_name,
		};
		if let Err(e) = gateway_bg.store.insert_retrieval_log(&entry).await {
			log::error!(target: "filbeam-gateway", "retrieval log write failed: {}", e);
		}
		if let Err(e) = gateway_bg
			.store
			.update_data_set_stats(
				&data_set_id,
				measurement.egress_bytes,
				true,
				gateway_bg.config.enforce_quotas,
			)
			.await
		{
			log::error!(target: "filbeam-gateway", "stats update failed: {}", e);
		}
	});

	let mut builder = Response::builder().status(status);
	for (name, value) in &origin_headers {
		builder = builder.header(name.as_str(), value.as_str());
	}
	envelope(builder, gateway, &candidate.data_set_id)
		.body(Body::from_stream(client_stream))
		.expect("origin response parts; qed")
}

/// The response envelope shared by all success paths.
fn envelope(
	builder: axum::http::response::Builder,
	gateway: &Arc<Gateway>,
	data_set_id: &str,
) -> axum::http::response::Builder {
	builder
		.header("x-data-set-id", data_set_id)
		.header(
			header::CACHE_CONTROL,
			format!("public, max-age={}", gateway.config.client_cache_ttl_secs),
		)
		.header(
			header::CONTENT_SECURITY_POLICY,
			content_security_policy(&gateway.config),
		)
}

pub fn content_security_policy(config: &GatewayConfig) -> String {
	let mut sources = vec![
		format!("https://{}", config.dns_root),
		format!("https://*.{}", config.dns_root),
	];
	sources.extend(config.csp_extra.iter().cloned());
	format!("default-src 'self' {}", sources.join(" "))
}

/// Headers a cached copy carries: the origin's, minus its cache directives.
fn rewrite_cache_control(
	origin_headers: &[(String, String)],
	config: &GatewayConfig,
) -> Vec<(String, String)> {
	let mut headers: Vec<(String, String)> = origin_headers
		.iter()
		.filter(|(name, _)| name != "cache-control")
		.cloned()
		.collect();
	headers.push((
		"cache-control".to_string(),
		format!("public, max-age={}", config.origin_cache_ttl_secs),
	));
	headers
}

/// A terminal failure gets a synthetic log row with no measurement.
fn log_terminal_failure(
	gateway: &Arc<Gateway>,
	headers: &axum::http::HeaderMap,
	response_status: u16,
	data_set_id: Option<String>,
) {
	let country_code = headers
		.get("cf-ipcountry")
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);
	let store = gateway.store.clone();
	gateway.tracker.spawn(async move {
		let entry = NewRetrievalLog {
			timestamp: now_ms(),
			response_status,
			request_country_code: country_code,
			data_set_id,
			..Default::default()
		};
		if let Err(e) = store.insert_retrieval_log(&entry).await {
			log::error!(target: "filbeam-gateway", "retrieval log write failed: {}", e);
		}
	});
}

fn legacy_redirect(config: &GatewayConfig, host: &str, path_segment: &str) -> Option<String> {
	let host = crate::request::host_without_port(host);
	let prefix = host.strip_suffix(config.legacy_dns_root.as_str())?;
	let new_host = format!("{prefix}{}", config.dns_root);
	if path_segment.is_empty() {
		Some(format!("https://{new_host}/"))
	} else {
		Some(format!("https://{new_host}/{path_segment}"))
	}
}

fn redirect(status: StatusCode, location: &str) -> Response {
	let mut response = Response::builder().status(status);
	if let Ok(value) = HeaderValue::from_str(location) {
		response = response.header(header::LOCATION, value);
	}
	response
		.body(Body::empty())
		.expect("static response parts; qed")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config() -> GatewayConfig {
		use clap::Parser;
		GatewayConfig::parse_from(["gateway"])
	}

	#[test]
	fn csp_names_the_gateway_domain() {
		let csp = content_security_policy(&config());
		assert_eq!(
			csp,
			"default-src 'self' https://filbeam.io https://*.filbeam.io"
		);
	}

	#[test]
	fn csp_appends_configured_extensions() {
		let mut config = config();
		config.csp_extra = vec!["https://static.example".to_string()];
		assert!(content_security_policy(&config).ends_with("https://static.example"));
	}

	#[test]
	fn legacy_hosts_redirect_to_the_primary_root() {
		let config = config();
		assert_eq!(
			legacy_redirect(&config, "0xabc.filcdn.io", "bagacid").as_deref(),
			Some("https://0xabc.filbeam.io/bagacid")
		);
		assert_eq!(
			legacy_redirect(&config, "0xabc.filcdn.io:443", "").as_deref(),
			Some("https://0xabc.filbeam.io/")
		);
		assert!(legacy_redirect(&config, "0xabc.filbeam.io", "bagacid").is_none());
	}

	#[test]
	fn cache_control_is_rewritten_for_the_cached_copy() {
		let rewritten = rewrite_cache_control(
			&[
				("content-type".to_string(), "application/octet-stream".to_string()),
				("cache-control".to_string(), "no-store".to_string()),
			],
			&config(),
		);
		assert!(rewritten.iter().any(|(n, v)| n == "cache-control" && v.contains("max-age=86400")));
		assert!(!rewritten.iter().any(|(_, v)| v == "no-store"));
	}
}
