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

//! End-to-end gateway tests against a local origin server.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use axum::{
	body::Body,
	extract::State,
	http::{header, HeaderMap, Request, StatusCode},
	response::{IntoResponse, Response},
	routing::get,
	Router,
};
use bytes::Bytes;
use clap::Parser;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

use fb_db::{
	sqlx::{self, Row},
	Backend, BackendConfig, SqliteBackendConfig,
};

use crate::{
	cache::CacheKey,
	origin::{bad_bits_anchor, retrieval_url},
	router, Gateway, GatewayConfig,
};

const CID: &str = "baga6ea4seaqpkzbkcumwuhs26ykjcwbucgskisdvjyl66aiqp4usqil4a7badipa";
const PAYER: &str = "0x1234567890abcdef1234567890abcdef12345678";

#[derive(Clone)]
struct OriginState {
	body: Bytes,
	hits: Arc<AtomicUsize>,
	fail: bool,
}

async fn origin_piece(State(state): State<OriginState>, headers: HeaderMap) -> Response {
	state.hits.fetch_add(1, Ordering::SeqCst);
	if state.fail {
		return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
	}
	if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
		if let Some((start, end)) = parse_range(range, state.body.len()) {
			let slice = state.body.slice(start..=end);
			return Response::builder()
				.status(StatusCode::PARTIAL_CONTENT)
				.header(
					header::CONTENT_RANGE,
					format!("bytes {start}-{end}/{}", state.body.len()),
				)
				.body(Body::from(slice))
				.unwrap();
		}
	}
	state.body.clone().into_response()
}

fn parse_range(raw: &str, len: usize) -> Option<(usize, usize)> {
	let (start, end) = raw.strip_prefix("bytes=")?.split_once('-')?;
	let start: usize = start.parse().ok()?;
	let end: usize = end.parse().ok().filter(|e| *e < len)?;
	(start <= end).then_some((start, end))
}

/// Serves `/piece/:cid` from a fixed body on an ephemeral port.
async fn spawn_origin(body: &'static [u8], fail: bool) -> (String, Arc<AtomicUsize>) {
	let hits = Arc::new(AtomicUsize::new(0));
	let state = OriginState {
		body: Bytes::from_static(body),
		hits: hits.clone(),
		fail,
	};
	let app = Router::new()
		.route("/piece/:cid", get(origin_piece))
		.with_state(state);
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	(format!("http://{addr}/"), hits)
}

async fn test_gateway(args: &[&str]) -> Arc<Gateway> {
	let store = Backend::new(
		BackendConfig::Sqlite(SqliteBackendConfig {
			path: "sqlite::memory:",
			create_if_missing: true,
		}),
		1,
	)
	.await
	.unwrap();
	let mut argv = vec!["gateway"];
	argv.extend_from_slice(args);
	let config = GatewayConfig::parse_from(argv);
	Arc::new(Gateway::new(config, store, TaskTracker::new()))
}

async fn seed(gateway: &Gateway, service_url: &str, cdn_quota: i64, cache_miss_quota: i64) {
	gateway
		.store
		.upsert_service_provider("sp1", service_url, 1)
		.await
		.unwrap();
	gateway
		.store
		.insert_data_set("ds1", "sp1", &PAYER.parse().unwrap(), true, false)
		.await
		.unwrap();
	gateway
		.store
		.upsert_piece("piece1", "ds1", CID, None, None)
		.await
		.unwrap();
	gateway
		.store
		.add_egress_quotas("topup", "0xseed-0", "ds1", cdn_quota, cache_miss_quota, 1)
		.await
		.unwrap();
}

fn retrieval_request(path: &str) -> Request<Body> {
	Request::builder()
		.uri(path)
		.header(header::HOST, format!("{PAYER}.filbeam.io"))
		.body(Body::empty())
		.unwrap()
}

async fn drain_metering(gateway: &Gateway) {
	gateway.tracker.close();
	gateway.tracker.wait().await;
}

async fn read_body(response: Response) -> Bytes {
	axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.unwrap()
}

async fn quotas(gateway: &Gateway) -> (i64, i64) {
	let row = sqlx::query(
		"SELECT cdn_egress_quota, cache_miss_egress_quota
		FROM data_set_egress_quotas WHERE data_set_id = 'ds1'",
	)
	.fetch_one(gateway.store.pool())
	.await
	.unwrap();
	(row.get(0), row.get(1))
}

#[tokio::test]
async fn first_time_retrieval_streams_meters_and_decrements() {
	let (origin, _) = spawn_origin(&[7u8; 100], false).await;
	let gateway = test_gateway(&[]).await;
	seed(&gateway, &origin, 1_000_000, 1_000_000).await;

	let response = router(gateway.clone())
		.oneshot(retrieval_request(&format!("/{CID}")))
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(
		response.headers().get("x-data-set-id").unwrap(),
		"ds1"
	);
	assert_eq!(
		response.headers().get(header::CACHE_CONTROL).unwrap(),
		"public, max-age=86400"
	);
	assert!(response
		.headers()
		.get(header::CONTENT_SECURITY_POLICY)
		.unwrap()
		.to_str()
		.unwrap()
		.contains("https://*.filbeam.io"));
	let body = read_body(response).await;
	assert_eq!(body.len(), 100);

	drain_metering(&gateway).await;
	let row = sqlx::query(
		"SELECT egress_bytes, cache_miss, response_status, data_set_id
		FROM retrieval_logs",
	)
	.fetch_one(gateway.store.pool())
	.await
	.unwrap();
	assert_eq!(row.get::<i64, _>(0), 100);
	assert_eq!(row.get::<i64, _>(1), 1);
	assert_eq!(row.get::<i64, _>(2), 200);
	assert_eq!(row.get::<String, _>(3), "ds1");
	assert_eq!(quotas(&gateway).await, (999_900, 999_900));
}

#[tokio::test]
async fn quota_overrun_mid_stream_is_not_cut_short() {
	let (origin, _) = spawn_origin(&[1u8; 500], false).await;
	let gateway = test_gateway(&[]).await;
	seed(&gateway, &origin, 100, 100).await;

	let response = router(gateway.clone())
		.oneshot(retrieval_request(&format!("/{CID}")))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(read_body(response).await.len(), 500);

	drain_metering(&gateway).await;
	let row = sqlx::query("SELECT egress_bytes FROM retrieval_logs")
		.fetch_one(gateway.store.pool())
		.await
		.unwrap();
	assert_eq!(row.get::<i64, _>(0), 500);
	assert_eq!(quotas(&gateway).await, (-400, -400));
}

#[tokio::test]
async fn sanctioned_payer_is_rejected() {
	let (origin, hits) = spawn_origin(b"data", false).await;
	let gateway = test_gateway(&[]).await;
	seed(&gateway, &origin, 1_000_000, 1_000_000).await;
	gateway.store.upsert_wallet(PAYER, true, 1).await.unwrap();

	let response = router(gateway.clone())
		.oneshot(retrieval_request(&format!("/{CID}")))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::FORBIDDEN);
	let body = read_body(response).await;
	let body = String::from_utf8(body.to_vec()).unwrap();
	assert!(body.contains(&format!("Wallet {PAYER} is sanctioned")));
	assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bad_bits_flagged_cid_is_denied_despite_valid_payment() {
	let (origin, hits) = spawn_origin(b"data", false).await;
	let gateway = test_gateway(&[]).await;
	seed(&gateway, &origin, 1_000_000, 1_000_000).await;
	gateway
		.store
		.add_bad_bits(&bad_bits_anchor(&CID.parse().unwrap()))
		.await
		.unwrap();

	let response = router(gateway.clone())
		.oneshot(retrieval_request(&format!("/{CID}")))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
	let body = read_body(response).await;
	assert!(String::from_utf8(body.to_vec())
		.unwrap()
		.contains("Bad Bits denylist"));
	assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_retrieval_is_served_from_the_shared_cache() {
	let (origin, hits) = spawn_origin(b"cache me", false).await;
	let gateway = test_gateway(&[]).await;
	seed(&gateway, &origin, 1_000_000, 1_000_000).await;

	let first = router(gateway.clone())
		.oneshot(retrieval_request(&format!("/{CID}")))
		.await
		.unwrap();
	assert_eq!(read_body(first).await, Bytes::from_static(b"cache me"));

	// The cache write happens in the shadow branch; let it settle.
	let key = CacheKey {
		url: retrieval_url(&origin, &CID.parse().unwrap()),
		range: None,
	};
	for _ in 0..200 {
		if gateway.cache.get(&key).is_some() {
			break;
		}
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	}
	assert!(gateway.cache.get(&key).is_some(), "cache write never landed");

	let second = router(gateway.clone())
		.oneshot(retrieval_request(&format!("/{CID}")))
		.await
		.unwrap();
	assert_eq!(second.status(), StatusCode::OK);
	assert_eq!(read_body(second).await, Bytes::from_static(b"cache me"));
	assert_eq!(hits.load(Ordering::SeqCst), 1);

	drain_metering(&gateway).await;
	let rows = sqlx::query("SELECT cache_miss FROM retrieval_logs ORDER BY id")
		.fetch_all(gateway.store.pool())
		.await
		.unwrap();
	let flags: Vec<i64> = rows.iter().map(|r| r.get(0)).collect();
	assert_eq!(flags, vec![1, 0]);
	// Both retrievals hit the CDN quota; only the first was a cache miss.
	assert_eq!(quotas(&gateway).await, (1_000_000 - 16, 1_000_000 - 8));
}

#[tokio::test]
async fn range_requests_pass_through() {
	let (origin, _) = spawn_origin(b"0123456789", false).await;
	let gateway = test_gateway(&[]).await;
	seed(&gateway, &origin, 1_000_000, 1_000_000).await;

	let request = Request::builder()
		.uri(format!("/{CID}"))
		.header(header::HOST, format!("{PAYER}.filbeam.io"))
		.header(header::RANGE, "bytes=2-5")
		.body(Body::empty())
		.unwrap();
	let response = router(gateway.clone()).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
	assert_eq!(read_body(response).await, Bytes::from_static(b"2345"));
}

#[tokio::test]
async fn exhausted_origins_return_bad_gateway_with_attempt_list() {
	let (origin, _) = spawn_origin(b"", true).await;
	let gateway = test_gateway(&[]).await;
	seed(&gateway, &origin, 1_000_000, 1_000_000).await;

	let response = router(gateway.clone())
		.oneshot(retrieval_request(&format!("/{CID}")))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
	assert_eq!(response.headers().get("x-data-set-id").unwrap(), "ds1");
	let body = String::from_utf8(read_body(response).await.to_vec()).unwrap();
	assert!(body.contains(&format!("ID=sp1(Service URL={origin})")));

	drain_metering(&gateway).await;
	let row = sqlx::query("SELECT response_status, egress_bytes FROM retrieval_logs")
		.fetch_one(gateway.store.pool())
		.await
		.unwrap();
	assert_eq!(row.get::<i64, _>(0), 502);
	assert!(row.get::<Option<i64>, _>(1).is_none());
}

#[tokio::test]
async fn bearer_tokens_identify_bots() {
	let (origin, _) = spawn_origin(b"bot data", false).await;
	let gateway = test_gateway(&["--bot-token", "sekrit=GoodBot"]).await;
	seed(&gateway, &origin, 1_000_000, 1_000_000).await;

	let request = Request::builder()
		.uri(format!("/{CID}"))
		.header(header::HOST, format!("{PAYER}.filbeam.io"))
		.header(header::AUTHORIZATION, "Bearer sekrit")
		.body(Body::empty())
		.unwrap();
	let response = router(gateway.clone()).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	read_body(response).await;

	drain_metering(&gateway).await;
	let row = sqlx::query("SELECT bot_name FROM retrieval_logs")
		.fetch_one(gateway.store.pool())
		.await
		.unwrap();
	assert_eq!(row.get::<String, _>(0), "GoodBot");
}

#[tokio::test]
async fn unknown_bearer_token_is_unauthorized() {
	let gateway = test_gateway(&["--bot-token", "sekrit=GoodBot"]).await;
	let request = Request::builder()
		.uri(format!("/{CID}"))
		.header(header::HOST, format!("{PAYER}.filbeam.io"))
		.header(header::AUTHORIZATION, "Bearer wrong")
		.body(Body::empty())
		.unwrap();
	let response = router(gateway.clone()).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

	let request = Request::builder()
		.uri(format!("/{CID}"))
		.header(header::HOST, format!("{PAYER}.filbeam.io"))
		.header(header::AUTHORIZATION, "Basic sekrit")
		.body(Body::empty())
		.unwrap();
	let response = router(gateway).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_cid_and_host_are_bad_requests() {
	let gateway = test_gateway(&[]).await;

	let response = router(gateway.clone())
		.oneshot(retrieval_request("/notacid"))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let request = Request::builder()
		.uri(format!("/{CID}"))
		.header(header::HOST, "nothexaddress.filbeam.io")
		.body(Body::empty())
		.unwrap();
	let response = router(gateway).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn root_redirects_to_marketing_site() {
	let gateway = test_gateway(&[]).await;
	let response = router(gateway)
		.oneshot(retrieval_request("/"))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(
		response.headers().get(header::LOCATION).unwrap(),
		"https://filbeam.com/"
	);
}

#[tokio::test]
async fn legacy_domain_redirects_permanently() {
	let gateway = test_gateway(&[]).await;
	let request = Request::builder()
		.uri(format!("/{CID}"))
		.header(header::HOST, format!("{PAYER}.filcdn.io"))
		.body(Body::empty())
		.unwrap();
	let response = router(gateway).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
	assert_eq!(
		response.headers().get(header::LOCATION).unwrap(),
		&format!("https://{PAYER}.filbeam.io/{CID}")
	);
}

#[tokio::test]
async fn non_retrieval_methods_are_rejected() {
	let gateway = test_gateway(&[]).await;
	let request = Request::builder()
		.method("POST")
		.uri(format!("/{CID}"))
		.header(header::HOST, format!("{PAYER}.filbeam.io"))
		.body(Body::empty())
		.unwrap();
	let response = router(gateway).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn head_requests_meter_zero_egress() {
	let (origin, _) = spawn_origin(b"head body", false).await;
	let gateway = test_gateway(&[]).await;
	seed(&gateway, &origin, 1_000_000, 1_000_000).await;

	let request = Request::builder()
		.method("HEAD")
		.uri(format!("/{CID}"))
		.header(header::HOST, format!("{PAYER}.filbeam.io"))
		.body(Body::empty())
		.unwrap();
	let response = router(gateway.clone()).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	drain_metering(&gateway).await;
	let row = sqlx::query("SELECT egress_bytes FROM retrieval_logs")
		.fetch_one(gateway.store.pool())
		.await
		.unwrap();
	assert_eq!(row.get::<i64, _>(0), 0);
	assert_eq!(quotas(&gateway).await, (1_000_000, 1_000_000));
}
