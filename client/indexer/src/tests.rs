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

//! Webhook-surface tests with a stubbed screening API.

use std::sync::Arc;

use axum::{
	body::Body,
	http::{header, Request, StatusCode},
	routing::get,
	Json, Router,
};
use clap::Parser;
use tower::ServiceExt;

use fb_db::{
	sqlx::{self, Row},
	Backend, BackendConfig, SqliteBackendConfig,
};
use fb_types::LogSink;

use crate::{router, Indexer, IndexerConfig, WEBHOOK_SECRET_HEADER};

const SECRET: &str = "s3cret";
const PAYER: &str = "0x1234567890abcdef1234567890abcdef12345678";
const CID: &str = "baga6ea4seaqpkzbkcumwuhs26ykjcwbucgskisdvjyl66aiqp4usqil4a7badipa";

/// A screening API that flags exactly the given addresses.
async fn spawn_screening_api(sanctioned: &'static [&'static str]) -> String {
	let app = Router::new().route(
		"/api/v1/address/:address",
		get(move |axum::extract::Path(address): axum::extract::Path<String>| async move {
			let identifications: Vec<serde_json::Value> = if sanctioned.contains(&address.as_str())
			{
				vec![serde_json::json!({"category": "sanctions"})]
			} else {
				vec![]
			};
			Json(serde_json::json!({ "identifications": identifications }))
		}),
	);
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	format!("http://{addr}")
}

async fn test_indexer(screening_url: &str) -> Arc<Indexer> {
	let store = Backend::new(
		BackendConfig::Sqlite(SqliteBackendConfig {
			path: "sqlite::memory:",
			create_if_missing: true,
		}),
		1,
	)
	.await
	.unwrap();
	let config = IndexerConfig::parse_from([
		"indexer",
		"--webhook-secret",
		SECRET,
		"--screening-api-url",
		screening_url,
	]);
	Indexer::new(config, 0, store, Arc::new(LogSink))
}

fn webhook(path: &str, body: serde_json::Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(path)
		.header(header::CONTENT_TYPE, "application/json")
		.header(WEBHOOK_SECRET_HEADER, SECRET)
		.body(Body::from(body.to_string()))
		.unwrap()
}

async fn quotas(indexer: &Indexer, data_set_id: &str) -> (i64, i64) {
	let row = sqlx::query(
		"SELECT cdn_egress_quota, cache_miss_egress_quota
		FROM data_set_egress_quotas WHERE data_set_id = ?",
	)
	.bind(data_set_id)
	.fetch_one(indexer.store.pool())
	.await
	.unwrap();
	(row.get(0), row.get(1))
}

#[tokio::test]
async fn secret_mismatch_is_unauthorized() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let request = Request::builder()
		.method("POST")
		.uri("/fwss/cdn-payment-settled")
		.header(header::CONTENT_TYPE, "application/json")
		.header(WEBHOOK_SECRET_HEADER, "wrong")
		.body(Body::from("{}"))
		.unwrap();
	let response = router(indexer.clone()).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

	let request = Request::builder()
		.method("POST")
		.uri("/fwss/cdn-payment-settled")
		.body(Body::from("{}"))
		.unwrap();
	let response = router(indexer).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhooks_are_post_only() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let request = Request::builder()
		.method("GET")
		.uri("/fwss/data-set-created")
		.header(WEBHOOK_SECRET_HEADER, SECRET)
		.body(Body::empty())
		.unwrap();
	let response = router(indexer).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn schema_violations_are_bad_requests() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let response = router(indexer)
		.oneshot(webhook(
			"/fwss/cdn-payment-settled",
			serde_json::json!({ "dataSetId": "ds1" }),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn data_set_created_screens_payer_and_inserts() {
	let screening = spawn_screening_api(&[]).await;
	let indexer = test_indexer(&screening).await;
	let response = router(indexer.clone())
		.oneshot(webhook(
			"/fwss/data-set-created",
			serde_json::json!({
				"dataSetId": "ds1",
				"serviceProviderId": "sp1",
				"payerAddress": PAYER.to_uppercase().replace("0X", "0x"),
				"withCDN": true,
			}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let row = sqlx::query("SELECT payer_address, with_cdn FROM data_sets WHERE id = 'ds1'")
		.fetch_one(indexer.store.pool())
		.await
		.unwrap();
	// Stored lowercased despite the checksummed input.
	assert_eq!(row.get::<String, _>(0), PAYER);
	assert_eq!(row.get::<i64, _>(1), 1);

	let row = sqlx::query("SELECT is_sanctioned FROM wallet_details WHERE address = ?")
		.bind(PAYER)
		.fetch_one(indexer.store.pool())
		.await
		.unwrap();
	assert_eq!(row.get::<i64, _>(0), 0);
}

#[tokio::test]
async fn data_set_created_records_sanctioned_payers() {
	let screening = spawn_screening_api(&[PAYER]).await;
	let indexer = test_indexer(&screening).await;
	router(indexer.clone())
		.oneshot(webhook(
			"/fwss/data-set-created",
			serde_json::json!({
				"dataSetId": "ds1",
				"serviceProviderId": "sp1",
				"payerAddress": PAYER,
				"withCDN": true,
			}),
		))
		.await
		.unwrap();
	let row = sqlx::query("SELECT is_sanctioned FROM wallet_details WHERE address = ?")
		.bind(PAYER)
		.fetch_one(indexer.store.pool())
		.await
		.unwrap();
	assert_eq!(row.get::<i64, _>(0), 1);
}

#[tokio::test]
async fn data_set_created_failure_enqueues_a_retry() {
	// Screening API is unreachable: the webhook still acks and a retry
	// job lands in the queue.
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let response = router(indexer.clone())
		.oneshot(webhook(
			"/fwss/data-set-created",
			serde_json::json!({
				"dataSetId": "ds1",
				"serviceProviderId": "sp1",
				"payerAddress": PAYER,
				"withCDN": true,
			}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let mut rx = indexer.take_retry_receiver().unwrap();
	let job = rx.try_recv().unwrap();
	assert_eq!(job.event.data_set_id, "ds1");
	assert_eq!(job.attempt, 1);

	let missing = sqlx::query("SELECT id FROM data_sets")
		.fetch_optional(indexer.store.pool())
		.await
		.unwrap();
	assert!(missing.is_none());
}

#[tokio::test]
async fn top_up_replays_do_not_double_quotas() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let payload = serde_json::json!({
		"id": "0xabc-0",
		"dataSetId": "ds1",
		"cdnLockupAdded": "5000000000000000000",
		"cacheMissLockupAdded": "10000000000000000000",
		"cdnRatePerTib": "5000000000000000000",
		"cacheMissRatePerTib": "5000000000000000000",
	});
	for _ in 0..2 {
		let response = router(indexer.clone())
			.oneshot(webhook("/fwss/cdn-payment-rails-topped-up", payload.clone()))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}
	assert_eq!(quotas(&indexer, "ds1").await, (1 << 40, 2 << 40));

	// A distinct entity id with the same amounts adds again.
	let mut second = payload.clone();
	second["id"] = serde_json::json!("0xabc-1");
	router(indexer.clone())
		.oneshot(webhook("/fwss/cdn-payment-rails-topped-up", second))
		.await
		.unwrap();
	assert_eq!(quotas(&indexer, "ds1").await, (2 << 40, 4 << 40));
}

#[tokio::test]
async fn piece_added_decodes_cid_and_quotes_price() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	indexer
		.store
		.insert_data_set("ds1", "sp1", &PAYER.parse().unwrap(), true, false)
		.await
		.unwrap();

	let cid: cid::Cid = CID.parse().unwrap();
	let hex_cid = format!("0x{}", hex::encode(cid.to_bytes()));
	let response = router(indexer.clone())
		.oneshot(webhook(
			"/fwss/piece-added",
			serde_json::json!({
				"dataSetId": "ds1",
				"pieceId": "piece1",
				"pieceCid": hex_cid,
				"keys": ["ipfsRootCID", "x402Price"],
				"values": ["bafkreigh2akiscaildcqabsyg3dfr6chu3fgpregiymsck7e7aqa4s52zy", "1000"],
				"blockNumber": 7,
			}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let row = sqlx::query("SELECT cid, ipfs_root_cid, x402_price FROM pieces WHERE id = 'piece1'")
		.fetch_one(indexer.store.pool())
		.await
		.unwrap();
	assert_eq!(row.get::<String, _>(0), CID);
	assert!(row.get::<Option<String>, _>(1).is_some());
	assert_eq!(row.get::<Option<String>, _>(2).as_deref(), Some("1000"));

	assert_eq!(
		indexer
			.store
			.piece_price_quote(&format!("{PAYER}:{CID}"))
			.await
			.unwrap(),
		Some(("1000".to_string(), 7))
	);
}

#[tokio::test]
async fn piece_added_rejects_malformed_cid_bytes() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let response = router(indexer)
		.oneshot(webhook(
			"/fwss/piece-added",
			serde_json::json!({
				"dataSetId": "ds1",
				"pieceId": "piece1",
				"pieceCid": "0x00ff",
			}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn provider_product_events_decode_hex_service_urls() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let service_url_hex = format!("0x{}", hex::encode("https://sp.example/"));
	let response = router(indexer.clone())
		.oneshot(webhook(
			"/service-provider-registry/product-added",
			serde_json::json!({
				"providerId": "sp1",
				"productType": 0,
				"capabilityKeys": ["serviceURL"],
				"capabilityValues": [service_url_hex],
				"blockNumber": 3,
			}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let row = sqlx::query("SELECT service_url, block_number FROM service_providers WHERE id = 'sp1'")
		.fetch_one(indexer.store.pool())
		.await
		.unwrap();
	assert_eq!(row.get::<String, _>(0), "https://sp.example/");
	assert_eq!(row.get::<i64, _>(1), 3);
}

#[tokio::test]
async fn non_pdp_products_are_ignored() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let response = router(indexer.clone())
		.oneshot(webhook(
			"/service-provider-registry/product-added",
			serde_json::json!({
				"providerId": "sp1",
				"productType": 1,
				"capabilityKeys": [],
				"capabilityValues": [],
			}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let row = sqlx::query("SELECT id FROM service_providers")
		.fetch_optional(indexer.store.pool())
		.await
		.unwrap();
	assert!(row.is_none());
}

#[tokio::test]
async fn provider_product_rejects_bad_capability_encoding() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let response = router(indexer)
		.oneshot(webhook(
			"/service-provider-registry/product-added",
			serde_json::json!({
				"providerId": "sp1",
				"productType": 0,
				"capabilityKeys": ["serviceURL"],
				"capabilityValues": ["zznothex"],
			}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn service_termination_flips_cdn_and_computes_unlock() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	indexer
		.store
		.insert_data_set("ds1", "sp1", &PAYER.parse().unwrap(), true, false)
		.await
		.unwrap();
	let response = router(indexer.clone())
		.oneshot(webhook(
			"/fwss/cdn-service-terminated",
			serde_json::json!({
				"dataSetId": "ds1",
				"blockNumber": 100,
				"transactionHash": "0xfeed",
			}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let row = sqlx::query(
		"SELECT with_cdn, terminate_service_tx_hash, lockup_unlocks_at
		FROM data_sets WHERE id = 'ds1'",
	)
	.fetch_one(indexer.store.pool())
	.await
	.unwrap();
	assert_eq!(row.get::<i64, _>(0), 0);
	assert_eq!(row.get::<String, _>(1), "0xfeed");
	// genesis 0: epoch 100 -> 3_000_000 ms, plus ten days of lockup.
	assert_eq!(row.get::<i64, _>(2), 3_000_000 + 10 * 86_400_000);
}

#[tokio::test]
async fn settled_watermark_follows_the_block_epoch() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	indexer
		.store
		.insert_data_set("ds1", "sp1", &PAYER.parse().unwrap(), true, false)
		.await
		.unwrap();
	let response = router(indexer.clone())
		.oneshot(webhook(
			"/filbeam-operator/cdn-payment-settled",
			serde_json::json!({ "dataSetId": "ds1", "blockNumber": 200 }),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let row = sqlx::query("SELECT cdn_payments_settled_until FROM data_sets WHERE id = 'ds1'")
		.fetch_one(indexer.store.pool())
		.await
		.unwrap();
	assert_eq!(row.get::<i64, _>(0), 6_000_000);
}

#[tokio::test]
async fn health_endpoint_needs_no_secret() {
	let indexer = test_indexer("http://127.0.0.1:1").await;
	let request = Request::builder()
		.uri("/health")
		.body(Body::empty())
		.unwrap();
	let response = router(indexer).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
}
