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

//! The FilBeam event indexer.
//!
//! Chain events reach us as authenticated webhooks from the subgraph;
//! every handler is idempotent because delivery is at-least-once and
//! unordered. A cron tick additionally probes the subgraph, refreshes
//! stale wallet screenings and emits the settlement-lag metric.

#![warn(unused_crate_dependencies)]

use std::sync::Arc;

use axum::{
	extract::{Request, State},
	http::StatusCode,
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
	Router,
};
use tokio::sync::mpsc;

pub mod events;
pub mod sanctions;
pub mod tasks;

#[cfg(test)]
mod tests;

pub use events::DataSetCreatedEvent;
pub use sanctions::ScreeningClient;
pub use tasks::run_scheduled_tasks;

/// The shared-secret header every webhook must carry.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Event-indexer knobs.
#[derive(Clone, Debug, clap::Parser)]
pub struct IndexerConfig {
	/// Listen address for the webhook surface.
	#[arg(long, env = "FILBEAM_INDEXER_LISTEN", default_value = "0.0.0.0:8081")]
	pub indexer_listen: String,

	/// Shared secret the subgraph sends in `x-webhook-secret`.
	#[arg(long, env = "FILBEAM_WEBHOOK_SECRET", hide_env_values = true)]
	pub webhook_secret: String,

	/// GraphQL endpoint of the subgraph, probed on every tick.
	#[arg(long, env = "FILBEAM_SUBGRAPH_URL", default_value = "")]
	pub subgraph_url: String,

	/// Sanctions screening API base URL.
	#[arg(
		long,
		env = "FILBEAM_SCREENING_API_URL",
		default_value = "https://public.chainalysis.com"
	)]
	pub screening_api_url: String,

	/// Sanctions screening API key.
	#[arg(long, env = "FILBEAM_SCREENING_API_KEY", hide_env_values = true, default_value = "")]
	pub screening_api_key: String,

	/// Wallets re-screened per tick.
	#[arg(long, default_value = "25")]
	pub screening_batch_size: u32,

	/// A screening older than this is stale.
	#[arg(long, default_value = "604800000")]
	pub screening_stale_threshold_ms: i64,

	/// Seconds between scheduled ticks.
	#[arg(long, default_value = "60")]
	pub indexer_tick_secs: u64,

	/// Funds stay locked this long after a service termination.
	#[arg(long, default_value = "10")]
	pub default_lockup_period_days: i64,

	/// Delay before a failed data-set-created event is retried.
	#[arg(long, default_value = "10")]
	pub retry_delay_secs: u64,

	/// Retry budget for a failed data-set-created event.
	#[arg(long, default_value = "5")]
	pub retry_max_attempts: u32,
}

/// A `data-set-created` event waiting for another attempt.
#[derive(Clone, Debug)]
pub struct RetryJob {
	pub event: DataSetCreatedEvent,
	pub attempt: u32,
}

pub struct Indexer {
	pub config: IndexerConfig,
	pub genesis_ms: i64,
	pub store: fb_db::Backend,
	pub screening: ScreeningClient,
	pub analytics: Arc<dyn fb_types::AnalyticsSink>,
	pub http: reqwest::Client,
	retry_tx: mpsc::Sender<RetryJob>,
	retry_rx: parking_lot::Mutex<Option<mpsc::Receiver<RetryJob>>>,
}

impl Indexer {
	pub fn new(
		config: IndexerConfig,
		genesis_ms: i64,
		store: fb_db::Backend,
		analytics: Arc<dyn fb_types::AnalyticsSink>,
	) -> Arc<Self> {
		let screening = ScreeningClient::new(
			config.screening_api_url.clone(),
			config.screening_api_key.clone(),
		);
		let (retry_tx, retry_rx) = mpsc::channel(100);
		Arc::new(Indexer {
			config,
			genesis_ms,
			store,
			screening,
			analytics,
			http: reqwest::Client::new(),
			retry_tx,
			retry_rx: parking_lot::Mutex::new(Some(retry_rx)),
		})
	}

	pub(crate) fn enqueue_retry(&self, job: RetryJob) {
		if self.retry_tx.try_send(job).is_err() {
			log::error!(
				target: "filbeam-indexer",
				"retry queue full, dropping data-set-created retry",
			);
		}
	}

	/// The receiver side of the retry queue; the node hands it to
	/// [`spawn_retry_worker`].
	pub fn take_retry_receiver(&self) -> Option<mpsc::Receiver<RetryJob>> {
		self.retry_rx.lock().take()
	}
}

/// Consumes retry jobs: wait out the delay, re-apply, re-enqueue on
/// failure until the attempt budget runs out.
pub fn spawn_retry_worker(indexer: Arc<Indexer>) {
	let Some(mut rx) = indexer.take_retry_receiver() else {
		return;
	};
	tokio::spawn(async move {
		while let Some(job) = rx.recv().await {
			futures_timer::Delay::new(std::time::Duration::from_secs(
				indexer.config.retry_delay_secs,
			))
			.await;
			match events::apply_data_set_created(&indexer, &job.event).await {
				Ok(()) => {
					log::info!(
						target: "filbeam-indexer",
						"data set {} created on retry attempt {}",
						job.event.data_set_id,
						job.attempt,
					);
				}
				Err(e) if job.attempt < indexer.config.retry_max_attempts => {
					log::warn!(
						target: "filbeam-indexer",
						"data-set-created retry {} failed: {}",
						job.attempt,
						e,
					);
					indexer.enqueue_retry(RetryJob {
						event: job.event,
						attempt: job.attempt + 1,
					});
				}
				Err(e) => {
					log::error!(
						target: "filbeam-indexer",
						"giving up on data set {} after {} attempts: {}",
						job.event.data_set_id,
						job.attempt,
						e,
					);
				}
			}
		}
	});
}

/// A rejected webhook: status plus a terse reason.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{status}: {message}")]
pub struct IndexerError {
	pub status: StatusCode,
	pub message: String,
}

impl IndexerError {
	pub fn bad_request(message: impl Into<String>) -> Self {
		IndexerError {
			status: StatusCode::BAD_REQUEST,
			message: message.into(),
		}
	}

	pub fn internal(message: impl Into<String>) -> Self {
		IndexerError {
			status: StatusCode::INTERNAL_SERVER_ERROR,
			message: message.into(),
		}
	}
}

impl From<fb_db::sqlx::Error> for IndexerError {
	fn from(e: fb_db::sqlx::Error) -> Self {
		log::error!(target: "filbeam-indexer", "store failure: {}", e);
		IndexerError::internal("store failure")
	}
}

impl IntoResponse for IndexerError {
	fn into_response(self) -> Response {
		(self.status, self.message).into_response()
	}
}

async fn require_webhook_secret(
	State(indexer): State<Arc<Indexer>>,
	request: Request,
	next: Next,
) -> Response {
	let presented = request
		.headers()
		.get(WEBHOOK_SECRET_HEADER)
		.and_then(|v| v.to_str().ok());
	if presented != Some(indexer.config.webhook_secret.as_str()) {
		return (StatusCode::UNAUTHORIZED, "invalid webhook secret").into_response();
	}
	next.run(request).await
}

async fn health() -> &'static str {
	"ok"
}

pub fn router(indexer: Arc<Indexer>) -> Router {
	let webhooks = Router::new()
		.route("/fwss/data-set-created", post(events::handle_data_set_created))
		.route("/fwss/piece-added", post(events::handle_piece_added))
		.route(
			"/pdp-verifier/pieces-removed",
			post(events::handle_pieces_removed),
		)
		.route(
			"/fwss/service-terminated",
			post(events::handle_service_terminated),
		)
		.route(
			"/fwss/cdn-service-terminated",
			post(events::handle_service_terminated),
		)
		.route(
			"/fwss/cdn-payment-rails-topped-up",
			post(events::handle_cdn_payment_rails_topped_up),
		)
		.route(
			"/service-provider-registry/product-added",
			post(events::handle_provider_product_upserted),
		)
		.route(
			"/service-provider-registry/product-updated",
			post(events::handle_provider_product_upserted),
		)
		.route(
			"/service-provider-registry/product-removed",
			post(events::handle_provider_product_removed),
		)
		.route(
			"/service-provider-registry/provider-removed",
			post(events::handle_provider_removed),
		)
		.route(
			"/filbeam-operator/cdn-payment-settled",
			post(events::handle_cdn_payment_settled),
		)
		.layer(middleware::from_fn_with_state(
			indexer.clone(),
			require_webhook_secret,
		));

	Router::new()
		.route("/health", get(health))
		.merge(webhooks)
		.with_state(indexer)
}
