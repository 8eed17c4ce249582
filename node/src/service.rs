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

//! Service wiring: store, chain client, HTTP surfaces, cron loops, queue
//! consumer, and the shutdown sequence that drains detached tasks.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use futures_timer::Delay;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use fb_chain::EthersChain;
use fb_db::{Backend, BackendConfig, SqliteBackendConfig};
use fb_gateway::Gateway;
use fb_indexer::{run_scheduled_tasks, spawn_retry_worker, Indexer};
use fb_reporter::{run_queue_consumer, Reporter};
use fb_types::LogSink;

use crate::cli::Cli;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
	log::info!(
		target: "filbeam",
		"starting FilBeam node: db={} gateway={} indexer={} dns_root={}",
		cli.database_path,
		cli.gateway.gateway_listen,
		cli.indexer.indexer_listen,
		cli.gateway.dns_root,
	);

	let store = Backend::new(
		BackendConfig::Sqlite(SqliteBackendConfig {
			path: &cli.database_path,
			create_if_missing: true,
		}),
		cli.database_pool_size,
	)
	.await
	.context("opening the store")?;

	let chain = Arc::new(
		EthersChain::new(&cli.chain)
			.await
			.context("connecting to the chain RPC")?,
	);
	let analytics = Arc::new(LogSink);
	let shutdown = CancellationToken::new();
	let tracker = TaskTracker::new();

	// Retrieval gateway.
	let gateway = Arc::new(Gateway::new(
		cli.gateway.clone(),
		store.clone(),
		tracker.clone(),
	));
	let gateway_listener = tokio::net::TcpListener::bind(&cli.gateway.gateway_listen)
		.await
		.context("binding the gateway listener")?;
	let gateway_app = fb_gateway::router(gateway);
	let gateway_shutdown = shutdown.clone();
	tokio::spawn(async move {
		let result = axum::serve(gateway_listener, gateway_app)
			.with_graceful_shutdown(async move { gateway_shutdown.cancelled().await })
			.await;
		if let Err(e) = result {
			log::error!(target: "filbeam", "gateway server failed: {}", e);
		}
	});

	// Event indexer webhooks.
	let indexer = Indexer::new(
		cli.indexer.clone(),
		cli.chain.genesis_ms,
		store.clone(),
		analytics.clone(),
	);
	spawn_retry_worker(indexer.clone());
	let indexer_listener = tokio::net::TcpListener::bind(&cli.indexer.indexer_listen)
		.await
		.context("binding the webhook listener")?;
	let indexer_app = fb_indexer::router(indexer.clone());
	let indexer_shutdown = shutdown.clone();
	tokio::spawn(async move {
		let result = axum::serve(indexer_listener, indexer_app)
			.with_graceful_shutdown(async move { indexer_shutdown.cancelled().await })
			.await;
		if let Err(e) = result {
			log::error!(target: "filbeam", "webhook server failed: {}", e);
		}
	});

	// Indexer cron: subgraph probe, wallet screening, settlement stats.
	let tick_indexer = indexer.clone();
	let tick_shutdown = shutdown.clone();
	tokio::spawn(async move {
		loop {
			tokio::select! {
				_ = tick_shutdown.cancelled() => break,
				_ = Delay::new(Duration::from_secs(tick_indexer.config.indexer_tick_secs)) => {
					if let Err(e) = run_scheduled_tasks(&tick_indexer).await {
						log::error!(target: "filbeam", "indexer tick failed: {}", e);
					}
				}
			}
		}
	});

	// Usage reporter cron and its queue consumer.
	let (reporter, queue_rx) = Reporter::new(
		store,
		chain,
		analytics,
		cli.chain.genesis_ms,
		cli.reporter.monitor_config(),
	);
	tokio::spawn(run_queue_consumer(reporter.clone(), queue_rx));
	let report_shutdown = shutdown.clone();
	let tick_reporter = reporter.clone();
	let reporter_tick_secs = cli.reporter.reporter_tick_secs;
	tokio::spawn(async move {
		loop {
			tokio::select! {
				_ = report_shutdown.cancelled() => break,
				_ = Delay::new(Duration::from_secs(reporter_tick_secs)) => {
					if let Err(e) = tick_reporter.run_usage_report().await {
						log::error!(target: "filbeam", "usage report failed: {}", e);
					}
				}
			}
		}
	});

	tokio::signal::ctrl_c()
		.await
		.context("listening for shutdown signal")?;
	log::info!(target: "filbeam", "shutting down");
	shutdown.cancel();

	// Detached metering and logging tasks get a bounded grace period.
	tracker.close();
	if tokio::time::timeout(
		Duration::from_secs(cli.shutdown_grace_secs),
		tracker.wait(),
	)
	.await
	.is_err()
	{
		log::warn!(
			target: "filbeam",
			"shutdown grace period elapsed with metering tasks still pending",
		);
	}
	Ok(())
}
