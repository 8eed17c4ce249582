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

//! Command line interface of the FilBeam node.

use fb_chain::client::ChainConfig;
use fb_gateway::GatewayConfig;
use fb_indexer::IndexerConfig;
use fb_reporter::ReporterConfig;

/// FilBeam: edge CDN and usage accounting for Filecoin content storage.
#[derive(Debug, clap::Parser)]
#[command(name = "filbeam", version, about)]
pub struct Cli {
	/// Path of the SQLite database file.
	#[arg(long, env = "FILBEAM_DATABASE_PATH", default_value = "filbeam.db")]
	pub database_path: String,

	/// Connection-pool size for the store.
	#[arg(long, default_value = "10")]
	pub database_pool_size: u32,

	/// How long shutdown waits for detached metering tasks to drain.
	#[arg(long, default_value = "30")]
	pub shutdown_grace_secs: u64,

	#[command(flatten)]
	pub gateway: GatewayConfig,

	#[command(flatten)]
	pub indexer: IndexerConfig,

	#[command(flatten)]
	pub reporter: ReporterConfig,

	#[command(flatten)]
	pub chain: ChainConfig,
}
