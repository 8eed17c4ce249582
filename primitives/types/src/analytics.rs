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

//! Analytics data points. The storage backend is an external collaborator;
//! services write points through [`AnalyticsSink`] and the default sink
//! renders them as structured log lines.

use async_trait::async_trait;

/// A named measurement with a JSON field set.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
	async fn write_point(&self, measurement: &str, fields: serde_json::Value);
}

/// Writes points under the `filbeam-analytics` log target.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AnalyticsSink for LogSink {
	async fn write_point(&self, measurement: &str, fields: serde_json::Value) {
		log::info!(
			target: "filbeam-analytics",
			"{} {}",
			measurement,
			fields,
		);
	}
}
