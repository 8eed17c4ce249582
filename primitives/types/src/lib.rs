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

//! Shared primitive types for the FilBeam CDN and accounting services.

#![warn(unused_crate_dependencies)]

pub mod address;
pub mod analytics;
pub mod epoch;
pub mod piece;
pub mod queue;
pub mod quota;

pub use address::PayerAddress;
pub use analytics::{AnalyticsSink, LogSink};
pub use epoch::{epoch_to_timestamp_ms, now_ms, EPOCH_DURATION_MS, MAINNET_GENESIS_MS};
pub use piece::PieceCid;
pub use queue::TxQueueMessage;
pub use quota::{calculate_egress_quota, BYTES_PER_TIB};
