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

//! The streaming tee.
//!
//! An origin body is observed by two consumers without buffering the whole
//! stream: the primary branch goes back to the client, the shadow branch
//! counts every byte and captures the body for the cache. The shadow must
//! outlive the client — a disconnect stops the forwarding but never the
//! measurement, otherwise the egress accounting would undercount and the
//! cache would end up with torn entries.

use std::{
	io,
	time::Instant,
};

use bytes::{Bytes, BytesMut};
use futures::{channel::mpsc, SinkExt, Stream, StreamExt};

/// What the shadow branch saw once the origin stream ended.
#[derive(Clone, Debug, Default)]
pub struct Measurement {
	pub egress_bytes: i64,
	/// ms from fetch start to the first body byte.
	pub fetch_ttfb: Option<i64>,
	/// ms from fetch start to the last body byte.
	pub fetch_ttlb: Option<i64>,
	/// The full body, when capture was requested and the size cap held.
	pub body: Option<Bytes>,
	/// The origin stream ended cleanly.
	pub complete: bool,
}

/// Splits `upstream` into a client-facing stream and a measurement future.
///
/// The future must be polled to completion (it drives the forwarding); it
/// resolves to the [`Measurement`] once the origin body is exhausted.
/// `capture_limit` bounds body capture for the cache; `None` disables it.
pub fn metered_tee<S, E>(
	upstream: S,
	fetch_start: Instant,
	capture_limit: Option<usize>,
) -> (
	impl Stream<Item = Result<Bytes, io::Error>> + Send,
	impl std::future::Future<Output = Measurement> + Send,
)
where
	S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
	E: std::fmt::Display + Send,
{
	let (mut tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(16);

	let shadow = async move {
		let mut upstream = upstream;
		let mut measurement = Measurement::default();
		let mut captured = capture_limit.map(|_| BytesMut::new());
		let mut client_gone = false;

		while let Some(chunk) = upstream.next().await {
			match chunk {
				Ok(bytes) => {
					if measurement.fetch_ttfb.is_none() {
						measurement.fetch_ttfb = Some(fetch_start.elapsed().as_millis() as i64);
					}
					measurement.egress_bytes += bytes.len() as i64;
					if let (Some(buffer), Some(limit)) = (captured.as_mut(), capture_limit) {
						if buffer.len() + bytes.len() <= limit {
							buffer.extend_from_slice(&bytes);
						} else {
							// Too large for the cache; keep counting only.
							captured = None;
						}
					}
					if !client_gone && tx.send(Ok(bytes)).await.is_err() {
						client_gone = true;
					}
				}
				Err(e) => {
					log::warn!(
						target: "filbeam-gateway",
						"origin stream failed mid-body: {}",
						e,
					);
					if !client_gone {
						let _ = tx
							.send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())))
							.await;
					}
					measurement.fetch_ttlb = Some(fetch_start.elapsed().as_millis() as i64);
					return measurement;
				}
			}
		}

		measurement.fetch_ttlb = Some(fetch_start.elapsed().as_millis() as i64);
		measurement.complete = true;
		measurement.body = captured.map(BytesMut::freeze);
		measurement
	};

	(rx, shadow)
}
