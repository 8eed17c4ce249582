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

//! The process-wide origin cache.
//!
//! Keyed by retrieval URL plus the request variant (the `Range` header).
//! Concurrent writers are safe: all writes for a key carry an identical
//! body, so last-write-wins is harmless. Eviction policy is plain LRU with
//! a TTL check on read.

use std::{
	num::NonZeroUsize,
	time::{Duration, Instant},
};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

/// Cache key: `(retrieval_url, range_variant)`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
	pub url: String,
	pub range: Option<String>,
}

/// A cached origin response. Headers are reduced to the ones the gateway
/// forwards; `Cache-Control` is rewritten on insertion.
#[derive(Clone, Debug)]
pub struct CachedResponse {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Bytes,
	stored_at: Instant,
}

pub struct OriginCache {
	entries: Mutex<LruCache<CacheKey, CachedResponse>>,
	ttl: Duration,
}

impl OriginCache {
	pub fn new(capacity: usize, ttl: Duration) -> Self {
		let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero; qed");
		OriginCache {
			entries: Mutex::new(LruCache::new(capacity)),
			ttl,
		}
	}

	pub fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
		let mut entries = self.entries.lock();
		match entries.get(key) {
			Some(entry) if entry.stored_at.elapsed() <= self.ttl => Some(entry.clone()),
			Some(_) => {
				entries.pop(key);
				None
			}
			None => None,
		}
	}

	pub fn insert(
		&self,
		key: CacheKey,
		status: u16,
		headers: Vec<(String, String)>,
		body: Bytes,
	) {
		self.entries.lock().put(
			key,
			CachedResponse {
				status,
				headers,
				body,
				stored_at: Instant::now(),
			},
		);
	}
}
