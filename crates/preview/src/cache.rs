//! Content-addressed LRU store of rendered block output.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::block::BlockId;

/// Default number of rendered blocks kept resident.
pub const DEFAULT_CACHE_SIZE: NonZeroUsize = NonZeroUsize::new(512).unwrap();

/// Snapshot of cache occupancy and effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
	pub size: usize,
	pub max_size: usize,
	pub hits: u64,
	pub misses: u64,
	pub evictions: u64,
	/// `hits / (hits + misses)`, or 0 before the first lookup.
	pub hit_rate: f64,
}

struct Inner {
	entries: LruCache<BlockId, Arc<str>>,
	/// Ids whose last render fell back. Bounded like `entries`.
	failed: LruCache<BlockId, ()>,
	hits: u64,
	misses: u64,
	evictions: u64,
}

/// Thread-safe, size-bounded map from block id to rendered HTML.
///
/// One mutex covers the map, recency order and counters. It is only held for
/// the map operation itself; rendering never happens under it. Displaced HTML
/// is dropped after the lock is released.
pub struct BlockCache {
	inner: Mutex<Inner>,
}

impl Default for BlockCache {
	fn default() -> Self {
		Self::new(DEFAULT_CACHE_SIZE)
	}
}

impl std::fmt::Debug for BlockCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BlockCache").field("stats", &self.stats()).finish()
	}
}

impl BlockCache {
	pub fn new(max_size: NonZeroUsize) -> Self {
		Self {
			inner: Mutex::new(Inner {
				entries: LruCache::new(max_size),
				failed: LruCache::new(max_size),
				hits: 0,
				misses: 0,
				evictions: 0,
			}),
		}
	}

	/// Looks up `id`, promoting it to most recently used on a hit.
	pub fn get(&self, id: &BlockId) -> Option<Arc<str>> {
		let mut inner = self.inner.lock();
		let found = inner.entries.get(id).cloned();
		match found {
			Some(_) => inner.hits += 1,
			None => inner.misses += 1,
		}
		found
	}

	/// Inserts or overwrites `id`, evicting the least recently used entry when full.
	pub fn put(&self, id: BlockId, html: Arc<str>) {
		let displaced = {
			let mut inner = self.inner.lock();
			inner.failed.pop(&id);
			let displaced = inner.entries.push(id, html);
			if matches!(&displaced, Some((old_id, _)) if *old_id != id) {
				inner.evictions += 1;
			}
			displaced
		};
		if let Some((evicted, _)) = displaced.filter(|(old_id, _)| *old_id != id) {
			tracing::trace!(block = ?evicted, "preview.cache.evict");
		}
	}

	/// Presence check that neither reorders entries nor counts as a lookup.
	pub fn contains(&self, id: &BlockId) -> bool {
		self.inner.lock().entries.contains(id)
	}

	/// Records that rendering `id` fell back, so speculative work can skip it.
	/// A later successful [`put`](Self::put) clears the mark.
	pub fn mark_failed(&self, id: BlockId) {
		self.inner.lock().failed.put(id, ());
	}

	/// Whether the last render of `id` fell back. Does not count as a lookup.
	pub fn has_failed(&self, id: &BlockId) -> bool {
		self.inner.lock().failed.contains(id)
	}

	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn max_size(&self) -> usize {
		self.inner.lock().entries.cap().get()
	}

	/// Changes the bound, evicting least recently used entries when shrinking.
	pub fn resize(&self, max_size: NonZeroUsize) {
		let mut inner = self.inner.lock();
		let before = inner.entries.len();
		inner.entries.resize(max_size);
		inner.failed.resize(max_size);
		let evicted = before - inner.entries.len();
		inner.evictions += evicted as u64;
		drop(inner);
		tracing::debug!(max_size = max_size.get(), evicted, "preview.cache.resize");
	}

	/// Drops every entry and failure mark, resets the counters and releases the
	/// backing storage.
	pub fn clear(&self) {
		let old = {
			let mut inner = self.inner.lock();
			let cap = inner.entries.cap();
			inner.hits = 0;
			inner.misses = 0;
			inner.evictions = 0;
			inner.failed.clear();
			std::mem::replace(&mut inner.entries, LruCache::new(cap))
		};
		let released = old.len();
		drop(old);
		tracing::debug!(released, "preview.cache.clear");
	}

	pub fn stats(&self) -> CacheStats {
		let inner = self.inner.lock();
		let lookups = inner.hits + inner.misses;
		CacheStats {
			size: inner.entries.len(),
			max_size: inner.entries.cap().get(),
			hits: inner.hits,
			misses: inner.misses,
			evictions: inner.evictions,
			hit_rate: if lookups == 0 { 0.0 } else { inner.hits as f64 / lookups as f64 },
		}
	}
}

#[cfg(test)]
mod tests;
