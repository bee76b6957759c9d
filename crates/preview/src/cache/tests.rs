use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use super::*;

fn id(n: u128) -> BlockId {
	BlockId::from_u128(n)
}

fn html(s: &str) -> Arc<str> {
	Arc::from(s)
}

fn cache(max: usize) -> BlockCache {
	BlockCache::new(NonZeroUsize::new(max).unwrap())
}

#[test]
fn get_counts_hits_and_misses() {
	let cache = cache(4);
	assert_eq!(cache.get(&id(1)), None);
	cache.put(id(1), html("<p>1</p>"));
	assert_eq!(cache.get(&id(1)).as_deref(), Some("<p>1</p>"));
	assert_eq!(cache.get(&id(1)).as_deref(), Some("<p>1</p>"));

	let stats = cache.stats();
	assert_eq!((stats.size, stats.hits, stats.misses), (1, 2, 1));
	assert!((stats.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
}

#[test]
fn hit_rate_is_zero_before_any_lookup() {
	assert_eq!(cache(2).stats().hit_rate, 0.0);
}

#[test]
fn put_overwrites_without_eviction() {
	let cache = cache(2);
	cache.put(id(1), html("old"));
	cache.put(id(1), html("new"));
	assert_eq!(cache.len(), 1);
	assert_eq!(cache.get(&id(1)).as_deref(), Some("new"));
	assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn evicts_least_recently_accessed() {
	let cache = cache(3);
	cache.put(id(1), html("1"));
	cache.put(id(2), html("2"));
	cache.put(id(3), html("3"));

	// Touch 1 so that 2 becomes the oldest.
	assert!(cache.get(&id(1)).is_some());
	cache.put(id(4), html("4"));

	assert!(!cache.contains(&id(2)));
	assert!(cache.contains(&id(1)));
	assert!(cache.contains(&id(3)));
	assert!(cache.contains(&id(4)));

	// Re-putting 3 refreshes it; 1 is now the oldest.
	cache.put(id(3), html("3'"));
	cache.put(id(5), html("5"));
	assert!(!cache.contains(&id(1)));
	assert_eq!(cache.stats().evictions, 2);
}

#[test]
fn contains_does_not_refresh_recency() {
	let cache = cache(2);
	cache.put(id(1), html("1"));
	cache.put(id(2), html("2"));
	assert!(cache.contains(&id(1)));
	cache.put(id(3), html("3"));
	assert!(!cache.contains(&id(1)));
	assert_eq!(cache.stats().hits + cache.stats().misses, 0);
}

#[test]
fn size_never_exceeds_bound() {
	let cache = cache(8);
	for n in 0..100 {
		cache.put(id(n), html("x"));
		assert!(cache.len() <= 8);
	}
	assert_eq!(cache.len(), 8);
	assert_eq!(cache.max_size(), 8);
	// The survivors are the eight most recent puts.
	assert!((92..100).all(|n| cache.contains(&id(n))));
}

#[test]
fn clear_resets_entries_and_counters() {
	let cache = cache(4);
	cache.put(id(1), html("1"));
	let _ = cache.get(&id(1));
	let _ = cache.get(&id(2));
	cache.clear();

	let stats = cache.stats();
	assert_eq!((stats.size, stats.hits, stats.misses, stats.evictions), (0, 0, 0, 0));
	assert_eq!(stats.max_size, 4);
	assert!(cache.is_empty());
}

#[test]
fn shrinking_evicts_oldest() {
	let cache = cache(4);
	for n in 0..4 {
		cache.put(id(n), html("x"));
	}
	cache.resize(NonZeroUsize::new(2).unwrap());
	assert_eq!(cache.len(), 2);
	assert!(cache.contains(&id(2)) && cache.contains(&id(3)));
	assert_eq!(cache.stats().evictions, 2);
}

#[test]
fn concurrent_access_keeps_bound() {
	let cache = Arc::new(cache(16));
	let handles: Vec<_> = (0..4)
		.map(|t| {
			let cache = Arc::clone(&cache);
			thread::spawn(move || {
				for n in 0..200 {
					let key = id((t * 1000 + n % 32) as u128);
					if cache.get(&key).is_none() {
						cache.put(key, html("x"));
					}
				}
			})
		})
		.collect();
	for handle in handles {
		handle.join().unwrap();
	}

	let stats = cache.stats();
	assert!(stats.size <= 16);
	assert_eq!(stats.hits + stats.misses, 800);
}

#[test]
fn failure_marks_clear_on_success_and_clear() {
	let cache = cache(4);
	cache.mark_failed(id(1));
	cache.mark_failed(id(2));
	assert!(cache.has_failed(&id(1)));
	assert!(!cache.contains(&id(1)));

	cache.put(id(1), html("<p>fixed</p>"));
	assert!(!cache.has_failed(&id(1)));
	assert!(cache.has_failed(&id(2)));

	cache.clear();
	assert!(!cache.has_failed(&id(2)));
	assert_eq!(cache.stats().hits + cache.stats().misses, 0);
}

#[test]
fn failure_marks_are_bounded() {
	let cache = cache(2);
	for n in 1..=3 {
		cache.mark_failed(id(n));
	}
	assert!(!cache.has_failed(&id(1)));
	assert!(cache.has_failed(&id(3)));
}
