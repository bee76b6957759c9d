//! Cache-aware block rendering on a bounded worker pool.
//!
//! A pass first resolves every block it can from the [`BlockCache`]. The
//! remaining misses are grouped by id, so duplicate blocks render once, then
//! either rendered in-process (small passes, parallelism disabled) or fanned out
//! to the pool as explicit jobs. Results come back tagged with their group slot
//! and are written into the blocks by index, so output order never depends on
//! completion order.
//!
//! Pool trouble never fails a pass. Jobs that cannot be submitted, or whose
//! results never arrive, are rendered in-process instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use xeno_worker::{TaskClass, WorkerPool, WorkerPoolCfg};

use crate::block::{Block, BlockId};
use crate::cache::BlockCache;
use crate::engine::{EngineFactory, fallback_fragment};
use crate::predict::{PrefetchGuard, PrefetchRequest};

mod context;
mod timing;

pub use context::WorkerContext;
use timing::RenderTimings;

/// Passes with fewer blocks than this render in-process.
pub const MIN_BLOCKS_FOR_PARALLEL: usize = 3;

/// Renderer construction parameters.
#[derive(Debug, Clone)]
pub struct RendererCfg {
	/// Pool threads.
	pub threads: usize,
	/// Whether large passes fan out to the pool at all.
	pub parallel: bool,
	pub min_blocks_for_parallel: usize,
	/// Capacity of the speculative lane.
	pub prefetch_queue: usize,
	/// A render this many times slower than the running average is logged.
	pub anomaly_factor: f64,
}

impl Default for RendererCfg {
	fn default() -> Self {
		Self {
			threads: WorkerPoolCfg::default_threads(),
			parallel: true,
			min_blocks_for_parallel: MIN_BLOCKS_FOR_PARALLEL,
			prefetch_queue: 64,
			anomaly_factor: 8.0,
		}
	}
}

/// Running renderer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
	/// Passes whose misses were rendered on the pool.
	pub parallel_passes: u64,
	/// Passes rendered in-process, including degraded ones.
	pub sequential_passes: u64,
	/// Parallel passes that fell back to in-process rendering.
	pub degraded_passes: u64,
	/// Blocks returned across all passes, hits included.
	pub total_blocks: u64,
	/// Render engine invocations.
	pub engine_renders: u64,
	/// Blocks replaced by a fallback fragment.
	pub fallbacks: u64,
	/// Speculative renders whose output reached the cache.
	pub prefetch_rendered: u64,
	/// Speculative requests dropped as stale, superseded, failed or rejected.
	pub prefetch_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
	parallel_passes: AtomicU64,
	sequential_passes: AtomicU64,
	degraded_passes: AtomicU64,
	total_blocks: AtomicU64,
	engine_renders: AtomicU64,
	fallbacks: AtomicU64,
	prefetch_rendered: AtomicU64,
	prefetch_dropped: AtomicU64,
}

impl Counters {
	fn bump(counter: &AtomicU64, by: u64) {
		counter.fetch_add(by, Ordering::Relaxed);
	}

	fn snapshot(&self) -> RenderStats {
		RenderStats {
			parallel_passes: self.parallel_passes.load(Ordering::Relaxed),
			sequential_passes: self.sequential_passes.load(Ordering::Relaxed),
			degraded_passes: self.degraded_passes.load(Ordering::Relaxed),
			total_blocks: self.total_blocks.load(Ordering::Relaxed),
			engine_renders: self.engine_renders.load(Ordering::Relaxed),
			fallbacks: self.fallbacks.load(Ordering::Relaxed),
			prefetch_rendered: self.prefetch_rendered.load(Ordering::Relaxed),
			prefetch_dropped: self.prefetch_dropped.load(Ordering::Relaxed),
		}
	}
}

/// What happened to a speculative request once a worker picked it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
	Rendered,
	/// The block changed after the prediction was made.
	Stale,
	/// The block was cached, or is known to fail, by the time the request ran.
	Superseded,
	/// The engine fell back; nothing was cached.
	Failed,
}

impl PrefetchOutcome {
	const fn as_str(self) -> &'static str {
		match self {
			Self::Rendered => "rendered",
			Self::Stale => "stale",
			Self::Superseded => "superseded",
			Self::Failed => "failed",
		}
	}
}

/// State reachable from pool jobs.
struct RenderShared {
	cache: Arc<BlockCache>,
	counters: Counters,
	timings: RenderTimings,
}

impl RenderShared {
	/// Runs the engine once. `Err` carries the fallback fragment; the id is
	/// marked failed. Nothing is cached here.
	fn render_uncached(&self, ctx: &mut WorkerContext, id: BlockId, source: &str) -> Result<Arc<str>, Arc<str>> {
		let started = Instant::now();
		let result = ctx.render(source);
		self.timings.observe(id, started.elapsed());
		Counters::bump(&self.counters.engine_renders, 1);

		result.map(Arc::from).map_err(|err| {
			Counters::bump(&self.counters.fallbacks, 1);
			self.cache.mark_failed(id);
			tracing::warn!(block = ?id, error = %err, "preview.render.fallback");
			Arc::from(fallback_fragment(source, &err))
		})
	}

	/// Renders one cache miss and stores the result. Failures yield an
	/// uncached fallback fragment.
	fn render_miss(&self, ctx: &mut WorkerContext, id: BlockId, source: &str) -> Arc<str> {
		match self.render_uncached(ctx, id, source) {
			Ok(html) => {
				self.cache.put(id, Arc::clone(&html));
				html
			}
			Err(fallback) => fallback,
		}
	}

	/// The guard is checked before the engine runs and again before the
	/// result is stored, so an edit during the render leaves no entry behind.
	fn run_prefetch(&self, ctx: &mut WorkerContext, request: &PrefetchRequest, guard: &dyn PrefetchGuard) -> PrefetchOutcome {
		let id = request.block_id;
		let outcome = if !guard.is_current(request) {
			PrefetchOutcome::Stale
		} else if self.cache.contains(&id) || self.cache.has_failed(&id) {
			PrefetchOutcome::Superseded
		} else {
			match self.render_uncached(ctx, id, &request.content) {
				Ok(html) if guard.is_current(request) => {
					self.cache.put(id, html);
					PrefetchOutcome::Rendered
				}
				Ok(_) => PrefetchOutcome::Stale,
				Err(_) => PrefetchOutcome::Failed,
			}
		};

		match outcome {
			PrefetchOutcome::Rendered => Counters::bump(&self.counters.prefetch_rendered, 1),
			_ => Counters::bump(&self.counters.prefetch_dropped, 1),
		}
		tracing::trace!(block = ?request.block_id, index = request.block_index, outcome = outcome.as_str(), "preview.prefetch");
		outcome
	}
}

/// Blocks of one pass that share an id and missed the cache.
struct MissGroup {
	id: BlockId,
	indices: Vec<usize>,
}

/// Renders blocks through the cache and a bounded worker pool.
pub struct ParallelRenderer {
	shared: Arc<RenderShared>,
	/// `None` when the pool could not be started; every pass is then sequential.
	pool: Option<WorkerPool<WorkerContext>>,
	local: Mutex<WorkerContext>,
	parallel: AtomicBool,
	min_blocks_for_parallel: usize,
}

impl std::fmt::Debug for ParallelRenderer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ParallelRenderer")
			.field("pool", &self.pool)
			.field("parallel", &self.is_parallel_enabled())
			.field("min_blocks_for_parallel", &self.min_blocks_for_parallel)
			.field("stats", &self.stats())
			.finish()
	}
}

impl ParallelRenderer {
	pub fn new(cfg: RendererCfg, cache: Arc<BlockCache>, factory: Arc<dyn EngineFactory>) -> Self {
		let pool_factory = Arc::clone(&factory);
		let pool_cfg = WorkerPoolCfg {
			threads: cfg.threads,
			name: "xeno-preview".to_string(),
			speculative_capacity: cfg.prefetch_queue,
			..Default::default()
		};
		let pool = match WorkerPool::new(pool_cfg, move |id| WorkerContext::new(Some(id), Arc::clone(&pool_factory))) {
			Ok(pool) => Some(pool),
			Err(err) => {
				tracing::warn!(error = %err, "preview.render.pool_unavailable");
				None
			}
		};

		Self {
			shared: Arc::new(RenderShared {
				cache,
				counters: Counters::default(),
				timings: RenderTimings::new(cfg.anomaly_factor),
			}),
			pool,
			local: Mutex::new(WorkerContext::new(None, factory)),
			parallel: AtomicBool::new(cfg.parallel),
			min_blocks_for_parallel: cfg.min_blocks_for_parallel,
		}
	}

	pub fn cache(&self) -> &Arc<BlockCache> {
		&self.shared.cache
	}

	pub fn set_parallel(&self, enabled: bool) {
		self.parallel.store(enabled, Ordering::Relaxed);
	}

	pub fn is_parallel_enabled(&self) -> bool {
		self.parallel.load(Ordering::Relaxed)
	}

	/// Pool threads, or 0 when no pool could be started.
	pub fn threads(&self) -> usize {
		self.pool.as_ref().map_or(0, WorkerPool::threads)
	}

	pub fn stats(&self) -> RenderStats {
		self.shared.counters.snapshot()
	}

	/// Moving average of engine render time, once anything has rendered.
	pub fn average_render_time(&self) -> Option<Duration> {
		self.shared.timings.average()
	}

	/// Blocks until no explicit or speculative work is queued or running.
	pub fn wait_idle(&self) {
		if let Some(pool) = &self.pool {
			pool.wait_idle();
		}
	}

	/// Fills `rendered_html` for every block and returns them in input order.
	pub fn render(&self, mut blocks: Vec<Block>) -> Vec<Block> {
		let total = blocks.len();
		let groups = self.resolve_hits(&mut blocks);
		let mut outputs: Vec<Option<Arc<str>>> = vec![None; groups.len()];

		let pool = self
			.pool
			.as_ref()
			.filter(|_| total >= self.min_blocks_for_parallel && self.is_parallel_enabled());
		let mut degraded = false;
		if let Some(pool) = pool
			&& !groups.is_empty()
		{
			degraded = !self.dispatch(pool, &blocks, &groups, &mut outputs);
		}

		if outputs.iter().any(Option::is_none) {
			let mut ctx = self.local.lock();
			for (group, out) in groups.iter().zip(outputs.iter_mut()) {
				if out.is_none() {
					let source = &blocks[group.indices[0]].content;
					*out = Some(self.shared.render_miss(&mut ctx, group.id, source));
				}
			}
		}

		for (group, html) in groups.iter().zip(outputs) {
			if let Some(html) = html {
				for &index in &group.indices {
					blocks[index].rendered_html = Some(Arc::clone(&html));
				}
			}
		}

		let counters = &self.shared.counters;
		if pool.is_some() && !degraded {
			Counters::bump(&counters.parallel_passes, 1);
		} else {
			Counters::bump(&counters.sequential_passes, 1);
		}
		if degraded {
			Counters::bump(&counters.degraded_passes, 1);
		}
		Counters::bump(&counters.total_blocks, total as u64);

		tracing::trace!(blocks = total, misses = groups.len(), parallel = pool.is_some(), degraded, "preview.render.pass");
		blocks
	}

	/// Queues a speculative render on the low-priority lane.
	///
	/// Speculative work only ever runs on pool threads; without a pool, or with
	/// a full lane, the request is dropped and `false` returned.
	pub fn prefetch(&self, request: PrefetchRequest, guard: Arc<dyn PrefetchGuard>) -> bool {
		let Some(pool) = &self.pool else {
			Counters::bump(&self.shared.counters.prefetch_dropped, 1);
			return false;
		};

		let block_id = request.block_id;
		let shared = Arc::clone(&self.shared);
		let job = move |ctx: &mut WorkerContext| {
			shared.run_prefetch(ctx, &request, &*guard);
		};
		match pool.submit(TaskClass::Speculative, job) {
			Ok(()) => true,
			Err(err) => {
				Counters::bump(&self.shared.counters.prefetch_dropped, 1);
				tracing::trace!(block = ?block_id, error = %err, "preview.prefetch.rejected");
				false
			}
		}
	}

	/// Serves hits from the cache and groups the misses by id.
	fn resolve_hits(&self, blocks: &mut [Block]) -> Vec<MissGroup> {
		let mut groups: Vec<MissGroup> = Vec::new();
		let mut slots: FxHashMap<BlockId, usize> = FxHashMap::default();

		for (index, block) in blocks.iter_mut().enumerate() {
			if let Some(&slot) = slots.get(&block.id) {
				groups[slot].indices.push(index);
				continue;
			}
			match self.shared.cache.get(&block.id) {
				Some(html) => block.rendered_html = Some(html),
				None => {
					slots.insert(block.id, groups.len());
					groups.push(MissGroup {
						id: block.id,
						indices: vec![index],
					});
				}
			}
		}
		groups
	}

	/// Fans the misses out to the pool and collects the results by slot.
	///
	/// Returns false if any group could not be submitted or its result was lost;
	/// those slots are left `None` for the caller to render in-process.
	fn dispatch(&self, pool: &WorkerPool<WorkerContext>, blocks: &[Block], groups: &[MissGroup], outputs: &mut [Option<Arc<str>>]) -> bool {
		let (tx, rx) = crossbeam_channel::unbounded::<(usize, Arc<str>)>();
		let mut healthy = true;
		let mut submitted = 0;

		for (slot, group) in groups.iter().enumerate() {
			let tx = tx.clone();
			let shared = Arc::clone(&self.shared);
			let id = group.id;
			let source = Arc::clone(&blocks[group.indices[0]].content);
			let job = move |ctx: &mut WorkerContext| {
				let html = shared.render_miss(ctx, id, &source);
				let _ = tx.send((slot, html));
			};
			if let Err(err) = pool.submit(TaskClass::Explicit, job) {
				tracing::warn!(error = %err, submitted, remaining = groups.len() - slot, "preview.render.degraded");
				healthy = false;
				break;
			}
			submitted += 1;
		}
		drop(tx);

		for _ in 0..submitted {
			match rx.recv() {
				Ok((slot, html)) => outputs[slot] = Some(html),
				Err(_) => {
					tracing::warn!(submitted, "preview.render.results_lost");
					healthy = false;
					break;
				}
			}
		}
		healthy
	}
}
