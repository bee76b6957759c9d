//! Speculative cache warming from cursor and edit history.
//!
//! The scheduler never renders anything itself. It turns recent positions into
//! a window of block indices through a [`PredictionPolicy`], filters out blocks
//! that are already cached or already queued, and hands the rest to a
//! [`PrefetchSink`] as low-priority [`PrefetchRequest`]s.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use xeno_worker::TaskClass;

use crate::block::BlockId;
use crate::cache::BlockCache;
use crate::document::DocumentIndex;

mod policy;

pub use policy::{PredictionPolicy, TrendPolicy};

/// Default number of remembered cursor/edit events.
pub const DEFAULT_HISTORY_LEN: usize = 32;
/// Default number of requests queued per prediction.
pub const DEFAULT_MAX_PREFETCH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
	Cursor,
	Edit,
}

/// A cursor move or text edit at a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditEvent {
	pub line: usize,
	pub at: Instant,
	pub kind: EditKind,
}

type PendingSet = Arc<Mutex<FxHashSet<BlockId>>>;

/// Marks a block id as queued for as long as its request is alive.
///
/// Dropped when the request finishes, is discarded, or is rejected, so the
/// pending set never outlives the work it describes.
#[derive(Debug)]
struct PendingTicket {
	pending: PendingSet,
	id: BlockId,
}

impl PendingTicket {
	/// Returns `None` if the id is already queued.
	fn claim(pending: &PendingSet, id: BlockId) -> Option<Self> {
		pending.lock().insert(id).then(|| Self {
			pending: Arc::clone(pending),
			id,
		})
	}
}

impl Drop for PendingTicket {
	fn drop(&mut self) {
		self.pending.lock().remove(&self.id);
	}
}

/// A speculative render of one block, as predicted.
#[derive(Debug)]
pub struct PrefetchRequest {
	pub block_id: BlockId,
	pub block_index: usize,
	/// Block text at prediction time.
	pub content: Arc<str>,
	/// Block generation at prediction time; see [`DocumentIndex`].
	pub generation: u64,
	ticket: Option<PendingTicket>,
}

impl PrefetchRequest {
	pub fn new(block_id: BlockId, block_index: usize, content: Arc<str>, generation: u64) -> Self {
		Self {
			block_id,
			block_index,
			content,
			generation,
			ticket: None,
		}
	}

	/// Prefetches always run on the speculative lane.
	pub const fn priority(&self) -> TaskClass {
		TaskClass::Speculative
	}
}

/// Decides, right before rendering, whether a request still matches the document.
pub trait PrefetchGuard: Send + Sync {
	fn is_current(&self, request: &PrefetchRequest) -> bool;
}

/// Accepts speculative requests for execution.
pub trait PrefetchSink: Send + Sync {
	/// Returns false if the request was rejected; it is then dropped.
	fn enqueue(&self, request: PrefetchRequest) -> bool;
}

#[derive(Debug)]
struct History {
	events: VecDeque<EditEvent>,
	cursor: Option<usize>,
	cap: usize,
}

impl History {
	fn push(&mut self, line: usize, kind: EditKind) {
		if self.events.len() == self.cap {
			self.events.pop_front();
		}
		self.events.push_back(EditEvent {
			line,
			at: Instant::now(),
			kind,
		});
	}
}

/// Scheduler construction parameters.
#[derive(Debug, Clone)]
pub struct SchedulerCfg {
	pub enabled: bool,
	pub history_len: usize,
	pub max_prefetch: usize,
}

impl Default for SchedulerCfg {
	fn default() -> Self {
		Self {
			enabled: true,
			history_len: DEFAULT_HISTORY_LEN,
			max_prefetch: DEFAULT_MAX_PREFETCH,
		}
	}
}

/// Predicts upcoming blocks and queues speculative renders for them.
pub struct PredictiveScheduler {
	enabled: AtomicBool,
	history: Mutex<History>,
	policy: Box<dyn PredictionPolicy>,
	cache: Arc<BlockCache>,
	document: Arc<DocumentIndex>,
	sink: Arc<dyn PrefetchSink>,
	pending: PendingSet,
	max_prefetch: usize,
}

impl std::fmt::Debug for PredictiveScheduler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PredictiveScheduler")
			.field("enabled", &self.is_enabled())
			.field("history", &self.history.lock().events.len())
			.field("pending", &self.pending_count())
			.field("max_prefetch", &self.max_prefetch)
			.finish()
	}
}

impl PredictiveScheduler {
	pub fn new(cfg: SchedulerCfg, cache: Arc<BlockCache>, document: Arc<DocumentIndex>, sink: Arc<dyn PrefetchSink>) -> Self {
		Self::with_policy(cfg, Box::new(TrendPolicy::default()), cache, document, sink)
	}

	pub fn with_policy(
		cfg: SchedulerCfg,
		policy: Box<dyn PredictionPolicy>,
		cache: Arc<BlockCache>,
		document: Arc<DocumentIndex>,
		sink: Arc<dyn PrefetchSink>,
	) -> Self {
		let cap = cfg.history_len.max(1);
		Self {
			enabled: AtomicBool::new(cfg.enabled),
			history: Mutex::new(History {
				events: VecDeque::with_capacity(cap),
				cursor: None,
				cap,
			}),
			policy,
			cache,
			document,
			sink,
			pending: Arc::new(Mutex::new(FxHashSet::default())),
			max_prefetch: cfg.max_prefetch,
		}
	}

	/// Enables or disables recording and prefetching. History and cache survive.
	pub fn enable(&self, enabled: bool) {
		self.enabled.store(enabled, Ordering::Relaxed);
		tracing::debug!(enabled, "preview.predict.toggle");
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled.load(Ordering::Relaxed)
	}

	pub fn record_edit(&self, line: usize) {
		if !self.is_enabled() {
			return;
		}
		self.history.lock().push(line, EditKind::Edit);
	}

	pub fn update_cursor_position(&self, line: usize) {
		if !self.is_enabled() {
			return;
		}
		let mut history = self.history.lock();
		history.cursor = Some(line);
		history.push(line, EditKind::Cursor);
	}

	pub fn cursor(&self) -> Option<usize> {
		self.history.lock().cursor
	}

	/// Oldest-first copy of the remembered events.
	pub fn history(&self) -> Vec<EditEvent> {
		self.history.lock().events.iter().copied().collect()
	}

	/// Requests queued and not yet finished.
	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}

	/// Predicts a window around `current_block` and queues renders for the
	/// blocks in it that are not cached, not queued, and did not fail last
	/// time. Returns how many were queued.
	pub fn request_prediction(&self, total_blocks: usize, current_block: usize) -> usize {
		if !self.is_enabled() {
			return 0;
		}
		let total_blocks = total_blocks.min(self.document.len());
		if total_blocks == 0 {
			return 0;
		}

		let lines: Vec<usize> = self.history.lock().events.iter().map(|e| e.line).collect();
		let positions: Vec<usize> = lines.into_iter().filter_map(|line| self.document.block_for_line(line)).collect();
		let window = self.policy.predict(&positions, current_block, total_blocks);

		let mut queued = 0;
		for index in window {
			if queued >= self.max_prefetch {
				break;
			}
			let Some(block) = self.document.get(index) else {
				continue;
			};
			if self.cache.contains(&block.id) || self.cache.has_failed(&block.id) {
				continue;
			}
			let Some(ticket) = PendingTicket::claim(&self.pending, block.id) else {
				continue;
			};

			let request = PrefetchRequest {
				block_id: block.id,
				block_index: index,
				content: block.content,
				generation: block.generation,
				ticket: Some(ticket),
			};
			if !self.sink.enqueue(request) {
				// The lane is full; later indices would be rejected too.
				break;
			}
			queued += 1;
		}

		tracing::trace!(current_block, total_blocks, queued, "preview.predict.request");
		queued
	}
}
