use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::TaskClass;
use crate::panic::panic_message;

/// Hard ceiling on pool threads regardless of detected parallelism.
pub const MAX_WORKERS: usize = 8;

type Job<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;
type ContextInit<C> = Arc<dyn Fn(WorkerId) -> C + Send + Sync + 'static>;

/// Index of a pool thread, stable for the lifetime of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

/// Reasons a pool refuses work.
#[derive(Debug, Error)]
pub enum PoolError {
	/// The pool was shut down; no further jobs are accepted.
	#[error("worker pool is shut down")]
	ShutDown,
	/// The lane for this class already holds `capacity` queued jobs.
	#[error("{} lane is full ({capacity} queued)", class.as_str())]
	LaneFull { class: TaskClass, capacity: usize },
	/// A worker thread could not be started.
	#[error("failed to spawn worker thread: {0}")]
	Spawn(#[from] std::io::Error),
}

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct WorkerPoolCfg {
	/// Number of worker threads. Clamped to `1..=MAX_WORKERS`.
	pub threads: usize,
	/// Thread name prefix; threads are named `{name}-{index}`.
	pub name: String,
	/// Maximum queued explicit jobs.
	pub explicit_capacity: usize,
	/// Maximum queued speculative jobs.
	pub speculative_capacity: usize,
}

impl Default for WorkerPoolCfg {
	fn default() -> Self {
		Self {
			threads: Self::default_threads(),
			name: "xeno-worker".to_string(),
			explicit_capacity: 4096,
			speculative_capacity: 64,
		}
	}
}

impl WorkerPoolCfg {
	/// Detected hardware parallelism, capped at [`MAX_WORKERS`].
	pub fn default_threads() -> usize {
		thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1).min(MAX_WORKERS)
	}
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSnapshot {
	pub threads: usize,
	pub explicit_queued: usize,
	pub speculative_queued: usize,
	pub running: usize,
}

struct Queue<C> {
	explicit: VecDeque<Job<C>>,
	speculative: VecDeque<Job<C>>,
	running: usize,
	shutdown: bool,
}

impl<C> Queue<C> {
	fn is_drained(&self) -> bool {
		self.running == 0 && self.explicit.is_empty() && self.speculative.is_empty()
	}

	fn lane(&mut self, class: TaskClass) -> &mut VecDeque<Job<C>> {
		match class {
			TaskClass::Explicit => &mut self.explicit,
			TaskClass::Speculative => &mut self.speculative,
		}
	}
}

struct Shared<C> {
	queue: Mutex<Queue<C>>,
	work_ready: Condvar,
	idle: Condvar,
}

impl<C> Shared<C> {
	/// Blocks until a job is available or the pool shuts down.
	fn next_job(&self) -> Option<(TaskClass, Job<C>)> {
		let mut q = self.queue.lock();
		loop {
			if q.shutdown {
				return None;
			}
			if let Some(job) = q.explicit.pop_front() {
				q.running += 1;
				return Some((TaskClass::Explicit, job));
			}
			if let Some(job) = q.speculative.pop_front() {
				q.running += 1;
				return Some((TaskClass::Speculative, job));
			}
			self.work_ready.wait(&mut q);
		}
	}

	fn finish_job(&self) {
		let mut q = self.queue.lock();
		q.running -= 1;
		if q.is_drained() {
			self.idle.notify_all();
		}
	}
}

/// Fixed-size pool of OS threads, each owning one context value `C`.
///
/// The context is built on the worker thread itself by the init closure, so
/// `C` does not need to be `Send`. Jobs receive `&mut C` and must be `Send`.
pub struct WorkerPool<C: 'static> {
	shared: Arc<Shared<C>>,
	handles: Mutex<Vec<JoinHandle<()>>>,
	cfg: WorkerPoolCfg,
}

impl<C: 'static> std::fmt::Debug for WorkerPool<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkerPool").field("cfg", &self.cfg).field("snapshot", &self.snapshot()).finish()
	}
}

impl<C: 'static> WorkerPool<C> {
	/// Starts `cfg.threads` workers, each calling `init` once to build its context.
	pub fn new<F>(mut cfg: WorkerPoolCfg, init: F) -> Result<Self, PoolError>
	where
		F: Fn(WorkerId) -> C + Send + Sync + 'static,
	{
		cfg.threads = cfg.threads.clamp(1, MAX_WORKERS);
		cfg.explicit_capacity = cfg.explicit_capacity.max(1);

		let pool = Self {
			shared: Arc::new(Shared {
				queue: Mutex::new(Queue {
					explicit: VecDeque::new(),
					speculative: VecDeque::new(),
					running: 0,
					shutdown: false,
				}),
				work_ready: Condvar::new(),
				idle: Condvar::new(),
			}),
			handles: Mutex::new(Vec::with_capacity(cfg.threads)),
			cfg,
		};

		let init: ContextInit<C> = Arc::new(init);
		for index in 0..pool.cfg.threads {
			let shared = Arc::clone(&pool.shared);
			let init = Arc::clone(&init);
			let id = WorkerId(index);
			// A spawn failure drops `pool`, which stops the threads started so far.
			let handle = thread::Builder::new()
				.name(format!("{}-{index}", pool.cfg.name))
				.spawn(move || run_worker(shared, id, init))?;
			pool.handles.lock().push(handle);
		}

		tracing::debug!(pool = %pool.cfg.name, threads = pool.cfg.threads, "worker.pool.start");
		Ok(pool)
	}

	/// Number of worker threads.
	pub fn threads(&self) -> usize {
		self.cfg.threads
	}

	/// Queues a job on the lane for `class`.
	pub fn submit<F>(&self, class: TaskClass, job: F) -> Result<(), PoolError>
	where
		F: FnOnce(&mut C) + Send + 'static,
	{
		let capacity = match class {
			TaskClass::Explicit => self.cfg.explicit_capacity,
			TaskClass::Speculative => self.cfg.speculative_capacity,
		};

		let queued = {
			let mut q = self.shared.queue.lock();
			if q.shutdown {
				return Err(PoolError::ShutDown);
			}
			let lane = q.lane(class);
			if lane.len() >= capacity {
				return Err(PoolError::LaneFull { class, capacity });
			}
			lane.push_back(Box::new(job));
			lane.len()
		};

		tracing::trace!(worker_class = class.as_str(), queued, "worker.submit");
		self.shared.work_ready.notify_one();
		Ok(())
	}

	/// Blocks until both lanes are empty and no job is running.
	///
	/// Returns immediately once the pool is shut down.
	pub fn wait_idle(&self) {
		let mut q = self.shared.queue.lock();
		while !q.shutdown && !q.is_drained() {
			self.shared.idle.wait(&mut q);
		}
	}

	pub fn snapshot(&self) -> PoolSnapshot {
		let q = self.shared.queue.lock();
		PoolSnapshot {
			threads: self.cfg.threads,
			explicit_queued: q.explicit.len(),
			speculative_queued: q.speculative.len(),
			running: q.running,
		}
	}

	pub fn is_shut_down(&self) -> bool {
		self.shared.queue.lock().shutdown
	}

	/// Stops accepting work, drops every queued job, and joins the workers.
	///
	/// Jobs already running are allowed to finish. Dropped jobs release
	/// whatever they captured, which is how result collectors observe the
	/// shutdown.
	pub fn shutdown(&self) {
		let dropped = {
			let mut q = self.shared.queue.lock();
			if q.shutdown {
				None
			} else {
				q.shutdown = true;
				let explicit = std::mem::take(&mut q.explicit);
				let speculative = std::mem::take(&mut q.speculative);
				Some((explicit, speculative))
			}
		};
		let Some((explicit, speculative)) = dropped else {
			return;
		};

		tracing::debug!(
			pool = %self.cfg.name,
			dropped_explicit = explicit.len(),
			dropped_speculative = speculative.len(),
			"worker.pool.shutdown"
		);
		drop(explicit);
		drop(speculative);

		self.shared.work_ready.notify_all();
		self.shared.idle.notify_all();

		let current = thread::current().id();
		let handles = std::mem::take(&mut *self.handles.lock());
		for handle in handles {
			// A job shutting down its own pool must not join itself.
			if handle.thread().id() == current {
				continue;
			}
			if handle.join().is_err() {
				tracing::error!(pool = %self.cfg.name, "worker.pool.join_failed");
			}
		}
	}
}

impl<C: 'static> Drop for WorkerPool<C> {
	fn drop(&mut self) {
		self.shutdown();
	}
}

fn run_worker<C>(shared: Arc<Shared<C>>, id: WorkerId, init: ContextInit<C>) {
	let mut ctx = init(id);
	tracing::trace!(worker = id.0, "worker.thread.start");

	while let Some((class, job)) = shared.next_job() {
		if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&mut ctx))) {
			tracing::error!(
				worker = id.0,
				worker_class = class.as_str(),
				panic = %panic_message(&*payload),
				"worker.job.panicked"
			);
		}
		shared.finish_job();
	}

	tracing::trace!(worker = id.0, "worker.thread.stop");
}
