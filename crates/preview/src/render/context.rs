use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use xeno_worker::{WorkerId, panic_message};

use crate::engine::{EngineFactory, RenderEngine, RenderError};

/// Per-thread render state.
///
/// Each pool thread owns exactly one context, plus one more for in-process
/// sequential passes. The engine handle is built on first use and reused for
/// every later block rendered by the same context.
pub struct WorkerContext {
	worker: Option<WorkerId>,
	factory: Arc<dyn EngineFactory>,
	engine: Option<Box<dyn RenderEngine>>,
	renders: u64,
	engines_built: u64,
}

impl WorkerContext {
	/// `worker` is `None` for the caller-side context.
	pub(crate) fn new(worker: Option<WorkerId>, factory: Arc<dyn EngineFactory>) -> Self {
		Self {
			worker,
			factory,
			engine: None,
			renders: 0,
			engines_built: 0,
		}
	}

	pub fn worker(&self) -> Option<WorkerId> {
		self.worker
	}

	/// Blocks rendered through this context.
	pub fn renders(&self) -> u64 {
		self.renders
	}

	/// Engine handles built by this context; more than one means a handle was
	/// discarded after a panic.
	pub fn engines_built(&self) -> u64 {
		self.engines_built
	}

	/// Runs the engine on `source`, converting a panic into [`RenderError::Panicked`].
	///
	/// Building the handle is covered too. A handle that panicked, or a build
	/// that panicked, leaves the slot empty; the next call builds a fresh one.
	pub(crate) fn render(&mut self, source: &str) -> Result<String, RenderError> {
		self.renders += 1;
		let worker = self.worker.map(|w| w.0);
		let result = panic::catch_unwind(AssertUnwindSafe(|| {
			let engine = match &mut self.engine {
				Some(engine) => engine,
				slot @ None => {
					tracing::debug!(worker = ?worker, "preview.engine.create");
					let engine = self.factory.create();
					self.engines_built += 1;
					slot.insert(engine)
				}
			};
			engine.render(source)
		}));

		match result {
			Ok(result) => result,
			Err(payload) => {
				let message = panic_message(&*payload);
				tracing::error!(worker = ?worker, panic = %message, "preview.engine.panicked");
				self.engine = None;
				Err(RenderError::Panicked(message))
			}
		}
	}
}
