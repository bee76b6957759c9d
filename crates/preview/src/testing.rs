//! Scriptable render engine for tests.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::engine::{EngineFactory, RenderEngine, RenderError};

#[derive(Default)]
struct MockState {
	calls: Mutex<Vec<String>>,
	delays: Mutex<Vec<(String, Duration)>>,
	failures: Mutex<Vec<String>>,
	panics: Mutex<Vec<String>>,
	gates: Mutex<Vec<(String, Receiver<()>)>>,
	engines: Mutex<usize>,
}

/// Engine factory whose handles render `<p>{source}</p>` and record every call.
///
/// Behaviour is keyed on substrings of the block source: a matching block can
/// be delayed, failed, panicked, or held until a gate is released.
#[derive(Clone, Default)]
pub(crate) struct MockEngine {
	state: Arc<MockState>,
}

impl MockEngine {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub(crate) fn factory(&self) -> Arc<dyn EngineFactory> {
		let state = Arc::clone(&self.state);
		Arc::new(move || {
			*state.engines.lock() += 1;
			MockHandle {
				state: Arc::clone(&state),
			}
		})
	}

	pub(crate) fn delay_on(&self, needle: &str, delay: Duration) {
		self.state.delays.lock().push((needle.to_string(), delay));
	}

	pub(crate) fn fail_on(&self, needle: &str) {
		self.state.failures.lock().push(needle.to_string());
	}

	pub(crate) fn panic_on(&self, needle: &str) {
		self.state.panics.lock().push(needle.to_string());
	}

	/// The first block containing `needle` blocks its worker until the returned
	/// sender fires (or is dropped).
	pub(crate) fn gate_on(&self, needle: &str) -> Sender<()> {
		let (tx, rx) = bounded(1);
		self.state.gates.lock().push((needle.to_string(), rx));
		tx
	}

	pub(crate) fn calls(&self) -> Vec<String> {
		self.state.calls.lock().clone()
	}

	pub(crate) fn call_count(&self) -> usize {
		self.state.calls.lock().len()
	}

	pub(crate) fn calls_containing(&self, needle: &str) -> usize {
		self.state.calls.lock().iter().filter(|c| c.contains(needle)).count()
	}

	/// Engine handles built so far.
	pub(crate) fn engines(&self) -> usize {
		*self.state.engines.lock()
	}
}

struct MockHandle {
	state: Arc<MockState>,
}

impl RenderEngine for MockHandle {
	fn render(&mut self, source: &str) -> Result<String, RenderError> {
		self.state.calls.lock().push(source.to_string());

		let gate = {
			let mut gates = self.state.gates.lock();
			let pos = gates.iter().position(|(needle, _)| source.contains(needle.as_str()));
			pos.map(|pos| gates.remove(pos).1)
		};
		if let Some(gate) = gate {
			let _ = gate.recv_timeout(Duration::from_secs(10));
		}

		let delay = self.state.delays.lock().iter().find(|(needle, _)| source.contains(needle.as_str())).map(|(_, d)| *d);
		if let Some(delay) = delay {
			std::thread::sleep(delay);
		}

		if self.state.panics.lock().iter().any(|needle| source.contains(needle.as_str())) {
			panic!("mock engine panic on {source:?}");
		}
		if self.state.failures.lock().iter().any(|needle| source.contains(needle.as_str())) {
			return Err(RenderError::Engine(format!("mock failure on {}", source.trim_end())));
		}
		Ok(format!("<p>{source}</p>"))
	}
}

/// Installs a test subscriber so `tracing` output shows up with `--nocapture`.
pub(crate) fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::TRACE).try_init();
}

/// Document with `n` level-1 sections, each with a distinct body line.
pub(crate) fn sections(n: usize) -> String {
	let mut text = String::new();
	for i in 0..n {
		text.push_str(&format!("== Section {i}\nbody of block {i}\n\n"));
	}
	text
}
