use std::time::Duration;

use parking_lot::Mutex;

use crate::block::BlockId;

/// Weight of the newest sample in the render-duration moving average.
const EMA_ALPHA: f64 = 0.2;

/// Renders faster than this are never reported, whatever the average.
const ANOMALY_FLOOR: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Default)]
struct Ema {
	value: f64,
	initialized: bool,
}

impl Ema {
	fn update(&mut self, next: f64) {
		if self.initialized {
			self.value = EMA_ALPHA * next + (1.0 - EMA_ALPHA) * self.value;
		} else {
			self.value = next;
			self.initialized = true;
		}
	}
}

/// Pool-wide engine latency tracking.
///
/// Slow renders are reported, never interrupted.
#[derive(Debug)]
pub(crate) struct RenderTimings {
	duration_ms: Mutex<Ema>,
	anomaly_factor: f64,
}

impl RenderTimings {
	pub(crate) fn new(anomaly_factor: f64) -> Self {
		Self {
			duration_ms: Mutex::new(Ema::default()),
			anomaly_factor,
		}
	}

	/// Folds one render into the average. Returns true if it was anomalous
	/// relative to the average before this sample.
	pub(crate) fn observe(&self, block: BlockId, elapsed: Duration) -> bool {
		let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
		let (anomalous, avg_ms) = {
			let mut ema = self.duration_ms.lock();
			let avg_ms = ema.value;
			let anomalous = ema.initialized && elapsed >= ANOMALY_FLOOR && elapsed_ms > avg_ms * self.anomaly_factor;
			ema.update(elapsed_ms);
			(anomalous, avg_ms)
		};

		if anomalous {
			tracing::warn!(block = ?block, elapsed_ms, avg_ms, factor = self.anomaly_factor, "preview.render.slow");
		}
		anomalous
	}

	pub(crate) fn average(&self) -> Option<Duration> {
		let ema = self.duration_ms.lock();
		ema.initialized.then(|| Duration::from_secs_f64(ema.value / 1000.0))
	}
}
