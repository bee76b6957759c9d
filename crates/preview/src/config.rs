//! Preview configuration, loaded from TOML.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xeno_worker::WorkerPoolCfg;

use crate::block::{DEFAULT_HEADING_MARKER, HashStrategy};
use crate::cache::DEFAULT_CACHE_SIZE;
use crate::predict::{DEFAULT_HISTORY_LEN, DEFAULT_MAX_PREFETCH, SchedulerCfg};
use crate::render::{MIN_BLOCKS_FOR_PARALLEL, RendererCfg};

/// Errors produced while loading or validating a [`PreviewConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("I/O error reading {path}: {error}")]
	Io {
		path: PathBuf,
		error: std::io::Error,
	},

	/// A field holds a value outside its allowed range.
	#[error("invalid value for `{field}`: {reason}")]
	Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Tuning knobs for a [`PreviewPipeline`](crate::PreviewPipeline).
///
/// Every field has a default, so an empty TOML document is a valid config.
/// Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewConfig {
	/// Worker threads. Defaults to the available parallelism, capped at 8.
	pub workers: Option<usize>,
	pub cache_max_size: usize,
	pub parallel: bool,
	pub prediction: bool,
	pub min_blocks_for_parallel: usize,
	/// Character whose runs open a heading, `=` or `#` in practice.
	pub heading_marker: char,
	pub hash: HashStrategy,
	pub history_len: usize,
	/// Speculative requests queued per prediction.
	pub max_prefetch: usize,
	/// Capacity of the speculative lane.
	pub prefetch_queue: usize,
	/// Renders slower than this multiple of the running average are logged.
	pub anomaly_factor: f64,
}

impl Default for PreviewConfig {
	fn default() -> Self {
		Self {
			workers: None,
			cache_max_size: DEFAULT_CACHE_SIZE.get(),
			parallel: true,
			prediction: true,
			min_blocks_for_parallel: MIN_BLOCKS_FOR_PARALLEL,
			heading_marker: DEFAULT_HEADING_MARKER,
			hash: HashStrategy::default(),
			history_len: DEFAULT_HISTORY_LEN,
			max_prefetch: DEFAULT_MAX_PREFETCH,
			prefetch_queue: 64,
			anomaly_factor: 8.0,
		}
	}
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
	ConfigError::Invalid {
		field,
		reason: reason.into(),
	}
}

impl PreviewConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(source: &str) -> Result<Self> {
		let config: Self = toml::from_str(source)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let source = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&source)
	}

	pub fn validate(&self) -> Result<()> {
		if self.workers == Some(0) {
			return Err(invalid("workers", "must be at least 1"));
		}
		if self.cache_max_size == 0 {
			return Err(invalid("cache_max_size", "must be at least 1"));
		}
		if self.heading_marker.is_whitespace() {
			return Err(invalid("heading_marker", "must not be whitespace"));
		}
		if self.history_len == 0 {
			return Err(invalid("history_len", "must be at least 1"));
		}
		if self.prefetch_queue == 0 {
			return Err(invalid("prefetch_queue", "must be at least 1"));
		}
		if !self.anomaly_factor.is_finite() || self.anomaly_factor <= 1.0 {
			return Err(invalid("anomaly_factor", format!("must be a finite number above 1, got {}", self.anomaly_factor)));
		}
		Ok(())
	}

	/// Pool size after applying the default.
	pub fn worker_threads(&self) -> usize {
		self.workers.unwrap_or_else(WorkerPoolCfg::default_threads)
	}

	pub fn cache_capacity(&self) -> NonZeroUsize {
		NonZeroUsize::new(self.cache_max_size).unwrap_or(DEFAULT_CACHE_SIZE)
	}

	pub(crate) fn renderer_cfg(&self) -> RendererCfg {
		RendererCfg {
			threads: self.worker_threads(),
			parallel: self.parallel,
			min_blocks_for_parallel: self.min_blocks_for_parallel,
			prefetch_queue: self.prefetch_queue,
			anomaly_factor: self.anomaly_factor,
		}
	}

	pub(crate) fn scheduler_cfg(&self) -> SchedulerCfg {
		SchedulerCfg {
			enabled: self.prediction,
			history_len: self.history_len,
			max_prefetch: self.max_prefetch,
		}
	}
}
