//! Incremental preview rendering.
//!
//! A document is split at heading boundaries into content-addressed
//! [`Block`]s. Rendered output is cached per block id, so after an edit only
//! the blocks whose text changed reach the render engine. Misses are rendered
//! on a bounded pool of worker threads, each owning its own engine handle, and
//! reassembled in document order. A [`PredictiveScheduler`] watches cursor and
//! edit positions and warms the cache for blocks the user is about to reach.
//!
//! [`PreviewPipeline`] wires the pieces together and is the entry point for
//! preview surfaces:
//!
//! ```no_run
//! use xeno_preview::{PreviewConfig, PreviewPipeline, RenderError};
//!
//! let pipeline = PreviewPipeline::new(PreviewConfig::default(), || {
//! 	|source: &str| Ok::<_, RenderError>(format!("<div>{source}</div>"))
//! })
//! .unwrap();
//!
//! for fragment in pipeline.render("= Title\n\n== Section\nbody\n") {
//! 	println!("{}..={}: {}", fragment.start_line, fragment.end_line, fragment.html);
//! }
//! ```

pub mod block;
pub mod cache;
pub mod config;
pub mod document;
pub mod engine;
pub mod pipeline;
pub mod predict;
pub mod render;

#[cfg(test)]
mod testing;

pub use block::{Block, BlockHasher, BlockId, BlockSplitter, HashStrategy};
pub use cache::{BlockCache, CacheStats};
pub use config::{ConfigError, PreviewConfig};
pub use document::DocumentIndex;
pub use engine::{EngineFactory, RenderEngine, RenderError};
pub use pipeline::{PreviewPipeline, RenderedFragment};
pub use predict::{EditEvent, EditKind, PredictionPolicy, PredictiveScheduler, PrefetchRequest, TrendPolicy};
pub use render::{ParallelRenderer, RenderStats, RendererCfg};
