//! The preview surface: text in, ordered HTML fragments out.

use std::sync::Arc;

use crate::block::BlockSplitter;
use crate::cache::{BlockCache, CacheStats};
use crate::config::{PreviewConfig, Result};
use crate::document::DocumentIndex;
use crate::engine::EngineFactory;
use crate::predict::{PredictiveScheduler, PrefetchGuard, PrefetchRequest, PrefetchSink};
use crate::render::{ParallelRenderer, RenderStats};

/// One rendered block, positioned in the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFragment {
	pub start_line: usize,
	/// Inclusive.
	pub end_line: usize,
	pub level: usize,
	pub html: Arc<str>,
}

/// Routes speculative requests to the renderer's low-priority lane, checked
/// against the live document right before they run.
struct RendererSink {
	renderer: Arc<ParallelRenderer>,
	document: Arc<DocumentIndex>,
}

impl PrefetchSink for RendererSink {
	fn enqueue(&self, request: PrefetchRequest) -> bool {
		self.renderer.prefetch(request, Arc::clone(&self.document) as Arc<dyn PrefetchGuard>)
	}
}

/// Splits, caches, renders and prefetches one document.
///
/// Rendering never fails: engine errors become fallback fragments and pool
/// trouble degrades to in-process rendering. Only construction validates and
/// can return an error.
pub struct PreviewPipeline {
	config: PreviewConfig,
	splitter: BlockSplitter,
	renderer: Arc<ParallelRenderer>,
	document: Arc<DocumentIndex>,
	scheduler: PredictiveScheduler,
}

impl std::fmt::Debug for PreviewPipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PreviewPipeline")
			.field("renderer", &self.renderer)
			.field("blocks", &self.document.len())
			.field("scheduler", &self.scheduler)
			.finish_non_exhaustive()
	}
}

impl PreviewPipeline {
	/// Builds a pipeline with its own cache of `config.cache_max_size` entries.
	pub fn new(config: PreviewConfig, factory: impl EngineFactory + 'static) -> Result<Self> {
		config.validate()?;
		let cache = Arc::new(BlockCache::new(config.cache_capacity()));
		Self::with_cache(config, cache, Arc::new(factory))
	}

	/// Builds a pipeline around an existing cache, which may be shared with
	/// other pipelines. `config.cache_max_size` is ignored.
	pub fn with_cache(config: PreviewConfig, cache: Arc<BlockCache>, factory: Arc<dyn EngineFactory>) -> Result<Self> {
		config.validate()?;

		let splitter = BlockSplitter::new(config.heading_marker, config.hash.hasher());
		let renderer = Arc::new(ParallelRenderer::new(config.renderer_cfg(), Arc::clone(&cache), factory));
		let document = Arc::new(DocumentIndex::new());
		let sink = Arc::new(RendererSink {
			renderer: Arc::clone(&renderer),
			document: Arc::clone(&document),
		});
		let scheduler = PredictiveScheduler::new(config.scheduler_cfg(), cache, Arc::clone(&document), sink);

		tracing::debug!(
			threads = renderer.threads(),
			hasher = splitter.hasher().name(),
			marker = %splitter.marker(),
			"preview.pipeline.init"
		);
		Ok(Self {
			config,
			splitter,
			renderer,
			document,
			scheduler,
		})
	}

	/// Renders `text`, reusing cached output for unchanged blocks.
	pub fn render(&self, text: &str) -> Vec<RenderedFragment> {
		self.render_with_cursor(text, None)
	}

	/// Renders `text`, then records the cursor and warms the blocks around it.
	pub fn render_with_cursor(&self, text: &str, cursor_line: Option<usize>) -> Vec<RenderedFragment> {
		let blocks = self.splitter.split(text);
		self.document.publish(&blocks);

		let fragments = self
			.renderer
			.render(blocks)
			.into_iter()
			.map(|block| RenderedFragment {
				start_line: block.start_line,
				end_line: block.end_line,
				level: block.level,
				html: block.rendered_html.unwrap_or_else(|| Arc::from("")),
			})
			.collect();

		if let Some(line) = cursor_line {
			self.notify_cursor(line);
		}
		fragments
	}

	/// Publishes `text` for prediction and staleness checks without rendering.
	pub fn sync_document(&self, text: &str) {
		self.document.publish(&self.splitter.split(text));
	}

	/// Records a cursor move and queues prefetches around it.
	pub fn notify_cursor(&self, line: usize) {
		self.scheduler.update_cursor_position(line);
		if let Some(current) = self.document.block_for_line(line) {
			self.scheduler.request_prediction(self.document.len(), current);
		}
	}

	/// Records an edit. Queued prefetches for the touched block become stale
	/// even when prediction is disabled.
	pub fn notify_edit(&self, line: usize) {
		let block = self.document.mark_edited(line);
		tracing::trace!(line, block, "preview.edit");
		self.scheduler.record_edit(line);
	}

	pub fn get_cache_stats(&self) -> CacheStats {
		self.renderer.cache().stats()
	}

	pub fn get_render_stats(&self) -> RenderStats {
		self.renderer.stats()
	}

	pub fn clear_cache(&self) {
		self.renderer.cache().clear();
	}

	pub fn enable_parallel(&self, enabled: bool) {
		self.renderer.set_parallel(enabled);
	}

	pub fn enable_prediction(&self, enabled: bool) {
		self.scheduler.enable(enabled);
	}

	/// Blocks until no render or prefetch work is queued or running.
	pub fn wait_idle(&self) {
		self.renderer.wait_idle();
	}

	/// The configuration the pipeline was built with. Runtime toggles are not
	/// reflected here.
	pub fn config(&self) -> &PreviewConfig {
		&self.config
	}

	pub fn cache(&self) -> &Arc<BlockCache> {
		self.renderer.cache()
	}

	pub fn scheduler(&self) -> &PredictiveScheduler {
		&self.scheduler
	}
}
