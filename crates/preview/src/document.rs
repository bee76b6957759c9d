//! Live view of the document's current blocks.
//!
//! The preview only sees full text when the caller renders or syncs, but edits
//! are reported line by line in between. [`DocumentIndex`] keeps the block
//! layout of the last published text and stamps each block with a generation
//! that changes whenever the block may have changed. Speculative requests carry
//! the generation they were predicted against and are dropped if it moved.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::block::{Block, BlockId, block_index_for_line};
use crate::predict::{PrefetchGuard, PrefetchRequest};

/// One block as last published, with its staleness stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedBlock {
	pub id: BlockId,
	pub start_line: usize,
	pub end_line: usize,
	pub content: Arc<str>,
	pub generation: u64,
}

#[derive(Debug, Default)]
struct Layout {
	blocks: Vec<Block>,
	generations: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct DocumentIndex {
	layout: RwLock<Layout>,
	next_generation: AtomicU64,
}

impl DocumentIndex {
	pub fn new() -> Self {
		Self::default()
	}

	fn fresh_generation(&self) -> u64 {
		self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
	}

	/// Replaces the layout with `blocks`.
	///
	/// A block that sits at the same index with the same id as before keeps its
	/// generation, so pending requests for unchanged blocks stay valid.
	pub fn publish(&self, blocks: &[Block]) {
		let mut layout = self.layout.write();

		let generations: Vec<u64> = blocks
			.iter()
			.enumerate()
			.map(|(i, block)| match (layout.blocks.get(i), layout.generations.get(i)) {
				(Some(old), Some(&generation)) if old.id == block.id => generation,
				_ => self.fresh_generation(),
			})
			.collect();

		layout.blocks = blocks
			.iter()
			.map(|b| Block {
				rendered_html: None,
				..b.clone()
			})
			.collect();
		layout.generations = generations;
	}

	/// Marks the block covering `line` as changed. Returns its index.
	pub fn mark_edited(&self, line: usize) -> Option<usize> {
		let mut layout = self.layout.write();
		let index = Self::index_for_line(&layout.blocks, line)?;
		let generation = self.fresh_generation();
		*layout.generations.get_mut(index)? = generation;
		Some(index)
	}

	/// Index of the block covering `line`. Lines past the end map to the last block.
	pub fn block_for_line(&self, line: usize) -> Option<usize> {
		Self::index_for_line(&self.layout.read().blocks, line)
	}

	fn index_for_line(blocks: &[Block], line: usize) -> Option<usize> {
		if blocks.is_empty() {
			return None;
		}
		block_index_for_line(blocks, line).or(Some(blocks.len() - 1))
	}

	pub fn get(&self, index: usize) -> Option<IndexedBlock> {
		let layout = self.layout.read();
		let block = layout.blocks.get(index)?;
		Some(IndexedBlock {
			id: block.id,
			start_line: block.start_line,
			end_line: block.end_line,
			content: Arc::clone(&block.content),
			generation: *layout.generations.get(index)?,
		})
	}

	pub fn len(&self) -> usize {
		self.layout.read().blocks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl PrefetchGuard for DocumentIndex {
	fn is_current(&self, request: &PrefetchRequest) -> bool {
		self.get(request.block_index)
			.is_some_and(|block| block.id == request.block_id && block.generation == request.generation)
	}
}
