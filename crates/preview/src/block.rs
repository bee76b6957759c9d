//! Document segmentation into content-addressed blocks.
//!
//! A block starts at a heading line and runs until the next heading or the end
//! of the document. Text before the first heading forms a preamble block. Block
//! identity is a fingerprint of the exact block text, so an edit only changes
//! the ids of the blocks it touched.

use std::fmt;
use std::sync::Arc;

mod hash;

pub use hash::{BlockHasher, HashStrategy, Sha256Hasher};
#[cfg(feature = "fast-hash")]
pub use hash::Xxh3Hasher;

/// Heading marker used by AsciiDoc-style documents.
pub const DEFAULT_HEADING_MARKER: char = '=';

/// 128-bit content fingerprint of a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u128);

impl BlockId {
	pub const fn from_u128(raw: u128) -> Self {
		Self(raw)
	}

	pub const fn as_u128(self) -> u128 {
		self.0
	}
}

impl fmt::Display for BlockId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:032x}", self.0)
	}
}

impl fmt::Debug for BlockId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// The leading 48 bits are plenty to tell blocks apart in logs.
		write!(f, "BlockId({:012x})", self.0 >> 80)
	}
}

/// One contiguous region of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
	/// Fingerprint of `content`.
	pub id: BlockId,
	/// First line of the block, 0-indexed.
	pub start_line: usize,
	/// Last line of the block, inclusive.
	pub end_line: usize,
	/// Exact source text, line terminators included.
	pub content: Arc<str>,
	/// Heading depth that opened the block. Not part of identity.
	pub level: usize,
	/// Output of the current render pass, if it has run.
	pub rendered_html: Option<Arc<str>>,
}

impl Block {
	pub fn line_count(&self) -> usize {
		self.end_line - self.start_line + 1
	}

	pub fn contains_line(&self, line: usize) -> bool {
		(self.start_line..=self.end_line).contains(&line)
	}
}

/// Splits documents at heading lines.
///
/// A line is a heading when it starts with a run of `N` markers immediately
/// followed by whitespace on the same line; the block it opens has level
/// `N - 1`. Anything else, including `==text` or a bare `==`, is content.
#[derive(Debug, Clone)]
pub struct BlockSplitter {
	marker: char,
	hasher: Arc<dyn BlockHasher>,
}

impl Default for BlockSplitter {
	fn default() -> Self {
		Self::new(DEFAULT_HEADING_MARKER, HashStrategy::default().hasher())
	}
}

impl BlockSplitter {
	pub fn new(marker: char, hasher: Arc<dyn BlockHasher>) -> Self {
		Self { marker, hasher }
	}

	pub fn marker(&self) -> char {
		self.marker
	}

	pub fn hasher(&self) -> &Arc<dyn BlockHasher> {
		&self.hasher
	}

	/// Splits `text` into blocks covering every line exactly once.
	///
	/// Empty or whitespace-only text yields no blocks.
	pub fn split(&self, text: &str) -> Vec<Block> {
		if text.trim().is_empty() {
			return Vec::new();
		}

		let mut blocks = Vec::new();
		let mut block_start_byte = 0;
		let mut block_start_line = 0;
		let mut level = 0;
		let mut offset = 0;
		let mut last_line = 0;

		for (line_no, line) in text.split_inclusive('\n').enumerate() {
			if let Some(heading) = self.heading_level(line) {
				if line_no > block_start_line {
					blocks.push(self.make_block(&text[block_start_byte..offset], block_start_line, line_no - 1, level));
				}
				block_start_byte = offset;
				block_start_line = line_no;
				level = heading;
			}
			offset += line.len();
			last_line = line_no;
		}

		blocks.push(self.make_block(&text[block_start_byte..], block_start_line, last_line, level));
		blocks
	}

	/// Returns the block level a line opens, or `None` for content lines.
	pub fn heading_level(&self, line: &str) -> Option<usize> {
		let depth = line.chars().take_while(|&c| c == self.marker).count();
		if depth == 0 {
			return None;
		}
		let rest = &line[depth * self.marker.len_utf8()..];
		match rest.chars().next() {
			Some(c) if c.is_whitespace() && c != '\n' && c != '\r' => Some(depth - 1),
			_ => None,
		}
	}

	fn make_block(&self, content: &str, start_line: usize, end_line: usize, level: usize) -> Block {
		Block {
			id: self.hasher.hash(content),
			start_line,
			end_line,
			content: Arc::from(content),
			level,
			rendered_html: None,
		}
	}
}

/// Index of the block covering `line`, by binary search over block ranges.
pub fn block_index_for_line(blocks: &[Block], line: usize) -> Option<usize> {
	let idx = blocks.partition_point(|b| b.end_line < line);
	(idx < blocks.len() && blocks[idx].start_line <= line).then_some(idx)
}

#[cfg(test)]
mod tests;
