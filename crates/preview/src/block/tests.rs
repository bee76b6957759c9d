use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;

/// Deterministic stub: the id is the content length, so tests can predict it.
#[derive(Debug)]
struct LenHasher;

impl BlockHasher for LenHasher {
	fn name(&self) -> &'static str {
		"len"
	}

	fn hash(&self, content: &str) -> BlockId {
		BlockId::from_u128(content.len() as u128)
	}
}

fn ranges(blocks: &[Block]) -> Vec<(usize, usize)> {
	blocks.iter().map(|b| (b.start_line, b.end_line)).collect()
}

#[test]
fn splits_title_and_sections() {
	let blocks = BlockSplitter::default().split("= T\n\n== A\n\n== B\n");

	assert_eq!(ranges(&blocks), vec![(0, 1), (2, 3), (4, 4)]);
	assert_eq!(blocks.iter().map(|b| b.level).collect::<Vec<_>>(), vec![0, 1, 1]);
	assert_eq!(blocks.iter().map(|b| &*b.content).collect::<Vec<_>>(), vec!["= T\n\n", "== A\n\n", "== B\n"]);
	assert!(blocks.iter().all(|b| b.rendered_html.is_none()));
}

#[test]
fn empty_and_blank_text_yield_nothing() {
	let splitter = BlockSplitter::default();
	assert!(splitter.split("").is_empty());
	assert!(splitter.split("   \n\t\n  ").is_empty());
}

#[test]
fn preamble_before_first_heading_is_its_own_block() {
	let blocks = BlockSplitter::default().split("intro\nmore intro\n== A\nbody");
	assert_eq!(ranges(&blocks), vec![(0, 1), (2, 3)]);
	assert_eq!(blocks[0].level, 0);
	assert_eq!(&*blocks[1].content, "== A\nbody");
}

#[test]
fn markers_must_be_followed_by_whitespace() {
	let splitter = BlockSplitter::default();
	assert_eq!(splitter.heading_level("== Section\n"), Some(1));
	assert_eq!(splitter.heading_level("===\tTabbed"), Some(2));
	assert_eq!(splitter.heading_level("= Title"), Some(0));
	assert_eq!(splitter.heading_level("==Section"), None);
	assert_eq!(splitter.heading_level("==\n"), None);
	assert_eq!(splitter.heading_level("=="), None);
	assert_eq!(splitter.heading_level(" == indented"), None);
	assert_eq!(splitter.heading_level("a == b"), None);

	let blocks = splitter.split("== A\n==not a heading\n== B\n");
	assert_eq!(ranges(&blocks), vec![(0, 1), (2, 2)]);
}

#[test]
fn markdown_marker_is_supported() {
	let splitter = BlockSplitter::new('#', Arc::new(Sha256Hasher));
	let blocks = splitter.split("# Title\ntext\n## Part\n#hashtag\n");
	assert_eq!(ranges(&blocks), vec![(0, 1), (2, 3)]);
	assert_eq!(blocks.iter().map(|b| b.level).collect::<Vec<_>>(), vec![0, 1]);
}

#[test]
fn crlf_lines_are_preserved() {
	let blocks = BlockSplitter::default().split("= T\r\nx\r\n== A\r\n");
	assert_eq!(ranges(&blocks), vec![(0, 1), (2, 2)]);
	assert_eq!(&*blocks[0].content, "= T\r\nx\r\n");
}

#[test]
fn consecutive_headings_make_single_line_blocks() {
	let blocks = BlockSplitter::default().split("= T\n== A\n== B");
	assert_eq!(ranges(&blocks), vec![(0, 0), (1, 1), (2, 2)]);
	assert_eq!(blocks[2].line_count(), 1);
}

#[test]
fn ids_come_from_the_injected_hasher() {
	let splitter = BlockSplitter::new('=', Arc::new(LenHasher));
	let blocks = splitter.split("= T\n== AB\n");
	assert_eq!(blocks[0].id, BlockId::from_u128(4));
	assert_eq!(blocks[1].id, BlockId::from_u128(6));
	assert_eq!(splitter.hasher().name(), "len");
}

#[test]
fn identical_sections_share_ids_across_documents() {
	let splitter = BlockSplitter::default();
	let a = splitter.split("= One\n\n== Shared\nsame body\n");
	let b = splitter.split("= Two\nother preamble\n== Shared\nsame body\n");
	assert_ne!(a[0].id, b[0].id);
	assert_eq!(a[1].id, b[1].id);
}

#[test]
fn level_does_not_affect_identity() {
	let splitter = BlockSplitter::default();
	let blocks = splitter.split("x\n== A\n");
	let preamble = splitter.split("x\n");
	assert_eq!(blocks[0].id, preamble[0].id);
}

#[test]
fn line_lookup_uses_block_ranges() {
	let blocks = BlockSplitter::default().split("= T\n\n== A\n\n== B\n");
	assert_eq!(block_index_for_line(&blocks, 0), Some(0));
	assert_eq!(block_index_for_line(&blocks, 1), Some(0));
	assert_eq!(block_index_for_line(&blocks, 3), Some(1));
	assert_eq!(block_index_for_line(&blocks, 4), Some(2));
	assert_eq!(block_index_for_line(&blocks, 5), None);
	assert!(blocks[1].contains_line(2));
	assert!(!blocks[1].contains_line(4));
}

fn arb_document() -> impl Strategy<Value = String> {
	let line = prop_oneof![
		"={1,3} [a-z]{0,8}",
		"==[a-z]{1,4}",
		"[a-z =]{0,12}",
		Just(String::new()),
	];
	(prop::collection::vec(line, 1..40), any::<bool>()).prop_map(|(lines, trailing_newline)| {
		let mut text = lines.join("\n");
		if trailing_newline {
			text.push('\n');
		}
		text
	})
}

fn shape(blocks: &[Block]) -> Vec<(BlockId, usize, usize, String)> {
	blocks.iter().map(|b| (b.id, b.start_line, b.end_line, b.content.to_string())).collect()
}

proptest! {
	/// Blocks are contiguous, disjoint, and reassemble into the input.
	#[test]
	fn prop_blocks_cover_every_line(text in arb_document()) {
		let blocks = BlockSplitter::default().split(&text);
		if text.trim().is_empty() {
			prop_assert!(blocks.is_empty());
			return Ok(());
		}

		prop_assert_eq!(blocks[0].start_line, 0);
		for pair in blocks.windows(2) {
			prop_assert_eq!(pair[1].start_line, pair[0].end_line + 1);
		}
		let last_line = text.split_inclusive('\n').count() - 1;
		prop_assert_eq!(blocks[blocks.len() - 1].end_line, last_line);

		let joined: String = blocks.iter().map(|b| &*b.content).collect();
		prop_assert_eq!(joined, text);
		for block in &blocks {
			prop_assert_eq!(block.line_count(), block.content.split_inclusive('\n').count());
		}
	}

	#[test]
	fn prop_split_is_deterministic(text in arb_document()) {
		let splitter = BlockSplitter::default();
		prop_assert_eq!(shape(&splitter.split(&text)), shape(&splitter.split(&text)));
	}

	/// A trailing section hashes the same whatever precedes it.
	#[test]
	fn prop_section_ids_ignore_surroundings(a in arb_document(), b in arb_document(), body in "[a-z ]{0,20}") {
		let section = format!("== Shared\n{body}\n");
		let splitter = BlockSplitter::default();
		let in_a = splitter.split(&format!("{a}\n{section}"));
		let in_b = splitter.split(&format!("{b}\n{section}"));

		let (last_a, last_b) = (&in_a[in_a.len() - 1], &in_b[in_b.len() - 1]);
		prop_assert_eq!(&*last_a.content, section.as_str());
		prop_assert_eq!(last_a.id, last_b.id);
	}
}
