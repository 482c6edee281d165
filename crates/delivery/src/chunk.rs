//! Channel-aware text chunking.
//!
//! Two strategies, selected per channel/account config: `length` splits at
//! the channel limit, `newline` splits into paragraph/markdown blocks first
//! and only re-splits blocks that exceed the limit. Limits are byte counts
//! applied at character boundaries; a chunk never splits a code point.

use herald_channels::{ChunkMode, OutboundSender};
use herald_config::ChunkStrategy;

/// Split `text` into chunks of at most `limit` bytes, preferring newline
/// and space boundaries so words survive intact.
///
/// A `limit` of zero is treated as unsplittable; the text passes through
/// whole rather than being dropped.
#[must_use]
pub fn chunk_by_length(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= limit {
            chunks.push(rest.to_string());
            break;
        }

        let mut window = rest.floor_char_boundary(limit);
        if window == 0 {
            // Limit smaller than the first code point; take it anyway.
            window = rest
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(rest.len());
        }

        let slice = &rest[..window];
        let cut = match slice.rfind('\n').or_else(|| slice.rfind(' ')) {
            Some(0) | None => window,
            Some(pos) => pos,
        };

        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches('\n');
        if let Some(stripped) = rest.strip_prefix(' ') {
            rest = stripped;
        }
    }

    chunks
}

/// A paragraph or markdown block. Atomic blocks (fenced code) are never
/// re-split even when they exceed the channel limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub text: String,
    pub atomic: bool,
}

/// Split text into paragraph units; in markdown mode, fenced code blocks
/// are kept together as atomic units.
#[must_use]
pub fn split_blocks(text: &str, mode: ChunkMode) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph = String::new();
    let mut fence: Option<String> = None;

    let flush = |paragraph: &mut String, blocks: &mut Vec<Block>, atomic: bool| {
        if !paragraph.is_empty() {
            blocks.push(Block {
                text: std::mem::take(paragraph),
                atomic,
            });
        }
    };

    for line in text.lines() {
        let trimmed = line.trim_start();
        let is_fence_marker = mode == ChunkMode::Markdown
            && (trimmed.starts_with("```") || trimmed.starts_with("~~~"));

        match &fence {
            Some(marker) => {
                paragraph.push('\n');
                paragraph.push_str(line);
                if is_fence_marker && trimmed.starts_with(marker.as_str()) {
                    fence = None;
                    flush(&mut paragraph, &mut blocks, true);
                }
            },
            None if is_fence_marker => {
                flush(&mut paragraph, &mut blocks, false);
                fence = Some(trimmed[..3].to_string());
                paragraph.push_str(line);
            },
            None if line.trim().is_empty() => {
                flush(&mut paragraph, &mut blocks, false);
            },
            None => {
                if !paragraph.is_empty() {
                    paragraph.push('\n');
                }
                paragraph.push_str(line);
            },
        }
    }
    // An unterminated fence still counts as an atomic block.
    flush(&mut paragraph, &mut blocks, fence.is_some());

    blocks
}

/// Chunk `text` for one adapter according to the configured strategy.
///
/// No limit on the adapter means the whole text goes out as one message.
/// Oversized atomic blocks pass through unsplit rather than being dropped.
#[must_use]
pub fn chunk_text(text: &str, strategy: ChunkStrategy, sender: &dyn OutboundSender) -> Vec<String> {
    let Some(limit) = sender.text_chunk_limit() else {
        return vec![text.to_string()];
    };

    let split = |piece: &str| match sender.chunker() {
        Some(chunker) => chunker.chunk(piece, limit),
        None => chunk_by_length(piece, limit),
    };

    match strategy {
        ChunkStrategy::Length => split(text),
        ChunkStrategy::Newline => {
            let mut out = Vec::new();
            for block in split_blocks(text, sender.chunk_mode()) {
                if block.text.len() <= limit || block.atomic {
                    out.push(block.text);
                } else {
                    out.extend(split(&block.text));
                }
            }
            if out.is_empty() {
                out.push(String::new());
            }
            out
        },
    }
}
