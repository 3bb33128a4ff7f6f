//! Boundary-aware sliding-window text chunking.
//!
//! Splits normalized text into overlapping slices for embedding. Pure
//! function over the input text: slices carry half-open offset ranges into
//! the original, so a chunk's text is always exactly
//! `&text[slice.start..slice.end]`.
//!
//! Cut points prefer natural boundaries near the window end: a paragraph
//! break, then a sentence end, then whitespace, then a hard cut. A boundary
//! is only accepted if the chunk keeps at least
//! [`defaults::CHUNK_BOUNDARY_FLOOR`] characters, so snapping never produces
//! slivers and the window always advances past the overlap.

use regex::Regex;
use std::sync::OnceLock;

use crate::defaults;

/// Configuration for the chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum slice length in bytes of UTF-8 text.
    pub max_chars: usize,
    /// Overlap carried into the next slice for context preservation.
    pub overlap: usize,
    /// Minimum slice length a natural boundary may snap down to.
    pub boundary_floor: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: defaults::CHUNK_MAX_CHARS,
            overlap: defaults::CHUNK_OVERLAP,
            boundary_floor: defaults::CHUNK_BOUNDARY_FLOOR,
        }
    }
}

/// One overlapping slice of the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSlice {
    /// 0-based position in the slice sequence.
    pub index: usize,
    /// Half-open offset range into the original text.
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// Rough token estimate (length / [`defaults::CHARS_PER_TOKEN`]).
    pub token_estimate: usize,
}

fn sentence_end_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s").expect("valid sentence regex"))
}

/// Find UTF-8 safe boundary at or before the given position.
fn find_char_boundary_before(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Find UTF-8 safe boundary at or after the given position.
fn find_char_boundary_after(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// Pick a cut point within `window` (a slice starting at the chunk start),
/// preferring paragraph break > sentence end > whitespace > hard cut.
/// Returns an offset relative to the window start, `>= floor`.
fn cut_point(window: &str, floor: usize) -> usize {
    // Paragraph break: cut after the blank line.
    if let Some(idx) = window.rfind("\n\n") {
        let cut = idx + 2;
        if cut >= floor {
            return cut;
        }
    }

    // Sentence end: cut after the last terminator+whitespace.
    if let Some(mat) = sentence_end_regex().find_iter(window).last() {
        if mat.end() >= floor {
            return mat.end();
        }
    }

    // Whitespace: cut after the last space or newline.
    if let Some(idx) = window.rfind(|c: char| c.is_whitespace()) {
        let cut = idx + 1;
        if cut >= floor {
            return cut;
        }
    }

    window.len()
}

/// Split text into overlapping, boundary-aware slices.
///
/// Returns an empty vector for empty or whitespace-only input. Every slice
/// is at most `config.max_chars` long, and each slice after the first starts
/// exactly `config.overlap` before the previous slice's end.
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Vec<TextSlice> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut slices = Vec::new();
    let mut pos = 0usize;

    loop {
        let hard_end = find_char_boundary_before(text, (pos + config.max_chars).min(text.len()));

        let end = if hard_end == text.len() {
            hard_end
        } else {
            let rel = cut_point(&text[pos..hard_end], config.boundary_floor);
            find_char_boundary_before(text, pos + rel)
        };

        debug_assert!(end > pos, "chunk window must advance");

        slices.push(TextSlice {
            index: slices.len(),
            start: pos,
            end,
            text: text[pos..end].to_string(),
            token_estimate: (end - pos).div_ceil(defaults::CHARS_PER_TOKEN),
        });

        if end == text.len() {
            break;
        }
        pos = find_char_boundary_after(text, end.saturating_sub(config.overlap));
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_slices() {
        let config = ChunkerConfig::default();
        assert!(chunk_text("", &config).is_empty());
        assert!(chunk_text("   \n\n  ", &config).is_empty());
    }

    #[test]
    fn short_text_is_one_slice() {
        let config = ChunkerConfig::default();
        let slices = chunk_text("A short document.", &config);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].start, 0);
        assert_eq!(slices[0].end, 17);
        assert_eq!(slices[0].text, "A short document.");
    }

    #[test]
    fn long_document_overlaps_by_exactly_overlap_chars() {
        let config = ChunkerConfig::default();
        // 2,500 chars of running prose with sentence boundaries.
        let text = "The quarterly report covers revenue. ".repeat(68);
        assert!(text.len() >= 2_500);

        let slices = chunk_text(&text, &config);
        assert!(slices.len() >= 2);

        for slice in &slices {
            assert!(slice.end - slice.start <= config.max_chars);
            assert_eq!(&text[slice.start..slice.end], slice.text);
        }
        for pair in slices.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, config.overlap);
        }
        // Full coverage: last slice reaches the end.
        assert_eq!(slices.last().unwrap().end, text.len());
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let config = ChunkerConfig {
            max_chars: 100,
            overlap: 10,
            boundary_floor: 40,
        };
        let text = format!("{}\n\n{}", "a".repeat(70), "b".repeat(100));
        let slices = chunk_text(&text, &config);
        // First cut lands right after the blank line, not at the hard limit.
        assert_eq!(slices[0].end, 72);
        assert!(slices[0].text.ends_with("\n\n"));
    }

    #[test]
    fn hard_cut_when_no_boundary_exists() {
        let config = ChunkerConfig {
            max_chars: 50,
            overlap: 5,
            boundary_floor: 25,
        };
        let text = "x".repeat(120);
        let slices = chunk_text(&text, &config);
        assert_eq!(slices[0].end, 50);
        for slice in &slices {
            assert!(slice.end - slice.start <= 50);
        }
        assert_eq!(slices.last().unwrap().end, 120);
    }

    #[test]
    fn multibyte_input_is_boundary_safe() {
        let config = ChunkerConfig {
            max_chars: 50,
            overlap: 8,
            boundary_floor: 20,
        };
        let text = "héllo wörld çafé ".repeat(20);
        let slices = chunk_text(&text, &config);
        assert!(slices.len() > 1);
        for slice in &slices {
            // Would panic on a non-boundary index.
            assert_eq!(&text[slice.start..slice.end], slice.text);
        }
    }

    #[test]
    fn token_estimate_uses_chars_per_token() {
        let config = ChunkerConfig::default();
        let slices = chunk_text("abcdefgh", &config);
        assert_eq!(slices[0].token_estimate, 2);
    }

    #[test]
    fn indices_are_sequential() {
        let config = ChunkerConfig::default();
        let text = "Sentence one is here. ".repeat(200);
        let slices = chunk_text(&text, &config);
        for (i, slice) in slices.iter().enumerate() {
            assert_eq!(slice.index, i);
        }
    }
}
