//! Sliding-window text chunker.
//!
//! Splits extracted document text into overlapping passages sized for the
//! embedding model. The window is measured in characters; within a
//! tolerance region at the end of each window the cut prefers a paragraph
//! break, then a line break, then a sentence end, then a word boundary,
//! before falling back to a hard cut.
//!
//! Chunking is deterministic: the same text and config always produce the
//! same piece sequence, which makes re-ingestion idempotent and tests
//! reproducible. Offsets are byte offsets into the input text.

use crate::config::ChunkingConfig;

/// One chunk of text plus its position in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Split `text` into overlapping pieces. Whitespace-only windows are
/// dropped, so no piece is ever empty; empty input yields an empty vec.
///
/// Requires `config.chunk_overlap < config.chunk_size` (enforced at config
/// load).
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<ChunkPiece> {
    let size = config.chunk_size;
    let overlap = config.chunk_overlap;

    // Byte offset of every char boundary; bounds[n_chars] == text.len().
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;
    if n_chars == 0 {
        return Vec::new();
    }

    // How far back from the hard cut we look for a natural boundary.
    let tolerance = size / 5;

    let mut pieces = Vec::new();
    let mut start = 0usize; // char index

    loop {
        let hard_end = (start + size).min(n_chars);
        let mut end = hard_end;

        if hard_end < n_chars && tolerance > 0 {
            let window_start = hard_end.saturating_sub(tolerance).max(start + 1);
            let window = &text[bounds[window_start]..bounds[hard_end]];
            if let Some(cut) = find_break(window) {
                end = window_start + window[..cut].chars().count();
            }
        }

        let piece = &text[bounds[start]..bounds[end]];
        if !piece.trim().is_empty() {
            pieces.push(ChunkPiece {
                text: piece.to_string(),
                start_offset: bounds[start],
                end_offset: bounds[end],
            });
        }

        if end >= n_chars {
            break;
        }

        // Overlap with the previous window, but always move forward.
        let mut next = end.saturating_sub(overlap);
        if next <= start {
            next = end;
        }
        start = next;
    }

    pieces
}

/// Byte offset just past the best break in `window`, or `None` for a hard
/// cut. Break points are ASCII, so the returned offset is a char boundary.
fn find_break(window: &str) -> Option<usize> {
    if let Some(i) = window.rfind("\n\n") {
        return Some(i + 2);
    }
    if let Some(i) = window.rfind('\n') {
        return Some(i + 1);
    }
    let sentence = [". ", "! ", "? "]
        .iter()
        .filter_map(|pat| window.rfind(pat).map(|i| i + pat.len()))
        .max();
    if sentence.is_some() {
        return sentence;
    }
    window.rfind(' ').map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let pieces = chunk_text("Hello, world!", &cfg(1000, 200));
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].text, "Hello, world!");
        assert_eq!(pieces[0].start_offset, 0);
        assert_eq!(pieces[0].end_offset, 13);
    }

    #[test]
    fn empty_and_whitespace_input_yield_nothing() {
        assert!(chunk_text("", &cfg(100, 10)).is_empty());
        assert!(chunk_text("   \n\n  \t", &cfg(100, 10)).is_empty());
    }

    #[test]
    fn no_chunk_is_empty() {
        let text = "word ".repeat(500);
        for piece in chunk_text(&text, &cfg(120, 30)) {
            assert!(!piece.text.trim().is_empty());
        }
    }

    #[test]
    fn offsets_reconstruct_the_source_slice() {
        let text = "First sentence here. Second sentence follows. Third one too. And more text after that to force several windows.";
        for piece in chunk_text(text, &cfg(40, 10)) {
            assert_eq!(&text[piece.start_offset..piece.end_offset], piece.text);
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi rho sigma tau";
        let pieces = chunk_text(text, &cfg(40, 15));
        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            assert!(
                pair[1].start_offset < pair[0].end_offset,
                "expected overlap between consecutive chunks"
            );
            assert!(pair[1].start_offset > pair[0].start_offset);
        }
    }

    #[test]
    fn prefers_paragraph_break_within_tolerance() {
        // Paragraph break at offset 88, inside the final 20% of a
        // 100-char window.
        let para_one = "a".repeat(86);
        let text = format!("{}\n\n{}", para_one, "b".repeat(200));
        let pieces = chunk_text(&text, &cfg(100, 0));
        assert_eq!(pieces[0].end_offset, 88);
        assert_eq!(pieces[0].text.trim_end(), para_one);
    }

    #[test]
    fn prefers_sentence_end_over_hard_cut() {
        let text = format!("{}. {}", "x".repeat(90), "y".repeat(200));
        let pieces = chunk_text(&text, &cfg(100, 0));
        assert_eq!(pieces[0].end_offset, 92);
        assert!(pieces[0].text.ends_with(". "));
    }

    #[test]
    fn hard_cut_when_no_boundary_exists() {
        let text = "z".repeat(250);
        let pieces = chunk_text(&text, &cfg(100, 0));
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].text.len(), 100);
        assert_eq!(pieces[1].text.len(), 100);
        assert_eq!(pieces[2].text.len(), 50);
    }

    #[test]
    fn multibyte_input_does_not_panic() {
        let text = "héllo wörld à ".repeat(100);
        let pieces = chunk_text(&text, &cfg(50, 10));
        assert!(!pieces.is_empty());
        for piece in &pieces {
            assert_eq!(&text[piece.start_offset..piece.end_offset], piece.text);
        }
    }

    #[test]
    fn deterministic_for_same_input_and_config() {
        let text = "Sentence one. Sentence two is a bit longer. Sentence three.\n\nNew paragraph with more words in it. Final sentence."
            .repeat(20);
        let a = chunk_text(&text, &cfg(500, 50));
        let b = chunk_text(&text, &cfg(500, 50));
        assert_eq!(a, b);
    }

    #[test]
    fn multi_page_document_scenario() {
        // Three "pages" of prose, chunk_size=500 / overlap=50 — the config
        // from the ingestion scenario tests.
        let page = "The quick brown fox jumps over the lazy dog. ".repeat(30);
        let text = format!("{}\n\n{}\n\n{}", page, page, page);
        let pieces = chunk_text(&text, &cfg(500, 50));
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.text.chars().count() <= 500);
        }
        // Re-running produces the identical sequence (re-ingestion law).
        assert_eq!(pieces, chunk_text(&text, &cfg(500, 50)));
    }
}
