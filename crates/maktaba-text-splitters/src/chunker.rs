//! ToC-anchored chunking with colon-aware post-processing.

use std::sync::LazyLock;

use maktaba::types::ProcessedBook;
use regex::Regex;
use tracing::debug;

use crate::clean::strip_html;
use crate::sentence::SentenceSplitter;
use crate::tokens::{count_tokens, count_words};

/// Token budget per chunk after which sentence-aware splitting kicks in.
pub const DEFAULT_CHUNK_TOKENS: usize = 7_500;

/// How far back (in characters) the boundary search scans for a period
/// before a ToC marker. Bounds the worst-case rescan on huge parts.
pub const TOC_LOOKBACK_WINDOW: usize = 50_000;

/// Minimum words a chunk may hold before it is merged forward.
const MIN_CHUNK_WORDS: usize = 7;

static TOC_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r#"<span data-type="title" id="toc-(\d+)">"#).unwrap()
});

const PARA_BREAK: &str = "<p></p>";
const PAGE_OPEN: &str = r#"<div class="PageText">"#;

/// Counters distinguishing segments kept whole from segments the
/// sentence splitter had to cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkingStats {
    pub segments_under_limit: usize,
    pub segments_over_limit: usize,
}

/// Cuts a processed book into token-bounded chunks at ToC markers and
/// sentence boundaries.
#[derive(Debug, Clone)]
pub struct BookChunker {
    chunk_size: usize,
    lookback_window: usize,
    splitter: SentenceSplitter,
}

impl Default for BookChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl BookChunker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_TOKENS,
            lookback_window: TOC_LOOKBACK_WINDOW,
            splitter: SentenceSplitter::new(DEFAULT_CHUNK_TOKENS),
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.splitter = SentenceSplitter::new(self.chunk_size);
        self
    }

    #[must_use]
    pub fn with_lookback_window(mut self, window: usize) -> Self {
        self.lookback_window = window;
        self
    }

    /// Chunk the whole book. Parts are traversed in order; a part whose
    /// HTML carries no ToC marker is held over and prepended to the
    /// next part, so chapter boundaries can span physical parts.
    #[must_use]
    pub fn chunk_book(&self, book: &ProcessedBook) -> (Vec<String>, ChunkingStats) {
        let mut stats = ChunkingStats::default();
        let mut chunks: Vec<String> = Vec::new();
        let mut pending_html = String::new();

        for part in &book.parts {
            let mut full_html = std::mem::take(&mut pending_html);
            if let Some(pages) = book.pages.get(part) {
                for page in pages {
                    full_html.push_str(&page.display_elem);
                    full_html.push('\n');
                }
            }

            let marker_positions: Vec<usize> = TOC_MARKER_RE
                .find_iter(&full_html)
                .map(|m| m.start())
                .collect();

            if marker_positions.is_empty() {
                pending_html = full_html;
                continue;
            }

            let split_points: Vec<usize> = marker_positions
                .iter()
                .map(|&pos| self.find_sentence_boundary_before(&full_html, pos))
                .collect();

            if split_points[0] > 0 {
                self.process_segment(&full_html[..split_points[0]], &mut chunks, &mut stats);
            }
            for (i, &start) in split_points.iter().enumerate() {
                if let Some(&end) = split_points.get(i + 1) {
                    self.process_segment(&full_html[start..end], &mut chunks, &mut stats);
                } else {
                    pending_html = full_html[start..].to_string();
                }
            }
        }

        if !pending_html.is_empty() {
            self.process_segment(&pending_html, &mut chunks, &mut stats);
        }

        let result = post_process_chunks(chunks);
        debug!(
            chunks = result.len(),
            under_limit = stats.segments_under_limit,
            over_limit = stats.segments_over_limit,
            "Chunking complete"
        );
        (result, stats)
    }

    /// The position where the sentence containing a ToC marker begins:
    /// the max of the last empty paragraph, the last page open, and the
    /// last qualifying period within the lookback window.
    fn find_sentence_boundary_before(&self, html: &str, pos: usize) -> usize {
        let prefix = &html[..pos];
        let mut best = 0usize;

        if let Some(idx) = prefix.rfind(PARA_BREAK) {
            best = best.max(idx + PARA_BREAK.len());
        }
        if let Some(idx) = prefix.rfind(PAGE_OPEN) {
            best = best.max(idx + PAGE_OPEN.len());
        }

        let window_start = char_window_start(prefix, self.lookback_window);
        if let Some(period_end) = last_period_boundary(&prefix[window_start..]) {
            best = best.max(window_start + period_end);
        }

        best
    }

    fn process_segment(&self, html: &str, chunks: &mut Vec<String>, stats: &mut ChunkingStats) {
        let text = strip_html(html);
        if text.is_empty() {
            return;
        }
        if count_tokens(&text) > self.chunk_size {
            stats.segments_over_limit += 1;
            chunks.extend(self.splitter.split(&text));
        } else {
            stats.segments_under_limit += 1;
            chunks.push(text);
        }
    }
}

/// Byte index `window` characters back from the end of `prefix`,
/// clamped to a char boundary.
fn char_window_start(prefix: &str, window: usize) -> usize {
    if window == 0 {
        return prefix.len();
    }
    prefix
        .char_indices()
        .rev()
        .nth(window - 1)
        .map_or(0, |(idx, _)| idx)
}

/// The byte offset just past the last period that ends a sentence:
/// a `.` followed by optional whitespace and a tag, or by whitespace
/// and a non-tag character.
fn last_period_boundary(region: &str) -> Option<usize> {
    let bytes = region.as_bytes();
    for i in (0..bytes.len()).rev() {
        if bytes[i] != b'.' {
            continue;
        }
        let rest = &region[i + 1..];
        let after_ws = rest.trim_start();
        let skipped_ws = rest.len() != after_ws.len();
        match after_ws.chars().next() {
            Some('<') => return Some(i + 1),
            Some(_) if skipped_ws => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Split off every trailing sentence that ends in a colon.
///
/// Returns `(before, colon_content)`; `colon_content` is empty when the
/// text does not end with a colon. Consecutive colon-ending sentences
/// at the tail are all moved, joined by blank lines.
fn split_trailing_colon_content(text: &str) -> (String, String) {
    let mut text = text.trim_end().to_string();
    if !text.ends_with(':') {
        return (text, String::new());
    }

    let mut colon_parts: Vec<String> = Vec::new();

    while text.trim_end().ends_with(':') {
        text.truncate(text.trim_end().len());

        let bytes = text.as_bytes();
        let mut last_period: Option<usize> = None;
        for i in (0..bytes.len().saturating_sub(1)).rev() {
            if bytes[i] == b'.' && matches!(bytes[i + 1], b' ' | b'\n' | b'\t' | b'\r') {
                last_period = Some(i);
                break;
            }
        }
        let last_newline = text.rfind('\n');

        let split_pos = match (last_period, last_newline) {
            (Some(p), Some(n)) => Some(p.max(n)),
            (Some(p), None) => Some(p),
            (None, Some(n)) => Some(n),
            (None, None) => None,
        };

        match split_pos {
            None => {
                colon_parts.insert(0, text.clone());
                text.clear();
                break;
            }
            Some(pos) => {
                let colon_part = text[pos + 1..].trim().to_string();
                colon_parts.insert(0, colon_part);
                text.truncate(pos + 1);
                text.truncate(text.trim_end().len());
            }
        }
    }

    (text, colon_parts.join("\n\n"))
}

/// Merge trailing-colon sentences and too-short chunks forward so
/// every emitted chunk is self-contained.
fn post_process_chunks(chunks: Vec<String>) -> Vec<String> {
    if chunks.is_empty() {
        return chunks;
    }

    let mut result: Vec<String> = Vec::with_capacity(chunks.len());
    let mut carry_forward = String::new();

    for chunk in chunks {
        let chunk = if carry_forward.is_empty() {
            chunk
        } else {
            format!("{}\n\n{}", std::mem::take(&mut carry_forward), chunk)
        };

        let (before, colon_content) = split_trailing_colon_content(&chunk);

        if !colon_content.is_empty() {
            if !before.is_empty() && count_words(&before) >= MIN_CHUNK_WORDS {
                result.push(before);
                carry_forward = colon_content;
            } else if !before.is_empty() {
                carry_forward = format!("{before}\n\n{colon_content}");
            } else {
                carry_forward = colon_content;
            }
        } else if count_words(&chunk) < MIN_CHUNK_WORDS {
            carry_forward = chunk;
        } else {
            result.push(chunk);
        }
    }

    if !carry_forward.is_empty() {
        match result.last_mut() {
            Some(last) => {
                last.push_str("\n\n");
                last.push_str(&carry_forward);
            }
            None => result.push(carry_forward),
        }
    }

    result
}
