//! Chunking and page matching for exported books.
//!
//! Three stages, run in order by the export pipeline:
//!
//! 1. [`BookChunker`] cuts the per-part HTML into token-bounded chunks,
//!    anchored at the extractor's inline ToC markers and falling back
//!    to sentence-aware splitting for oversized segments.
//! 2. The colon/short-chunk post-processing inside the chunker makes
//!    sure no chunk ends on a "declaration before a list" colon and no
//!    chunk is a handful of words.
//! 3. [`PageMatcher`] assigns every chunk a page range by proportional
//!    length matching over the strictly normalized text.
//!
//! The normalization ([`clean`]) is deliberately brutal: it keeps only
//! Arabic letters, digits, and ASCII alphanumerics, so that chunk-side
//! and page-side lengths agree no matter how the HTML decorated the
//! text.

mod chunker;
mod clean;
mod matcher;
mod sentence;
mod tokens;

pub use chunker::{BookChunker, ChunkingStats, DEFAULT_CHUNK_TOKENS, TOC_LOOKBACK_WINDOW};
pub use clean::{clean, strip_html};
pub use matcher::PageMatcher;
pub use sentence::SentenceSplitter;
pub use tokens::{count_tokens, count_words};
