//! Raw HTML acquisition and processing.
//!
//! Two halves:
//!
//! - [`RawHtmlAcquirer`] runs the out-of-process extractor and returns a
//!   book's pages as in-memory HTML blobs.
//! - [`process_book_html`] walks those pages and builds the processed
//!   metadata document: cleaned text, part/page structure, and the
//!   optional bibliographic fields from the front matter.

mod acquirer;
mod processor;
mod text;

pub use acquirer::RawHtmlAcquirer;
pub use processor::{process_book_html, BookIdentity};
pub use text::{arabic_to_english_digits, assemble_markdown, ends_with_terminal_punctuation,
               starts_with_letter};
