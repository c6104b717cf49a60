//! Proportional length matching between chunks and pages.
//!
//! Chunk boundaries and page boundaries are independent, so the matcher
//! never compares raw offsets. Instead it normalizes both sides with
//! [`clean`](crate::clean::clean), redistributes the page lengths so
//! their total equals the chunk total, and then walks both lists with
//! two pointers, consuming length until every chunk has a page range.

use maktaba::types::{MatchedChunk, ProcessedBook};
use tracing::debug;

use crate::clean::{clean, strip_html};

/// One page with its share of the normalized length budget.
#[derive(Debug, Clone)]
struct PageAlloc {
    page_id: i64,
    page_num: Option<i64>,
    part_title: String,
    length: i64,
}

/// Assigns page ranges to chunks by proportional length matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageMatcher;

impl PageMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Match chunks to page ranges. Books without any usable pages get
    /// their chunks back with identity fields only.
    #[must_use]
    pub fn match_chunks_to_pages(&self, chunks: &[String], book: &ProcessedBook) -> Vec<MatchedChunk> {
        let mut result: Vec<MatchedChunk> = chunks
            .iter()
            .enumerate()
            .map(|(i, text)| MatchedChunk {
                order: i as i64,
                book_id: book.book_id,
                book_name: book.book_name.clone(),
                author: book.author.clone().unwrap_or_default(),
                category: book.category.clone().unwrap_or_default(),
                text: text.clone(),
                part_title: None,
                start_page_id: None,
                page_offset: None,
                page_num_range: None,
            })
            .collect();

        let chunk_lengths: Vec<i64> = chunks
            .iter()
            .map(|chunk| clean(chunk).chars().count() as i64)
            .collect();
        let chunk_total: i64 = chunk_lengths.iter().sum();

        let mut pages = allocate_page_lengths(book, chunk_total);
        if chunks.is_empty() || pages.is_empty() {
            return result;
        }

        let mut chunk_lens = chunk_lengths;
        let mut chunk_ptr = 0usize;
        let mut page_ptr = 0usize;

        let mut start_page_index = 0usize;
        let mut start_page_id = pages[0].page_id;
        let mut start_page_num = pages[0].page_num;
        let mut current_part: Option<String> = None;

        while page_ptr < pages.len() && chunk_ptr < chunk_lens.len() {
            let c_length = chunk_lens[chunk_ptr];
            let p_length = pages[page_ptr].length;
            current_part = Some(pages[page_ptr].part_title.clone());

            if p_length < c_length {
                // Page fully consumed by the current chunk.
                chunk_lens[chunk_ptr] -= p_length;
                pages[page_ptr].length = 0;
                page_ptr += 1;
            } else if p_length > c_length {
                // Chunk ends inside the current page.
                assign(
                    &mut result[chunk_ptr],
                    start_page_id,
                    (page_ptr - start_page_index) as i64,
                    start_page_num,
                    pages[page_ptr].page_num,
                    current_part.as_deref(),
                );
                start_page_index = page_ptr;
                start_page_id = pages[page_ptr].page_id;
                start_page_num = pages[page_ptr].page_num;
                chunk_lens[chunk_ptr] = 0;
                pages[page_ptr].length -= c_length;
                chunk_ptr += 1;
            } else {
                // Chunk and page end together.
                assign(
                    &mut result[chunk_ptr],
                    start_page_id,
                    (page_ptr - start_page_index) as i64,
                    start_page_num,
                    pages[page_ptr].page_num,
                    current_part.as_deref(),
                );
                chunk_lens[chunk_ptr] = 0;
                pages[page_ptr].length = 0;
                chunk_ptr += 1;
                page_ptr += 1;
                if page_ptr < pages.len() {
                    start_page_index = page_ptr;
                    start_page_id = pages[page_ptr].page_id;
                    start_page_num = pages[page_ptr].page_num;
                }
            }
        }

        // Anything left over inherits the previous assignment.
        for i in chunk_ptr..result.len() {
            if result[i].start_page_id.is_some() {
                continue;
            }
            if i > 0 && result[i - 1].start_page_id.is_some() {
                let prev = result[i - 1].clone();
                result[i].start_page_id = prev.start_page_id;
                result[i].page_offset = prev.page_offset;
                result[i].page_num_range = prev.page_num_range;
                result[i].part_title = prev.part_title;
            } else {
                result[i].start_page_id = Some(start_page_id);
                result[i].page_offset = Some(0);
                let num = start_page_num.unwrap_or(0);
                result[i].page_num_range = Some([num, num]);
                result[i].part_title = current_part.clone().or_else(|| Some(String::new()));
            }
        }

        debug!(
            book_id = book.book_id,
            chunks = result.len(),
            "Page matching complete"
        );
        result
    }
}

fn assign(
    chunk: &mut MatchedChunk,
    start_page_id: i64,
    page_offset: i64,
    start_page_num: Option<i64>,
    end_page_num: Option<i64>,
    part: Option<&str>,
) {
    chunk.start_page_id = Some(start_page_id);
    chunk.page_offset = Some(page_offset);
    chunk.page_num_range = Some([start_page_num.unwrap_or(0), end_page_num.unwrap_or(0)]);
    chunk.part_title = Some(part.unwrap_or_default().to_string());
}

/// Estimate every page's normalized length, then redistribute so the
/// allocated total equals `chunk_total`: each page except the last gets
/// its proportional share (rounded), the last page takes the remainder.
fn allocate_page_lengths(book: &ProcessedBook, chunk_total: i64) -> Vec<PageAlloc> {
    let mut estimates: Vec<(i64, Option<i64>, String, i64)> = Vec::new();
    for part in &book.parts {
        let Some(pages) = book.pages.get(part) else {
            continue;
        };
        for page in pages {
            let mut html = page.display_elem.clone();
            html.push('\n');
            let estimated = clean(&strip_html(&html)).chars().count() as i64;
            estimates.push((page.page_id, page.page_num, part.clone(), estimated));
        }
    }

    let estimated_total: i64 = estimates.iter().map(|e| e.3).sum();
    let count = estimates.len();
    let mut remaining = chunk_total;

    estimates
        .into_iter()
        .enumerate()
        .map(|(i, (page_id, page_num, part_title, estimated))| {
            let length = if i == count - 1 {
                remaining
            } else if estimated_total > 0 {
                let share =
                    (chunk_total as f64 * estimated as f64 / estimated_total as f64).round() as i64;
                remaining -= share;
                share
            } else {
                0
            };
            PageAlloc {
                page_id,
                page_num,
                part_title,
                length,
            }
        })
        .collect()
}
