//! Domain model shared across the export pipeline and the query path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Maximum number of chunks a single book can contribute to the vector
/// store; the chunk primary key is `book_id * CHUNKS_PER_BOOK + order`.
pub const CHUNKS_PER_BOOK: i64 = 10_000_000;

/// Deterministic vector-store primary key for a chunk.
///
/// Two exports of the same book produce the same ids, so upserts replace
/// rather than duplicate.
#[must_use]
pub fn chunk_primary_id(book_id: i64, order: i64) -> i64 {
    book_id * CHUNKS_PER_BOOK + order
}

/// One entry of a book's table of contents, as recorded by the upstream
/// catalogue crawler. Passed through the pipeline untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub id: i64,
    /// Page row the section starts on (wire key `page`).
    #[serde(rename = "page")]
    pub page_ref: Option<i64>,
    /// 0 for top-level sections (wire key `parent`).
    #[serde(rename = "parent")]
    pub parent_id: Option<i64>,
    pub part: Option<i64>,
    pub physical_page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// One content page of a processed book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Monotonic per-book surrogate, assigned in page order.
    pub page_id: i64,
    /// Printed page number, when the page head carries one.
    pub page_num: Option<i64>,
    /// Title of the part this page belongs to; may be empty.
    pub part_title: String,
    /// Cleaned plain text with `**…**` title markers.
    pub cleaned_text: String,
    /// The raw HTML of the page, kept verbatim for display.
    pub display_elem: String,
}

/// The per-book processed metadata document: the canonical structured
/// representation uploaded to `metadata/<book_id>.json` and upserted to
/// the relational store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedBook {
    pub book_id: i64,
    pub book_name: String,
    pub author: Option<String>,
    pub category: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_volumes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_pages: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shamela_pub_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_full: Option<String>,

    /// Distinct part titles in first-seen order.
    pub parts: Vec<String>,
    /// Content pages grouped by part title; within a part, pages keep
    /// book order. Traversal order is defined by `parts`, not by this
    /// map's key order.
    pub pages: BTreeMap<String, Vec<PageRecord>>,
    pub table_of_contents: Option<Vec<TocEntry>>,
}

impl ProcessedBook {
    /// Pages of every part, flattened in `parts` order.
    pub fn pages_in_order(&self) -> impl Iterator<Item = &PageRecord> {
        self.parts
            .iter()
            .filter_map(|part| self.pages.get(part))
            .flatten()
    }

    /// Total number of content pages across all parts.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }
}

/// A chunk after page matching: text plus book identity and the page
/// range it spans. Page fields are absent only when the book had no
/// usable pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedChunk {
    pub order: i64,
    pub book_id: i64,
    pub book_name: String,
    pub author: String,
    pub category: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_page_id: Option<i64>,
    /// Number of pages after `start_page_id` the chunk ends on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_offset: Option<i64>,
    /// `[first_printed, last_printed]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_num_range: Option<[i64; 2]>,
}

/// Sparse vector as `{token_index: weight}`, the shape the vector store
/// accepts for `SPARSE_FLOAT_VECTOR` fields. Serializes to a JSON object
/// with stringified indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseVector(pub BTreeMap<u32, f32>);

impl SparseVector {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, index: u32, weight: f32) {
        self.0.insert(index, weight);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &f32)> {
        self.0.iter()
    }
}

impl FromIterator<(u32, f32)> for SparseVector {
    fn from_iter<I: IntoIterator<Item = (u32, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A fully embedded chunk: what gets written to
/// `embeddings/<book_id>.jsonl` and upserted to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    #[serde(flatten)]
    pub chunk: MatchedChunk,
    pub dense_vector: Vec<f32>,
    pub sparse_vector: SparseVector,
}

/// Everything the export pipeline needs to know about one book, resolved
/// from the catalogue before submission. Kept on the job record so a
/// dead-letter retry can re-run the book without re-querying the
/// catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookExportPlan {
    pub book_id: i64,
    pub book_name: String,
    pub author_name: Option<String>,
    pub category_name: Option<String>,
    pub author_id: Option<i64>,
    pub category_id: Option<i64>,
    pub table_of_contents: Option<Vec<TocEntry>>,
}

impl BookExportPlan {
    /// Minimal plan used when a DLQ entry cannot be re-hydrated from its
    /// original job.
    #[must_use]
    pub fn bare(book_id: i64) -> Self {
        Self {
            book_id,
            book_name: String::new(),
            author_name: None,
            category_name: None,
            author_id: None,
            category_id: None,
            table_of_contents: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_primary_id_layout() {
        assert_eq!(chunk_primary_id(0, 0), 0);
        assert_eq!(chunk_primary_id(42, 0), 420_000_000);
        assert_eq!(chunk_primary_id(42, 7), 420_000_007);
        // Distinct (book, order) pairs never collide below the stride.
        assert_ne!(chunk_primary_id(1, 9_999_999), chunk_primary_id(2, 0));
        assert_eq!(chunk_primary_id(1, 9_999_999) + 1, chunk_primary_id(2, 0));
    }

    #[test]
    fn test_toc_entry_wire_keys() {
        let json = r#"{"id":3,"page":17,"parent":0,"part":1,"physical_page":12,"title":"باب"}"#;
        let entry: TocEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.page_ref, Some(17));
        assert_eq!(entry.parent_id, Some(0));
        let back = serde_json::to_value(&entry).unwrap();
        assert_eq!(back["page"], 17);
        assert_eq!(back["parent"], 0);
        assert!(back.get("page_ref").is_none());
    }

    #[test]
    fn test_sparse_vector_serializes_as_object() {
        let sparse: SparseVector = [(3u32, 0.5f32), (11, 1.25)].into_iter().collect();
        let json = serde_json::to_string(&sparse).unwrap();
        assert_eq!(json, r#"{"3":0.5,"11":1.25}"#);
        let back: SparseVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sparse);
    }

    #[test]
    fn test_embedded_chunk_flattens_fields() {
        let chunk = EmbeddedChunk {
            chunk: MatchedChunk {
                order: 0,
                book_id: 9,
                book_name: "كتاب".into(),
                author: "مؤلف".into(),
                category: "فقه".into(),
                text: "نص".into(),
                part_title: Some("الجزء الأول".into()),
                start_page_id: Some(1),
                page_offset: Some(0),
                page_num_range: Some([5, 6]),
            },
            dense_vector: vec![0.0; 4],
            sparse_vector: SparseVector::new(),
        };
        let value = serde_json::to_value(&chunk).unwrap();
        // JSONL consumers expect a flat record.
        assert_eq!(value["order"], 0);
        assert_eq!(value["text"], "نص");
        assert!(value["dense_vector"].is_array());
        assert!(value.get("chunk").is_none());
    }

    #[test]
    fn test_pages_in_order_follows_parts() {
        let mut pages = BTreeMap::new();
        let page = |id: i64, part: &str| PageRecord {
            page_id: id,
            page_num: Some(id),
            part_title: part.to_string(),
            cleaned_text: format!("page {id}"),
            display_elem: String::new(),
        };
        // BTreeMap would order "أ" before "ب" alphabetically either way;
        // use parts order that differs from key order to prove traversal.
        pages.insert("ب".to_string(), vec![page(1, "ب")]);
        pages.insert("أ".to_string(), vec![page(2, "أ"), page(3, "أ")]);
        let book = ProcessedBook {
            book_id: 1,
            book_name: "x".into(),
            parts: vec!["ب".into(), "أ".into()],
            pages,
            ..Default::default()
        };
        let ids: Vec<i64> = book.pages_in_order().map(|p| p.page_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(book.page_count(), 3);
    }
}
