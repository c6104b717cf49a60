//! Row types and filters for the catalogue store.

use serde::{Deserialize, Serialize};

/// A book category as recorded by the upstream crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCategory {
    pub category_id: i64,
    pub category_name: String,
    pub category_order: Option<i64>,
}

/// An author as recorded by the upstream crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogAuthor {
    pub author_id: i64,
    pub author_name: String,
    pub death_number: Option<i64>,
    pub death_text: Option<String>,
}

/// A book row joined with its author and category names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogBook {
    pub book_id: i64,
    pub book_name: String,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub author_id: Option<i64>,
    pub author_name: Option<String>,
    pub printed: Option<i64>,
    pub hidden: Option<i64>,
    /// Raw table-of-contents JSON, absent for books without one.
    pub table_of_contents: Option<String>,
}

impl CatalogBook {
    /// Whether the crawler recorded a table of contents for this book.
    #[must_use]
    pub fn has_toc(&self) -> bool {
        self.table_of_contents
            .as_deref()
            .is_some_and(|toc| !toc.is_empty())
    }
}

/// Composable AND filter over the book table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BookFilter {
    /// Substring match on `book_name`.
    pub query: Option<String>,
    pub category_id: Option<i64>,
    pub author_id: Option<i64>,
    /// 0/1 flag as stored by the crawler.
    pub hidden: Option<i64>,
    pub has_toc: Option<bool>,
    /// Resolved against the relational store's known book ids.
    pub exported: Option<bool>,
}

impl BookFilter {
    /// Whether the filter needs the set of exported book ids to resolve.
    #[must_use]
    pub fn needs_exported_ids(&self) -> bool {
        self.exported.is_some()
    }
}
