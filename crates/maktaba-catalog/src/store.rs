//! SQLite-backed catalogue queries.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use maktaba::{Error, Result};
use rusqlite::{Connection, OpenFlags, Row};
use tracing::debug;

use crate::types::{BookFilter, CatalogAuthor, CatalogBook, CatalogCategory};

const BOOK_SELECT: &str = "SELECT b.book_id, b.book_name, b.book_category, c.category_name, \
     b.main_author, a.author_name, b.printed, b.hidden, b.table_of_contents \
     FROM book b \
     LEFT JOIN category c ON b.book_category = c.category_id \
     LEFT JOIN author a ON b.main_author = a.author_id";

/// Read-only handle on the catalogue database file.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    db_path: PathBuf,
}

impl CatalogStore {
    /// Open a catalogue store. Fails if the file does not exist, so a
    /// misconfigured path is caught at startup rather than on the first
    /// request.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if !db_path.is_file() {
            return Err(Error::config(format!(
                "catalogue database not found: {}",
                db_path.display()
            )));
        }
        Ok(Self { db_path })
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::storage(format!("failed to open catalogue: {e}")))
    }

    // ============== Categories ==============

    pub fn get_all_categories(
        &self,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<(Vec<CatalogCategory>, u64)> {
        let conn = self.connect()?;
        let total: u64 = conn
            .query_row("SELECT COUNT(*) FROM category", [], |row| row.get(0))
            .map_err(storage_err)?;

        let sql = paginate(
            "SELECT category_id, category_name, category_order FROM category \
             ORDER BY category_order",
            limit,
            offset,
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map([], category_from_row)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok((rows, total))
    }

    pub fn get_category(&self, category_id: i64) -> Result<Option<CatalogCategory>> {
        let conn = self.connect()?;
        optional(conn.query_row(
            "SELECT category_id, category_name, category_order FROM category \
             WHERE category_id = ?1",
            [category_id],
            category_from_row,
        ))
    }

    pub fn search_categories(
        &self,
        query: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<(Vec<CatalogCategory>, u64)> {
        let conn = self.connect()?;
        let pattern = format!("%{query}%");
        let total: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM category WHERE category_name LIKE ?1",
                [&pattern],
                |row| row.get(0),
            )
            .map_err(storage_err)?;

        let sql = paginate(
            "SELECT category_id, category_name, category_order FROM category \
             WHERE category_name LIKE ?1 ORDER BY category_order",
            limit,
            offset,
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map([&pattern], category_from_row)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok((rows, total))
    }

    // ============== Authors ==============

    pub fn get_all_authors(
        &self,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<(Vec<CatalogAuthor>, u64)> {
        let conn = self.connect()?;
        let total: u64 = conn
            .query_row("SELECT COUNT(*) FROM author", [], |row| row.get(0))
            .map_err(storage_err)?;

        let sql = paginate(
            "SELECT author_id, author_name, death_number, death_text FROM author \
             ORDER BY author_name",
            limit,
            offset,
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map([], author_from_row)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok((rows, total))
    }

    pub fn get_author(&self, author_id: i64) -> Result<Option<CatalogAuthor>> {
        let conn = self.connect()?;
        optional(conn.query_row(
            "SELECT author_id, author_name, death_number, death_text FROM author \
             WHERE author_id = ?1",
            [author_id],
            author_from_row,
        ))
    }

    pub fn search_authors(
        &self,
        query: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<(Vec<CatalogAuthor>, u64)> {
        let conn = self.connect()?;
        let pattern = format!("%{query}%");
        let total: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM author WHERE author_name LIKE ?1",
                [&pattern],
                |row| row.get(0),
            )
            .map_err(storage_err)?;

        let sql = paginate(
            "SELECT author_id, author_name, death_number, death_text FROM author \
             WHERE author_name LIKE ?1 ORDER BY author_name",
            limit,
            offset,
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map([&pattern], author_from_row)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok((rows, total))
    }

    /// Books the author wrote, either as the main author or through the
    /// `author_book` relation.
    pub fn get_author_books(&self, author_id: i64) -> Result<Vec<CatalogBook>> {
        let conn = self.connect()?;
        let sql = format!(
            "{BOOK_SELECT} WHERE b.main_author = ?1 \
             OR b.book_id IN (SELECT book_id FROM author_book WHERE author_id = ?1) \
             ORDER BY b.book_name"
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map([author_id], book_from_row)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok(rows)
    }

    // ============== Books ==============

    pub fn get_book(&self, book_id: i64) -> Result<Option<CatalogBook>> {
        let conn = self.connect()?;
        let sql = format!("{BOOK_SELECT} WHERE b.book_id = ?1");
        optional(conn.query_row(&sql, [book_id], book_from_row))
    }

    pub fn get_books_by_category(
        &self,
        category_id: i64,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<(Vec<CatalogBook>, u64)> {
        self.search_books(
            &BookFilter {
                category_id: Some(category_id),
                ..Default::default()
            },
            None,
            limit,
            offset,
        )
    }

    pub fn get_books_by_author(
        &self,
        author_id: i64,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<(Vec<CatalogBook>, u64)> {
        self.search_books(
            &BookFilter {
                author_id: Some(author_id),
                ..Default::default()
            },
            None,
            limit,
            offset,
        )
    }

    /// Search books with a composed AND filter. When the filter includes
    /// `exported`, `exported_ids` must carry the relational store's known
    /// book ids; the intersection happens here rather than in SQL.
    pub fn search_books(
        &self,
        filter: &BookFilter,
        exported_ids: Option<&HashSet<i64>>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<(Vec<CatalogBook>, u64)> {
        if filter.needs_exported_ids() && exported_ids.is_none() {
            return Err(Error::config(
                "exported filter requires the set of exported book ids",
            ));
        }

        let conn = self.connect()?;
        let (where_clause, params) = build_where(filter);
        let sql = format!("{BOOK_SELECT} {where_clause} ORDER BY b.book_name");
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let mut rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), book_from_row)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;

        if let (Some(exported), Some(ids)) = (filter.exported, exported_ids) {
            rows.retain(|book| ids.contains(&book.book_id) == exported);
        }

        let total = rows.len() as u64;
        let page = apply_page(rows, limit, offset);
        debug!(total, returned = page.len(), "catalogue book search");
        Ok((page, total))
    }

    /// Resolve a filter to the matching book ids, in name order.
    pub fn find_book_ids(
        &self,
        filter: &BookFilter,
        exported_ids: Option<&HashSet<i64>>,
    ) -> Result<Vec<i64>> {
        let (books, _) = self.search_books(filter, exported_ids, None, None)?;
        Ok(books.into_iter().map(|b| b.book_id).collect())
    }
}

fn storage_err(err: rusqlite::Error) -> Error {
    Error::storage(format!("catalogue query failed: {err}"))
}

fn optional<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(storage_err(err)),
    }
}

fn paginate(sql: &str, limit: Option<u64>, offset: Option<u64>) -> String {
    let mut sql = sql.to_string();
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }
    sql
}

fn apply_page<T>(rows: Vec<T>, limit: Option<u64>, offset: Option<u64>) -> Vec<T> {
    let offset = offset.unwrap_or(0) as usize;
    let limit = limit.map_or(usize::MAX, |l| l as usize);
    rows.into_iter().skip(offset).take(limit).collect()
}

fn build_where(filter: &BookFilter) -> (String, Vec<rusqlite::types::Value>) {
    let mut clause = String::from("WHERE 1=1");
    let mut params: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(query) = filter.query.as_deref().filter(|q| !q.is_empty()) {
        clause.push_str(&format!(" AND b.book_name LIKE ?{}", params.len() + 1));
        params.push(rusqlite::types::Value::Text(format!("%{query}%")));
    }
    if let Some(category_id) = filter.category_id {
        clause.push_str(&format!(" AND b.book_category = ?{}", params.len() + 1));
        params.push(rusqlite::types::Value::Integer(category_id));
    }
    if let Some(author_id) = filter.author_id {
        let n = params.len() + 1;
        clause.push_str(&format!(
            " AND (b.main_author = ?{n} \
             OR b.book_id IN (SELECT book_id FROM author_book WHERE author_id = ?{n}))"
        ));
        params.push(rusqlite::types::Value::Integer(author_id));
    }
    if let Some(hidden) = filter.hidden {
        clause.push_str(&format!(" AND b.hidden = ?{}", params.len() + 1));
        params.push(rusqlite::types::Value::Integer(hidden));
    }
    if let Some(has_toc) = filter.has_toc {
        if has_toc {
            clause.push_str(" AND b.table_of_contents IS NOT NULL AND b.table_of_contents != ''");
        } else {
            clause.push_str(" AND (b.table_of_contents IS NULL OR b.table_of_contents = '')");
        }
    }

    (clause, params)
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogCategory> {
    Ok(CatalogCategory {
        category_id: row.get(0)?,
        category_name: row.get(1)?,
        category_order: row.get(2)?,
    })
}

fn author_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogAuthor> {
    Ok(CatalogAuthor {
        author_id: row.get(0)?,
        author_name: row.get(1)?,
        death_number: row.get(2)?,
        death_text: row.get(3)?,
    })
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogBook> {
    Ok(CatalogBook {
        book_id: row.get(0)?,
        book_name: row.get(1)?,
        category_id: row.get(2)?,
        category_name: row.get(3)?,
        author_id: row.get(4)?,
        author_name: row.get(5)?,
        printed: row.get(6)?,
        hidden: row.get(7)?,
        table_of_contents: row.get(8)?,
    })
}
