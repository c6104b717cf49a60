//! The stable key layout shared by every service that touches the bucket.

/// Prefix under which a book's raw HTML pages live.
#[must_use]
pub fn raw_prefix(book_id: i64) -> String {
    format!("raw/{book_id}/")
}

/// Key of one raw HTML page.
#[must_use]
pub fn raw_key(book_id: i64, filename: &str) -> String {
    format!("raw/{book_id}/{filename}")
}

/// Key of the processed metadata document.
#[must_use]
pub fn metadata_key(book_id: i64) -> String {
    format!("metadata/{book_id}.json")
}

/// Key of the embedded-chunks JSONL mirror.
#[must_use]
pub fn embeddings_key(book_id: i64) -> String {
    format!("embeddings/{book_id}.jsonl")
}

/// Content type for an uploaded file, by extension.
#[must_use]
pub(crate) fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".htm") || lower.ends_with(".html") {
        "text/html"
    } else if lower.ends_with(".json") {
        "application/json; charset=utf-8"
    } else if lower.ends_with(".jsonl") {
        "application/x-ndjson; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(raw_prefix(42), "raw/42/");
        assert_eq!(raw_key(42, "001.htm"), "raw/42/001.htm");
        assert_eq!(metadata_key(42), "metadata/42.json");
        assert_eq!(embeddings_key(42), "embeddings/42.jsonl");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("001.htm"), "text/html");
        assert_eq!(content_type_for("Cover.HTML"), "text/html");
        assert_eq!(content_type_for("42.json"), "application/json; charset=utf-8");
        assert_eq!(
            content_type_for("42.jsonl"),
            "application/x-ndjson; charset=utf-8"
        );
        assert_eq!(content_type_for("cover.png"), "application/octet-stream");
    }
}
