//! Chunking, page matching, and embedding composed into one pass.

use maktaba::types::{EmbeddedChunk, MatchedChunk, ProcessedBook};
use maktaba::{Error, Result};
use maktaba_embeddings::{Bm25Encoder, DenseEmbedder, ProgressFn};
use maktaba_text_splitters::{BookChunker, ChunkingStats, PageMatcher};
use tracing::info;

/// Chunk a processed book and assign page ranges.
#[must_use]
pub fn chunk_and_match(book: &ProcessedBook) -> (Vec<MatchedChunk>, ChunkingStats) {
    let chunker = BookChunker::new();
    let (chunks, stats) = chunker.chunk_book(book);
    let matched = PageMatcher::new().match_chunks_to_pages(&chunks, book);
    info!(
        book_id = book.book_id,
        num_chunks = matched.len(),
        "Chunking and page matching complete"
    );
    (matched, stats)
}

/// Embed matched chunks: dense vectors from the configured backend
/// (with per-batch progress), sparse vectors from BM25 fitted on this
/// book's own chunks.
pub async fn embed_chunks(
    matched: Vec<MatchedChunk>,
    embedder: &dyn DenseEmbedder,
    progress: Option<&ProgressFn<'_>>,
) -> Result<Vec<EmbeddedChunk>> {
    if matched.is_empty() {
        return Err(Error::api("chunker produced zero chunks"));
    }

    let texts: Vec<String> = matched.iter().map(|c| c.text.clone()).collect();

    let dense_vectors = embedder.embed(&texts, progress).await?;
    if dense_vectors.len() != matched.len() {
        return Err(Error::api(format!(
            "embedder returned {} vectors for {} chunks",
            dense_vectors.len(),
            matched.len()
        )));
    }

    let mut bm25 = Bm25Encoder::new();
    bm25.fit(&texts)?;
    let sparse_vectors = bm25.encode_documents(&texts);

    Ok(matched
        .into_iter()
        .zip(dense_vectors)
        .zip(sparse_vectors)
        .map(|((chunk, dense_vector), sparse_vector)| EmbeddedChunk {
            chunk,
            dense_vector,
            sparse_vector,
        })
        .collect())
}

/// One JSON object per line, the shape mirrored to
/// `embeddings/<book_id>.jsonl`.
pub fn to_jsonl(chunks: &[EmbeddedChunk]) -> Result<String> {
    let mut lines = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        lines.push(serde_json::to_string(chunk)?);
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maktaba::types::{PageRecord, SparseVector};
    use std::collections::BTreeMap;

    struct FixedEmbedder;

    #[async_trait]
    impl DenseEmbedder for FixedEmbedder {
        async fn embed(
            &self,
            texts: &[String],
            progress: Option<&ProgressFn<'_>>,
        ) -> maktaba::Result<Vec<Vec<f32>>> {
            if let Some(progress) = progress {
                progress(texts.len());
            }
            Ok(vec![vec![0.5; 8]; texts.len()])
        }
    }

    fn small_book() -> ProcessedBook {
        let text = "قال المصنف رحمه الله تعالى في مقدمة الكتاب كلاما نافعا مفيدا.";
        let mut pages = BTreeMap::new();
        pages.insert(
            "ج١".to_string(),
            vec![PageRecord {
                page_id: 1,
                page_num: Some(3),
                part_title: "ج١".into(),
                cleaned_text: text.into(),
                display_elem: format!("<div class=\"PageText\"><p>{text}</p></div>"),
            }],
        );
        ProcessedBook {
            book_id: 42,
            book_name: "Example".into(),
            author: Some("النووي".into()),
            category: Some("الفقه".into()),
            parts: vec!["ج١".into()],
            pages,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_produces_embedded_chunks() {
        let book = small_book();
        let (matched, stats) = chunk_and_match(&book);
        assert!(!matched.is_empty());
        assert_eq!(stats.segments_under_limit, 1);

        let embedded = embed_chunks(matched, &FixedEmbedder, None).await.unwrap();
        assert_eq!(embedded[0].dense_vector.len(), 8);
        assert!(!embedded[0].sparse_vector.is_empty());
        // Contiguous order from zero.
        for (i, chunk) in embedded.iter().enumerate() {
            assert_eq!(chunk.chunk.order, i as i64);
        }
    }

    #[tokio::test]
    async fn test_empty_chunks_fail_the_export() {
        let err = embed_chunks(Vec::new(), &FixedEmbedder, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("zero chunks"));
    }

    #[test]
    fn test_jsonl_is_one_record_per_line() {
        let chunk = EmbeddedChunk {
            chunk: MatchedChunk {
                order: 0,
                book_id: 42,
                book_name: "Example".into(),
                author: "".into(),
                category: "".into(),
                text: "نص".into(),
                part_title: Some("ج١".into()),
                start_page_id: Some(1),
                page_offset: Some(0),
                page_num_range: Some([3, 3]),
            },
            dense_vector: vec![0.0; 2],
            sparse_vector: SparseVector::new(),
        };
        let jsonl = to_jsonl(&[chunk.clone(), chunk]).unwrap();
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["book_id"], 42);
            assert!(value["dense_vector"].is_array());
        }
    }
}
