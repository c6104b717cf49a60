//! Grounded answer generation from retrieved sources.

use std::time::Duration;

use maktaba::Result;
use tracing::info;

use crate::gemini::{GeminiClient, GenerateOptions, TextStream};
use crate::models::SourceData;

const SYSTEM_INSTRUCTION: &str = include_str!("../prompts/system_instruction.txt");

/// Default per-answer timeout.
const ASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Calls the answer model with the user query and formatted sources.
#[derive(Clone)]
pub struct AskClient {
    client: GeminiClient,
    timeout: Duration,
}

impl AskClient {
    #[must_use]
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            timeout: ASK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn options(&self, temperature: f32, max_tokens: u32) -> GenerateOptions {
        GenerateOptions {
            temperature: Some(temperature),
            max_output_tokens: Some(max_tokens),
            system_instruction: Some(SYSTEM_INSTRUCTION.to_string()),
            json_output: false,
            timeout: Some(self.timeout),
        }
    }

    /// Full (non-streaming) answer.
    pub async fn ask(
        &self,
        query: &str,
        sources: &[SourceData],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let prompt = build_prompt(query, sources);
        info!(sources = sources.len(), "Generating answer");
        self.client
            .generate(&prompt, &self.options(temperature, max_tokens))
            .await
    }

    /// Streaming answer: a stream of text deltas.
    pub async fn ask_stream(
        &self,
        query: &str,
        sources: &[SourceData],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<TextStream> {
        let prompt = build_prompt(query, sources);
        info!(sources = sources.len(), "Generating streaming answer");
        self.client
            .generate_stream(&prompt, &self.options(temperature, max_tokens))
            .await
    }
}

/// Lay the sources out the way the answer model expects: one block per
/// source with its book, author, pages, part, and category labels.
fn build_prompt(query: &str, sources: &[SourceData]) -> String {
    let formatted: Vec<String> = sources
        .iter()
        .map(|s| {
            format!(
                "اسم الكتاب: {}\nالمؤلف: {}\nالصفحات: {}-{}\nعنوان الجزء: {}\nالتصنيف: {}\nالنص:\n{}",
                s.book_name,
                s.author,
                s.page_num_range.first().copied().unwrap_or(0),
                s.page_num_range.last().copied().unwrap_or(0),
                s.part_title,
                s.category,
                s.text.trim(),
            )
        })
        .collect();

    format!(
        "السؤال:\n{}\n\nالمصادر:\n\n{}",
        query.trim(),
        formatted.join("\n\n---\n\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(book: &str, text: &str) -> SourceData {
        SourceData {
            distance: 0.9,
            id: 420_000_000,
            book_id: 42,
            book_name: book.to_string(),
            order: 0,
            author: "النووي".into(),
            category: "الفقه الشافعي".into(),
            part_title: "الجزء الأول".into(),
            start_page_id: 1,
            page_offset: 0,
            page_num_range: vec![3, 5],
            text: text.to_string(),
        }
    }

    #[test]
    fn test_prompt_contains_query_and_source_labels() {
        let prompt = build_prompt(
            "ما حكم الوضوء؟",
            &[source("المجموع", "نص الدليل الأول")],
        );
        assert!(prompt.contains("ما حكم الوضوء؟"));
        assert!(prompt.contains("اسم الكتاب: المجموع"));
        assert!(prompt.contains("الصفحات: 3-5"));
        assert!(prompt.contains("نص الدليل الأول"));
    }

    #[test]
    fn test_prompt_separates_sources() {
        let prompt = build_prompt(
            "سؤال",
            &[source("كتاب أ", "نص أ"), source("كتاب ب", "نص ب")],
        );
        assert_eq!(prompt.matches("---").count(), 1);
        assert!(prompt.contains("كتاب أ"));
        assert!(prompt.contains("كتاب ب"));
    }
}
