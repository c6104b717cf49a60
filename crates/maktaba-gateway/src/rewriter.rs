//! Query rewriting against the LLM.

use std::time::Duration;

use maktaba::{with_retry, Error, Result, RetryPolicy};
use serde::Deserialize;
use tracing::{info, warn};

use crate::categories::{higher_order_categories, resolve_categories};
use crate::gemini::{GeminiClient, GenerateOptions};

const PROMPT_TEMPLATE: &str = include_str!("../prompts/optimize_query.txt");

/// Longest accepted raw query.
pub const MAX_QUERY_LENGTH: usize = 1000;

/// Hard timeout per rewrite request.
const REWRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// An optimized query with optional decomposition and category hints.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RewrittenQuery {
    pub optimized_query: String,
    #[serde(default)]
    pub sub_queries: Option<Vec<String>>,
    /// Resolved to persisted category names before being returned.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

/// Rewrites raw user queries into retrieval-friendly form.
#[derive(Clone)]
pub struct QueryRewriter {
    client: GeminiClient,
    retry_policy: RetryPolicy,
}

impl QueryRewriter {
    #[must_use]
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            retry_policy: RetryPolicy::exponential(3)
                .with_initial_delay(Duration::from_secs(4))
                .with_max_delay(Duration::from_secs(10)),
        }
    }

    /// Rewrite one query. Returns the first result of the model's JSON
    /// list; falls back to the raw query when the model returns nothing
    /// usable.
    pub async fn rewrite(&self, query: &str) -> Result<RewrittenQuery> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        if query.chars().count() > MAX_QUERY_LENGTH {
            return Err(Error::validation(format!(
                "query exceeds maximum length of {MAX_QUERY_LENGTH} characters"
            )));
        }

        let prompt = build_prompt(query);
        let options = GenerateOptions {
            json_output: true,
            timeout: Some(REWRITE_TIMEOUT),
            ..Default::default()
        };

        let raw = with_retry(&self.retry_policy, || async {
            self.client.generate(&prompt, &options).await
        })
        .await?;

        let results: Vec<RewrittenQuery> = serde_json::from_str(&raw)
            .map_err(|e| Error::api(format!("rewriter returned malformed JSON: {e}")))?;

        match results.into_iter().next() {
            Some(mut result) => {
                if let Some(categories) = result.categories.take() {
                    result.categories = Some(resolve_categories(&categories));
                }
                info!(
                    optimized_query = %result.optimized_query,
                    sub_queries = result.sub_queries.as_ref().map_or(0, Vec::len),
                    "Query rewritten"
                );
                Ok(result)
            }
            None => {
                warn!(query, "Rewriter returned no results, using raw query");
                Ok(RewrittenQuery {
                    optimized_query: query.to_string(),
                    sub_queries: None,
                    categories: None,
                })
            }
        }
    }
}

fn build_prompt(query: &str) -> String {
    let categories = higher_order_categories()
        .iter()
        .map(|name| format!("  - {name}"))
        .collect::<Vec<_>>()
        .join("\n");
    let mut prompt = PROMPT_TEMPLATE.replace("{categories}", &categories);
    prompt.push('\n');
    prompt.push_str(query);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rewriter_for(server: &MockServer) -> QueryRewriter {
        let client = GeminiClient::new("key", "gemini-2.5-flash-lite").with_api_base(server.uri());
        QueryRewriter::new(client)
    }

    fn model_json(json: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [
                { "content": { "parts": [{ "text": json }] } }
            ]
        })
    }

    #[test]
    fn test_prompt_lists_categories_and_query() {
        let prompt = build_prompt("ما حكم الوضوء؟");
        assert!(prompt.contains("- الفقة"));
        assert!(prompt.contains("- التفسير"));
        assert!(prompt.ends_with("ما حكم الوضوء؟"));
    }

    #[tokio::test]
    async fn test_rewrite_parses_and_resolves_categories() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(model_json(
                r#"[{"optimized_query":"حكم الوضوء للصلاة","sub_queries":["نواقض الوضوء"],"categories":["الفقة"]}]"#,
            )))
            .mount(&server)
            .await;

        let result = rewriter_for(&server).rewrite("ما حكم الوضوء؟").await.unwrap();
        assert_eq!(result.optimized_query, "حكم الوضوء للصلاة");
        assert_eq!(result.sub_queries.unwrap(), vec!["نواقض الوضوء"]);
        // Higher-order "الفقة" expands to the persisted names.
        let categories = result.categories.unwrap();
        assert!(categories.contains(&"الفقه الشافعي".to_string()));
        assert!(categories.len() > 5);
    }

    #[tokio::test]
    async fn test_rewrite_empty_list_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(model_json("[]")))
            .mount(&server)
            .await;

        let result = rewriter_for(&server).rewrite("سؤالي").await.unwrap();
        assert_eq!(result.optimized_query, "سؤالي");
        assert!(result.sub_queries.is_none());
    }

    #[tokio::test]
    async fn test_rewrite_validates_input() {
        let server = MockServer::start().await;
        let rewriter = rewriter_for(&server);

        assert!(rewriter.rewrite("   ").await.is_err());
        let too_long = "س".repeat(MAX_QUERY_LENGTH + 1);
        let err = rewriter.rewrite(&too_long).await.unwrap_err();
        assert!(err.to_string().contains("maximum length"));
    }

    #[tokio::test]
    async fn test_rewrite_retries_transient_failures() {
        let server = MockServer::start().await;
        // First two calls fail, the third succeeds.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(model_json(
                r#"[{"optimized_query":"سؤال محسن"}]"#,
            )))
            .mount(&server)
            .await;

        let mut rewriter = rewriter_for(&server);
        rewriter.retry_policy = RetryPolicy::exponential(3)
            .with_initial_delay(Duration::from_millis(1));

        let result = rewriter.rewrite("سؤال").await.unwrap();
        assert_eq!(result.optimized_query, "سؤال محسن");
    }
}
