//! Minimal Gemini client: JSON-mode generation and SSE streaming.

use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::stream::Stream;
use futures::StreamExt;
use maktaba::{Error, Result};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A text-delta stream from the model.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'static>>;

/// Thin client over the Gemini generateContent API.
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Generation knobs for one call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub system_instruction: Option<String>,
    /// When true, ask for `application/json` output.
    pub json_output: bool,
    pub timeout: Option<Duration>,
}

impl GeminiClient {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: API_BASE.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Point the client at another base URL (tests, proxies).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn endpoint(&self, streaming: bool) -> String {
        let method = if streaming {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        format!("{}/models/{}:{}", self.api_base, self.model, method)
    }

    fn build_request(prompt: &str, options: &GenerateOptions) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            system_instruction: options.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: Some(text.clone()),
                }],
            }),
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens,
                response_mime_type: options
                    .json_output
                    .then(|| "application/json".to_string()),
            },
        }
    }

    /// One-shot generation; returns the concatenated candidate text.
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let request = Self::build_request(prompt, options);
        let mut builder = self
            .client
            .post(self.endpoint(false))
            .header("x-goog-api-key", &self.api_key)
            .json(&request);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(format!("Gemini returned {status}: {body}")));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::api(format!("Gemini response parse failed: {e}")))?;

        let text = payload
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<String>();
        if text.is_empty() {
            return Err(Error::api("Gemini returned an empty response"));
        }
        Ok(text)
    }

    /// Streaming generation; yields text deltas as they arrive over SSE.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let request = Self::build_request(prompt, options);
        let mut builder = self
            .client
            .post(format!("{}?alt=sse", self.endpoint(true)))
            .header("x-goog-api-key", &self.api_key)
            .json(&request);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(format!("Gemini returned {status}: {body}")));
        }

        let event_stream = response.bytes_stream().eventsource();
        let deltas = async_stream::stream! {
            let mut event_stream = event_stream;
            while let Some(event) = event_stream.next().await {
                match event {
                    Ok(event) => {
                        if let Ok(chunk) = serde_json::from_str::<GenerateResponse>(&event.data) {
                            for candidate in chunk.candidates {
                                let Some(content) = candidate.content else { continue };
                                for part in content.parts {
                                    if let Some(text) = part.text {
                                        if !text.is_empty() {
                                            yield Ok(text);
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(Error::api(format!("SSE stream error: {e}")));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(deltas))
    }
}

fn classify(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::timeout(format!("Gemini request failed: {err}"))
    } else {
        Error::api(format!("Gemini request failed: {err}"))
    }
}
