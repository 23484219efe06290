use std::str::FromStr;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

const GEMINI_MODEL: &str = "gemini-2.0-flash";
const MISTRAL_MODEL: &str = "mistral-small-latest";
const MISTRAL_MAX_TOKENS: u32 = 300;

/// LLM backend used for summarization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    #[default]
    Gemini,
    Mistral,
}

impl Model {
    /// Characters per chunk sent to the provider
    pub fn chunk_size(self) -> usize {
        match self {
            Model::Gemini => 20_000,
            Model::Mistral => 40_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Model::Gemini => "gemini",
            Model::Mistral => "mistral",
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Model::Gemini),
            "mistral" => Ok(Model::Mistral),
            other => Err(format!("unsupported model: {other} (expected gemini or mistral)")),
        }
    }
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("{model} rate limit exceeded")]
    RateLimited { model: Model },

    #[error("{model} API returned {status}: {body}")]
    Http {
        model: Model,
        status: StatusCode,
        body: String,
    },

    #[error("request to {model} failed: {source}")]
    Request {
        model: Model,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected {model} API response format")]
    Format { model: Model },

    #[error("{var} is not set (required for {model} summarization)")]
    MissingKey { model: Model, var: &'static str },
}

/// Summarizes one chunk of text with the given model
#[async_trait]
pub trait ChunkSummarizer: Send + Sync {
    async fn summarize_chunk(&self, model: Model, text: &str) -> Result<String, SummarizeError>;
}

/// Outcome of summarizing a whole transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub text: String,
    pub chunks_total: usize,
    pub chunks_summarized: usize,
    pub rate_limited: bool,
}

/// Split text into pieces of at most `size` characters, on char boundaries
pub fn chunk_text(text: &str, size: usize) -> Vec<&str> {
    if text.is_empty() || size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == size {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&text[start..]);
    chunks
}

/// Summarize a transcript chunk by chunk, sequentially.
///
/// A rate-limit response stops the pipeline and returns what was summarized so
/// far. Any other chunk failure is logged and the chunk is skipped.
pub async fn summarize_transcript(summarizer: &dyn ChunkSummarizer, transcript: &str, model: Model) -> Summary {
    let chunks = chunk_text(transcript, model.chunk_size());
    info!(
        "Summarizing {} chars in {} chunk(s) with {model}",
        transcript.chars().count(),
        chunks.len()
    );

    let mut summaries = Vec::new();
    let mut rate_limited = false;

    for (i, chunk) in chunks.iter().enumerate() {
        match summarizer.summarize_chunk(model, chunk).await {
            Ok(summary) if summary.is_empty() => debug!("Chunk {} produced an empty summary", i + 1),
            Ok(summary) => summaries.push(summary),
            Err(SummarizeError::RateLimited { .. }) => {
                warn!(
                    "Rate limit exceeded at chunk {}/{}. Returning summarized content so far.",
                    i + 1,
                    chunks.len()
                );
                rate_limited = true;
                break;
            }
            Err(e) => error!("Error summarizing chunk {}: {e}", i + 1),
        }
    }

    Summary {
        chunks_total: chunks.len(),
        chunks_summarized: summaries.len(),
        text: summaries.join(" "),
        rate_limited,
    }
}

/// HTTP client for the Gemini and Mistral APIs
pub struct LlmClient {
    client: reqwest::Client,
    gemini_api_key: Option<String>,
    mistral_api_key: Option<String>,
    gemini_base_url: String,
    mistral_base_url: String,
}

impl LlmClient {
    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            gemini_api_key: config.gemini_api_key.clone(),
            mistral_api_key: config.mistral_api_key.clone(),
            gemini_base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            mistral_base_url: config.mistral_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn summarize_gemini(&self, text: &str) -> Result<String, SummarizeError> {
        let model = Model::Gemini;
        let api_key = self.gemini_api_key.as_deref().ok_or(SummarizeError::MissingKey {
            model,
            var: "GEMINI_API_KEY",
        })?;

        debug!("Summarizing {} chars via Gemini ({GEMINI_MODEL})", text.len());

        let url = format!("{}/v1beta/models/{GEMINI_MODEL}:generateContent", self.gemini_base_url);
        let body = serde_json::json!({
            "contents": [
                {
                    "parts": [
                        { "text": format!("Summarize this and make notes of key points: {text}") }
                    ]
                }
            ]
        });

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&body);

        let json = send(model, request).await?;
        extract_gemini_text(&json).ok_or(SummarizeError::Format { model })
    }

    async fn summarize_mistral(&self, text: &str) -> Result<String, SummarizeError> {
        let model = Model::Mistral;
        let api_key = self.mistral_api_key.as_deref().ok_or(SummarizeError::MissingKey {
            model,
            var: "MISTRAL_API_KEY",
        })?;

        debug!("Summarizing {} chars via Mistral ({MISTRAL_MODEL})", text.len());

        let url = format!("{}/v1/chat/completions", self.mistral_base_url);
        let body = serde_json::json!({
            "model": MISTRAL_MODEL,
            "messages": [
                {
                    "role": "user",
                    "content": format!("make detailed note from this : {text}")
                }
            ],
            "max_tokens": MISTRAL_MAX_TOKENS
        });

        let request = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&body);

        let json = send(model, request).await?;
        extract_mistral_text(&json).ok_or(SummarizeError::Format { model })
    }
}

#[async_trait]
impl ChunkSummarizer for LlmClient {
    async fn summarize_chunk(&self, model: Model, text: &str) -> Result<String, SummarizeError> {
        match model {
            Model::Gemini => self.summarize_gemini(text).await,
            Model::Mistral => self.summarize_mistral(text).await,
        }
    }
}

/// Send a provider request. Request errors are stored without their URL.
async fn send(model: Model, request: reqwest::RequestBuilder) -> Result<serde_json::Value, SummarizeError> {
    let resp = request.send().await.map_err(|source| SummarizeError::Request {
        model,
        source: source.without_url(),
    })?;

    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SummarizeError::RateLimited { model });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SummarizeError::Http { model, status, body });
    }

    resp.json().await.map_err(|source| SummarizeError::Request {
        model,
        source: source.without_url(),
    })
}

fn extract_gemini_text(json: &serde_json::Value) -> Option<String> {
    json.get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}

fn extract_mistral_text(json: &serde_json::Value) -> Option<String> {
    json.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Replays scripted results in order and records what it was sent
    struct Scripted {
        results: Mutex<Vec<Result<String, SummarizeError>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(mut results: Vec<Result<String, SummarizeError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChunkSummarizer for Scripted {
        async fn summarize_chunk(&self, _model: Model, text: &str) -> Result<String, SummarizeError> {
            self.seen.lock().unwrap().push(text.chars().count());
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("extra".to_string()))
        }
    }

    #[test]
    fn test_model_chunk_sizes() {
        assert_eq!(Model::Gemini.chunk_size(), 20_000);
        assert_eq!(Model::Mistral.chunk_size(), 40_000);
        assert_eq!(Model::default(), Model::Gemini);
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!("gemini".parse::<Model>().unwrap(), Model::Gemini);
        assert_eq!("Mistral".parse::<Model>().unwrap(), Model::Mistral);
        assert!("gpt-4o".parse::<Model>().is_err());
    }

    #[test]
    fn test_chunk_text_sizes() {
        let text = "a".repeat(45_000);
        let chunks = chunk_text(&text, Model::Gemini.chunk_size());
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![20_000, 20_000, 5_000]);

        let chunks = chunk_text(&text, Model::Mistral.chunk_size());
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_chunk_text_char_boundaries() {
        let text = "héllo wörld";
        let chunks = chunk_text(text, 4);
        assert_eq!(chunks, vec!["héll", "o wö", "rld"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_text_exact_multiple_and_empty() {
        assert_eq!(chunk_text("abcdef", 3), vec!["abc", "def"]);
        assert!(chunk_text("", 3).is_empty());
    }

    #[tokio::test]
    async fn test_summarize_joins_chunks() {
        let summarizer = Scripted::new(vec![Ok("one".to_string()), Ok("two".to_string())]);
        let transcript = "x".repeat(30_000);

        let summary = summarize_transcript(&summarizer, &transcript, Model::Gemini).await;
        assert_eq!(summary.text, "one two");
        assert_eq!(summary.chunks_total, 2);
        assert_eq!(summary.chunks_summarized, 2);
        assert!(!summary.rate_limited);
        assert_eq!(*summarizer.seen.lock().unwrap(), vec![20_000, 10_000]);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_partial() {
        let summarizer = Scripted::new(vec![
            Ok("first".to_string()),
            Ok("second".to_string()),
            Err(SummarizeError::RateLimited { model: Model::Gemini }),
            Ok("never".to_string()),
        ]);
        let transcript = "y".repeat(70_000);

        let summary = summarize_transcript(&summarizer, &transcript, Model::Gemini).await;
        assert_eq!(summary.text, "first second");
        assert!(summary.rate_limited);
        assert_eq!(summary.chunks_total, 4);
        assert_eq!(summarizer.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_on_first_chunk_is_empty() {
        let summarizer = Scripted::new(vec![Err(SummarizeError::RateLimited { model: Model::Mistral })]);
        let summary = summarize_transcript(&summarizer, "short transcript", Model::Mistral).await;
        assert_eq!(summary.text, "");
        assert!(summary.rate_limited);
    }

    #[tokio::test]
    async fn test_other_errors_skip_chunk() {
        let summarizer = Scripted::new(vec![
            Err(SummarizeError::Format { model: Model::Gemini }),
            Ok("kept".to_string()),
        ]);
        let transcript = "z".repeat(25_000);

        let summary = summarize_transcript(&summarizer, &transcript, Model::Gemini).await;
        assert_eq!(summary.text, "kept");
        assert_eq!(summary.chunks_summarized, 1);
        assert!(!summary.rate_limited);
    }

    #[tokio::test]
    async fn test_missing_key_is_reported() {
        let llm = LlmClient::from_config(reqwest::Client::new(), &Config::default());
        let err = llm.summarize_chunk(Model::Mistral, "text").await.unwrap_err();
        assert!(matches!(err, SummarizeError::MissingKey { var: "MISTRAL_API_KEY", .. }));
    }

    #[derive(Debug, Clone)]
    struct SeenRequest {
        path: String,
        query: Option<String>,
        headers: axum::http::HeaderMap,
        body: serde_json::Value,
    }

    #[derive(Clone)]
    struct Provider {
        status: StatusCode,
        reply: serde_json::Value,
        seen: Arc<Mutex<Vec<SeenRequest>>>,
    }

    async fn provider_reply(
        axum::extract::State(provider): axum::extract::State<Provider>,
        uri: axum::http::Uri,
        headers: axum::http::HeaderMap,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> (StatusCode, axum::Json<serde_json::Value>) {
        provider.seen.lock().unwrap().push(SeenRequest {
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body,
        });
        (provider.status, axum::Json(provider.reply.clone()))
    }

    /// Serve one canned reply on a local port; returns the base URL and the request log
    async fn spawn_provider(status: StatusCode, reply: serde_json::Value) -> (String, Arc<Mutex<Vec<SeenRequest>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider = Provider {
            status,
            reply,
            seen: seen.clone(),
        };
        let app = axum::Router::new().fallback(provider_reply).with_state(provider);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn client_for(base_url: &str) -> LlmClient {
        let config = Config {
            gemini_api_key: Some("gemini-test-key".to_string()),
            mistral_api_key: Some("mistral-test-key".to_string()),
            gemini_base_url: base_url.to_string(),
            mistral_base_url: base_url.to_string(),
            ..Config::default()
        };
        LlmClient::from_config(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn test_gemini_request_shape() {
        let reply = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "gemini notes" }] } }]
        });
        let (base, seen) = spawn_provider(StatusCode::OK, reply).await;

        let summary = client_for(&base).summarize_chunk(Model::Gemini, "the transcript").await.unwrap();
        assert_eq!(summary, "gemini notes");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let req = &seen[0];
        assert_eq!(req.path, "/v1beta/models/gemini-2.0-flash:generateContent");
        assert!(req.query.is_none());
        assert_eq!(req.headers.get("x-goog-api-key").unwrap(), "gemini-test-key");
        assert_eq!(
            req.body["contents"][0]["parts"][0]["text"],
            "Summarize this and make notes of key points: the transcript"
        );
    }

    #[tokio::test]
    async fn test_mistral_request_shape() {
        let reply = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "mistral notes" } }]
        });
        let (base, seen) = spawn_provider(StatusCode::OK, reply).await;

        let summary = client_for(&base).summarize_chunk(Model::Mistral, "the transcript").await.unwrap();
        assert_eq!(summary, "mistral notes");

        let seen = seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.path, "/v1/chat/completions");
        assert_eq!(req.headers.get("authorization").unwrap(), "Bearer mistral-test-key");
        assert_eq!(req.body["model"], "mistral-small-latest");
        assert_eq!(req.body["max_tokens"], 300);
        assert_eq!(req.body["messages"][0]["role"], "user");
        assert_eq!(
            req.body["messages"][0]["content"],
            "make detailed note from this : the transcript"
        );
    }

    #[tokio::test]
    async fn test_http_429_is_rate_limited() {
        let (base, _) = spawn_provider(StatusCode::TOO_MANY_REQUESTS, serde_json::json!({})).await;
        let llm = client_for(&base);

        let err = llm.summarize_chunk(Model::Gemini, "text").await.unwrap_err();
        assert!(matches!(err, SummarizeError::RateLimited { model: Model::Gemini }));

        let err = llm.summarize_chunk(Model::Mistral, "text").await.unwrap_err();
        assert!(matches!(err, SummarizeError::RateLimited { model: Model::Mistral }));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (base, _) = spawn_provider(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({"error": "upstream down"}),
        )
        .await;

        let err = client_for(&base).summarize_chunk(Model::Mistral, "text").await.unwrap_err();
        match err {
            SummarizeError::Http { model, status, body } => {
                assert_eq!(model, Model::Mistral);
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(body.contains("upstream down"));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_format_error() {
        let (base, _) = spawn_provider(StatusCode::OK, serde_json::json!({"candidates": []})).await;
        let err = client_for(&base).summarize_chunk(Model::Gemini, "text").await.unwrap_err();
        assert!(matches!(err, SummarizeError::Format { model: Model::Gemini }));
    }

    #[tokio::test]
    async fn test_pipeline_stops_on_provider_429() {
        let (base, seen) = spawn_provider(StatusCode::TOO_MANY_REQUESTS, serde_json::json!({})).await;
        let transcript = "w".repeat(45_000);

        let summary = summarize_transcript(&client_for(&base), &transcript, Model::Gemini).await;
        assert_eq!(summary.text, "");
        assert!(summary.rate_limited);
        assert_eq!(summary.chunks_total, 3);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_request_error_hides_api_key() {
        let config = Config {
            gemini_api_key: Some("SUPERSECRETKEY123".to_string()),
            gemini_base_url: "http://127.0.0.1:1".to_string(),
            ..Config::default()
        };
        let llm = LlmClient::from_config(reqwest::Client::new(), &config);

        let err = llm.summarize_chunk(Model::Gemini, "text").await.unwrap_err();
        assert!(matches!(err, SummarizeError::Request { .. }));
        assert!(!err.to_string().contains("SUPERSECRETKEY123"));
        assert!(!format!("{err:?}").contains("SUPERSECRETKEY123"));
    }

    #[test]
    fn test_extract_gemini_text() {
        let json = serde_json::json!({
            "candidates": [
                {
                    "content": {
                        "parts": [{ "text": "Key points: ..." }],
                        "role": "model"
                    }
                }
            ]
        });
        assert_eq!(extract_gemini_text(&json).unwrap(), "Key points: ...");
    }

    #[test]
    fn test_extract_gemini_text_empty() {
        let json = serde_json::json!({"candidates": []});
        assert!(extract_gemini_text(&json).is_none());
    }

    #[test]
    fn test_extract_mistral_text() {
        let json = serde_json::json!({
            "choices": [
                {
                    "message": {
                        "role": "assistant",
                        "content": "Detailed notes."
                    }
                }
            ]
        });
        assert_eq!(extract_mistral_text(&json).unwrap(), "Detailed notes.");
    }

    #[test]
    fn test_extract_mistral_text_empty() {
        let json = serde_json::json!({"choices": []});
        assert!(extract_mistral_text(&json).is_none());
    }
}
