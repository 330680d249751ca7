//! AI-assisted review through the Gemini `generateContent` REST API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::lint::LocalAnalyzer;
use super::{Analyzer, AnalyzerError, CodeReport, Result};
use crate::config::AnalysisConfig;

/// Public Gemini API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

const REVIEW_PROMPT: &str = "You are a Python code reviewer. Provide concise suggestions, \
potential bugs, and areas for improvement for the following code:\n\n";

/// Local heuristics plus a Gemini review.
///
/// Without an API key every call reports [`AnalyzerError::NotConfigured`].
/// Sources with a syntax error are returned without a review.
#[derive(Debug, Clone)]
pub struct GeminiAnalyzer {
    local: LocalAnalyzer,
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_output_tokens: u32,
}

impl GeminiAnalyzer {
    /// Create an analyzer from analysis configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or a local rule cannot be built.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AnalyzerError::Request(e.to_string()))?;

        Ok(Self {
            local: LocalAnalyzer::from_config(config)?,
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: config.gemini_model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            max_output_tokens: config.max_output_tokens,
        })
    }

    /// Send requests to `endpoint` instead of the public API.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Whether an API key is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn review(&self, api_key: &str, source: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );
        let body = json!({
            "contents": [{"parts": [{"text": format!("{REVIEW_PROMPT}{source}")}]}],
            "generationConfig": {"maxOutputTokens": self.max_output_tokens},
        });

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalyzerError::Request("review request timed out".to_string())
                } else {
                    AnalyzerError::Request(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            return Err(AnalyzerError::BadResponse(format!("{status}: {error_body}")));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| AnalyzerError::BadResponse(e.to_string()))?;
        parsed
            .text()
            .ok_or_else(|| AnalyzerError::BadResponse("response contained no text".to_string()))
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn analyze(&self, source: &str) -> Result<CodeReport> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AnalyzerError::NotConfigured("no Gemini API key".to_string()))?;

        let mut report = self.local.report(source);
        if report.syntax_error.is_some() {
            return Ok(report);
        }

        match self.review(api_key, source).await {
            Ok(text) => {
                debug!(model = %self.model, chars = text.len(), "Received review");
                report.ai_review = Some(text);
                Ok(report)
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "Review failed");
                Err(e)
            }
        }
    }
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

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::*;

    fn config(api_key: Option<&str>) -> AnalysisConfig {
        AnalysisConfig {
            api_key: api_key.map(String::from),
            timeout_secs: 5,
            ..AnalysisConfig::default()
        }
    }

    async fn fake_gemini(status: StatusCode, reply: Value) -> String {
        async fn handler(
            State((status, reply)): State<(StatusCode, Value)>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            assert_eq!(headers["x-goog-api-key"], "test-key");
            assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
            let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
            assert!(prompt.contains("x = 1"));
            (status, Json(reply))
        }

        let app = Router::new()
            .route("/v1beta/models/{model}", post(handler))
            .with_state((status, reply));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let analyzer = GeminiAnalyzer::from_config(&config(None)).unwrap();
        assert!(!analyzer.is_configured());

        let err = analyzer.analyze("x = 1").await.unwrap_err();
        assert!(matches!(err, AnalyzerError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_blank_key_is_not_configured() {
        let analyzer = GeminiAnalyzer::from_config(&config(Some("  "))).unwrap();
        assert!(!analyzer.is_configured());
    }

    #[tokio::test]
    async fn test_review_is_attached() {
        let endpoint = fake_gemini(
            StatusCode::OK,
            serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "Looks fine. "}, {"text": "Add tests."}]}}]
            }),
        )
        .await;
        let analyzer = GeminiAnalyzer::from_config(&config(Some("test-key")))
            .unwrap()
            .with_endpoint(endpoint);

        let report = analyzer.analyze("x = 1\n").await.unwrap();
        assert_eq!(report.ai_review.as_deref(), Some("Looks fine. Add tests."));
        assert_eq!(report.metrics.unwrap().lines, 1);
    }

    #[tokio::test]
    async fn test_error_status_is_bad_response() {
        let endpoint = fake_gemini(
            StatusCode::FORBIDDEN,
            serde_json::json!({"error": {"message": "API key invalid"}}),
        )
        .await;
        let analyzer = GeminiAnalyzer::from_config(&config(Some("test-key")))
            .unwrap()
            .with_endpoint(endpoint);

        let err = analyzer.analyze("x = 1\n").await.unwrap_err();
        assert!(matches!(err, AnalyzerError::BadResponse(ref m) if m.contains("403")));
    }

    #[tokio::test]
    async fn test_empty_candidates_is_bad_response() {
        let endpoint = fake_gemini(StatusCode::OK, serde_json::json!({"candidates": []})).await;
        let analyzer = GeminiAnalyzer::from_config(&config(Some("test-key")))
            .unwrap()
            .with_endpoint(endpoint);

        assert!(matches!(
            analyzer.analyze("x = 1\n").await,
            Err(AnalyzerError::BadResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_syntax_error_skips_review() {
        // Nothing listens here; a request would fail.
        let analyzer = GeminiAnalyzer::from_config(&config(Some("test-key")))
            .unwrap()
            .with_endpoint("http://127.0.0.1:9");

        let report = analyzer.analyze("x = (1\n").await.unwrap();
        assert!(report.syntax_error.is_some());
        assert!(report.ai_review.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let analyzer = GeminiAnalyzer::from_config(&config(Some("test-key")))
            .unwrap()
            .with_endpoint("http://127.0.0.1:9");

        assert!(matches!(
            analyzer.analyze("x = 1\n").await,
            Err(AnalyzerError::Request(_))
        ));
    }
}
