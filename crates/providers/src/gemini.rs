//! Gemini native provider implementation.
//!
//! Uses the Generative Language REST API directly (`v1beta`).
//!
//! Features:
//! - `x-goog-api-key` header authentication
//! - `:countTokens` for context measurement
//! - `:generateContent` with text and inline (base64) media parts
//! - Per-request timeout from configuration

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use gemline_core::error::ProviderError;
use gemline_core::message::{Part, Turn};
use gemline_core::provider::{Candidate, GenerateResult, InferenceBackend};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "models/gemini-1.5-flash";
const API_VERSION: &str = "v1beta";

/// Normalise a model id to the `models/<name>` resource form.
///
/// Blank input falls back to the default flash model.
pub fn normalize_model_name(name: &str) -> String {
    let cleaned = name.trim();
    if cleaned.is_empty() {
        DEFAULT_MODEL.to_string()
    } else if cleaned.starts_with("models/") {
        cleaned.to_string()
    } else {
        format!("models/{cleaned}")
    }
}

/// Gemini Generative Language API provider.
pub struct GeminiProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a new Gemini provider with a request timeout.
    pub fn new(
        api_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "gemini".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build from the `[gemini]` config section.
    pub fn from_config(config: &gemline_config::GeminiConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("GEMINI_API_KEY is not set".into()))?;
        Ok(Self::new(api_key, std::time::Duration::from_secs(config.timeout_secs))?
            .with_base_url(&config.base_url))
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/{API_VERSION}/{}:{method}",
            self.base_url,
            normalize_model_name(model)
        )
    }

    /// Convert turns to the API `contents` array.
    fn to_api_contents(turns: &[Turn]) -> Vec<ApiContent> {
        turns
            .iter()
            .map(|turn| ApiContent {
                role: Some(turn.role.as_str().to_string()),
                parts: turn.parts.iter().map(Self::to_api_part).collect(),
            })
            .collect()
    }

    fn to_api_part(part: &Part) -> ApiPart {
        match part {
            Part::Text { content } => ApiPart {
                text: Some(content.clone()),
                inline_data: None,
            },
            Part::InlineMedia { bytes, mime_type } => ApiPart {
                text: None,
                inline_data: Some(ApiBlob {
                    mime_type: mime_type.clone(),
                    data: BASE64.encode(bytes),
                }),
            },
        }
    }

    /// Convert an API response into our tagged result.
    ///
    /// Parts that are neither text nor decodable inline data (function calls,
    /// code execution, ...) are dropped.
    fn response_to_result(resp: GenerateContentResponse) -> GenerateResult {
        let candidates = resp
            .candidates
            .into_iter()
            .map(|c| Candidate {
                parts: c
                    .content
                    .map(|content| content.parts)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| match (p.text, p.inline_data) {
                        (Some(text), _) => Some(Part::text(text)),
                        (None, Some(blob)) => BASE64
                            .decode(blob.data.as_bytes())
                            .ok()
                            .map(|bytes| Part::media(bytes, blob.mime_type)),
                        (None, None) => None,
                    })
                    .collect(),
            })
            .collect();
        GenerateResult::Candidates(candidates)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(response).await
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if response.status().is_success() {
        return Ok(response);
    }
    if status == 429 {
        return Err(ProviderError::RateLimited {
            retry_after_secs: 5,
        });
    }
    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid Gemini API key".into(),
        ));
    }

    let error_body = response.text().await.unwrap_or_default();
    if status == 404 {
        return Err(ProviderError::ModelNotFound(error_body));
    }
    warn!(status, body = %error_body, "Gemini API error");
    Err(ProviderError::ApiError {
        status_code: status,
        message: error_body,
    })
}

#[async_trait]
impl InferenceBackend for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count_tokens(
        &self,
        model: &str,
        contents: &[Turn],
    ) -> std::result::Result<Option<u32>, ProviderError> {
        let url = self.endpoint(model, "countTokens");
        let body = ContentsRequest {
            contents: Self::to_api_contents(contents),
        };

        let resp: CountTokensResponse = self
            .post(&url, &body)
            .await?
            .json()
            .await
            .map_err(|e| {
                ProviderError::InvalidResponse(format!("Failed to parse countTokens response: {e}"))
            })?;

        debug!(provider = "gemini", model, total = ?resp.total_tokens, "Counted tokens");
        Ok(resp.total_tokens.filter(|&n| n > 0))
    }

    async fn generate_content(
        &self,
        model: &str,
        contents: &[Turn],
    ) -> std::result::Result<GenerateResult, ProviderError> {
        let url = self.endpoint(model, "generateContent");
        let body = ContentsRequest {
            contents: Self::to_api_contents(contents),
        };

        debug!(provider = "gemini", model, turns = contents.len(), "Sending generateContent request");

        let resp: GenerateContentResponse = self
            .post(&url, &body)
            .await?
            .json()
            .await
            .map_err(|e| {
                ProviderError::InvalidResponse(format!(
                    "Failed to parse generateContent response: {e}"
                ))
            })?;

        if let Some(ref feedback) = resp.prompt_feedback
            && let Some(ref reason) = feedback.block_reason
        {
            warn!(provider = "gemini", reason = %reason, "Prompt blocked by safety filters");
        }

        Ok(Self::response_to_result(resp))
    }

    async fn health_check(&self, model: &str) -> std::result::Result<bool, ProviderError> {
        let url = format!(
            "{}/{API_VERSION}/{}",
            self.base_url,
            normalize_model_name(model)
        );
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;
        Ok(response.status().is_success())
    }
}

// --- Gemini API types ---

#[derive(Debug, Serialize)]
struct ContentsRequest {
    contents: Vec<ApiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<ApiBlob>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountTokensResponse {
    #[serde(default)]
    total_tokens: Option<u32>,
}
