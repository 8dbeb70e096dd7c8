use crate::http::build_client;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl VisionConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
            api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
    #[error("vision service unavailable: {0}")]
    Unavailable(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl VisionError {
    /// Auth/quota failures hit every subsequent call identically, so the
    /// batch aborts instead of skipping the item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VisionError::MissingApiKey | VisionError::Unavailable(_))
    }
}

pub struct VisionClient {
    http: Client,
    config: VisionConfig,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    /// One inference call: instruction text plus the inline image. Returns the
    /// model's raw text; parsing into a typed record happens in `ingest`.
    pub async fn describe_image(
        &self,
        prompt: &str,
        image_bytes: &[u8],
        mime: &str,
    ) -> Result<String, VisionError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(VisionError::MissingApiKey)?;

        let url = format!(
            "{base}/v1beta/models/{model}:generateContent",
            base = self.config.base_url.trim_end_matches('/'),
            model = self.config.model,
        );

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some(prompt.to_string()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: mime.to_string(),
                            data: BASE64.encode(image_bytes),
                        }),
                    },
                ],
            }],
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", key)])
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() {
                    VisionError::Unavailable(err.to_string())
                } else {
                    VisionError::Http(err.to_string())
                }
            })?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
        ) {
            return Err(VisionError::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(VisionError::Http(format!("HTTP {status}")));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| VisionError::InvalidResponse(err.to_string()))?;

        payload
            .candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.parts)
            .find_map(|part| part.text)
            .ok_or_else(|| VisionError::InvalidResponse("no text candidate".into()))
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}
