use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExtractionRequest, ExtractionService, ServiceResponse};
use crate::error::ExtractError;

/// OpenRouter-compatible chat completions client for vision models.
pub struct ChatClient {
    client: Client,
    endpoint: String,
}

impl ChatClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing chat service API key");
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .context("invalid chat service API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build chat HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

/// `{"choices": [{"message": {"content": "..."}}]}`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletion {
    pub fn parse(body: &str) -> Result<Self, ExtractError> {
        serde_json::from_str(body)
            .map_err(|e| ExtractError::service(format!("malformed chat response: {}", e)))
    }

    /// Text of the first choice. A response without choices is malformed.
    pub fn answer(&self) -> Result<String, ExtractError> {
        let first = self
            .choices
            .first()
            .ok_or_else(|| ExtractError::service("chat response has no choices"))?;
        Ok(first.message.content.clone().unwrap_or_default())
    }
}

fn data_url(request: &ExtractionRequest) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(&request.image.bytes);
    format!("data:{};base64,{}", request.image.mime_type(), encoded)
}

/// Prompt message followed by the image as a data URL.
fn request_body(request: &ExtractionRequest) -> ChatRequest<'_> {
    ChatRequest {
        model: &request.model,
        messages: vec![
            ChatMessage {
                role: "user",
                content: MessageContent::Text(&request.prompt),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url(request) },
                }]),
            },
        ],
        max_tokens: request.max_tokens,
    }
}

#[async_trait]
impl ExtractionService for ChatClient {
    fn name(&self) -> &str {
        "chat"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ServiceResponse, ExtractError> {
        let start = Instant::now();
        let body = request_body(request);

        debug!(record = request.record_id, model = %request.model, "Sending chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(ExtractError::from_reqwest)?;

        let status = response.status();
        let text = response.text().await.map_err(ExtractError::from_reqwest)?;
        if !status.is_success() {
            return Err(ExtractError::from_status(status, &text));
        }

        let completion = ChatCompletion::parse(&text)?;
        debug!(
            record = request.record_id,
            latency_ms = start.elapsed().as_millis() as u64,
            "Chat response received"
        );
        Ok(ServiceResponse::Chat(completion))
    }
}
