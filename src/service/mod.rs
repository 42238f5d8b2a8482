//! External extraction services and the parsers for their response shapes.

pub mod analysis;
pub mod chat;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{ServiceKind, Settings};
use crate::error::ExtractError;
use crate::image::ImagePayload;

pub use analysis::{AnalysisClient, DocumentAnalysis};
pub use chat::{ChatClient, ChatCompletion};

/// One request for one record. Built and owned by a single worker.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub record_id: i64,
    pub image: ImagePayload,
    pub prompt: String,
    pub query: String,
    pub model: String,
    pub max_tokens: u32,
}

/// Response envelope, tagged by the service variant that produced it.
#[derive(Debug, Clone)]
pub enum ServiceResponse {
    Chat(ChatCompletion),
    Analysis(DocumentAnalysis),
}

impl ServiceResponse {
    /// Raw answer text for `query`. Chat answers ignore the query; analysis
    /// answers are looked up through the query/answer block graph.
    pub fn answer(&self, query: &str) -> Result<String, ExtractError> {
        match self {
            ServiceResponse::Chat(c) => c.answer(),
            ServiceResponse::Analysis(a) => Ok(a.answer(query).unwrap_or_default()),
        }
    }
}

#[async_trait]
pub trait ExtractionService: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, request: &ExtractionRequest) -> Result<ServiceResponse, ExtractError>;
}

pub fn from_settings(settings: &Settings) -> Result<Arc<dyn ExtractionService>> {
    let service: Arc<dyn ExtractionService> = match settings.service {
        ServiceKind::Chat => Arc::new(ChatClient::new(
            settings.openrouter_api_key.as_deref().unwrap_or_default(),
            &settings.openrouter_url,
            settings.request_timeout(),
        )?),
        ServiceKind::Analysis => Arc::new(AnalysisClient::new(
            settings.analysis_url.as_deref().unwrap_or_default(),
            settings.analysis_api_key.as_deref(),
            settings.request_timeout(),
        )?),
    };
    Ok(service)
}
