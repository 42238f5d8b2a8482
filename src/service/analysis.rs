//! Document-analysis service answering natural-language queries against a page.
//!
//! The response is a flat list of blocks. `QUERY` blocks carry the query text and
//! point through an `ANSWER` relationship at `QUERY_RESULT` blocks holding the text.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ExtractionRequest, ExtractionService, ServiceResponse};
use crate::error::ExtractError;

pub struct AnalysisClient {
    client: Client,
    endpoint: String,
}

impl AnalysisClient {
    pub fn new(endpoint: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!endpoint.trim().is_empty(), "missing analysis service URL");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .context("invalid analysis service API key")?,
            );
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build analysis HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim().to_string(),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AnalyzeRequest<'a> {
    document: Document,
    feature_types: [&'static str; 1],
    queries_config: QueriesConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Document {
    bytes: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueriesConfig<'a> {
    queries: Vec<QuerySpec<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct QuerySpec<'a> {
    text: &'a str,
}

/// `{"Blocks": [...]}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentAnalysis {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    pub id: String,
    pub block_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub query: Option<QueryText>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryText {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Relationship {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryAnswer {
    pub text: String,
    pub confidence: f64,
}

impl DocumentAnalysis {
    pub fn parse(body: &str) -> Result<Self, ExtractError> {
        serde_json::from_str(body)
            .map_err(|e| ExtractError::service(format!("malformed analysis response: {}", e)))
    }

    /// Every query in the response mapped to its first resolvable answer.
    pub fn answers(&self) -> HashMap<String, QueryAnswer> {
        let results: HashMap<&str, &Block> = self
            .blocks
            .iter()
            .filter(|b| b.block_type == "QUERY_RESULT")
            .map(|b| (b.id.as_str(), b))
            .collect();

        let mut out = HashMap::new();
        for block in self.blocks.iter().filter(|b| b.block_type == "QUERY") {
            let Some(query) = &block.query else {
                continue;
            };
            let found = block
                .relationships
                .iter()
                .filter(|r| r.kind == "ANSWER")
                .flat_map(|r| r.ids.iter())
                .find_map(|id| results.get(id.as_str()));
            match found {
                Some(result) => {
                    out.insert(
                        query.text.clone(),
                        QueryAnswer {
                            text: result.text.clone().unwrap_or_default(),
                            confidence: result.confidence.unwrap_or(0.0),
                        },
                    );
                }
                None => warn!(query = %query.text, "No answer block for query"),
            }
        }
        out
    }

    /// Answer text for `query`, or `None` when the service returned no answer.
    ///
    /// Matches the echoed query text exactly, then ignoring case and surrounding
    /// whitespace. A response carrying a single query is taken as answering it.
    pub fn answer(&self, query: &str) -> Option<String> {
        let mut answers = self.answers();
        let key = if answers.contains_key(query) {
            Some(query.to_string())
        } else {
            answers
                .keys()
                .find(|k| k.trim().eq_ignore_ascii_case(query.trim()))
                .cloned()
                .or_else(|| {
                    let queries = self.blocks.iter().filter(|b| b.block_type == "QUERY").count();
                    if queries == 1 {
                        answers.keys().next().cloned()
                    } else {
                        None
                    }
                })
        };
        key.and_then(|k| answers.remove(&k)).map(|a| {
            debug!(query, confidence = a.confidence, "Query answered");
            a.text
        })
    }
}

#[async_trait]
impl ExtractionService for AnalysisClient {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ServiceResponse, ExtractError> {
        let body = AnalyzeRequest {
            document: Document {
                bytes: base64::engine::general_purpose::STANDARD.encode(&request.image.bytes),
            },
            feature_types: ["QUERIES"],
            queries_config: QueriesConfig {
                queries: vec![QuerySpec { text: &request.query }],
            },
        };

        debug!(record = request.record_id, query = %request.query, "Sending analysis request");

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
        Ok(ServiceResponse::Analysis(DocumentAnalysis::parse(&text)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "Blocks": [
            {"Id": "p1", "BlockType": "PAGE"},
            {"Id": "q1", "BlockType": "QUERY", "Query": {"Text": "What's the zip code?"},
             "Relationships": [{"Type": "ANSWER", "Ids": ["r1"]}]},
            {"Id": "r1", "BlockType": "QUERY_RESULT", "Text": "10001", "Confidence": 97.5},
            {"Id": "q2", "BlockType": "QUERY", "Query": {"Text": "What is the city?"},
             "Relationships": [{"Type": "ANSWER", "Ids": ["missing"]}]},
            {"Id": "q3", "BlockType": "QUERY", "Query": {"Text": "What is the street address?"}}
        ]
    }"#;

    #[test]
    fn follows_answer_relationship_to_result_block() {
        let doc = DocumentAnalysis::parse(SAMPLE).unwrap();
        let answers = doc.answers();
        assert_eq!(
            answers.get("What's the zip code?"),
            Some(&QueryAnswer { text: "10001".to_string(), confidence: 97.5 })
        );
        assert_eq!(doc.answer("What's the zip code?").as_deref(), Some("10001"));
    }

    #[test]
    fn dangling_or_missing_relationships_yield_no_answer() {
        let doc = DocumentAnalysis::parse(SAMPLE).unwrap();
        assert_eq!(doc.answer("What is the city?"), None);
        assert_eq!(doc.answer("What is the street address?"), None);
        assert_eq!(doc.answer("Never asked?"), None);
    }

    #[test]
    fn single_query_response_answers_despite_rewritten_text() {
        let doc = DocumentAnalysis::parse(
            r#"{"Blocks": [
                {"Id": "q1", "BlockType": "QUERY", "Query": {"Text": "what is the zip code"},
                 "Relationships": [{"Type": "ANSWER", "Ids": ["r1"]}]},
                {"Id": "r1", "BlockType": "QUERY_RESULT", "Text": "10001", "Confidence": 88.0}
            ]}"#,
        )
        .unwrap();
        assert_eq!(doc.answer("What's the zip code?").as_deref(), Some("10001"));
        assert_eq!(doc.answer(" WHAT IS THE ZIP CODE ").as_deref(), Some("10001"));
    }

    #[test]
    fn single_query_without_result_is_still_no_answer() {
        let doc = DocumentAnalysis::parse(
            r#"{"Blocks": [{"Id": "q1", "BlockType": "QUERY", "Query": {"Text": "What is the city?"}}]}"#,
        )
        .unwrap();
        assert_eq!(doc.answer("What is the city?"), None);
    }

    #[test]
    fn missing_blocks_envelope_is_service_error() {
        assert!(matches!(
            DocumentAnalysis::parse(r#"{"DocumentMetadata":{"Pages":1}}"#),
            Err(ExtractError::Service { .. })
        ));
    }

    #[test]
    fn request_uses_queries_feature() {
        let body = AnalyzeRequest {
            document: Document { bytes: "AAAA".to_string() },
            feature_types: ["QUERIES"],
            queries_config: QueriesConfig { queries: vec![QuerySpec { text: "What is the city?" }] },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["Document"]["Bytes"], "AAAA");
        assert_eq!(json["FeatureTypes"][0], "QUERIES");
        assert_eq!(json["QueriesConfig"]["Queries"][0]["Text"], "What is the city?");
    }
}
