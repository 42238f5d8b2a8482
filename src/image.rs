use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::error::ExtractError;

/// A fetched page image.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub url: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    /// MIME type guessed from the URL extension; scans are JPEG unless named otherwise.
    pub fn mime_type(&self) -> &'static str {
        let path = self.url.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
        if path.ends_with(".png") {
            "image/png"
        } else if path.ends_with(".webp") {
            "image/webp"
        } else if path.ends_with(".gif") {
            "image/gif"
        } else {
            "image/jpeg"
        }
    }
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<ImagePayload, ExtractError>;
}

/// Image store reachable over plain HTTP GET.
pub struct HttpImageStore {
    client: Client,
    base_url: String,
}

impl HttpImageStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build image HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn resolve(&self, reference: &str) -> String {
        resolve_reference(&self.base_url, reference)
    }
}

/// Full URLs pass through; bare filenames are joined to `base_url`.
pub fn resolve_reference(base_url: &str, reference: &str) -> String {
    let reference = reference.trim();
    if reference.starts_with("http://") || reference.starts_with("https://") || base_url.is_empty() {
        reference.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            reference.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ImageStore for HttpImageStore {
    async fn fetch(&self, reference: &str) -> Result<ImagePayload, ExtractError> {
        let url = self.resolve(reference);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExtractError::fetch(&url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::fetch(&url, format!("HTTP {}", status)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractError::fetch(&url, e.to_string()))?;
        if bytes.is_empty() {
            return Err(ExtractError::fetch(&url, "empty body"));
        }
        Ok(ImagePayload {
            url,
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_joins_bare_filenames() {
        assert_eq!(
            resolve_reference("https://cdn.example.com/jpgs/", "/page_1.jpg"),
            "https://cdn.example.com/jpgs/page_1.jpg"
        );
        assert_eq!(
            resolve_reference("https://cdn.example.com/jpgs", "https://other.example.com/x.jpg"),
            "https://other.example.com/x.jpg"
        );
        assert_eq!(resolve_reference("", "page_1.jpg"), "page_1.jpg");
    }

    #[test]
    fn mime_type_from_extension() {
        let img = |url: &str| ImagePayload { url: url.to_string(), bytes: vec![1] };
        assert_eq!(img("https://x/a.PNG").mime_type(), "image/png");
        assert_eq!(img("https://x/a.jpg?token=1").mime_type(), "image/jpeg");
        assert_eq!(img("https://x/a").mime_type(), "image/jpeg");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_fetch_error() {
        let store = HttpImageStore::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        match store.fetch("missing.jpg").await {
            Err(ExtractError::Fetch { reference, .. }) => {
                assert_eq!(reference, "http://127.0.0.1:9/missing.jpg")
            }
            other => panic!("expected fetch error, got {:?}", other.map(|p| p.url)),
        }
    }
}
