use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "form_extractor";
const ENV_PREFIX: &str = "EXTRACTOR";

/// Which external extraction service answers the prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// OpenRouter-style chat completions (choices list).
    Chat,
    /// Document analysis with queries (block graph).
    Analysis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub service: ServiceKind,
    pub openrouter_url: String,
    pub openrouter_api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub analysis_url: Option<String>,
    pub analysis_api_key: Option<String>,
    /// Prefix joined to bare image filenames.
    pub image_base_url: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_batches: Option<usize>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Settings {
    /// Defaults, then `form_extractor.toml` (or `path`), then `EXTRACTOR_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("db_path", "data/forms.sqlite")?
            .set_default("service", "chat")?
            .set_default("openrouter_url", "https://openrouter.ai/api/v1")?
            .set_default("model", "google/gemini-flash-1.5")?
            .set_default("max_tokens", 300)?
            .set_default("image_base_url", "")?
            .set_default("batch_size", 100)?
            .set_default("concurrency", 10)?
            .set_default("request_timeout_secs", 60)?
            .set_default("max_retries", 2)?
            .set_default("base_backoff_ms", 1000)?;

        builder = match path {
            Some(p) => builder.add_source(File::from(p).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings: Settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Checks done before any extraction run.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.concurrency > 0, "concurrency must be positive");
        anyhow::ensure!(self.request_timeout_secs > 0, "request_timeout_secs must be positive");
        if let Some(0) = self.max_batches {
            anyhow::bail!("max_batches must be positive when set");
        }
        match self.service {
            ServiceKind::Chat => {
                anyhow::ensure!(
                    has_value(&self.openrouter_api_key),
                    "{}_OPENROUTER_API_KEY must be set for the chat service",
                    ENV_PREFIX
                );
            }
            ServiceKind::Analysis => {
                anyhow::ensure!(
                    has_value(&self.analysis_url),
                    "{}_ANALYSIS_URL must be set for the analysis service",
                    ENV_PREFIX
                );
            }
        }
        Ok(())
    }
}

fn has_value(v: &Option<String>) -> bool {
    v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

#[cfg(test)]
pub fn test_settings() -> Settings {
    Settings {
        db_path: PathBuf::from(":memory:"),
        service: ServiceKind::Chat,
        openrouter_url: "http://localhost:9".to_string(),
        openrouter_api_key: Some("test-key".to_string()),
        model: "test-model".to_string(),
        max_tokens: 300,
        analysis_url: None,
        analysis_api_key: None,
        image_base_url: "https://images.example.com/jpgs".to_string(),
        batch_size: 100,
        concurrency: 10,
        max_batches: None,
        request_timeout_secs: 5,
        max_retries: 0,
        base_backoff_ms: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_file_or_env() {
        let s = Settings::load(None).unwrap();
        assert_eq!(s.batch_size, 100);
        assert_eq!(s.concurrency, 10);
        assert_eq!(s.service, ServiceKind::Chat);
        assert_eq!(s.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn validate_requires_key_for_chat() {
        let mut s = test_settings();
        assert!(s.validate().is_ok());
        s.openrouter_api_key = Some("  ".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_requires_url_for_analysis() {
        let mut s = test_settings();
        s.service = ServiceKind::Analysis;
        assert!(s.validate().is_err());
        s.analysis_url = Some("http://localhost:9/analyze".to_string());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        let mut s = test_settings();
        s.concurrency = 0;
        assert!(s.validate().is_err());
        let mut s = test_settings();
        s.max_batches = Some(0);
        assert!(s.validate().is_err());
    }
}
