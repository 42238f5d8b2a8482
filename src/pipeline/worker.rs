use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::db::PendingRecord;
use crate::error::ExtractError;
use crate::fields::FieldSpec;
use crate::image::ImageStore;
use crate::service::{ExtractionRequest, ExtractionService, ServiceResponse};
use crate::validate::Parsed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    NotFound,
    Invalid,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::NotFound => "not_found",
            Status::Invalid => "invalid",
            Status::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub record_id: i64,
    pub raw_text: String,
    /// Normalized value; set only on success.
    pub value: Option<String>,
    pub status: Status,
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn success(record_id: i64, raw_text: &str, value: String) -> Self {
        Self {
            record_id,
            raw_text: raw_text.to_string(),
            value: Some(value),
            status: Status::Success,
            error: None,
        }
    }

    pub fn sentinel(record_id: i64, raw_text: &str, status: Status) -> Self {
        Self {
            record_id,
            raw_text: raw_text.to_string(),
            value: None,
            status,
            error: None,
        }
    }

    pub fn failure(record_id: i64, cause: String) -> Self {
        Self {
            record_id,
            raw_text: String::new(),
            value: None,
            status: Status::Error,
            error: Some(cause),
        }
    }
}

/// Everything a worker needs; shared read-only across the batch.
pub struct WorkerContext {
    pub field: &'static FieldSpec,
    pub images: Arc<dyn ImageStore>,
    pub service: Arc<dyn ExtractionService>,
    pub model: String,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

/// Turn one pending record into one result. Never fails: fetch and service
/// errors become `Status::Error` results.
pub async fn extract_record(ctx: &WorkerContext, record: &PendingRecord) -> ExtractionResult {
    match fetch_and_ask(ctx, record).await {
        Ok(raw) => classify(ctx.field, record.id, &raw),
        Err(e) => {
            error!(record = record.id, field = ctx.field.name, "{}", e);
            ExtractionResult::failure(record.id, e.to_string())
        }
    }
}

async fn fetch_and_ask(ctx: &WorkerContext, record: &PendingRecord) -> Result<String, ExtractError> {
    debug!(
        record = record.id,
        form_type = record.form_type.as_deref().unwrap_or("-"),
        reference = %record.image_reference,
        "Extracting"
    );
    let image = ctx.images.fetch(&record.image_reference).await?;
    let request = ExtractionRequest {
        record_id: record.id,
        image,
        prompt: ctx.field.prompt.to_string(),
        query: ctx.field.query.to_string(),
        model: ctx.model.clone(),
        max_tokens: ctx.max_tokens,
    };
    let response = call_with_retry(ctx, &request).await?;
    response.answer(ctx.field.query)
}

async fn call_with_retry(
    ctx: &WorkerContext,
    request: &ExtractionRequest,
) -> Result<ServiceResponse, ExtractError> {
    let mut attempt = 0u32;
    loop {
        match ctx.service.extract(request).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < ctx.max_retries => {
                let backoff = backoff_delay(ctx.base_backoff, attempt);
                attempt += 1;
                warn!(
                    record = request.record_id,
                    "{} (attempt {}/{}), backing off {:.1}s",
                    e,
                    attempt,
                    ctx.max_retries,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `base * 2^attempt`, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

pub fn classify(field: &FieldSpec, record_id: i64, raw: &str) -> ExtractionResult {
    match field.parser.parse(raw) {
        Parsed::Value(v) => {
            debug!(record = record_id, field = field.name, value = %v, "Extracted");
            ExtractionResult::success(record_id, raw, v)
        }
        Parsed::NotFound => {
            warn!(record = record_id, field = field.name, raw = %raw.trim(), "No value found");
            ExtractionResult::sentinel(record_id, raw, Status::NotFound)
        }
        Parsed::Invalid => {
            warn!(record = record_id, field = field.name, raw = %raw.trim(), "Invalid value");
            ExtractionResult::sentinel(record_id, raw, Status::Invalid)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::fields::find;
    use std::sync::atomic::Ordering;

    fn record(id: i64, reference: &str) -> PendingRecord {
        PendingRecord {
            id,
            image_reference: reference.to_string(),
            form_type: Some("8850 Form".to_string()),
        }
    }

    #[tokio::test]
    async fn success_normalizes_value() {
        let service = Arc::new(FakeService::answering(&[("a.jpg", " 123 45 6789 ")]));
        let ctx = context(find("ssn").unwrap(), FakeImages { missing: vec![] }, service);
        let r = extract_record(&ctx, &record(1, "a.jpg")).await;
        assert_eq!(r.status, Status::Success);
        assert_eq!(r.value.as_deref(), Some("123-45-6789"));
        assert_eq!(r.raw_text, " 123 45 6789 ");
    }

    #[tokio::test]
    async fn bad_format_maps_to_sentinel_status() {
        let service = Arc::new(FakeService::answering(&[("a.jpg", "12-34"), ("b.jpg", "1234")]));
        let ssn = context(find("ssn").unwrap(), FakeImages { missing: vec![] }, service.clone());
        assert_eq!(extract_record(&ssn, &record(1, "a.jpg")).await.status, Status::Invalid);
        let zip = context(find("zip_8850").unwrap(), FakeImages { missing: vec![] }, service);
        assert_eq!(extract_record(&zip, &record(2, "b.jpg")).await.status, Status::NotFound);
    }

    #[tokio::test]
    async fn fetch_error_becomes_error_result_without_calling_service() {
        let service = Arc::new(FakeService::answering(&[]));
        let ctx = context(
            find("zip_8850").unwrap(),
            FakeImages { missing: vec!["gone.jpg".to_string()] },
            service.clone(),
        );
        let r = extract_record(&ctx, &record(7, "gone.jpg")).await;
        assert_eq!(r.status, Status::Error);
        assert!(r.error.unwrap().contains("gone.jpg"));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn analysis_answers_are_looked_up_by_field_query() {
        let service = Arc::new(FakeService::new(vec![
            (
                "a.jpg",
                vec![Reply::Blocks(
                    r#"{"Blocks": [
                        {"Id": "q1", "BlockType": "QUERY", "Query": {"Text": "What's the zip code?"},
                         "Relationships": [{"Type": "ANSWER", "Ids": ["r1"]}]},
                        {"Id": "r1", "BlockType": "QUERY_RESULT", "Text": "10001-2345", "Confidence": 91.0}
                    ]}"#,
                )],
            ),
            (
                "b.jpg",
                vec![Reply::Blocks(
                    r#"{"Blocks": [{"Id": "q1", "BlockType": "QUERY", "Query": {"Text": "What's the zip code?"}}]}"#,
                )],
            ),
        ]));
        let ctx = context(find("zip_8850").unwrap(), FakeImages { missing: vec![] }, service);
        let found = extract_record(&ctx, &record(1, "a.jpg")).await;
        assert_eq!(found.status, Status::Success);
        assert_eq!(found.value.as_deref(), Some("10001-2345"));
        assert_eq!(extract_record(&ctx, &record(2, "b.jpg")).await.status, Status::NotFound);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(base, 40), base.saturating_mul(u32::MAX));
        assert_eq!(backoff_delay(Duration::MAX, 3), Duration::MAX);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_up_to_the_limit() {
        let service = Arc::new(FakeService::new(vec![(
            "a.jpg",
            vec![Reply::Transient, Reply::Transient, Reply::Text("10001")],
        )]));
        let mut ctx = context(find("zip_8850").unwrap(), FakeImages { missing: vec![] }, service.clone());
        ctx.max_retries = 2;
        let r = extract_record(&ctx, &record(1, "a.jpg")).await;
        assert_eq!(r.status, Status::Success);
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_exhausted_or_permanent_errors_fail() {
        let service = Arc::new(FakeService::new(vec![
            ("a.jpg", vec![Reply::Transient]),
            ("b.jpg", vec![Reply::Fail, Reply::Text("10001")]),
        ]));
        let mut ctx = context(find("zip_8850").unwrap(), FakeImages { missing: vec![] }, service.clone());
        ctx.max_retries = 1;
        assert_eq!(extract_record(&ctx, &record(1, "a.jpg")).await.status, Status::Error);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(extract_record(&ctx, &record(2, "b.jpg")).await.status, Status::Error);
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }
}
