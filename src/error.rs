use thiserror::Error;

/// Failure inside a single extraction worker. Never crosses the worker boundary:
/// the worker turns it into an `Error` result.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("image fetch failed for {reference}: {message}")]
    Fetch { reference: String, message: String },

    #[error("extraction service error: {message}")]
    Service {
        message: String,
        /// Transient failures (rate limits, 5xx, timeouts) that a retry may fix.
        retryable: bool,
    },
}

impl ExtractError {
    pub fn fetch(reference: &str, message: impl Into<String>) -> Self {
        ExtractError::Fetch {
            reference: reference.to_string(),
            message: message.into(),
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        ExtractError::Service {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ExtractError::Service {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::Service { retryable: true, .. })
    }

    /// Classify a reqwest error from the service call.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ExtractError::transient(format!("request failed: {}", err))
        } else {
            ExtractError::service(format!("request failed: {}", err))
        }
    }

    /// Classify a non-success HTTP status from the service call.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("service returned {}: {}", status, truncate_body(body));
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ExtractError::transient(message)
        } else {
            ExtractError::service(message)
        }
    }
}

/// Write-back transaction failed; the whole batch was rolled back.
#[derive(Debug, Error)]
#[error("write-back of {rows} rows to {column} failed: {source}")]
pub struct PersistenceError {
    pub column: String,
    pub rows: usize,
    #[source]
    pub source: rusqlite::Error,
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        assert!(ExtractError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(ExtractError::from_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!ExtractError::from_status(StatusCode::UNAUTHORIZED, "").is_retryable());
        assert!(!ExtractError::fetch("a.jpg", "404").is_retryable());
    }

    #[test]
    fn long_bodies_are_truncated_in_messages() {
        let body = "x".repeat(500);
        let err = ExtractError::from_status(StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().len() < 300);
    }
}
