use rusqlite::Connection;
use tracing::{error, info};

use super::worker::{ExtractionResult, Status};
use crate::db;
use crate::error::PersistenceError;
use crate::fields::FieldSpec;

/// `(value, record_id)` pairs collected from one batch.
#[derive(Debug, Clone)]
pub struct BatchWriteSet {
    pub column: &'static str,
    pub pairs: Vec<(String, i64)>,
}

impl BatchWriteSet {
    /// Successes always; not_found/invalid only when the field persists its sentinel.
    /// Errors are never written, so those rows stay pending.
    pub fn from_results(field: &'static FieldSpec, results: &[ExtractionResult]) -> Self {
        let pairs = results
            .iter()
            .filter_map(|r| match (r.status, &r.value) {
                (Status::Success, Some(v)) => Some((v.clone(), r.record_id)),
                (Status::NotFound | Status::Invalid, _) if field.persist_sentinel => {
                    Some((field.sentinel.to_string(), r.record_id))
                }
                _ => None,
            })
            .collect();
        BatchWriteSet {
            column: field.column,
            pairs,
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Write the whole set in one transaction. On failure nothing in the set is written.
pub fn apply(conn: &Connection, set: &BatchWriteSet) -> Result<usize, PersistenceError> {
    if set.is_empty() {
        return Ok(0);
    }
    match db::update_column(conn, set.column, &set.pairs) {
        Ok(n) => {
            info!(column = set.column, rows = n, "Batch written");
            Ok(n)
        }
        Err(source) => {
            let err = PersistenceError {
                column: set.column.to_string(),
                rows: set.len(),
                source,
            };
            error!("{}; batch rolled back", err);
            Err(err)
        }
    }
}
