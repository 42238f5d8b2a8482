use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db;
use crate::pipeline::worker::{ExtractionResult, Status};

/// Aggregate counts for one extractor run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    run_id: String,
    field: String,
    started_at: DateTime<Utc>,
    pub batches: usize,
    pub selected: usize,
    pub succeeded: usize,
    pub not_found: usize,
    pub invalid: usize,
    pub errors: usize,
    pub written: usize,
    pub failed_batches: usize,
}

impl RunSummary {
    pub fn new(run_id: String, field: &str) -> Self {
        RunSummary {
            run_id,
            field: field.to_string(),
            started_at: Utc::now(),
            batches: 0,
            selected: 0,
            succeeded: 0,
            not_found: 0,
            invalid: 0,
            errors: 0,
            written: 0,
            failed_batches: 0,
        }
    }

    pub fn record(&mut self, results: &[ExtractionResult]) {
        for r in results {
            match r.status {
                Status::Success => self.succeeded += 1,
                Status::NotFound => self.not_found += 1,
                Status::Invalid => self.invalid += 1,
                Status::Error => self.errors += 1,
            }
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn persist(&self, conn: &Connection) -> Result<()> {
        db::insert_run(
            conn,
            &db::RunRow {
                run_id: &self.run_id,
                field: &self.field,
                started_at: self.started_at.to_rfc3339(),
                finished_at: Utc::now().to_rfc3339(),
                batches: self.batches,
                selected: self.selected,
                succeeded: self.succeeded,
                not_found: self.not_found,
                invalid: self.invalid,
                errors: self.errors,
                written: self.written,
                failed_batches: self.failed_batches,
            },
        )
    }

    pub fn print(&self) {
        println!(
            "{}: {} selected in {} batches | {} ok, {} not found, {} invalid, {} errors | {} written{}",
            self.field,
            self.selected,
            self.batches,
            self.succeeded,
            self.not_found,
            self.invalid,
            self.errors,
            self.written,
            if self.failed_batches > 0 {
                format!(" ({} batches rolled back)", self.failed_batches)
            } else {
                String::new()
            }
        );
    }
}

pub fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_counts_each_status() {
        let mut s = RunSummary::new(new_run_id(), "zip_8850");
        s.record(&[
            ExtractionResult::success(1, "12345", "12345".into()),
            ExtractionResult::sentinel(2, "1234", Status::NotFound),
            ExtractionResult::sentinel(3, "", Status::Invalid),
            ExtractionResult::failure(4, "boom".into()),
        ]);
        assert_eq!((s.succeeded, s.not_found, s.invalid, s.errors), (1, 1, 1, 1));
    }

    #[test]
    fn persist_writes_run_row() {
        let conn = db::test_conn();
        let mut s = RunSummary::new("run-test".into(), "ssn");
        s.selected = 4;
        s.persist(&conn).unwrap();
        let selected: i64 = conn
            .query_row(
                "SELECT selected FROM extraction_runs WHERE run_id = 'run-test' AND field = 'ssn'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(selected, 4);
    }
}
