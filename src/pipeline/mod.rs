//! Batch driver: select pending rows, extract them concurrently, write the batch back.

pub mod dispatch;
pub mod worker;
pub mod writeback;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db::{self, PendingRecord};
use crate::fields::FieldSpec;
use crate::image::ImageStore;
use crate::metrics::{new_run_id, RunSummary};
use crate::service::ExtractionService;
use worker::{extract_record, ExtractionResult, WorkerContext};
use writeback::BatchWriteSet;

pub struct Pipeline {
    ctx: Arc<WorkerContext>,
    batch_size: usize,
    concurrency: usize,
    max_batches: Option<usize>,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(
        field: &'static FieldSpec,
        settings: &Settings,
        images: Arc<dyn ImageStore>,
        service: Arc<dyn ExtractionService>,
    ) -> Self {
        let ctx = WorkerContext {
            field,
            images,
            service,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            max_retries: settings.max_retries,
            base_backoff: Duration::from_millis(settings.base_backoff_ms),
        };
        Pipeline {
            ctx: Arc::new(ctx),
            batch_size: settings.batch_size,
            concurrency: settings.concurrency,
            max_batches: settings.max_batches,
            show_progress: false,
        }
    }

    pub fn show_progress(mut self, on: bool) -> Self {
        self.show_progress = on;
        self
    }

    pub fn field(&self) -> &'static FieldSpec {
        self.ctx.field
    }

    /// Process batches until nothing pending remains past the cursor, or until
    /// `max_batches` is reached. A failed write-back is logged and counted; the
    /// run moves on to the next batch.
    pub async fn run(&self, conn: &Connection) -> Result<RunSummary> {
        anyhow::ensure!(self.batch_size > 0, "batch size must be positive");
        anyhow::ensure!(self.concurrency > 0, "concurrency must be positive");

        let field = self.ctx.field;
        let mut summary = RunSummary::new(new_run_id(), field.name);
        let pending = db::count_pending(conn, field)?;
        info!(
            run = summary.run_id(),
            field = field.name,
            pending,
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            "Starting extraction"
        );

        let pb = self.progress_bar(pending)?;
        let mut cursor: Option<i64> = None;

        loop {
            if let Some(max) = self.max_batches {
                if summary.batches >= max {
                    info!(batches = summary.batches, "Batch limit reached");
                    break;
                }
            }

            let records = db::select_pending_after(conn, field, cursor, self.batch_size)?;
            if records.is_empty() {
                break;
            }
            cursor = records.last().map(|r| r.id);
            summary.batches += 1;
            summary.selected += records.len();

            let batch = summary.batches;
            let size = records.len();
            let results = dispatch::run_batch(Arc::clone(&self.ctx), records, self.concurrency, &pb).await;
            summary.record(&results);

            let set = BatchWriteSet::from_results(field, &results);
            let written = match writeback::apply(conn, &set) {
                Ok(n) => n,
                Err(_) => {
                    summary.failed_batches += 1;
                    0
                }
            };
            summary.written += written;
            info!(batch, selected = size, written, "Batch complete");
        }

        pb.finish_and_clear();
        if summary.errors > 0 {
            warn!(errors = summary.errors, "Some records failed and remain pending");
        }
        summary.persist(conn)?;
        Ok(summary)
    }

    /// Extract a single image without touching the database.
    pub async fn probe(&self, reference: &str) -> ExtractionResult {
        let record = PendingRecord {
            id: 0,
            image_reference: reference.to_string(),
            form_type: None,
        };
        extract_record(&self.ctx, &record).await
    }

    fn progress_bar(&self, total: usize) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );
        Ok(pb)
    }
}
