use std::collections::HashSet;
use std::sync::Arc;

use indicatif::ProgressBar;
use tokio::sync::{mpsc, Semaphore};
use tracing::error;

use super::worker::{extract_record, ExtractionResult, WorkerContext};
use crate::db::PendingRecord;

/// Run one worker per record, at most `concurrency` at a time. Results arrive in
/// completion order; every record yields exactly one result.
pub async fn run_batch(
    ctx: Arc<WorkerContext>,
    records: Vec<PendingRecord>,
    concurrency: usize,
    pb: &ProgressBar,
) -> Vec<ExtractionResult> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<ExtractionResult>(concurrency.max(1) * 2);
    let expected: Vec<i64> = records.iter().map(|r| r.id).collect();

    for record in records {
        let ctx = Arc::clone(&ctx);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            let result = extract_record(&ctx, &record).await;
            let _ = tx.send(result).await;
        });
    }

    // rx closes once every task has finished or died
    drop(tx);

    let mut results = Vec::with_capacity(expected.len());
    while let Some(result) = rx.recv().await {
        pb.inc(1);
        results.push(result);
    }

    let seen: HashSet<i64> = results.iter().map(|r| r.record_id).collect();
    for id in expected.into_iter().filter(|id| !seen.contains(id)) {
        error!(record = id, "Worker exited without reporting a result");
        pb.inc(1);
        results.push(ExtractionResult::failure(
            id,
            "worker exited without reporting a result".to_string(),
        ));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::find;
    use crate::pipeline::worker::fakes::*;
    use crate::pipeline::worker::Status;

    fn records(refs: &[&str]) -> Vec<PendingRecord> {
        refs.iter()
            .enumerate()
            .map(|(i, r)| PendingRecord {
                id: i as i64 + 1,
                image_reference: r.to_string(),
                form_type: Some("8850 Form".to_string()),
            })
            .collect()
    }

    fn status_of(results: &[ExtractionResult], id: i64) -> Status {
        results.iter().find(|r| r.record_id == id).unwrap().status
    }

    #[tokio::test]
    async fn one_result_per_record() {
        let service = Arc::new(FakeService::answering(&[
            ("a.jpg", "10001"),
            ("b.jpg", "nope"),
            ("c.jpg", "10002-1234"),
        ]));
        let ctx = Arc::new(context(find("zip_8850").unwrap(), FakeImages { missing: vec![] }, service));
        let results = run_batch(ctx, records(&["a.jpg", "b.jpg", "c.jpg"]), 2, &ProgressBar::hidden()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(status_of(&results, 1), Status::Success);
        assert_eq!(status_of(&results, 2), Status::NotFound);
        assert_eq!(status_of(&results, 3), Status::Success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_workers_do_not_affect_siblings() {
        let service = Arc::new(FakeService::new(vec![
            ("a.jpg", vec![Reply::Text("10001")]),
            ("b.jpg", vec![Reply::Fail]),
            ("c.jpg", vec![Reply::Panic]),
            ("e.jpg", vec![Reply::Text("10003")]),
        ]));
        let ctx = Arc::new(context(
            find("zip_8850").unwrap(),
            FakeImages { missing: vec!["d.jpg".to_string()] },
            service,
        ));
        let results = run_batch(
            ctx,
            records(&["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]),
            10,
            &ProgressBar::hidden(),
        )
        .await;
        assert_eq!(results.len(), 5);
        assert_eq!(status_of(&results, 1), Status::Success);
        assert_eq!(status_of(&results, 2), Status::Error);
        assert_eq!(status_of(&results, 3), Status::Error);
        assert_eq!(status_of(&results, 4), Status::Error);
        assert_eq!(status_of(&results, 5), Status::Success);
    }

    #[tokio::test]
    async fn empty_batch_yields_no_results() {
        let service = Arc::new(FakeService::answering(&[]));
        let ctx = Arc::new(context(find("zip_8850").unwrap(), FakeImages { missing: vec![] }, service));
        assert!(run_batch(ctx, Vec::new(), 10, &ProgressBar::hidden()).await.is_empty());
    }
}
