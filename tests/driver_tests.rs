//! Background driver behavior: ticking runnable jobs forward and shutting
//! down cleanly on cancellation.

use std::time::Duration;

use chrono::NaiveDate;
use pricehound::config::DriverConfig;
use pricehound::driver::JobDriver;
use pricehound::jobs::InputRow;
use pricehound::jobs::engine::decode_results;
use tokio_util::sync::CancellationToken;

mod test_utils;
use test_utils::{TestEngine, build_engine, setup_test_db};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn driver_config() -> DriverConfig {
    DriverConfig {
        enabled: true,
        tick_ms: 20,
        concurrency: 2,
        claim_batch: 10,
    }
}

fn make_driver(t: &TestEngine) -> JobDriver {
    JobDriver::new(t.engine.clone(), t.repo.clone(), driver_config())
}

#[tokio::test]
async fn tick_steps_every_runnable_job_at_most_once() {
    let db = setup_test_db().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    // Nothing listens on port 1, so every row degrades to an empty result.
    let t = build_engine(&db, "http://127.0.0.1:1", dir.path(), Duration::from_secs(5));

    let one_row = [InputRow::from_cells("A100", "ACME").unwrap()];
    let two_rows = [
        InputRow::from_cells("B200", "ACME").unwrap(),
        InputRow::from_cells("B300", "ACME").unwrap(),
    ];
    let first = t
        .repo
        .create(date(2024, 1, 1), date(2024, 1, 31), &one_row)
        .await
        .unwrap();
    let second = t
        .repo
        .create(date(2024, 1, 1), date(2024, 1, 31), &two_rows)
        .await
        .unwrap();

    make_driver(&t).tick().await.unwrap();

    // The single-row job went straight to done with a degraded result.
    let finished = t.repo.find(first.id).await.unwrap().unwrap();
    assert_eq!(finished.status, "done");
    assert_eq!(finished.processed, 1);
    let results = decode_results(&finished).unwrap();
    assert!(results[0].prices.is_empty());
    assert_eq!(results[0].ai.as_deref(), Some("offers page unavailable"));

    // The two-row job advanced exactly one row in the same tick.
    let in_flight = t.repo.find(second.id).await.unwrap().unwrap();
    assert_eq!(in_flight.status, "running");
    assert_eq!(in_flight.processed, 1);
}

#[tokio::test]
async fn repeated_ticks_drain_the_queue() {
    let db = setup_test_db().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let t = build_engine(&db, "http://127.0.0.1:1", dir.path(), Duration::from_secs(5));

    let rows = [
        InputRow::from_cells("A100", "ACME").unwrap(),
        InputRow::from_cells("A200", "ACME").unwrap(),
    ];
    let job = t
        .repo
        .create(date(2024, 1, 1), date(2024, 1, 31), &rows)
        .await
        .unwrap();

    let driver = make_driver(&t);
    driver.tick().await.unwrap();
    driver.tick().await.unwrap();

    let finished = t.repo.find(job.id).await.unwrap().unwrap();
    assert_eq!(finished.status, "done");
    assert_eq!(finished.processed, 2);

    // Ticking with nothing runnable is a quiet no-op.
    driver.tick().await.unwrap();
    let unchanged = t.repo.find(job.id).await.unwrap().unwrap();
    assert_eq!(unchanged.lock_version, finished.lock_version);
}

#[tokio::test]
async fn run_loop_finishes_jobs_and_honors_shutdown() {
    let db = setup_test_db().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let t = build_engine(&db, "http://127.0.0.1:1", dir.path(), Duration::from_secs(5));

    let rows = [InputRow::from_cells("A100", "ACME").unwrap()];
    let job = t
        .repo
        .create(date(2024, 1, 1), date(2024, 1, 31), &rows)
        .await
        .unwrap();

    let driver = make_driver(&t);
    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let driver = driver.clone();
        let token = token.clone();
        async move { driver.run(token).await }
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = t.repo.find(job.id).await.unwrap().unwrap();
        if current.status == "done" {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "driver never finished the job"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    token.cancel();
    handle.await.unwrap().unwrap();
}
