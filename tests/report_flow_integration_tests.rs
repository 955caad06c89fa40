//! End-to-end report job flows against a mocked pricing site.

use std::time::Duration;

use chrono::NaiveDate;
use pricehound::jobs::engine::decode_results;
use pricehound::jobs::types::InputRow;
use pricehound::workbook::reader::read_input_rows;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod test_utils;
use test_utils::*;

/// Mount the authentication endpoints: home page with a logout marker, the
/// login form, and the credential POST answering with a session cookie.
async fn mount_site_auth(server: &MockServer, expected_logins: u64) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(home_page_html()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(login_page_html()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("set-cookie", "sid=itest-session; Path=/")
                .insert_header("location", "/"),
        )
        .expect(expected_logins)
        .mount(server)
        .await;
}

#[tokio::test]
async fn three_row_job_runs_to_done_with_row_timeout() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_site_auth(&server, 1).await;

    // Row 1: two offers, a statistics page with a JSON data endpoint, and a
    // pagination link advertising a resume cursor.
    Mock::given(method("GET"))
        .and(path("/search/A100"))
        .respond_with(ResponseTemplate::new(200).set_body_string(offers_page_html(
            &["Поставщик А 1 200р.", "Поставщик Б 1 150р."],
            Some("/product/1/statistic"),
            Some("/search/A100?after=cur-17"),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/product/1/statistic"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(stats_page_html("/product/1/statistic/data")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/product/1/statistic/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stats_json()))
        .mount(&server)
        .await;

    // Row 2 must carry the cursor from row 1; its single offer leads with a
    // minimum-order figure.
    Mock::given(method("GET"))
        .and(path("/search/B200"))
        .and(query_param("after", "cur-17"))
        .respond_with(ResponseTemplate::new(200).set_body_string(offers_page_html(
            &["Заказ от 3 000р. 9 272р."],
            None,
            None,
        )))
        .mount(&server)
        .await;

    // Row 3: the site hangs past the per-row timeout.
    Mock::given(method("GET"))
        .and(path("/search/C300"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(offers_page_html(&["Поставщик В 500р."], None, None))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let db = setup_test_db().await.unwrap();
    let t = build_engine(&db, &server.uri(), dir.path(), Duration::from_secs(2));

    let rows = [
        InputRow::from_cells("A100", "ACME").unwrap(),
        InputRow::from_cells("B200", "ACME").unwrap(),
        InputRow::from_cells("C300", "ACME").unwrap(),
    ];
    let job = t
        .repo
        .create(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            &rows,
        )
        .await
        .unwrap();

    // Row 1 flips the job to running and lands prices, both months, and the
    // resume cursor.
    let job1 = t.engine.step(job.id).await.unwrap();
    assert_eq!(job1.status, "running");
    assert_eq!(job1.processed, 1);
    assert!(job1.started_at.is_some());
    assert_eq!(job1.last_id.as_deref(), Some("cur-17"));
    let results = decode_results(&job1).unwrap();
    assert_eq!(results[0].prices, vec![1200.0, 1150.0]);
    assert_eq!(results[0].stats.get("2024-01"), Some(&10.0));
    assert_eq!(results[0].stats.get("2024-02"), Some(&20.0));
    assert!(results[0].ai.is_none());

    // The login left a persisted cookie jar behind for the following rows.
    let session_raw = std::fs::read_to_string(dir.path().join("session.json")).unwrap();
    assert!(session_raw.contains("sid"));

    // Row 2 keeps the min-order annotation alongside the real price.
    let job2 = t.engine.step(job.id).await.unwrap();
    assert_eq!(job2.processed, 2);
    let results = decode_results(&job2).unwrap();
    assert_eq!(results[1].prices, vec![9272.0]);
    assert_eq!(
        results[1].ai.as_deref(),
        Some("min-order figure ignored in 1 offer(s)")
    );

    // Row 3 times out, degrades to an annotated empty result, and the job
    // still completes with a stored report.
    let done = t.engine.step(job.id).await.unwrap();
    assert_eq!(done.status, "done");
    assert_eq!(done.processed, 3);
    assert!(done.finished_at.is_some());
    assert_eq!(done.last_id.as_deref(), Some("cur-17"));
    let results = decode_results(&done).unwrap();
    assert!(results[2].prices.is_empty());
    assert!(results[2].stats.is_empty());
    assert!(results[2].ai.as_deref().unwrap().contains("timed out"));

    let url = done.result_file.clone().expect("report stored on completion");
    let bytes = std::fs::read(artifact_path(&t.storage_root, &url)).unwrap();
    assert!(bytes.starts_with(b"PK"));

    // The finished report reads back through the ingest reader: the title row
    // is skipped, the header detected, and all three rows survive.
    let readback = read_input_rows(&bytes, 500).unwrap();
    let articles: Vec<&str> = readback.iter().map(|r| r.article.as_str()).collect();
    assert_eq!(articles, ["A100", "B200", "C300"]);

    // Stepping a terminal job changes nothing.
    let after = t.engine.step(job.id).await.unwrap();
    assert_eq!(after.processed, 3);
    assert_eq!(after.lock_version, done.lock_version);
}

#[tokio::test]
async fn stop_mid_job_publishes_partial_report() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_site_auth(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/search/A100"))
        .respond_with(ResponseTemplate::new(200).set_body_string(offers_page_html(
            &["Поставщик А 1 200р."],
            Some("/product/1/statistic"),
            None,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/product/1/statistic"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(stats_page_html("/product/1/statistic/data")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/product/1/statistic/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stats_json()))
        .mount(&server)
        .await;

    let db = setup_test_db().await.unwrap();
    let t = build_engine(&db, &server.uri(), dir.path(), Duration::from_secs(5));

    let rows = [
        InputRow::from_cells("A100", "ACME").unwrap(),
        InputRow::from_cells("B200", "ACME").unwrap(),
    ];
    let job = t
        .repo
        .create(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            &rows,
        )
        .await
        .unwrap();

    let running = t.engine.step(job.id).await.unwrap();
    assert_eq!(running.processed, 1);

    let stopped = t.engine.stop(job.id).await.unwrap();
    assert_eq!(stopped.status, "canceled");
    assert_eq!(stopped.processed, 1);
    assert!(stopped.finished_at.is_some());

    // A best-effort report over the processed row is stored; the unprocessed
    // row still appears in the grid with blanks.
    let url = stopped.result_file.clone().expect("partial report stored");
    let bytes = std::fs::read(artifact_path(&t.storage_root, &url)).unwrap();
    let readback = read_input_rows(&bytes, 500).unwrap();
    let articles: Vec<&str> = readback.iter().map(|r| r.article.as_str()).collect();
    assert_eq!(articles, ["A100", "B200"]);

    // Both stop and step are no-ops once the job is canceled.
    let stopped_again = t.engine.stop(job.id).await.unwrap();
    assert_eq!(stopped_again.lock_version, stopped.lock_version);
    let stepped = t.engine.step(job.id).await.unwrap();
    assert_eq!(stepped.status, "canceled");
    assert_eq!(stepped.processed, 1);
}

#[tokio::test]
async fn report_flow_over_http() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use pricehound::config::AppConfig;
    use pricehound::handlers::reports::ReportJobDetail;
    use tower::ServiceExt;

    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_site_auth(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/search/A100"))
        .respond_with(ResponseTemplate::new(200).set_body_string(offers_page_html(
            &["Поставщик А 1 200р.", "Поставщик Б 1 150р."],
            Some("/product/1/statistic"),
            None,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/product/1/statistic"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(stats_page_html("/product/1/statistic/data")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/product/1/statistic/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stats_json()))
        .mount(&server)
        .await;

    let db = setup_test_db().await.unwrap();
    let mut config = AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        job_log_dir: dir.path().join("job-logs"),
        ..AppConfig::default()
    };
    config.site.base_url = server.uri();
    config.site.stats_path = "/statistic".to_string();
    config.site.session_file = dir.path().join("session.json");
    config.storage.root = dir.path().join("artifacts");
    let state = pricehound::server::create_test_app_state(config, db);
    let app = pricehound::server::create_app(state);

    // Create a single-row job from an uploaded workbook.
    let upload = multipart_upload(
        &input_workbook(&[("A100", "ACME")]),
        "2024-01-01",
        "2024-02-29",
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/reports")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
                )
                .body(Body::from(upload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let created: ReportJobDetail = serde_json::from_slice(&body).unwrap();
    assert_eq!(created.status, "pending");
    assert_eq!(created.total, 1);

    // One step drives the one-row job to done against the mocked site.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/reports/{}/step", created.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let done: ReportJobDetail = serde_json::from_slice(&body).unwrap();
    assert_eq!(done.status, "done");
    assert_eq!(done.processed, 1);
    assert_eq!(done.results[0].prices, vec![1200.0, 1150.0]);
    assert_eq!(done.results[0].stats.get("2024-01"), Some(&10.0));

    // The stored job reflects the finished state on a fresh read.
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/reports/{}", created.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let fetched: ReportJobDetail = serde_json::from_slice(&body).unwrap();
    assert_eq!(fetched.status, "done");
    assert!(fetched.result_file.is_some());
    assert!(fetched.finished_at.is_some());
}
