mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{csv_document, csv_with_header, FixtureRow, RecordingMailSender};
use http_body_util::BodyExt;
use realestate_portfolio_server_rs::api::{build_router, AppState};
use realestate_portfolio_server_rs::background_processor::ProcessingContext;
use realestate_portfolio_server_rs::database::Database;
use realestate_portfolio_server_rs::reconcile::reconcile_rows;
use realestate_portfolio_server_rs::sheet_parser::{parse_sheet, SheetFormat, HEADER_SCHEMA};
use realestate_portfolio_server_rs::task_queue::{RetryPolicy, TaskQueue};
use realestate_portfolio_server_rs::throttle::RequestThrottle;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::ServiceExt;

const BOUNDARY: &str = "X-TEST-BOUNDARY";

struct TestApp {
    router: Router,
    db: Arc<Mutex<Database>>,
    mailer: Arc<RecordingMailSender>,
    _media: TempDir,
}

fn test_app(seed: &[FixtureRow]) -> TestApp {
    let media = tempfile::tempdir().unwrap();
    let db = Database::new(":memory:").unwrap();
    if !seed.is_empty() {
        let rows = parse_sheet(&csv_document(seed), SheetFormat::Csv, Some(b',')).unwrap();
        reconcile_rows(&db, &rows, 2026).unwrap();
    }
    let db = Arc::new(Mutex::new(db));

    let mailer = Arc::new(RecordingMailSender::new());
    let ctx = Arc::new(ProcessingContext {
        db: Arc::clone(&db),
        media_root: media.path().to_path_buf(),
        mailer: mailer.clone(),
        mail_sender: "noreply@example.com".to_string(),
        mail_receiver: "ops@example.com".to_string(),
    });
    let queue = TaskQueue::start(ctx, 1, RetryPolicy::new(0, Duration::from_millis(10)));

    let router = build_router(Arc::new(AppState {
        db: Arc::clone(&db),
        queue,
        media_root: media.path().to_path_buf(),
        page_size: 2,
        throttle: Arc::new(RequestThrottle::new(5, 100)),
    }));
    TestApp { router, db, mailer, _media: media }
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .header(header::HOST, "testserver")
        .header("x-remote-user", "analyst")
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn multipart_request(field: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n",
        b = BOUNDARY,
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload/")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_assets_empty_system_is_not_found() {
    let app = test_app(&[]);
    let (status, body) = get_json(&app.router, "/assets/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["Error"], "No Assets found at the system");
}

#[tokio::test]
async fn test_assets_unknown_reference_is_not_found() {
    let app = test_app(&[FixtureRow::rented("A-1", "U-1")]);
    let (status, body) = get_json(&app.router, "/assets/?asset_ref=Z-9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["Error"], "No asset found with reference Z-9");
}

#[tokio::test]
async fn test_assets_first_page_links_to_next() {
    let app = test_app(&[
        FixtureRow::rented("A-1", "U-1"),
        FixtureRow::rented("A-2", "U-2"),
        FixtureRow::vacant("A-3", "U-3"),
    ]);

    let (status, body) = get_json(&app.router, "/assets/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
    assert_eq!(body["next"], "http://testserver/assets/?page=2");
    assert_eq!(body["previous"], Value::Null);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);

    let (status, body) = get_json(&app.router, "/assets/?page=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["next"], Value::Null);
    assert_eq!(body["previous"], "http://testserver/assets/");
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_assets_filtered_result_shape() {
    let app = test_app(&[FixtureRow::rented("A-1", "U-1"), FixtureRow::vacant("A-1", "U-2")]);
    let (status, body) = get_json(&app.router, "/assets/?asset_ref=A-1").await;
    assert_eq!(status, StatusCode::OK);

    let asset = &body["results"][0];
    assert_eq!(asset["address"], "Torstrasse 12");
    assert_eq!(asset["zipcode"], 10119);
    assert_eq!(asset["city"], "Berlin");
    assert_eq!(asset["year_of_construction"], 1990);
    assert_eq!(asset["restricted_area"], false);
    assert_eq!(asset["number_of_units"], 2);
    assert_eq!(asset["total_rent"], 950.5);
    assert_eq!(asset["total_area"], 160);
    assert_eq!(asset["area_rented"], 80);
    assert_eq!(asset["vacancy"], "50.0 %");
    assert!(asset["walt"].as_str().unwrap().ends_with(" years"));
}

#[tokio::test]
async fn test_assets_page_past_end_is_not_found() {
    let app = test_app(&[FixtureRow::rented("A-1", "U-1")]);
    let (status, body) = get_json(&app.router, "/assets/?page=5").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["Error"], "Invalid page.");
}

#[tokio::test]
async fn test_assets_invalid_query_is_bad_request() {
    let app = test_app(&[FixtureRow::rented("A-1", "U-1")]);

    for uri in ["/assets/?page=abc", "/assets/?page=0", "/assets/?page=-1"] {
        let (status, body) = get_json(&app.router, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(body["Validation Error"].is_string());
    }

    let (_, body) = get_json(&app.router, "/assets/?page=abc").await;
    assert!(body["Validation Error"].as_str().unwrap().contains("page"));

    let long_ref = "R".repeat(255);
    let (status, _) = get_json(&app.router, &format!("/assets/?asset_ref={}", long_ref)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_accepts_and_processes_file() {
    let app = test_app(&[]);
    let request = multipart_request(
        "file",
        "portfolio.csv",
        "text/csv",
        &csv_document(&[FixtureRow::rented("A-1", "U-1")]),
    );

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let stored = body["File Uploaded"]["file"].as_str().unwrap();
    assert!(stored.starts_with("documents/"));
    assert!(stored.ends_with(".csv"));
    assert!(stored.contains("portfolio__"));
    assert!(body["Status"].as_str().unwrap().contains("being processed now"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while app.mailer.sent().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(app.mailer.sent().len(), 1);
    assert!(app.mailer.sent()[0].text.contains("processed successfully"));
    assert_eq!(app.db.lock().await.unit_count().unwrap(), 1);
}

#[tokio::test]
async fn test_upload_rejects_wrong_header() {
    let app = test_app(&[]);
    let bytes = csv_with_header(&HEADER_SCHEMA[..10], &[], ',');
    let (status, body) = send(&app.router, multipart_request("file", "portfolio.csv", "text/csv", &bytes)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["file"][0].as_str().unwrap().starts_with("Header row must be exactly"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_upload_rejects_unsupported_type() {
    let app = test_app(&[]);
    let request = multipart_request("file", "notes.pdf", "application/pdf", b"%PDF-1.4");
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["file"][0].as_str().unwrap().starts_with("Unsupported file type"));
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let app = test_app(&[]);
    let request = multipart_request("attachment", "portfolio.csv", "text/csv", &csv_document(&[]));
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["file"][0], "No file was submitted.");
}

#[tokio::test]
async fn test_upload_oversized_file_reaches_validator() {
    let app = test_app(&[]);
    let mut bytes = csv_document(&[]);
    bytes.resize(6 * 1024 * 1024, b'\n');
    let (status, body) = send(&app.router, multipart_request("file", "portfolio.csv", "text/csv", &bytes)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["file"][0].as_str().unwrap().contains("exceeds the 5 MiB limit"));
}

#[tokio::test]
async fn test_malformed_query_is_reported_as_json() {
    let app = test_app(&[FixtureRow::rented("A-1", "U-1")]);
    let request = Request::builder()
        .uri("/assets/?page=2.5")
        .header("x-remote-user", "analyst")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["Validation Error"].is_string());
}

fn anonymous_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.20")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_anonymous_requests_are_throttled_per_minute() {
    let app = test_app(&[FixtureRow::rented("A-1", "U-1")]);

    for _ in 0..5 {
        let (status, _) = send(&app.router, anonymous_get("/assets/")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = app.router.clone().oneshot(anonymous_get("/assets/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["detail"].as_str().unwrap().starts_with("Request was throttled."));

    // named users and other addresses keep their own quota
    let (status, _) = get_json(&app.router, "/assets/").await;
    assert_eq!(status, StatusCode::OK);
    let other = Request::builder()
        .uri("/assets/")
        .header("x-forwarded-for", "198.51.100.21")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, other).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = test_app(&[]);

    let response = app.router.clone().oneshot(anonymous_get("/assets/")).await.unwrap();
    let generated = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(!generated.is_empty());

    let request = Request::builder()
        .uri("/assets/")
        .header("x-remote-user", "analyst")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
}
