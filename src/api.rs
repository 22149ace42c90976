use axum::{
    body::Body,
    extract::{rejection::QueryRejection, DefaultBodyLimit, Multipart, Query, State},
    http::{header::HOST, HeaderMap, Request, StatusCode, Uri},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::asset_stats::{list_asset_summaries, AssetListing};
use crate::database::Database;
use crate::logging::{ASSETS_INFO_AGGREGATION, FILE_UPLOAD, HTTP_REQUEST};
use crate::requester::Requester;
use crate::storage::save_upload;
use crate::task_queue::TaskQueue;
use crate::throttle::{throttle_requests, RequestThrottle};
use crate::validation::{validate_upload, UploadedFile, MAX_UPLOAD_BYTES};

pub const EXTERNAL_ERROR_MSG: &str =
    "Process stopped during an internal error, please try again or contact your support team";

const UPLOAD_STATUS_MSG: &str = "File is validated successfully and is being processed now, \
     you'll receive a follow up email whenever the processing is completed!";

const ASSET_REF_MAX_LEN: usize = 254;

// Large enough that oversized files still reach the validator
const UPLOAD_BODY_LIMIT: usize = 2 * MAX_UPLOAD_BYTES;

pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub queue: TaskQueue,
    pub media_root: PathBuf,
    pub page_size: usize,
    pub throttle: Arc<RequestThrottle>,
}

#[derive(Debug, Deserialize)]
struct AssetsQuery {
    asset_ref: Option<String>,
    page: Option<usize>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/assets/", get(assets_handler))
        .route(
            "/upload/",
            post(upload_handler).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .layer(middleware::from_fn_with_state(Arc::clone(&state.throttle), throttle_requests))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

// Every log line written while handling a request carries its id
fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");
    info_span!(
        target: HTTP_REQUEST,
        "request",
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
    )
}

fn validation_error(message: String) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({
        "Validation Error": message
    }))).into_response()
}

async fn assets_handler(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    headers: HeaderMap,
    uri: Uri,
    query: Result<Query<AssetsQuery>, QueryRejection>,
) -> impl IntoResponse {
    // 1. Validate query parameters
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            let message = rejection.body_text();
            debug!(target: ASSETS_INFO_AGGREGATION, user = %requester.user, ip = %requester.ip, "[VALIDATION ERROR] {}", message);
            return validation_error(message);
        }
    };
    let asset_ref = params.asset_ref.as_deref().map(str::trim).filter(|r| !r.is_empty());
    if let Some(r) = asset_ref {
        if r.chars().count() > ASSET_REF_MAX_LEN {
            let message = format!("asset_ref: Ensure this field has no more than {} characters.", ASSET_REF_MAX_LEN);
            debug!(target: ASSETS_INFO_AGGREGATION, user = %requester.user, ip = %requester.ip, "[VALIDATION ERROR] {}", message);
            return validation_error(message);
        }
    }
    let page = match params.page {
        None => 1,
        Some(0) => {
            let message = "page: '0' is not a valid page number.".to_string();
            debug!(target: ASSETS_INFO_AGGREGATION, user = %requester.user, ip = %requester.ip, "[VALIDATION ERROR] {}", message);
            return validation_error(message);
        }
        Some(n) => n,
    };
    debug!(
        target: ASSETS_INFO_AGGREGATION,
        user = %requester.user,
        ip = %requester.ip,
        "[REQUEST PAYLOAD] asset_ref={:?} page={}",
        asset_ref,
        page
    );

    // 2. Aggregate the requested page
    let listing = {
        let db = state.db.lock().await;
        list_asset_summaries(&db, asset_ref, page, state.page_size, Utc::now().year())
    };

    match listing {
        Ok(AssetListing::Page(page_data)) => {
            let host = headers.get(HOST).and_then(|h| h.to_str().ok());
            let next = (page_data.page < page_data.num_pages)
                .then(|| page_link(host, uri.path(), asset_ref, page_data.page + 1));
            let previous = (page_data.page > 1)
                .then(|| page_link(host, uri.path(), asset_ref, page_data.page - 1));
            Json(serde_json::json!({
                "count": page_data.count,
                "next": next,
                "previous": previous,
                "results": page_data.results,
            })).into_response()
        }
        Ok(AssetListing::UnknownReference(r)) => {
            (StatusCode::NOT_FOUND, Json(serde_json::json!({
                "Error": format!("No asset found with reference {}", r)
            }))).into_response()
        }
        Ok(AssetListing::NoAssets) => {
            (StatusCode::NOT_FOUND, Json(serde_json::json!({
                "Error": "No Assets found at the system"
            }))).into_response()
        }
        Ok(AssetListing::InvalidPage) => {
            (StatusCode::NOT_FOUND, Json(serde_json::json!({
                "Error": "Invalid page."
            }))).into_response()
        }
        Err(e) => {
            error!(target: ASSETS_INFO_AGGREGATION, user = %requester.user, ip = %requester.ip, "[INTERNAL ERROR] {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({
                "Internal Error": EXTERNAL_ERROR_MSG
            }))).into_response()
        }
    }
}

fn page_link(host: Option<&str>, path: &str, asset_ref: Option<&str>, page: usize) -> String {
    let mut query = Vec::new();
    if let Some(r) = asset_ref {
        query.push(format!("asset_ref={}", urlencoding::encode(r)));
    }
    if page > 1 {
        query.push(format!("page={}", page));
    }
    let base = match host {
        Some(h) => format!("http://{}{}", h, path),
        None => path.to_string(),
    };
    if query.is_empty() {
        base
    } else {
        format!("{}?{}", base, query.join("&"))
    }
}

fn upload_rejected(message: String) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({
        "file": [message]
    }))).into_response()
}

fn upload_failed() -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({
        "Internal Error": EXTERNAL_ERROR_MSG
    }))).into_response()
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    mut multipart: Multipart,
) -> impl IntoResponse {
    info!(target: FILE_UPLOAD, user = %requester.user, ip = %requester.ip, "Endpoint /upload/ called");

    // 1. Pull the `file` field
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(|c| c.to_string());
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some(UploadedFile { file_name, content_type, bytes: bytes.to_vec() });
                        break;
                    }
                    Err(e) => {
                        warn!(target: FILE_UPLOAD, user = %requester.user, ip = %requester.ip, "[VALIDATION ERROR] Unreadable upload: {}", e);
                        return upload_rejected("The submitted file could not be read.".to_string());
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(target: FILE_UPLOAD, user = %requester.user, ip = %requester.ip, "[VALIDATION ERROR] Malformed multipart body: {}", e);
                return upload_rejected("The submitted data was not a file.".to_string());
            }
        }
    }

    let Some(upload) = upload else {
        warn!(target: FILE_UPLOAD, user = %requester.user, ip = %requester.ip, "[VALIDATION ERROR] No file submitted");
        return upload_rejected("No file was submitted.".to_string());
    };

    // 2. Validate before anything is stored
    let validated = match validate_upload(&upload) {
        Ok(v) => v,
        Err(reason) => {
            warn!(
                target: FILE_UPLOAD,
                user = %requester.user,
                ip = %requester.ip,
                file_name = %upload.file_name,
                size = upload.bytes.len(),
                "[VALIDATION ERROR] {}",
                reason
            );
            return upload_rejected(reason.to_string());
        }
    };

    // 3. Persist the file and its document record
    let stored = match save_upload(&state.media_root, &upload.file_name, &upload.bytes).await {
        Ok(path) => path,
        Err(e) => {
            error!(target: FILE_UPLOAD, user = %requester.user, ip = %requester.ip, "[INTERNAL ERROR] {:#}", e);
            return upload_failed();
        }
    };
    let document = {
        let db = state.db.lock().await;
        db.insert_document(&stored, validated.delimiter)
    };
    let document = match document {
        Ok(d) => d,
        Err(e) => {
            error!(target: FILE_UPLOAD, user = %requester.user, ip = %requester.ip, "[INTERNAL ERROR] {:#}", e);
            return upload_failed();
        }
    };

    // 4. Hand over to the workers
    if let Err(e) = state.queue.submit(document.id) {
        error!(target: FILE_UPLOAD, user = %requester.user, ip = %requester.ip, document_id = document.id, "[INTERNAL ERROR] {:#}", e);
        return upload_failed();
    }

    info!(
        target: FILE_UPLOAD,
        user = %requester.user,
        ip = %requester.ip,
        document_id = document.id,
        "[FILE UPLOADED SUCCESSFULLY] File name: {}",
        document.file
    );

    (StatusCode::CREATED, Json(serde_json::json!({
        "File Uploaded": document,
        "Status": UPLOAD_STATUS_MSG,
    }))).into_response()
}
