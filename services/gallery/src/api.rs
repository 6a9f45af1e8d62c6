use crate::config::{ApiConfig, SiteConfig};
use crate::metadata_store::{MediaKind, Submission, SubmissionReader};
use crate::object_store::ObjectStore;
use crate::qr;
use crate::upload::{BatchReport, IncomingFile, RejectedFile, UploadCoordinator};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub object_store: Arc<ObjectStore>,
    pub metadata_store: Arc<dyn SubmissionReader>,
    pub coordinator: Arc<UploadCoordinator>,
    pub site: SiteConfig,
    /// Request body ceiling for the upload route; rejecting past it yields
    /// a 413 naming the limit rather than a generic multipart error
    pub max_body_bytes: usize,
}

/// One gallery tile in API responses
#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub id: Uuid,
    pub name: String,
    pub filename: String,
    pub media_kind: MediaKind,
    pub submitted_at: DateTime<Utc>,
    /// Publicly resolvable blob URL
    pub url: String,
}

impl SubmissionResponse {
    fn from_submission(submission: Submission, store: &ObjectStore) -> Self {
        let url = store.public_url(&submission.filename);
        Self {
            id: submission.id,
            name: submission.name,
            filename: submission.filename,
            media_kind: submission.media_kind,
            submitted_at: submission.submitted_at,
            url,
        }
    }
}

/// Gallery read response: the full ordered record set
#[derive(Debug, Serialize)]
pub struct GalleryResponse {
    pub submissions: Vec<SubmissionResponse>,
    pub total_count: usize,
    /// True when the read failed; the client should offer a retry instead
    /// of presenting an empty gallery as fact
    pub unavailable: bool,
    pub event_title: String,
}

/// Upload batch response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub progress: u8,
    /// Validation rejections, named per file
    pub rejected: Vec<RejectedFile>,
    /// True when the client should clear its pending selection and refresh
    /// the gallery; false leaves the selection intact for a retry
    pub clear_selection: bool,
    /// Aggregate failure message when nothing was stored
    pub message: Option<String>,
    pub submissions: Vec<SubmissionResponse>,
}

impl UploadResponse {
    fn from_report(report: BatchReport, store: &ObjectStore) -> Self {
        let clear_selection = report.clear_selection();
        let message = if report.success_count == 0 && report.total > 0 {
            Some("No files were uploaded. Please try again.".to_string())
        } else {
            None
        };

        Self {
            total: report.total,
            success_count: report.success_count,
            failed_count: report.failed_count,
            progress: report.progress,
            rejected: report.rejected,
            clear_selection,
            message,
            submissions: report
                .stored
                .into_iter()
                .map(|s| SubmissionResponse::from_submission(s, store))
                .collect(),
        }
    }
}

/// Query parameters for the QR code endpoint
#[derive(Debug, Deserialize)]
pub struct QrQuery {
    /// Client viewport width in pixels; picks one of three size tiers
    pub width: Option<u32>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: &str, code: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Map multipart read errors: a tripped body limit becomes a 413 naming
/// the configured ceiling, anything else a 400.
fn multipart_error(e: axum::extract::multipart::MultipartError, max_body_bytes: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ErrorResponse {
                error: format!(
                    "Upload batch exceeds the {} MiB request limit; send fewer files per batch",
                    max_body_bytes / (1024 * 1024)
                ),
                code: "BATCH_TOO_LARGE".to_string(),
            }),
        )
    } else {
        bad_request(&format!("Malformed multipart body: {e}"), "BAD_MULTIPART")
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let max_body_bytes = state.max_body_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/api/v1/submissions",
            get(list_submissions).post(create_submissions),
        )
        .route("/api/v1/submissions/:id", get(get_submission))
        .route("/api/v1/submissions/:id/download", get(download_submission))
        .route("/api/v1/qr", get(qr_code))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gallery-service"
    }))
}

/// Readiness check endpoint; a round trip through the record count proves
/// the database is reachable and queryable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.metadata_store.count_submissions().await {
        Ok(count) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected",
                "submission_count": count
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Gallery read: full ordered scan, newest first. A failed read is logged
/// and reported as `unavailable` rather than an error status, so the page
/// always renders and can offer a retry.
#[instrument(skip(state))]
async fn list_submissions(State(state): State<AppState>) -> Json<GalleryResponse> {
    match state.metadata_store.list_submissions().await {
        Ok(submissions) => {
            let submissions: Vec<_> = submissions
                .into_iter()
                .map(|s| SubmissionResponse::from_submission(s, &state.object_store))
                .collect();
            Json(GalleryResponse {
                total_count: submissions.len(),
                submissions,
                unavailable: false,
                event_title: state.site.event_title.clone(),
            })
        }
        Err(e) => {
            error!(error = %e, "Failed to list submissions");
            metrics::counter!("gallery.reads.failed").increment(1);
            Json(GalleryResponse {
                submissions: Vec::new(),
                total_count: 0,
                unavailable: true,
                event_title: state.site.event_title.clone(),
            })
        }
    }
}

/// Single submission lookup for the detail overlay
#[instrument(skip(state))]
async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let submission = state.metadata_store.get_submission(id).await.map_err(|e| {
        error!(error = %e, "Failed to get submission");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to get submission".to_string(),
                code: "QUERY_ERROR".to_string(),
            }),
        )
    })?;

    match submission {
        Some(s) => Ok(Json(SubmissionResponse::from_submission(
            s,
            &state.object_store,
        ))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Submission not found".to_string(),
                code: "NOT_FOUND".to_string(),
            }),
        )),
    }
}

/// Download action: fetches the blob and suggests the storage key as the
/// local filename
#[instrument(skip(state))]
async fn download_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let submission = state
        .metadata_store
        .get_submission(id)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to get submission");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to get submission".to_string(),
                    code: "QUERY_ERROR".to_string(),
                }),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "Submission not found".to_string(),
                    code: "NOT_FOUND".to_string(),
                }),
            )
        })?;

    let bytes = state
        .object_store
        .fetch_object(&submission.filename)
        .await
        .map_err(|e| {
            error!(error = %e, filename = %submission.filename, "Failed to fetch blob");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to fetch media".to_string(),
                    code: "FETCH_ERROR".to_string(),
                }),
            )
        })?;

    let headers = [
        (
            header::CONTENT_TYPE,
            content_type_for_key(&submission.filename).to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", submission.filename),
        ),
    ];

    Ok((headers, bytes))
}

/// Upload batch: multipart form with a `name` field and one or more `file`
/// parts. Drives the Upload Coordinator and returns the batch report.
#[instrument(skip(state, multipart))]
async fn create_submissions(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut name = String::new();
    let mut files: Vec<IncomingFile> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, state.max_body_bytes))?
    {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("name") => {
                name = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, state.max_body_bytes))?;
            }
            Some("file") => {
                let file_name = field
                    .file_name()
                    .unwrap_or("upload")
                    .to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, state.max_body_bytes))?;

                files.push(IncomingFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {
                // Unknown fields are ignored rather than rejected.
                debug!(field = ?field_name, "Ignoring unknown multipart field");
            }
        }
    }

    if name.trim().is_empty() {
        return Err(bad_request("A submitter name is required", "INVALID_NAME"));
    }
    if files.is_empty() {
        return Err(bad_request("No files in upload batch", "EMPTY_BATCH"));
    }

    let submitter = name.trim().to_string();
    let total = files.len();

    info!(submitter = %submitter, total = total, "Processing upload batch");

    let report = state
        .coordinator
        .process_batch(&submitter, files, |progress| {
            debug!(progress = progress, "Batch progress");
        })
        .await;

    info!(
        submitter = %submitter,
        success = report.success_count,
        rejected = report.rejected.len(),
        failed = report.failed_count,
        "Upload batch settled"
    );

    Ok(Json(UploadResponse::from_report(report, &state.object_store)))
}

/// Link presenter: the fixed site URL as a scannable SVG code, sized to the
/// client's viewport band
#[instrument(skip(state))]
async fn qr_code(
    State(state): State<AppState>,
    Query(params): Query<QrQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pixels = qr::size_tier(params.width.unwrap_or(1024));

    let svg = qr::render_svg(&state.site.public_url, pixels).map_err(|e| {
        error!(error = %e, "Failed to render QR code");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to render QR code".to_string(),
                code: "QR_ERROR".to_string(),
            }),
        )
    })?;

    Ok(([(header::CONTENT_TYPE, "image/svg+xml".to_string())], svg))
}

/// Content type for a stored key, from its extension
fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting gallery API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Edition, S3Config, UploadConfig};
    use crate::metadata_store::MockSubmissionReader;
    use crate::upload::{MockBlobStore, MockSubmissionStore, UploadPolicy};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::response::Response;
    use chrono::TimeZone;
    use std::time::Duration;
    use tower::ServiceExt;

    const MIB: usize = 1024 * 1024;
    const BOUNDARY: &str = "x-batch-boundary";

    #[test]
    fn test_content_type_for_key() {
        assert_eq!(content_type_for_key("abc.jpg"), "image/jpeg");
        assert_eq!(content_type_for_key("abc.jpeg"), "image/jpeg");
        assert_eq!(content_type_for_key("abc.mp4"), "video/mp4");
        assert_eq!(content_type_for_key("abc"), "application/octet-stream");
        assert_eq!(content_type_for_key("abc.xyz"), "application/octet-stream");
    }

    async fn test_object_store() -> ObjectStore {
        let config = S3Config {
            bucket: "event-media".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: "https://cdn.example.com/event-media".to_string(),
            multipart_threshold_bytes: 5 * 1024 * 1024,
            part_size_bytes: 5 * 1024 * 1024,
        };
        ObjectStore::new(&config).await.unwrap()
    }

    fn report(total: usize, success_count: usize, failed_count: usize) -> BatchReport {
        BatchReport {
            total,
            success_count,
            failed_count,
            progress: 100,
            rejected: Vec::new(),
            stored: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_upload_response_aggregate_failure_message() {
        let store = test_object_store().await;

        let response = UploadResponse::from_report(report(2, 0, 2), &store);
        assert!(!response.clear_selection);
        assert!(response.message.is_some());

        let response = UploadResponse::from_report(report(2, 1, 1), &store);
        assert!(response.clear_selection);
        assert!(response.message.is_none());
    }

    async fn test_state(
        reader: MockSubmissionReader,
        blobs: MockBlobStore,
        records: MockSubmissionStore,
        max_body_bytes: usize,
    ) -> AppState {
        let upload_config = UploadConfig {
            edition: Edition::ImageAndVideo,
            max_image_bytes: 5 * MIB,
            max_video_bytes: 50 * MIB,
            io_timeout_secs: 5,
        };

        AppState {
            object_store: Arc::new(test_object_store().await),
            metadata_store: Arc::new(reader),
            coordinator: Arc::new(UploadCoordinator::new(
                Arc::new(blobs),
                Arc::new(records),
                UploadPolicy::new(&upload_config),
                Duration::from_secs(5),
            )),
            site: SiteConfig {
                public_url: "https://gallery.example.com".to_string(),
                event_title: "Summer Party".to_string(),
            },
            max_body_bytes,
        }
    }

    fn test_api_config() -> ApiConfig {
        ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_enabled: false,
            cors_origins: Vec::new(),
            max_body_bytes: 512 * MIB,
        }
    }

    fn submission(seq: u128, submitted_at: DateTime<Utc>) -> Submission {
        Submission {
            id: Uuid::from_u128(seq),
            name: "Anna".to_string(),
            filename: format!("key-{seq}.jpg"),
            media_kind: MediaKind::Image,
            submitted_at,
            created_at: submitted_at,
        }
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn multipart_body(name: &str, files: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\n{name}\r\n"
            )
            .as_bytes(),
        );
        for (file_name, content_type, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
                     filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn post_multipart(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_gallery_read_is_ordered_and_idempotent() {
        let newer = submission(1, Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap());
        let older = submission(2, Utc.with_ymd_and_hms(2026, 6, 1, 11, 0, 0).unwrap());
        let rows = vec![newer, older];

        let mut reader = MockSubmissionReader::new();
        reader
            .expect_list_submissions()
            .times(2)
            .returning(move || Ok(rows.clone()));

        let state = test_state(
            reader,
            MockBlobStore::new(),
            MockSubmissionStore::new(),
            MIB,
        )
        .await;
        let router = create_router(state, &test_api_config());

        let first = router
            .clone()
            .oneshot(get_request("/api/v1/submissions"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first = body_json(first).await;

        let second = router
            .oneshot(get_request("/api/v1/submissions"))
            .await
            .unwrap();
        let second = body_json(second).await;

        // Re-reading an unchanged store yields the identical response.
        assert_eq!(first, second);
        assert_eq!(first["unavailable"], false);
        assert_eq!(first["total_count"], 2);

        let submissions = first["submissions"].as_array().unwrap();
        assert!(
            submissions[0]["submitted_at"].as_str().unwrap()
                > submissions[1]["submitted_at"].as_str().unwrap(),
            "gallery rows must come back newest first"
        );
        assert!(submissions[0]["url"]
            .as_str()
            .unwrap()
            .starts_with("https://cdn.example.com/event-media/"));
    }

    #[tokio::test]
    async fn test_gallery_read_failure_reports_unavailable() {
        let mut reader = MockSubmissionReader::new();
        reader
            .expect_list_submissions()
            .returning(|| Err(anyhow::anyhow!("connection refused")));

        let state = test_state(
            reader,
            MockBlobStore::new(),
            MockSubmissionStore::new(),
            MIB,
        )
        .await;
        let router = create_router(state, &test_api_config());

        let response = router
            .oneshot(get_request("/api/v1/submissions"))
            .await
            .unwrap();

        // Still a 200: the page renders and offers a retry.
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["unavailable"], true);
        assert_eq!(body["total_count"], 0);
        assert!(body["submissions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readiness_reports_record_count() {
        let mut reader = MockSubmissionReader::new();
        reader.expect_count_submissions().returning(|| Ok(7));

        let state = test_state(
            reader,
            MockBlobStore::new(),
            MockSubmissionStore::new(),
            MIB,
        )
        .await;
        let router = create_router(state, &test_api_config());

        let response = router.oneshot(get_request("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["submission_count"], 7);
    }

    #[tokio::test]
    async fn test_readiness_fails_when_count_query_fails() {
        let mut reader = MockSubmissionReader::new();
        reader
            .expect_count_submissions()
            .returning(|| Err(anyhow::anyhow!("pool timed out")));

        let state = test_state(
            reader,
            MockBlobStore::new(),
            MockSubmissionStore::new(),
            MIB,
        )
        .await;
        let router = create_router(state, &test_api_config());

        let response = router.oneshot(get_request("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_oversized_batch_gets_413_naming_the_limit() {
        let state = test_state(
            MockSubmissionReader::new(),
            MockBlobStore::new(),
            MockSubmissionStore::new(),
            MIB,
        )
        .await;
        let router = create_router(state, &test_api_config());

        let payload = vec![0u8; 2 * MIB];
        let body = multipart_body("Anna", &[("big.jpg", "image/jpeg", payload.as_slice())]);
        let response = router
            .oneshot(post_multipart("/api/v1/submissions", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = body_json(response).await;
        assert_eq!(body["code"], "BATCH_TOO_LARGE");
        assert!(body["error"].as_str().unwrap().contains("1 MiB"));
    }

    #[tokio::test]
    async fn test_upload_batch_round_trip() {
        let mut blobs = MockBlobStore::new();
        blobs.expect_put_blob().times(2).returning(|_, _, _| Ok(()));

        let mut records = MockSubmissionStore::new();
        records.expect_insert_submission().times(2).returning(
            |name, filename, media_kind, submitted_at| {
                Ok(Submission {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    filename: filename.to_string(),
                    media_kind,
                    submitted_at,
                    created_at: submitted_at,
                })
            },
        );

        let state = test_state(MockSubmissionReader::new(), blobs, records, 512 * MIB).await;
        let router = create_router(state, &test_api_config());

        let body = multipart_body(
            "Anna",
            &[
                ("sunset.jpg", "image/jpeg", b"jpegdata".as_slice()),
                ("beach.png", "image/png", b"pngdata".as_slice()),
            ],
        );
        let response = router
            .oneshot(post_multipart("/api/v1/submissions", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["success_count"], 2);
        assert_eq!(body["failed_count"], 0);
        assert_eq!(body["clear_selection"], true);
        assert_eq!(body["submissions"].as_array().unwrap().len(), 2);
    }
}
