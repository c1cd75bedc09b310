//! REST handlers for segments, user memberships and audit history.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use cohort_core::{ErrorKind, SegmentError, SegmentResult, SegmentTtl, UserId};
use cohort_segmentation::{MembershipChanges, SegmentService};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SegmentService>,
    pub node_id: String,
    pub start_time: Instant,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

fn status_for(err: &SegmentError, adding: bool) -> StatusCode {
    match (err.kind(), err.root()) {
        (_, SegmentError::SegmentNotFound { .. }) if adding => StatusCode::UNPROCESSABLE_ENTITY,
        (_, SegmentError::ConflictingRequest { .. }) => StatusCode::BAD_REQUEST,
        (ErrorKind::NotFound, _) => StatusCode::NOT_FOUND,
        (ErrorKind::AlreadyExists | ErrorKind::Conflict, _) => StatusCode::CONFLICT,
        (ErrorKind::Validation, _) => StatusCode::BAD_REQUEST,
        (ErrorKind::Internal, _) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Translate a domain error into a status and body. `adding` marks requests
/// that add memberships, where a missing segment is an unprocessable entity.
fn api_error(err: SegmentError, adding: bool) -> (StatusCode, Json<ErrorResponse>) {
    let status = status_for(&err, adding);
    let code = match err.kind() {
        ErrorKind::NotFound => "not_found",
        ErrorKind::AlreadyExists => "already_exists",
        ErrorKind::Conflict if status == StatusCode::BAD_REQUEST => "conflicting_request",
        ErrorKind::Conflict => "conflict",
        ErrorKind::Validation => "validation_failed",
        ErrorKind::Internal => "internal_error",
    };
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "Request failed");
        "Internal processing error".to_string()
    } else {
        warn!(error = %err, status = status.as_u16(), "Request rejected");
        err.to_string()
    };
    metrics::counter!("api.errors").increment(1);
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message,
        }),
    )
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    metrics::counter!("api.validation_errors").increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "validation_failed".to_string(),
            message: message.to_string(),
        }),
    )
}

/// Hex-encoded SHA-256 of the raw credential.
pub fn credential_digest(credential: &str) -> String {
    hex::encode(Sha256::digest(credential.as_bytes()))
}

/// Run a service call on the blocking pool. Every storage call takes the
/// engine lock, which must not park an async worker.
async fn run_blocking<T, F>(state: &AppState, call: F) -> SegmentResult<T>
where
    F: FnOnce(&SegmentService) -> SegmentResult<T> + Send + 'static,
    T: Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || call(service.as_ref()))
        .await
        .map_err(|e| SegmentError::Internal(format!("blocking task failed: {e}")))?
}

// ─── Segments ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSegmentRequest {
    pub slug: String,
}

#[derive(Debug, Serialize)]
pub struct SegmentResponse {
    pub slug: String,
}

pub async fn create_segment(
    State(state): State<AppState>,
    Json(req): Json<CreateSegmentRequest>,
) -> ApiResult<(StatusCode, Json<SegmentResponse>)> {
    let slug = req.slug.clone();
    run_blocking(&state, move |s| s.registry.new_segment(&slug))
        .await
        .map_err(|e| api_error(e, false))?;
    metrics::counter!("segments.created").increment(1);
    Ok((StatusCode::CREATED, Json(SegmentResponse { slug: req.slug })))
}

pub async fn delete_segment(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<StatusCode> {
    run_blocking(&state, move |s| s.registry.delete_segment(&slug))
        .await
        .map_err(|e| api_error(e, false))?;
    metrics::counter!("segments.deleted").increment(1);
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct AutoAssignRequest {
    pub slug: String,
    pub percent: f64,
}

#[derive(Debug, Serialize)]
pub struct AutoAssignResponse {
    pub slug: String,
    pub user_ids: Vec<UserId>,
}

pub async fn auto_assign_segment(
    State(state): State<AppState>,
    Json(req): Json<AutoAssignRequest>,
) -> ApiResult<(StatusCode, Json<AutoAssignResponse>)> {
    let (slug, percent) = (req.slug.clone(), req.percent);
    let user_ids = run_blocking(&state, move |s| {
        s.auto_assign.create_segment_with_auto_assign(&slug, percent)
    })
    .await
    .map_err(|e| api_error(e, false))?;
    metrics::counter!("segments.created").increment(1);
    metrics::counter!("auto_assign.users").increment(user_ids.len() as u64);
    Ok((
        StatusCode::CREATED,
        Json(AutoAssignResponse {
            slug: req.slug,
            user_ids,
        }),
    ))
}

// ─── Users ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub credential: String,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub id: UserId,
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<CreateUserResponse>)> {
    if req.credential.is_empty() {
        return Err(bad_request("credential must not be empty"));
    }
    let digest = credential_digest(&req.credential);
    let id = run_blocking(&state, move |s| s.users.create_user(&req.name, &digest))
        .await
        .map_err(|e| api_error(e, false))?;
    metrics::counter!("users.created").increment(1);
    Ok((StatusCode::CREATED, Json(CreateUserResponse { id })))
}

#[derive(Debug, Deserialize)]
pub struct AddSegmentItem {
    pub slug: String,
    #[serde(default)]
    pub ttl: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct EditSegmentsRequest {
    #[serde(default)]
    pub add_segments: Vec<AddSegmentItem>,
    #[serde(default)]
    pub remove_segments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct EditSegmentsResponse {
    pub added: usize,
    pub removed: usize,
}

pub async fn edit_user_segments(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<EditSegmentsRequest>,
) -> ApiResult<Json<EditSegmentsResponse>> {
    let adding = !req.add_segments.is_empty();
    let changes = MembershipChanges {
        add: req
            .add_segments
            .into_iter()
            .map(|item| SegmentTtl::new(item.slug, item.ttl))
            .collect(),
        remove: req.remove_segments,
    };
    let records = run_blocking(&state, move |s| {
        s.memberships.edit_user_segments(UserId(user_id), &changes)
    })
    .await
    .map_err(|e| api_error(e, adding))?;

    let added = records.iter().filter(|r| r.is_added).count();
    let removed = records.len() - added;
    metrics::counter!("memberships.added").increment(added as u64);
    metrics::counter!("memberships.removed").increment(removed as u64);
    Ok(Json(EditSegmentsResponse { added, removed }))
}

#[derive(Debug, Serialize)]
pub struct UserSegment {
    pub slug: String,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn user_segments(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<UserSegment>>> {
    let memberships = run_blocking(&state, move |s| {
        s.memberships.current_segments(UserId(user_id))
    })
    .await
    .map_err(|e| api_error(e, false))?;
    Ok(Json(
        memberships
            .into_iter()
            .map(|m| UserSegment {
                expires_at: m.expiration.expires_at(),
                slug: m.segment_slug,
            })
            .collect(),
    ))
}

// ─── History ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub link: String,
    pub records: usize,
}

/// GET /api/v1/history — export a month of audit records and link to the file.
pub async fn export_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let exported = run_blocking(&state, move |s| {
        s.exporter.export_month(&s.history, query.year, query.month)
    })
    .await
    .map_err(|e| api_error(e, false))?;

    metrics::counter!("history.exports").increment(1);
    info!(file = %exported.file_name, records = exported.records, "History export served");
    Ok(Json(HistoryResponse {
        link: exported.link,
        records: exported.records,
    }))
}

/// GET /api/v1/history/files/:file_name — download a previous export.
pub async fn download_history(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Response {
    let Some(path) = state.service.exporter.resolve(&file_name) else {
        return bad_request("not an export file name").into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{file_name}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "not_found".to_string(),
                message: format!("{file_name} has not been exported"),
            }),
        )
            .into_response(),
        Err(e) => api_error(
            SegmentError::Internal(format!("{}: {e}", path.display())),
            false,
        )
        .into_response(),
    }
}

// ─── Operational ───────────────────────────────────────────────────────────

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — Readiness probe.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live — Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}
