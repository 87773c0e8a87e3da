// HTTP route handlers for the Assay API

use assay_common::layout;
use assay_worker::intake::{self, IntakeError};
use assay_worker::SubmitError;
use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{metrics, AppState};

/// Multipart field carrying the archive
const SUBMISSION_FIELD: &str = "submission";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::MissingArchive
            | SubmitError::InvalidArchive
            | SubmitError::InvalidAssignment(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            SubmitError::UnknownAssignment(_) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            SubmitError::Io(e) => {
                error!(error = %e, "failed to create job directories");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "could not start grading")
            }
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Empty => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()),
            IntakeError::Io(e) => {
                error!(error = %e, "failed to store upload");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "could not store upload")
            }
        }
    }
}

fn rejection_reason(err: &SubmitError) -> &'static str {
    match err {
        SubmitError::MissingArchive => "missing_archive",
        SubmitError::InvalidArchive => "invalid_archive",
        SubmitError::InvalidAssignment(_) => "invalid_assignment",
        SubmitError::UnknownAssignment(_) => "unknown_assignment",
        SubmitError::Io(_) => "io",
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub path: String,
}

/// POST /api/assignments/:id/upload - Store a submission archive
pub async fn upload_submission(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    layout::validate_assignment_id(&assignment_id)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if field.name() != Some(SUBMISSION_FIELD) {
            continue;
        }
        let original_name = field.file_name().unwrap_or("submission.zip").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;

        let path =
            intake::store_upload(&state.layout, &assignment_id, &original_name, &bytes, Utc::now())
                .await?;
        metrics::record_upload();

        return Ok(Json(UploadResponse {
            ok: true,
            path: path.to_string_lossy().into_owned(),
        }));
    }

    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        "submission file is required",
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub socket_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResponse {
    pub status: &'static str,
    pub submission_id: String,
    pub result_path: String,
}

/// POST /api/assignments/:id/grade - Start grading an uploaded archive
pub async fn grade_submission(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
    payload: Result<Json<GradeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<GradeResponse>), ApiError> {
    // An unreadable body is an empty request; validation reports what is missing
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            debug!(assignment_id = %assignment_id, rejection = %rejection.body_text(), "grade body not usable");
            GradeRequest::default()
        }
    };
    let job = match state
        .orchestrator
        .prepare(&assignment_id, payload.file.as_deref(), payload.socket_id)
        .await
    {
        Ok(job) => job,
        Err(e) => {
            warn!(assignment_id = %assignment_id, error = %e, "grading request rejected");
            metrics::record_job_rejected(rejection_reason(&e));
            return Err(e.into());
        }
    };
    metrics::record_job_submitted(&job.assignment_id);

    let response = GradeResponse {
        status: "started",
        submission_id: job.job_id.clone(),
        result_path: job.result_path.clone(),
    };

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let outcome = orchestrator.run(job).await;
        let label = if outcome.succeeded() { "done" } else { "failed" };
        metrics::record_job_completed(&outcome.assignment_id, label, outcome.elapsed.as_secs_f64());
    });

    info!(submission_id = %response.submission_id, "grading started");
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub docker: bool,
    pub live_sessions: usize,
    pub uptime_secs: u64,
}

/// GET /health - Liveness plus docker daemon reachability
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let docker = match &state.docker {
        Some(docker) => docker.ping().await.is_ok(),
        None => false,
    };
    Json(HealthResponse {
        status: "ok",
        docker,
        live_sessions: state.hub().len(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
