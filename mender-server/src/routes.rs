//! HTTP route handlers.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{info, warn};

use mender::core::classifier::{classify, extract_error_context};
use mender::core::patch::Patcher;
use mender::core::types::{ExecutionOutcome, PatchCandidate, PolicyDecision, RepairSession};
use mender::core::validator::validate;
use mender::io::executor::CodeExecutor;
use mender::looping::{abandoned_session, run_repair};
use mender::submission::{Submission, SubmissionError, SubmittedProgram, check_code};

use crate::sse;
use crate::state::AppState;

const ENDPOINTS: &[&str] = &[
    "GET /health",
    "POST /validate",
    "POST /run",
    "POST /patch",
    "POST /repair",
    "POST /repair/stream",
];

/// Build the application router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/validate", post(validate_code))
        .route("/run", post(run_code))
        .route("/patch", post(patch_code))
        .route("/repair", post(repair_code))
        .route("/repair/stream", post(sse::repair_stream))
}

/// Error body returned for rejected requests.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    endpoints: &'static [&'static str],
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: ENDPOINTS,
    })
}

#[derive(Deserialize)]
struct ValidateRequest {
    code: String,
}

/// POST /validate - policy check only.
async fn validate_code(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Json<PolicyDecision> {
    Json(validate(&req.code, &state.config.policy))
}

#[derive(Serialize)]
struct RunResponse {
    policy: PolicyDecision,
    outcome: Option<ExecutionOutcome>,
}

/// POST /run - validate, then execute once. `outcome` is null when rejected.
async fn run_code(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> Result<Json<RunResponse>, ApiError> {
    let program = SubmittedProgram::from_submission(&submission, &state.config.limits)?;
    let policy = validate(program.code(), &state.config.policy);
    if !policy.allowed {
        return Ok(Json(RunResponse {
            policy,
            outcome: None,
        }));
    }

    let executor = state.executor.clone();
    let outcome = task::spawn_blocking(move || executor.execute(program.code(), program.limits()))
        .await
        .unwrap_or_else(|err| {
            warn!(error = %err, "execution worker failed");
            ExecutionOutcome::internal_error(format!("execution worker failed: {err}"), 0)
        });
    Ok(Json(RunResponse {
        policy,
        outcome: Some(outcome),
    }))
}

#[derive(Deserialize)]
struct PatchRequest {
    code: String,
    #[serde(default)]
    stderr: String,
}

/// POST /patch - classify stderr and propose one candidate. Code is held to
/// the same length limit as submissions.
async fn patch_code(
    State(state): State<AppState>,
    Json(req): Json<PatchRequest>,
) -> Result<Json<PatchCandidate>, ApiError> {
    check_code(&req.code, &state.config.limits)?;
    let patcher = state.patcher.clone();
    let candidate = task::spawn_blocking(move || {
        let error = classify(Some(&req.stderr));
        let diagnostics = extract_error_context(Some(&req.stderr));
        patcher.propose(&req.code, &error, &diagnostics)
    })
    .await
    .map_err(|err| ApiError::internal(format!("patch worker failed: {err}")))?;
    Ok(Json(candidate))
}

/// POST /repair - full repair loop, answered once the session is terminal.
async fn repair_code(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> Result<Json<RepairSession>, ApiError> {
    let program = SubmittedProgram::from_submission(&submission, &state.config.limits)?;
    let worker_state = state.clone();
    let worker_program = program.clone();
    let session = task::spawn_blocking(move || {
        run_repair(
            &worker_program,
            &worker_state.config.policy,
            &*worker_state.executor,
            &*worker_state.patcher,
            |_| {},
        )
    })
    .await
    .unwrap_or_else(|err| {
        warn!(error = %err, "repair worker failed");
        abandoned_session(&program, format!("repair worker failed: {err}"))
    });
    info!(session_id = %session.session_id, status = session.status.as_str(), "repair answered");
    Ok(Json(session))
}
