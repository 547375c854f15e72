//! REST handlers for embedding requests and operational endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tokio::sync::watch;
use tracing::{error, warn};
use vecserve_batching::{EmbeddingService, SchedulerState};
use vecserve_core::error::EmbedError;
use vecserve_core::types::{EmbeddingRequest, EmbeddingResponse, ErrorDetail, HealthResponse};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: EmbeddingService,
    pub scheduler_state: watch::Receiver<SchedulerState>,
    /// 0 disables the limit.
    pub max_request_texts: usize,
}

type ApiError = (StatusCode, Json<ErrorDetail>);

/// Map a core error onto the HTTP status and `{"detail"}` body.
pub fn error_response(err: &EmbedError) -> ApiError {
    let status = match err {
        EmbedError::Validation(_) => StatusCode::BAD_REQUEST,
        EmbedError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        EmbedError::Overloaded { .. } | EmbedError::ServiceStopping => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        EmbedError::Inference(_) | EmbedError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorDetail {
            detail: err.to_string(),
        }),
    )
}

/// Validate an embedding request at the API boundary.
fn validate_request(request: &EmbeddingRequest, max_texts: usize) -> Result<(), EmbedError> {
    if max_texts != 0 && request.texts.len() > max_texts {
        return Err(EmbedError::Validation(format!(
            "'texts' has {} entries, maximum is {}",
            request.texts.len(),
            max_texts
        )));
    }
    Ok(())
}

/// `POST /embeddings`: embed a list of texts.
#[utoipa::path(
    post,
    path = "/embeddings",
    tag = "Embeddings",
    request_body = EmbeddingRequest,
    responses(
        (status = 200, description = "One unit-length vector per input text", body = EmbeddingResponse),
        (status = 400, description = "Malformed request", body = ErrorDetail),
        (status = 500, description = "Model inference failed", body = ErrorDetail),
        (status = 503, description = "Overloaded or shutting down", body = ErrorDetail),
        (status = 504, description = "Request timed out", body = ErrorDetail),
    )
)]
pub async fn create_embeddings(
    State(state): State<AppState>,
    payload: Result<Json<EmbeddingRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>, ApiError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let err = EmbedError::Validation(rejection.body_text());
            warn!(error = %err, "Embedding request rejected");
            metrics::counter!("api.validation_errors").increment(1);
            return Err(error_response(&err));
        }
    };

    if let Err(err) = validate_request(&request, state.max_request_texts) {
        warn!(error = %err, "Embedding request validation failed");
        metrics::counter!("api.validation_errors").increment(1);
        return Err(error_response(&err));
    }

    match state.service.embed(request.texts).await {
        Ok(embeddings) => Ok(Json(EmbeddingResponse { embeddings })),
        Err(e) => {
            error!(error = %e, kind = e.kind(), "Embedding request failed");
            metrics::counter!("api.errors").increment(1);
            Err(error_response(&e))
        }
    }
}

/// `GET /health`: cheap liveness check, independent of the model.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// `GET /ready`: readiness probe.
/// Returns 200 while the scheduler can still accept work.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses(
        (status = 200, description = "Scheduler running"),
        (status = 503, description = "Scheduler stopped"),
    )
)]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if *state.scheduler_state.borrow() == SchedulerState::Stopped {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// `GET /live`: liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
