//! Job Handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::application::commands::QueryJobStatusCommand;
use crate::infrastructure::http::dto::{ApiResponse, JobStatusRequest, JobStatusResponse};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

pub async fn query_job_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JobStatusRequest>,
) -> Result<Json<ApiResponse<JobStatusResponse>>, ApiError> {
    if req.job_ids.is_empty() {
        return Err(ApiError::BadRequest("job_ids must not be empty".to_string()));
    }

    let result = state.job_status_handler.handle(QueryJobStatusCommand {
        job_ids: req.job_ids,
    });
    Ok(Json(ApiResponse::success(result.into())))
}
