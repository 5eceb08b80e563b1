//! Data Transfer Objects

use serde::{Deserialize, Serialize};

use crate::application::commands::{JobStatusInfo, QueryJobStatusResponse};

/// 统一 API 响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub errno: i32,
    pub error: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 成功响应
    pub fn success(data: T) -> Self {
        Self {
            errno: 0,
            error: String::new(),
            data: Some(data),
        }
    }
}

// ============================================================================
// Job DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct JobStatusRequest {
    pub job_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub jobs: Vec<JobStatusInfo>,
    pub unknown: Vec<String>,
}

impl From<QueryJobStatusResponse> for JobStatusResponse {
    fn from(response: QueryJobStatusResponse) -> Self {
        Self {
            jobs: response.jobs,
            unknown: response.unknown,
        }
    }
}
