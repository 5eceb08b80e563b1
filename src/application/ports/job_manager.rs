//! Job Manager Port - 生成任务管理
//!
//! 定义任务状态机与任务存储的抽象接口，具体实现在 infrastructure/memory 层

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::application::selector::BackendSelection;
use crate::domain::generation::GenerationRequest;

/// Job Manager 错误
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: JobState, to: JobState },

    #[error("Job queue is full or closed")]
    QueueUnavailable,
}

/// 任务状态，只能向前推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// 已校验并入队
    Submitted,
    /// 后端调用中
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn can_transition(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Submitted, JobState::Running)
                | (JobState::Submitted, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生成任务
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub job_id: String,
    pub request: GenerationRequest,
    pub selection: BackendSelection,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl GenerationJob {
    pub fn new(request: GenerationRequest, selection: BackendSelection) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            request,
            selection,
            state: JobState::Submitted,
            submitted_at: Utc::now(),
            completed_at: None,
            output_path: None,
            error_message: None,
        }
    }
}

/// Job Manager Port
///
/// 任务状态全部保存在内存中
pub trait JobManagerPort: Send + Sync {
    /// 登记任务并投递到执行队列，返回 job_id
    fn submit(&self, job: GenerationJob) -> Result<String, JobError>;

    fn get(&self, job_id: &str) -> Option<GenerationJob>;

    fn get_state(&self, job_id: &str) -> Option<JobState>;

    /// 推进状态，拒绝回退
    fn set_state(&self, job_id: &str, state: JobState) -> Result<(), JobError>;

    fn set_succeeded(&self, job_id: &str, output_path: PathBuf) -> Result<(), JobError>;

    fn set_failed(&self, job_id: &str, error: String) -> Result<(), JobError>;

    /// 清理完成时间早于 `older_than` 的终态任务，返回清理数量
    fn purge_finished(&self, older_than: Duration) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
