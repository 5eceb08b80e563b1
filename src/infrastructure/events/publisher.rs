//! Event Publisher Implementation
//!
//! 任务状态事件的广播，WebSocket 订阅者接收

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::application::ports::JobState;

/// WebSocket 事件类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum JobEvent {
    /// 任务状态变更
    JobStateChanged {
        job_id: String,
        backend: String,
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output_path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// 事件发布器
pub struct EventPublisher {
    channel: broadcast::Sender<JobEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { channel: tx }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.channel.subscribe()
    }

    /// 发布任务开始执行事件
    pub fn publish_job_running(&self, job_id: &str, backend: &str) {
        self.publish(JobEvent::JobStateChanged {
            job_id: job_id.to_string(),
            backend: backend.to_string(),
            state: JobState::Running.as_str().to_string(),
            output_path: None,
            duration_ms: None,
            error: None,
        });
    }

    /// 发布任务完成事件
    pub fn publish_job_succeeded(
        &self,
        job_id: &str,
        backend: &str,
        output_path: &str,
        duration_ms: u64,
    ) {
        self.publish(JobEvent::JobStateChanged {
            job_id: job_id.to_string(),
            backend: backend.to_string(),
            state: JobState::Succeeded.as_str().to_string(),
            output_path: Some(output_path.to_string()),
            duration_ms: Some(duration_ms),
            error: None,
        });
    }

    /// 发布任务失败事件
    pub fn publish_job_failed(&self, job_id: &str, backend: &str, error: &str) {
        self.publish(JobEvent::JobStateChanged {
            job_id: job_id.to_string(),
            backend: backend.to_string(),
            state: JobState::Failed.as_str().to_string(),
            output_path: None,
            duration_ms: None,
            error: Some(error.to_string()),
        });
    }

    fn publish(&self, event: JobEvent) {
        if let Err(e) = self.channel.send(event) {
            tracing::debug!(error = %e, "Failed to publish event (no receivers)");
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
