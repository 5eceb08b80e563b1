//! Application State
//!
//! HTTP 与 WebSocket 处理器共享的状态

use std::sync::Arc;
use tokio::sync::watch;

use crate::application::ports::JobManagerPort;
use crate::application::{CommandDispatcher, QueryJobStatusHandler};
use crate::infrastructure::events::EventPublisher;

/// 应用状态
pub struct AppState {
    pub dispatcher: Arc<CommandDispatcher>,
    pub job_status_handler: QueryJobStatusHandler,
    pub event_publisher: Arc<EventPublisher>,
    /// 收到 shutdown 命令时置为 true
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        job_manager: Arc<dyn JobManagerPort>,
        event_publisher: Arc<EventPublisher>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            dispatcher,
            job_status_handler: QueryJobStatusHandler::new(job_manager),
            event_publisher,
            shutdown,
        }
    }

    pub fn request_shutdown(&self) {
        // 没有接收者时忽略
        let _ = self.shutdown.send(true);
    }
}
