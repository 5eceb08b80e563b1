//! HTTP Routes
//!
//! API Endpoints:
//! - /api/ping          GET   健康检查
//! - /api/command       POST  执行工具调用信封 `{tool_calls: [...]}`
//! - /api/jobs/status   POST  查询生成任务状态
//! - /ws/events         WS    任务状态事件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

/// 创建所有路由
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", api_routes())
        .route("/ws/events", get(handlers::events_websocket_handler))
}

/// API 路由
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/command", post(handlers::command))
        .route("/jobs/status", post(handlers::query_job_status))
}
