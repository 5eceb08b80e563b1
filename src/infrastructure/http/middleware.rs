//! HTTP Middleware
//!
//! HTTP 错误日志中间件：状态码错误与命令失败

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// 命令处理器在 `success=false` 的响应上附加此扩展
///
/// 命令失败仍返回 200，只能靠扩展让中间件识别。
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFailure {
    pub command: Option<String>,
    pub message: String,
}

/// 4xx 记 warn，5xx 记 error，命令失败记 warn，均附带耗时
pub async fn error_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            elapsed_ms,
            "HTTP server error"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            elapsed_ms,
            "HTTP client error"
        );
    } else if let Some(failure) = response.extensions().get::<CommandFailure>() {
        tracing::warn!(
            method = %method,
            uri = %uri,
            command = failure.command.as_deref().unwrap_or("<none>"),
            message = %failure.message,
            elapsed_ms,
            "Command failed"
        );
    }

    response
}
