//! Command Handler - 工具调用信封入口

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::application::{CommandEnvelope, CommandResponse};
use crate::infrastructure::http::middleware::CommandFailure;
use crate::infrastructure::http::state::AppState;

/// 执行信封中的命令，始终返回 `{success, message}`
pub async fn command(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CommandEnvelope>, JsonRejection>,
) -> Response {
    let envelope = match payload {
        Ok(Json(envelope)) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected command body");
            return command_response(None, CommandResponse::malformed());
        }
    };

    // 多个调用时以最后一个为准
    let command = envelope
        .tool_calls
        .as_ref()
        .and_then(|calls| calls.last())
        .and_then(|call| call.func.clone());

    let outcome = state.dispatcher.dispatch(envelope).await;
    if outcome.shutdown {
        tracing::info!("Shutdown requested via HTTP");
        state.request_shutdown();
    }
    command_response(command, outcome.response)
}

/// 失败响应带上 CommandFailure，交给错误日志中间件记录
fn command_response(command: Option<String>, body: CommandResponse) -> Response {
    let failure = (!body.success).then(|| CommandFailure {
        command,
        message: body.message.clone().unwrap_or_default(),
    });

    let mut response = Json(body).into_response();
    if let Some(failure) = failure {
        response.extensions_mut().insert(failure);
    }
    response
}
