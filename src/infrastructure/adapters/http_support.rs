//! 后端 HTTP 客户端共用的错误映射

use reqwest::{Client, Response};
use std::time::Duration;

use crate::application::ports::BackendError;

/// 发送失败: 超时 -> Timeout，其余 -> ServiceUnavailable
pub fn send_error(base_url: &str, e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else if e.is_connect() {
        BackendError::ServiceUnavailable(format!("Could not connect to {}: {}", base_url, e))
    } else {
        BackendError::ServiceUnavailable(e.to_string())
    }
}

/// 非 2xx 转为 ServiceUnavailable("HTTP <status>: <body>")
pub async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::ServiceUnavailable(format!(
        "HTTP {}: {}",
        status,
        truncate(&body, 512)
    )))
}

/// JSON 解析失败视为协议错误
pub async fn read_json<T: serde::de::DeserializeOwned>(
    response: Response,
    what: &str,
) -> Result<T, BackendError> {
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Protocol(format!("Failed to parse {}: {}", what, e)))
}

pub async fn read_bytes(response: Response, what: &str) -> Result<Vec<u8>, BackendError> {
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| BackendError::Protocol(format!("Failed to read {}: {}", what, e)))
}

pub fn build_client(timeout: Duration) -> Result<Client, BackendError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::ServiceUnavailable(e.to_string()))
}

pub fn trim_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
