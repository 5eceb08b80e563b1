//! ComfyUI 事件流与 prompt 关联表
//!
//! WebSocket 消息格式: {"type": "...", "data": {"prompt_id": "...", ...}}
//! - executing 且 node 为 null: 该 prompt 执行结束
//! - execution_success: 执行成功
//! - execution_error / execution_interrupted: 执行失败

use dashmap::DashMap;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::BackendError;

/// 单个 prompt 的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Completed,
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// 解析一条事件，只返回终结事件
pub fn parse_event(text: &str) -> Option<(String, PromptOutcome)> {
    let event: RawEvent = serde_json::from_str(text).ok()?;
    let prompt_id = event.data.get("prompt_id")?.as_str()?.to_string();

    let outcome = match event.kind.as_str() {
        "executing" if event.data.get("node").map_or(false, Value::is_null) => {
            PromptOutcome::Completed
        }
        "execution_success" => PromptOutcome::Completed,
        "execution_error" => {
            let node = event
                .data
                .get("node_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown node");
            let message = event
                .data
                .get("exception_message")
                .and_then(Value::as_str)
                .unwrap_or("execution error");
            PromptOutcome::Failed(format!("{}: {}", node, message.trim()))
        }
        "execution_interrupted" => PromptOutcome::Failed("execution interrupted".to_string()),
        _ => return None,
    };
    Some((prompt_id, outcome))
}

/// prompt_id -> 等待者
///
/// 事件可能早于 register 到达，先暂存，register 时立即交付。
#[derive(Default)]
pub struct CorrelationTable {
    waiters: DashMap<String, oneshot::Sender<PromptOutcome>>,
    early: DashMap<String, PromptOutcome>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, prompt_id: &str) -> oneshot::Receiver<PromptOutcome> {
        let (tx, rx) = oneshot::channel();
        match self.early.remove(prompt_id) {
            Some((_, outcome)) => {
                let _ = tx.send(outcome);
            }
            None => {
                self.waiters.insert(prompt_id.to_string(), tx);
                // register 与 resolve 并发时再检查一次
                if let Some((_, outcome)) = self.early.remove(prompt_id) {
                    if let Some((_, tx)) = self.waiters.remove(prompt_id) {
                        let _ = tx.send(outcome);
                    }
                }
            }
        }
        rx
    }

    /// 交付结果；同一 prompt 只保留第一个终结事件
    pub fn resolve(&self, prompt_id: &str, outcome: PromptOutcome) {
        match self.waiters.remove(prompt_id) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
            }
            None => {
                self.early.entry(prompt_id.to_string()).or_insert(outcome);
            }
        }
    }

    /// 超时或放弃等待时清理
    pub fn cancel(&self, prompt_id: &str) {
        self.waiters.remove(prompt_id);
        self.early.remove(prompt_id);
    }

    pub fn pending(&self) -> usize {
        self.waiters.len() + self.early.len()
    }
}

/// 单个 clientId 的 WebSocket 订阅，drop 时停止读取
pub struct EventSubscription {
    reader: JoinHandle<()>,
}

impl EventSubscription {
    /// 建立连接并开始把终结事件写入关联表
    pub async fn connect(
        ws_url: &str,
        table: Arc<CorrelationTable>,
    ) -> Result<Self, BackendError> {
        let (mut stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| {
                BackendError::ServiceUnavailable(format!(
                    "Could not open ComfyUI event stream {}: {}",
                    ws_url, e
                ))
            })?;

        let url = ws_url.to_string();
        let reader = tokio::spawn(async move {
            // executing(null) 与 execution_success 会先后到达，只交付一次
            let mut finished = HashSet::new();
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some((prompt_id, outcome)) = parse_event(&text) {
                            if !finished.insert(prompt_id.clone()) {
                                continue;
                            }
                            tracing::debug!(prompt_id = %prompt_id, outcome = ?outcome, "ComfyUI prompt finished");
                            table.resolve(&prompt_id, outcome);
                        }
                    }
                    // 二进制消息为预览图
                    Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, url = %url, "ComfyUI event stream error");
                        break;
                    }
                }
            }
        });

        Ok(Self { reader })
    }

    /// 读取任务已退出（连接关闭）
    pub fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
