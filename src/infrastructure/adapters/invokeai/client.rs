//! InvokeAI Client - Flux Kontext 工作流
//!
//! 流程: 上传参考图 -> 修改图模板 -> enqueue_batch -> 轮询队列项 -> 下载输出图

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::application::ports::{
    BackendError, BackendRequest, ImageBackendPort, QueueControlPort, ServiceStatus,
};
use crate::domain::generation::{BackendKind, GenerationResult};
use crate::domain::InvokeBatch;
use crate::infrastructure::adapters::http_support::{
    build_client, ensure_success, read_bytes, read_json, send_error, trim_base,
};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    image_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    #[serde(default)]
    item_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: Option<String>,
    #[serde(default)]
    highlights: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueueItem {
    status: String,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    session: Option<QueueSession>,
}

#[derive(Debug, Deserialize)]
struct QueueSession {
    #[serde(default)]
    results: HashMap<String, Value>,
    #[serde(default)]
    source_prepared_mapping: HashMap<String, Vec<String>>,
}

impl QueueSession {
    /// 优先取 canvas_output 节点的输出图，否则取任一图片输出
    fn output_image(&self) -> Option<String> {
        let image_name = |prepared: &str| {
            self.results
                .get(prepared)
                .and_then(|r| r.pointer("/image/image_name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let preferred = self
            .source_prepared_mapping
            .iter()
            .filter(|(source, _)| source.starts_with("canvas_output"))
            .flat_map(|(_, prepared)| prepared.iter())
            .find_map(|id| image_name(id));

        preferred.or_else(|| {
            let mut ids: Vec<&String> = self.results.keys().collect();
            ids.sort();
            ids.into_iter().find_map(|id| image_name(id))
        })
    }
}

/// InvokeAI 客户端配置
#[derive(Debug, Clone)]
pub struct InvokeAiConfig {
    pub base_url: String,
    pub board_id: Option<String>,
    /// 从入队到完成的总等待时间（秒）
    pub generation_timeout_secs: u64,
    /// 控制类请求超时（秒）
    pub control_timeout_secs: u64,
    /// 状态查询超时（秒）
    pub status_timeout_secs: u64,
    pub poll_interval: Duration,
}

impl InvokeAiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_base(&base_url.into()),
            board_id: None,
            generation_timeout_secs: 300,
            control_timeout_secs: 30,
            status_timeout_secs: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// InvokeAI 客户端
pub struct InvokeAiClient {
    client: Client,
    config: InvokeAiConfig,
    workflow: InvokeBatch,
}

impl InvokeAiClient {
    pub fn new(config: InvokeAiConfig) -> Result<Self, BackendError> {
        let workflow =
            InvokeBatch::flux_kontext().map_err(|e| BackendError::Protocol(e.to_string()))?;
        // 入队请求 60 秒，其余请求单独设置
        let client = build_client(Duration::from_secs(60))?;
        Ok(Self {
            client,
            config,
            workflow,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn upload(&self, png: Vec<u8>) -> Result<String, BackendError> {
        let part = Part::bytes(png)
            .file_name("fluxgate_reference.png")
            .mime_str("image/png")
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        let form = Form::new().part("file", part);

        let mut query = vec![
            ("image_category", "user"),
            ("is_intermediate", "false"),
            ("crop_visible", "false"),
        ];
        if let Some(board) = self.config.board_id.as_deref() {
            query.push(("board_id", board));
        }

        let response = self
            .client
            .post(self.url("/api/v1/images/upload"))
            .query(&query)
            .header("accept", "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        let uploaded: UploadResponse = read_json(response, "InvokeAI upload response").await?;

        uploaded
            .image_name
            .ok_or_else(|| BackendError::Protocol("Upload response has no image_name".to_string()))
    }

    async fn enqueue(&self, batch: &Value) -> Result<u64, BackendError> {
        let response = self
            .client
            .post(self.url("/api/v1/queue/default/enqueue_batch"))
            .json(batch)
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        let enqueued: EnqueueResponse = read_json(response, "InvokeAI enqueue response").await?;

        enqueued
            .item_ids
            .first()
            .copied()
            .ok_or_else(|| BackendError::Protocol("Enqueue response has no item_ids".to_string()))
    }

    /// 轮询队列项直到完成，返回输出图名
    async fn wait_for_item(&self, item_id: u64) -> Result<String, BackendError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.generation_timeout_secs);
        let url = self.url(&format!("/api/v1/queue/default/i/{}", item_id));

        loop {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| send_error(&self.config.base_url, e))?;
            let response = ensure_success(response).await?;
            let item: QueueItem = read_json(response, "InvokeAI queue item").await?;

            match item.status.as_str() {
                "completed" => {
                    return item
                        .session
                        .as_ref()
                        .and_then(QueueSession::output_image)
                        .ok_or_else(|| {
                            BackendError::Protocol(format!(
                                "Queue item {} completed without an image output",
                                item_id
                            ))
                        });
                }
                "failed" | "canceled" => {
                    let detail = item
                        .error_message
                        .or(item.error_type)
                        .unwrap_or_else(|| "no error detail".to_string());
                    return Err(BackendError::Protocol(format!(
                        "Queue item {} {}: {}",
                        item_id, item.status, detail
                    )));
                }
                other => {
                    tracing::trace!(item_id, status = other, "InvokeAI queue item pending");
                }
            }

            if Instant::now() >= deadline {
                return Err(BackendError::Timeout);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn download(&self, image_name: &str) -> Result<Vec<u8>, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/images/i/{}/full", image_name)))
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        read_bytes(response, "InvokeAI image").await
    }

    async fn control(&self, method: reqwest::Method, path: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .request(method, self.url(path))
            .timeout(Duration::from_secs(self.config.control_timeout_secs))
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageBackendPort for InvokeAiClient {
    fn kind(&self) -> BackendKind {
        BackendKind::InvokeAi
    }

    async fn generate(&self, request: BackendRequest) -> Result<GenerationResult, BackendError> {
        let started = Instant::now();
        let png = request.image.ok_or_else(|| {
            BackendError::Protocol("InvokeAI Kontext request has no input image".to_string())
        })?;

        let image_name = self.upload(png).await?;
        tracing::info!(image_name = %image_name, "Uploaded reference image to InvokeAI");

        let batch = self
            .workflow
            .patch(&image_name, &request.prompt, request.steps)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        let item_id = self.enqueue(&batch).await?;
        tracing::info!(item_id, "Enqueued Flux Kontext batch on InvokeAI");

        let output = self.wait_for_item(item_id).await?;
        let bytes = self.download(&output).await?;

        let result = GenerationResult::from_encoded(bytes, BackendKind::InvokeAi, started.elapsed())
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        tracing::info!(
            item_id,
            output = %output,
            elapsed_ms = result.duration.as_millis() as u64,
            "InvokeAI generation completed"
        );
        Ok(result)
    }

    async fn status(&self) -> Result<ServiceStatus, BackendError> {
        let response = self
            .client
            .get(self.url("/api/v1/app/version"))
            .timeout(Duration::from_secs(self.config.status_timeout_secs))
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        let version: VersionResponse = read_json(response, "InvokeAI response").await?;

        let mut status = ServiceStatus::new(format!(
            "InvokeAI service is running. Version: {}",
            version.version.as_deref().unwrap_or("Unknown")
        ));
        if !version.highlights.is_empty() {
            status = status.with_detail(format!("Highlights: {}", version.highlights.join(", ")));
        }
        Ok(status)
    }
}

#[async_trait]
impl QueueControlPort for InvokeAiClient {
    async fn pause_queue(&self) -> Result<(), BackendError> {
        self.control(reqwest::Method::PUT, "/api/v1/queue/default/processor/pause")
            .await
    }

    async fn resume_queue(&self) -> Result<(), BackendError> {
        self.control(reqwest::Method::PUT, "/api/v1/queue/default/processor/resume")
            .await
    }

    async fn empty_model_cache(&self) -> Result<(), BackendError> {
        self.control(reqwest::Method::POST, "/api/v2/models/empty_model_cache")
            .await
    }
}
