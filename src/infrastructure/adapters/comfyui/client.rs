//! ComfyUI Client - Flux Kontext NIM 工作流
//!
//! 流程: 上传参考图 -> 打开事件流 -> 提交 prompt -> 等待终结事件 -> /history -> /view

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::event_stream::{CorrelationTable, EventSubscription, PromptOutcome};
use crate::application::ports::{
    BackendError, BackendRequest, FreeMemoryOptions, ImageBackendPort, MemoryControlPort,
    ServiceStatus,
};
use crate::domain::generation::{BackendKind, GenerationResult};
use crate::domain::ComfyWorkflow;
use crate::infrastructure::adapters::http_support::{
    build_client, ensure_success, read_bytes, read_json, send_error, trim_base,
};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    prompt: &'a Value,
    client_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    prompt_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: HashMap<String, NodeOutput>,
}

#[derive(Debug, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    images: Vec<OutputImage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutputImage {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default = "default_output_type")]
    kind: String,
}

fn default_output_type() -> String {
    "output".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct SystemStats {
    #[serde(default)]
    system: SystemInfo,
    #[serde(default)]
    devices: Vec<DeviceInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemInfo {
    comfyui_version: Option<String>,
    python_version: Option<String>,
    pytorch_version: Option<String>,
    ram_total: Option<u64>,
    ram_free: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DeviceInfo {
    name: Option<String>,
    vram_total: Option<u64>,
    vram_free: Option<u64>,
}

/// "used / total GB (Free: x GB)"
fn memory_line(label: &str, total: u64, free: u64) -> String {
    let used = total.saturating_sub(free);
    format!(
        "{}: {:.1} / {:.1} GB (Free: {:.1} GB)",
        label,
        used as f64 / GIB,
        total as f64 / GIB,
        free as f64 / GIB
    )
}

impl SystemStats {
    fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let system = &self.system;

        if let Some(version) = &system.comfyui_version {
            lines.push(format!("Version: {}", version));
        }
        if let Some(python) = &system.python_version {
            let short = python.split_whitespace().next().unwrap_or(python);
            lines.push(format!("Python: {}", short));
        }
        if let Some(torch) = &system.pytorch_version {
            let short = torch.split('+').next().unwrap_or(torch);
            lines.push(format!("PyTorch: {}", short));
        }
        if let (Some(total), Some(free)) = (system.ram_total, system.ram_free) {
            lines.push(memory_line("RAM", total, free));
        }
        if let Some(device) = self.devices.first() {
            if let (Some(total), Some(free)) = (device.vram_total, device.vram_free) {
                lines.push(memory_line("VRAM", total, free));
            }
            if let Some(name) = &device.name {
                // "cuda:0 NVIDIA GeForce RTX 4090 : cudaMallocAsync"
                let short = match name.split_once(':') {
                    Some((_, rest)) => rest.split(':').next().unwrap_or(rest).trim(),
                    None => name.as_str(),
                };
                lines.push(format!("GPU: {}", short));
            }
        }
        lines
    }
}

/// ComfyUI 客户端配置
#[derive(Debug, Clone)]
pub struct ComfyUiConfig {
    pub base_url: String,
    /// 等待终结事件的时间（秒）
    pub generation_timeout_secs: u64,
    pub control_timeout_secs: u64,
    pub status_timeout_secs: u64,
}

impl ComfyUiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_base(&base_url.into()),
            generation_timeout_secs: 300,
            control_timeout_secs: 30,
            status_timeout_secs: 10,
        }
    }
}

/// ComfyUI 客户端
pub struct ComfyUiClient {
    client: Client,
    config: ComfyUiConfig,
    workflow: ComfyWorkflow,
    table: Arc<CorrelationTable>,
}

impl ComfyUiClient {
    pub fn new(config: ComfyUiConfig) -> Result<Self, BackendError> {
        let workflow =
            ComfyWorkflow::flux_kontext().map_err(|e| BackendError::Protocol(e.to_string()))?;
        let client = build_client(Duration::from_secs(60))?;
        Ok(Self {
            client,
            config,
            workflow,
            table: Arc::new(CorrelationTable::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn ws_url(&self, client_id: &str) -> String {
        let base = &self.config.base_url;
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.clone()
        };
        format!("{}/ws?clientId={}", ws_base, client_id)
    }

    async fn upload(&self, png: Vec<u8>) -> Result<String, BackendError> {
        let part = Part::bytes(png)
            .file_name("fluxgate_reference.png")
            .mime_str("image/png")
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        let form = Form::new().part("image", part);

        let response = self
            .client
            .post(self.url("/upload/image"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        let uploaded: UploadResponse = read_json(response, "ComfyUI upload response").await?;

        uploaded
            .name
            .ok_or_else(|| BackendError::Protocol("Upload response has no name".to_string()))
    }

    async fn submit(&self, graph: &Value, client_id: &str) -> Result<String, BackendError> {
        let response = self
            .client
            .post(self.url("/prompt"))
            .json(&PromptRequest {
                prompt: graph,
                client_id,
            })
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        let submitted: PromptResponse = read_json(response, "ComfyUI prompt response").await?;

        submitted
            .prompt_id
            .ok_or_else(|| BackendError::Protocol("Prompt response has no prompt_id".to_string()))
    }

    async fn wait(
        &self,
        prompt_id: &str,
        subscription: &EventSubscription,
    ) -> Result<(), BackendError> {
        let mut rx = self.table.register(prompt_id);
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.generation_timeout_secs);
        let mut check = tokio::time::interval(Duration::from_millis(500));

        let outcome = loop {
            tokio::select! {
                biased;
                outcome = &mut rx => break outcome.ok(),
                _ = tokio::time::sleep_until(deadline) => {
                    self.table.cancel(prompt_id);
                    return Err(BackendError::Timeout);
                }
                _ = check.tick() => {
                    if subscription.is_closed() {
                        // 连接关闭前可能已交付结果
                        break rx.try_recv().ok();
                    }
                }
            }
        };
        self.table.cancel(prompt_id);

        match outcome {
            Some(PromptOutcome::Completed) => Ok(()),
            Some(PromptOutcome::Failed(reason)) => Err(BackendError::Protocol(format!(
                "ComfyUI execution failed: {}",
                reason
            ))),
            None => Err(BackendError::ServiceUnavailable(
                "ComfyUI event stream closed before the prompt finished".to_string(),
            )),
        }
    }

    async fn output_image(&self, prompt_id: &str) -> Result<OutputImage, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("/history/{}", prompt_id)))
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        let mut history: HashMap<String, HistoryEntry> =
            read_json(response, "ComfyUI history").await?;

        let entry = history.remove(prompt_id).ok_or_else(|| {
            BackendError::Protocol(format!("Prompt {} not found in history", prompt_id))
        })?;

        // 节点 id 排序后取第一个 output 类型图片
        let mut node_ids: Vec<&String> = entry.outputs.keys().collect();
        node_ids.sort();
        let images: Vec<&OutputImage> = node_ids
            .into_iter()
            .flat_map(|id| entry.outputs[id].images.iter())
            .collect();

        images
            .iter()
            .find(|image| image.kind == "output")
            .or_else(|| images.first())
            .map(|image| (*image).clone())
            .ok_or_else(|| {
                BackendError::Protocol(format!("Prompt {} produced no images", prompt_id))
            })
    }

    async fn download(&self, image: &OutputImage) -> Result<Vec<u8>, BackendError> {
        let response = self
            .client
            .get(self.url("/view"))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        read_bytes(response, "ComfyUI image").await
    }
}

#[async_trait]
impl ImageBackendPort for ComfyUiClient {
    fn kind(&self) -> BackendKind {
        BackendKind::ComfyUi
    }

    async fn generate(&self, request: BackendRequest) -> Result<GenerationResult, BackendError> {
        let started = Instant::now();
        let png = request.image.ok_or_else(|| {
            BackendError::Protocol("ComfyUI Kontext request has no input image".to_string())
        })?;

        let image_name = self.upload(png).await?;
        let graph = self
            .workflow
            .patch(&image_name, &request.prompt, request.steps)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        let client_id = uuid::Uuid::new_v4().to_string();
        // 先订阅再提交，避免错过终结事件
        let subscription =
            EventSubscription::connect(&self.ws_url(&client_id), self.table.clone()).await?;
        let prompt_id = self.submit(&graph, &client_id).await?;
        tracing::info!(
            prompt_id = %prompt_id,
            client_id = %client_id,
            image_name = %image_name,
            "Submitted Flux Kontext workflow to ComfyUI"
        );

        self.wait(&prompt_id, &subscription).await?;
        drop(subscription);

        let output = self.output_image(&prompt_id).await?;
        let bytes = self.download(&output).await?;

        let result = GenerationResult::from_encoded(bytes, BackendKind::ComfyUi, started.elapsed())
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        tracing::info!(
            prompt_id = %prompt_id,
            filename = %output.filename,
            elapsed_ms = result.duration.as_millis() as u64,
            "ComfyUI generation completed"
        );
        Ok(result)
    }

    async fn status(&self) -> Result<ServiceStatus, BackendError> {
        let timeout = Duration::from_secs(self.config.status_timeout_secs);

        let response = self
            .client
            .get(self.url("/"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        ensure_success(response).await?;

        let response = self
            .client
            .get(self.url("/system_stats"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        let stats: SystemStats = read_json(response, "ComfyUI system stats").await?;

        let status = stats.lines().into_iter().fold(
            ServiceStatus::new("ComfyUI service is running and responding."),
            ServiceStatus::with_detail,
        );
        Ok(status)
    }
}

#[async_trait]
impl MemoryControlPort for ComfyUiClient {
    async fn free_memory(&self, options: FreeMemoryOptions) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "unload_models": options.unload_models,
            "free_memory": options.free_memory,
        });
        let response = self
            .client
            .post(self.url("/free"))
            .json(&body)
            .timeout(Duration::from_secs(self.config.control_timeout_secs))
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::generation::Resolution;
    use crate::domain::imaging;
    use crate::infrastructure::adapters::testing::spawn_server;
    use axum::body::Bytes;
    use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    struct FakeComfy {
        events: broadcast::Sender<String>,
        prompt: Mutex<Option<Value>>,
        fail: bool,
        free_body: Mutex<Option<Value>>,
    }

    impl FakeComfy {
        fn new(fail: bool) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                events,
                prompt: Mutex::new(None),
                fail,
                free_body: Mutex::new(None),
            })
        }
    }

    async fn ws_handler(
        State(fake): State<Arc<FakeComfy>>,
        Query(query): Query<HashMap<String, String>>,
        ws: WebSocketUpgrade,
    ) -> impl IntoResponse {
        assert!(query.contains_key("clientId"));
        // 在升级前订阅，保证不丢事件
        let rx = fake.events.subscribe();
        ws.on_upgrade(move |socket| forward(socket, rx))
    }

    async fn forward(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
        while let Ok(text) = rx.recv().await {
            if socket.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    }

    async fn prompt(State(fake): State<Arc<FakeComfy>>, Json(body): Json<Value>) -> Json<Value> {
        *fake.prompt.lock().unwrap() = Some(body);
        let id = "c0ffee";
        // 响应前发出事件，覆盖早到事件路径
        let _ = fake.events.send(
            json!({"type": "executing", "data": {"node": "21", "prompt_id": id}}).to_string(),
        );
        let terminal = if fake.fail {
            json!({"type": "execution_error", "data": {"prompt_id": id, "node_type": "NIMFLUXNode", "exception_message": "NIM is not running"}})
        } else {
            json!({"type": "executing", "data": {"node": null, "prompt_id": id}})
        };
        let _ = fake.events.send(terminal.to_string());
        let _ = fake.events.send(
            json!({"type": "execution_success", "data": {"prompt_id": id}}).to_string(),
        );
        Json(json!({"prompt_id": id, "number": 1, "node_errors": {}}))
    }

    fn router(fake: Arc<FakeComfy>) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route(
                "/upload/image",
                post(|body: Bytes| async move {
                    assert!(String::from_utf8_lossy(&body).contains("name=\"image\""));
                    Json(json!({"name": "fluxgate_reference.png", "subfolder": "", "type": "input"}))
                }),
            )
            .route("/prompt", post(prompt))
            .route(
                "/history/:id",
                get(|Path(id): Path<String>| async move {
                    Json(json!({
                        id: {"outputs": {"1": {"images": [
                            {"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"}
                        ]}}}
                    }))
                }),
            )
            .route(
                "/view",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q.get("filename").map(String::as_str), Some("ComfyUI_00001_.png"));
                    assert_eq!(q.get("type").map(String::as_str), Some("output"));
                    imaging::solid_png(1392, 752)
                }),
            )
            .route(
                "/free",
                post(
                    |State(fake): State<Arc<FakeComfy>>, Json(body): Json<Value>| async move {
                        *fake.free_body.lock().unwrap() = Some(body);
                        StatusCode::OK
                    },
                ),
            )
            .with_state(fake)
    }

    fn request() -> BackendRequest {
        BackendRequest {
            prompt: "make it in the style of studio ghibli anime".into(),
            image: Some(imaging::solid_png(1392, 752)),
            resolution: Resolution::new(1392, 752),
            steps: 30,
            cfg_scale: 3.5,
            seed: 0,
        }
    }

    fn client(base: &str) -> ComfyUiClient {
        let mut config = ComfyUiConfig::new(base);
        config.generation_timeout_secs = 5;
        ComfyUiClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_generate_full_flow() {
        let fake = FakeComfy::new(false);
        let base = spawn_server(router(fake.clone())).await;

        let comfy = client(&base);
        let result = comfy.generate(request()).await.unwrap();
        assert_eq!((result.width, result.height), (1392, 752));
        assert_eq!(result.backend, BackendKind::ComfyUi);

        let body = fake.prompt.lock().unwrap().clone().unwrap();
        assert!(body["client_id"].as_str().is_some());
        let graph = &body["prompt"];
        assert_eq!(graph["11"]["inputs"]["image"], "fluxgate_reference.png");
        assert_eq!(graph["21"]["inputs"]["prompt"], "make it in the style of studio ghibli anime");
        assert_eq!(graph["21"]["inputs"]["steps"], 30);
        assert_eq!(comfy.table.pending(), 0);
    }

    #[tokio::test]
    async fn test_execution_error_is_protocol_error() {
        let fake = FakeComfy::new(true);
        let base = spawn_server(router(fake)).await;

        let err = client(&base).generate(request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Protocol(ref m) if m.contains("NIM is not running")));
    }

    #[tokio::test]
    async fn test_free_memory_sends_both_flags() {
        let fake = FakeComfy::new(false);
        let base = spawn_server(router(fake.clone())).await;
        let comfy = client(&base);

        comfy.free_memory(FreeMemoryOptions::default()).await.unwrap();
        assert_eq!(
            fake.free_body.lock().unwrap().clone().unwrap(),
            json!({"unload_models": true, "free_memory": true})
        );

        comfy
            .free_memory(FreeMemoryOptions {
                free_memory: true,
                unload_models: false,
            })
            .await
            .unwrap();
        assert_eq!(
            fake.free_body.lock().unwrap().clone().unwrap(),
            json!({"unload_models": false, "free_memory": true})
        );
    }

    #[tokio::test]
    async fn test_status_lines() {
        let router = Router::new()
            .route("/", get(|| async { "<html></html>" }))
            .route(
                "/system_stats",
                get(|| async {
                    Json(json!({
                        "system": {
                            "comfyui_version": "0.3.43",
                            "python_version": "3.12.9 (main, Feb 12 2025)",
                            "pytorch_version": "2.7.1+cu128",
                            "ram_total": 68719476736u64,
                            "ram_free": 34359738368u64
                        },
                        "devices": [{
                            "name": "cuda:0 NVIDIA GeForce RTX 4090 : cudaMallocAsync",
                            "vram_total": 25769803776u64,
                            "vram_free": 21474836480u64
                        }]
                    }))
                }),
            );
        let base = spawn_server(router).await;

        let status = client(&base).status().await.unwrap();
        assert_eq!(
            status.to_message(),
            "ComfyUI service is running and responding.\n\
             Version: 0.3.43\n\
             Python: 3.12.9\n\
             PyTorch: 2.7.1\n\
             RAM: 32.0 / 64.0 GB (Free: 32.0 GB)\n\
             VRAM: 4.0 / 24.0 GB (Free: 20.0 GB)\n\
             GPU: NVIDIA GeForce RTX 4090"
        );
    }

    #[tokio::test]
    async fn test_status_unreachable() {
        let err = client("http://127.0.0.1:9").status().await.unwrap_err();
        assert!(matches!(err, BackendError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_ws_url_scheme() {
        let comfy = client("https://comfy.local:8188/");
        assert_eq!(comfy.ws_url("abc"), "wss://comfy.local:8188/ws?clientId=abc");
        let comfy = client("http://localhost:8188");
        assert_eq!(comfy.ws_url("abc"), "ws://localhost:8188/ws?clientId=abc");
    }
}
