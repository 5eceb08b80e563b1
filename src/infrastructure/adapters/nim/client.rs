//! NIM Client - Flux dev / Flux Kontext NIM
//!
//! 实现 ImageBackendPort 与 NimServicePort
//!
//! NIM API:
//! POST {base}/v1/infer
//! Request: Flux dev {prompt, width, height, cfg_scale, mode, samples, seed, steps}
//!          Flux Kontext {prompt, image (data URI), cfg_scale, aspect_ratio, samples, seed, steps}
//! Response: {"artifacts": [{"base64": "...", "finishReason": "...", "seed": 0}]}
//! GET {base}/v1/health/live, GET {base}/v1/health/ready

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::application::ports::{
    BackendError, BackendRequest, ContainerRuntimePort, ContainerSpec, ImageBackendPort,
    LifecycleError, NimServicePort, Readiness, ServiceStatus, StartOutcome,
};
use crate::config::{is_hosted_url, non_empty};
use crate::domain::generation::{BackendKind, GenerationResult, NimModel};
use crate::domain::imaging;
use crate::infrastructure::adapters::http_support::{
    build_client, ensure_success, read_json, send_error, trim_base,
};

#[derive(Debug, Serialize)]
struct FluxDevPayload<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    cfg_scale: f32,
    mode: &'static str,
    samples: u32,
    seed: u64,
    steps: u32,
}

#[derive(Debug, Serialize)]
struct FluxKontextPayload<'a> {
    prompt: &'a str,
    image: String,
    cfg_scale: f32,
    aspect_ratio: &'static str,
    samples: u32,
    seed: u64,
    steps: u32,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    base64: String,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

/// NIM 客户端配置
#[derive(Debug, Clone)]
pub struct NimClientConfig {
    pub model: NimModel,
    /// 本地 NIM 基础 URL，或托管端点完整 URL
    pub base_url: String,
    /// 托管端点使用的 Bearer 密钥
    pub api_key: Option<String>,
    /// 生成请求超时（秒）
    pub timeout_secs: u64,
    /// 健康检查超时（秒）
    pub health_timeout_secs: u64,
}

impl NimClientConfig {
    pub fn new(model: NimModel, base_url: impl Into<String>) -> Self {
        Self {
            model,
            base_url: trim_base(&base_url.into()),
            api_key: None,
            timeout_secs: 300,
            health_timeout_secs: 5,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_health_timeout(mut self, secs: u64) -> Self {
        self.health_timeout_secs = secs;
        self
    }
}

/// 本地容器参数，缺失值在 start 时报告
#[derive(Debug, Clone, Default)]
pub struct NimContainerConfig {
    pub name: String,
    pub image: String,
    pub cache_dir: Option<String>,
    pub ngc_api_key: Option<String>,
    pub hf_token: Option<String>,
}

/// NIM 客户端
pub struct NimClient {
    client: Client,
    config: NimClientConfig,
    container: NimContainerConfig,
    runtime: Arc<dyn ContainerRuntimePort>,
}

impl NimClient {
    pub fn new(
        config: NimClientConfig,
        container: NimContainerConfig,
        runtime: Arc<dyn ContainerRuntimePort>,
    ) -> Result<Self, BackendError> {
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            client,
            config,
            container,
            runtime,
        })
    }

    fn hosted(&self) -> bool {
        is_hosted_url(&self.config.base_url)
    }

    fn infer_url(&self) -> String {
        if self.hosted() {
            self.config.base_url.clone()
        } else {
            format!("{}/v1/infer", self.config.base_url)
        }
    }

    fn url_field(&self) -> &'static str {
        match self.config.model {
            NimModel::FluxDev => "flux_nim_url",
            NimModel::FluxKontext => "flux_kontext_nim_url",
        }
    }

    /// 由 URL 端口与容器配置组装启动参数
    fn container_spec(&self) -> Result<ContainerSpec, LifecycleError> {
        let host_port = Url::parse(&self.config.base_url)
            .ok()
            .and_then(|url| url.port())
            .ok_or(LifecycleError::Configuration {
                field: self.url_field(),
            })?;

        let required = |value: &Option<String>, field: &'static str| {
            non_empty(value)
                .map(str::to_string)
                .ok_or(LifecycleError::Configuration { field })
        };

        Ok(ContainerSpec {
            name: self.container.name.clone(),
            image: self.container.image.clone(),
            host_port,
            cache_dir: required(&self.container.cache_dir, "cache_dir")?,
            ngc_api_key: required(&self.container.ngc_api_key, "ngc_api_key")?,
            hf_token: required(&self.container.hf_token, "hf_token")?,
        })
    }

    async fn probe(&self, path: &str) -> Result<bool, reqwest::Error> {
        let response = self
            .client
            .get(format!("{}{}", self.config.base_url, path))
            .timeout(Duration::from_secs(self.config.health_timeout_secs))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    fn body(&self, request: &BackendRequest) -> Result<serde_json::Value, BackendError> {
        let value = match self.config.model {
            NimModel::FluxDev => serde_json::to_value(FluxDevPayload {
                prompt: &request.prompt,
                width: request.resolution.width,
                height: request.resolution.height,
                cfg_scale: request.cfg_scale,
                mode: "base",
                samples: 1,
                seed: request.seed,
                steps: request.steps,
            }),
            NimModel::FluxKontext => {
                let image = request.image.as_deref().ok_or_else(|| {
                    BackendError::Protocol("Flux Kontext request has no input image".to_string())
                })?;
                serde_json::to_value(FluxKontextPayload {
                    prompt: &request.prompt,
                    image: imaging::to_png_data_uri(image),
                    cfg_scale: request.cfg_scale,
                    aspect_ratio: "match_input_image",
                    samples: 1,
                    seed: request.seed,
                    steps: request.steps,
                })
            }
        };
        value.map_err(|e| BackendError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl ImageBackendPort for NimClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Nim
    }

    async fn generate(&self, request: BackendRequest) -> Result<GenerationResult, BackendError> {
        let started = Instant::now();
        let body = self.body(&request)?;

        tracing::debug!(
            url = %self.infer_url(),
            model = self.config.model.display_name(),
            resolution = %request.resolution,
            steps = request.steps,
            "Sending NIM infer request"
        );

        let mut builder = self
            .client
            .post(self.infer_url())
            .header("accept", "application/json")
            .json(&body);
        if self.hosted() {
            if let Some(key) = non_empty(&self.config.api_key) {
                builder = builder.bearer_auth(key);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| send_error(&self.config.base_url, e))?;
        let response = ensure_success(response).await?;
        let parsed: InferResponse = read_json(response, "NIM response").await?;

        let artifact = parsed
            .artifacts
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Protocol("No artifacts found in response".to_string()))?;

        if let Some(reason) = &artifact.finish_reason {
            // 内容过滤时返回全黑图片，照常作为结果
            tracing::info!(finish_reason = %reason, "NIM artifact finish reason");
        }

        let image = imaging::decode_base64(&artifact.base64)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        let result = GenerationResult::from_encoded(image, BackendKind::Nim, started.elapsed())
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        tracing::info!(
            model = self.config.model.display_name(),
            width = result.width,
            height = result.height,
            elapsed_ms = result.duration.as_millis() as u64,
            "NIM inference completed"
        );
        Ok(result)
    }

    async fn status(&self) -> Result<ServiceStatus, BackendError> {
        let readiness = self.check_ready().await;
        let name = self.config.model.display_name();
        Ok(ServiceStatus::new(format!("{} at {}", name, self.config.base_url))
            .with_detail(format!("live: {}", readiness.live))
            .with_detail(format!("ready: {}", readiness.ready)))
    }
}

#[async_trait]
impl NimServicePort for NimClient {
    fn model(&self) -> NimModel {
        self.config.model
    }

    fn is_hosted(&self) -> bool {
        self.hosted()
    }

    async fn check_ready(&self) -> Readiness {
        if self.hosted() {
            return Readiness { live: true, ready: true };
        }

        let live = match self.probe("/v1/health/live").await {
            Ok(live) => live,
            Err(e) => {
                tracing::debug!(error = %e, url = %self.config.base_url, "Live probe failed");
                return Readiness::DOWN;
            }
        };
        if !live {
            return Readiness::DOWN;
        }

        let ready = match self.probe("/v1/health/ready").await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::debug!(error = %e, url = %self.config.base_url, "Ready probe failed");
                false
            }
        };
        Readiness { live, ready }
    }

    async fn is_running(&self) -> Result<bool, LifecycleError> {
        self.runtime.is_running(&self.container.name).await
    }

    async fn start(&self) -> Result<StartOutcome, LifecycleError> {
        let spec = self.container_spec()?;
        self.runtime.start(&spec).await
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        self.runtime.stop(&self.container.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::generation::{AspectRatio, Resolution};
    use crate::infrastructure::adapters::testing::spawn_server;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct NoRuntime;

    #[async_trait]
    impl ContainerRuntimePort for NoRuntime {
        async fn start(&self, spec: &ContainerSpec) -> Result<StartOutcome, LifecycleError> {
            Err(LifecycleError::Launch(format!("unexpected start of {}", spec.name)))
        }

        async fn stop(&self, _name: &str) -> Result<(), LifecycleError> {
            Ok(())
        }

        async fn is_running(&self, _name: &str) -> Result<bool, LifecycleError> {
            Ok(false)
        }
    }

    fn client(model: NimModel, url: &str) -> NimClient {
        NimClient::new(
            NimClientConfig::new(model, url),
            NimContainerConfig {
                name: "FLUX_KONTEXT".into(),
                image: "nvcr.io/nim/black-forest-labs/flux.1-kontext-dev:latest".into(),
                ..Default::default()
            },
            Arc::new(NoRuntime),
        )
        .unwrap()
    }

    fn request(resolution: Resolution, image: Option<Vec<u8>>) -> BackendRequest {
        BackendRequest {
            prompt: "a cat piloting a spaceship".into(),
            image,
            resolution,
            steps: 50,
            cfg_scale: 5.0,
            seed: 0,
        }
    }

    type Captured = Arc<Mutex<Option<Value>>>;

    async fn infer(State(captured): State<Captured>, Json(body): Json<Value>) -> Json<Value> {
        let (w, h) = (
            body["width"].as_u64().unwrap_or(1392) as u32,
            body["height"].as_u64().unwrap_or(752) as u32,
        );
        *captured.lock().unwrap() = Some(body);
        let png = imaging::solid_png(w, h);
        Json(json!({"artifacts": [{"base64": imaging::encode_base64(&png), "finishReason": "SUCCESS", "seed": 7}]}))
    }

    #[tokio::test]
    async fn test_flux_dev_generate_square() {
        let captured: Captured = Arc::new(Mutex::new(None));
        let router = Router::new()
            .route("/v1/infer", post(infer))
            .with_state(captured.clone());
        let base = spawn_server(router).await;

        let nim = client(NimModel::FluxDev, &base);
        let result = nim
            .generate(request(AspectRatio::Square.resolution(), None))
            .await
            .unwrap();

        assert_eq!((result.width, result.height), (1024, 1024));
        let body = captured.lock().unwrap().clone().unwrap();
        assert_eq!(body["width"], 1024);
        assert_eq!(body["height"], 1024);
        assert_eq!(body["steps"], 50);
        assert_eq!(body["mode"], "base");
        assert_eq!(body["samples"], 1);
    }

    #[tokio::test]
    async fn test_flux_kontext_sends_data_uri() {
        let captured: Captured = Arc::new(Mutex::new(None));
        let router = Router::new()
            .route("/v1/infer", post(infer))
            .with_state(captured.clone());
        let base = spawn_server(router).await;

        let nim = client(NimModel::FluxKontext, &base);
        let png = imaging::solid_png(1392, 752);
        let mut req = request(Resolution::new(1392, 752), Some(png));
        req.steps = 30;
        req.cfg_scale = 3.5;
        nim.generate(req).await.unwrap();

        let body = captured.lock().unwrap().clone().unwrap();
        assert!(body["image"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert_eq!(body["aspect_ratio"], "match_input_image");
        assert_eq!(body["steps"], 30);
        assert_eq!(body["cfg_scale"], 3.5);
        assert!(body.get("width").is_none());
    }

    #[tokio::test]
    async fn test_empty_artifacts_is_protocol_error() {
        let router = Router::new().route("/v1/infer", post(|| async { Json(json!({"artifacts": []})) }));
        let base = spawn_server(router).await;

        let err = client(NimModel::FluxDev, &base)
            .generate(request(Resolution::new(1024, 1024), None))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_http_error_is_service_unavailable() {
        let router = Router::new().route(
            "/v1/infer",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = spawn_server(router).await;

        let err = client(NimModel::FluxDev, &base)
            .generate(request(Resolution::new(1024, 1024), None))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ServiceUnavailable(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn test_ready_non_200_is_live_not_ready() {
        let router = Router::new()
            .route("/v1/health/live", get(|| async { StatusCode::OK }))
            .route("/v1/health/ready", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let base = spawn_server(router).await;

        let readiness = client(NimModel::FluxKontext, &base).check_ready().await;
        assert_eq!(readiness, Readiness { live: true, ready: false });
    }

    #[tokio::test]
    async fn test_unreachable_is_down() {
        let readiness = client(NimModel::FluxKontext, "http://127.0.0.1:9").check_ready().await;
        assert_eq!(readiness, Readiness::DOWN);
    }

    #[tokio::test]
    async fn test_hosted_endpoint_skips_probe() {
        let nim = client(
            NimModel::FluxDev,
            "https://ai.api.nvidia.com/v1/genai/black-forest-labs/flux.1-dev",
        );
        assert!(nim.is_hosted());
        assert_eq!(nim.infer_url(), "https://ai.api.nvidia.com/v1/genai/black-forest-labs/flux.1-dev");
        assert_eq!(nim.check_ready().await, Readiness { live: true, ready: true });
    }

    #[test]
    fn test_container_spec_requires_secrets() {
        let mut nim = client(NimModel::FluxKontext, "http://localhost:8011");
        assert!(matches!(
            nim.container_spec(),
            Err(LifecycleError::Configuration { field: "cache_dir" })
        ));

        nim.container.cache_dir = Some("/srv/nim-cache".into());
        nim.container.ngc_api_key = Some("YOUR_NGC_API_KEY_HERE".into());
        assert!(matches!(
            nim.container_spec(),
            Err(LifecycleError::Configuration { field: "ngc_api_key" })
        ));

        nim.container.ngc_api_key = Some("ngc".into());
        nim.container.hf_token = Some("hf".into());
        let spec = nim.container_spec().unwrap();
        assert_eq!(spec.host_port, 8011);
        assert_eq!(spec.name, "FLUX_KONTEXT");
    }

    #[test]
    fn test_container_spec_requires_port() {
        let nim = client(NimModel::FluxDev, "http://localhost");
        assert!(matches!(
            nim.container_spec(),
            Err(LifecycleError::Configuration { field: "flux_nim_url" })
        ));
    }
}
