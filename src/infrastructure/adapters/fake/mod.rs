//! Fake Backend - 用于测试的图像后端
//!
//! 不调用任何服务，延迟后返回纯色 PNG

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::application::ports::{BackendError, BackendRequest, ImageBackendPort, ServiceStatus};
use crate::domain::generation::{BackendKind, GenerationResult};
use crate::domain::imaging;

/// Fake Backend
pub struct FakeBackend {
    kind: BackendKind,
    delay: Duration,
    fail_with: Option<String>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl FakeBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            delay: Duration::ZERO,
            fail_with: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 模拟推理耗时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 每次调用都返回 ServiceUnavailable
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// 已收到的请求
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ImageBackendPort for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn generate(&self, request: BackendRequest) -> Result<GenerationResult, BackendError> {
        let started = Instant::now();
        let resolution = request.resolution;
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        tracing::debug!(
            backend = %self.kind,
            resolution = %resolution,
            "FakeBackend: returning solid image"
        );

        tokio::time::sleep(self.delay).await;

        if let Some(message) = &self.fail_with {
            return Err(BackendError::ServiceUnavailable(message.clone()));
        }

        let img = image::DynamicImage::new_rgb8(resolution.width, resolution.height);
        let png = imaging::encode_png(&img).map_err(|e| BackendError::Protocol(e.to_string()))?;
        GenerationResult::from_encoded(png, self.kind, started.elapsed())
            .map_err(|e| BackendError::Protocol(e.to_string()))
    }

    async fn status(&self) -> Result<ServiceStatus, BackendError> {
        Ok(ServiceStatus::new(format!("Fake {} backend is running.", self.kind)))
    }
}
