//! Generation Worker - Background Image Generation Processor

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::application::error::ApplicationError;
use crate::application::ports::{
    BackendError, BackendRequest, GenerationJob, ImageStoragePort, JobManagerPort, JobState,
    WallpaperPort,
};
use crate::application::selector::BackendRegistry;
use crate::domain::generation::{ReferenceImage, RequestKind, KONTEXT_TARGET};
use crate::domain::imaging;
use crate::infrastructure::events::EventPublisher;

/// Worker 配置
#[derive(Debug, Clone)]
pub struct GenerationWorkerConfig {
    /// 最大并发生成数
    pub max_concurrent: usize,
    /// 单次后端调用的超时
    pub generation_timeout: Duration,
}

impl Default for GenerationWorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            generation_timeout: Duration::from_secs(300),
        }
    }
}

/// 单个任务执行所需的共享依赖
#[derive(Clone)]
struct JobContext {
    job_manager: Arc<dyn JobManagerPort>,
    registry: BackendRegistry,
    storage: Arc<dyn ImageStoragePort>,
    wallpaper: Arc<dyn WallpaperPort>,
    event_publisher: Arc<EventPublisher>,
    generation_timeout: Duration,
}

/// 生成 Worker
///
/// 后台任务处理器，从队列消费 job_id 并调用选定的后端
pub struct GenerationWorker {
    config: GenerationWorkerConfig,
    queue_receiver: mpsc::Receiver<String>,
    context: JobContext,
}

impl GenerationWorker {
    pub fn new(
        config: GenerationWorkerConfig,
        queue_receiver: mpsc::Receiver<String>,
        job_manager: Arc<dyn JobManagerPort>,
        registry: BackendRegistry,
        storage: Arc<dyn ImageStoragePort>,
        wallpaper: Arc<dyn WallpaperPort>,
        event_publisher: Arc<EventPublisher>,
    ) -> Self {
        let context = JobContext {
            job_manager,
            registry,
            storage,
            wallpaper,
            event_publisher,
            generation_timeout: config.generation_timeout,
        };
        Self {
            config,
            queue_receiver,
            context,
        }
    }

    /// 启动 Worker，队列关闭后返回
    pub async fn run(mut self) {
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            generation_timeout_secs = self.config.generation_timeout.as_secs(),
            "GenerationWorker started"
        );

        // 使用 semaphore 控制并发
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_concurrent.max(1)));

        while let Some(job_id) = self.queue_receiver.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to acquire semaphore permit");
                    break;
                }
            };

            let context = self.context.clone();
            tokio::spawn(async move {
                let _permit = permit; // 持有 permit 直到任务完成
                Self::process_job(&job_id, context).await;
            });
        }

        tracing::info!("GenerationWorker stopped");
    }

    /// 处理单个任务
    async fn process_job(job_id: &str, context: JobContext) {
        let job = match context.job_manager.get(job_id) {
            Some(job) => job,
            None => {
                tracing::warn!(job_id = %job_id, "Job not found, skipping");
                return;
            }
        };
        let backend = job.selection.display_name();

        // 标记为执行中
        if let Err(e) = context.job_manager.set_state(job_id, JobState::Running) {
            tracing::error!(job_id = %job_id, error = %e, "Failed to update job state");
            return;
        }
        context.event_publisher.publish_job_running(job_id, backend);

        let started = Instant::now();
        match Self::execute(&job, &context).await {
            Ok(path) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let path_text = path.display().to_string();

                if let Err(e) = context.job_manager.set_succeeded(job_id, path) {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to update job state");
                    return;
                }
                context
                    .event_publisher
                    .publish_job_succeeded(job_id, backend, &path_text, elapsed_ms);

                tracing::info!(
                    job_id = %job_id,
                    backend = backend,
                    output = %path_text,
                    elapsed_ms = elapsed_ms,
                    "Job completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    backend = backend,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    category = e.category(),
                    error = %e,
                    "Job failed"
                );
                let message = e.to_string();
                if let Err(e) = context.job_manager.set_failed(job_id, message.clone()) {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to update job state");
                }
                context
                    .event_publisher
                    .publish_job_failed(job_id, backend, &message);
            }
        }
    }

    /// 参考图 -> 后端调用 -> 落盘 -> 壁纸
    async fn execute(job: &GenerationJob, context: &JobContext) -> Result<PathBuf, ApplicationError> {
        let request = &job.request;
        let backend = context.registry.resolve(job.selection).ok_or_else(|| {
            ApplicationError::internal(format!(
                "{} backend is not registered",
                job.selection.display_name()
            ))
        })?;

        let (image, resolution) = match request.kind() {
            RequestKind::TextToImage => (None, request.aspect_ratio().resolution()),
            RequestKind::Kontext => {
                let reference = request.reference().cloned().ok_or_else(|| {
                    ApplicationError::invalid_parameter("Kontext request has no reference image")
                })?;
                (Some(Self::prepare_reference(reference).await?), KONTEXT_TARGET)
            }
        };

        let backend_request = BackendRequest {
            prompt: request.prompt().to_string(),
            image,
            resolution,
            steps: request.steps(),
            cfg_scale: request.cfg_scale(),
            seed: request.seed(),
        };

        tracing::info!(
            job_id = %job.job_id,
            backend = job.selection.display_name(),
            resolution = %resolution,
            steps = backend_request.steps,
            "Calling backend"
        );

        let result = tokio::time::timeout(context.generation_timeout, backend.generate(backend_request))
            .await
            .map_err(|_| BackendError::Timeout)??;

        let path = context
            .storage
            .save(job.selection.file_prefix(), &result.image)
            .await?;

        // 壁纸失败不影响任务结果
        if let Err(e) = context.wallpaper.apply(&path).await {
            tracing::warn!(job_id = %job.job_id, error = %e, "Failed to set wallpaper");
        }

        Ok(path)
    }

    /// 读取参考图并缩放裁剪到 Kontext 输入尺寸
    async fn prepare_reference(reference: ReferenceImage) -> Result<Vec<u8>, ApplicationError> {
        tokio::task::spawn_blocking(move || {
            let bytes = match reference {
                ReferenceImage::Bytes(bytes) => bytes,
                ReferenceImage::LatestIn(dir) => {
                    let latest = imaging::find_most_recent_image(&dir)?;
                    tracing::info!(path = %latest.display(), "Using most recent screenshot");
                    std::fs::read(&latest).map_err(imaging::ImagingError::from)?
                }
            };
            Ok::<_, ApplicationError>(imaging::prepare_reference(&bytes, KONTEXT_TARGET)?)
        })
        .await
        .map_err(|e| ApplicationError::internal(format!("Image preparation task failed: {}", e)))?
    }
}
