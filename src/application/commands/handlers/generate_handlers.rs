//! Generation Command Handlers - 提交侧
//!
//! 校验、选择后端、登记任务并立即返回确认；后端调用由 worker 执行

use std::sync::Arc;

use crate::application::commands::generate_commands::*;
use crate::application::error::ApplicationError;
use crate::application::ports::{GenerationJob, ImageStoragePort, JobManagerPort};
use crate::application::selector::{select_backend, BackendRegistry};
use crate::config::AppConfig;
use crate::domain::generation::{
    GenerationDraft, GenerationRequest, ReferenceImage, RequestKind,
};

/// SubmitGeneration Handler - 提交生成任务
pub struct SubmitGenerationHandler {
    config: Arc<AppConfig>,
    registry: BackendRegistry,
    job_manager: Arc<dyn JobManagerPort>,
    storage: Arc<dyn ImageStoragePort>,
}

impl SubmitGenerationHandler {
    pub fn new(
        config: Arc<AppConfig>,
        registry: BackendRegistry,
        job_manager: Arc<dyn JobManagerPort>,
        storage: Arc<dyn ImageStoragePort>,
    ) -> Self {
        Self {
            config,
            registry,
            job_manager,
            storage,
        }
    }

    /// 文生图
    pub async fn generate_image(
        &self,
        cmd: GenerateImageCommand,
    ) -> Result<SubmitGenerationResponse, ApplicationError> {
        let mut draft = GenerationDraft::new(cmd.effective_prompt());
        draft.aspect_ratio = cmd.aspect_ratio;
        draft.steps = cmd.steps;
        draft.cfg_scale = cmd.cfg_scale;
        draft.seed = cmd.seed;

        self.submit(RequestKind::TextToImage, draft).await
    }

    /// Kontext 图生图
    pub async fn generate_kontext(
        &self,
        cmd: GenerateKontextCommand,
    ) -> Result<SubmitGenerationResponse, ApplicationError> {
        let reference = match (cmd.image.clone(), &self.config.storage.gallery_dir) {
            (Some(bytes), _) => ReferenceImage::Bytes(bytes),
            (None, Some(dir)) => ReferenceImage::LatestIn(dir.clone()),
            (None, None) => {
                return Err(ApplicationError::invalid_parameter(
                    "No reference image provided and storage.gallery_dir is not configured",
                ))
            }
        };

        let mut draft = GenerationDraft::new(cmd.effective_prompt()).with_reference(reference);
        draft.steps = cmd.steps;
        draft.cfg_scale = cmd.cfg_scale;
        draft.seed = cmd.seed;

        self.submit(RequestKind::Kontext, draft).await
    }

    async fn submit(
        &self,
        kind: RequestKind,
        draft: GenerationDraft,
    ) -> Result<SubmitGenerationResponse, ApplicationError> {
        let request = GenerationRequest::validate(kind, draft)?;
        let selection = select_backend(kind, &self.config.backends)?;

        if self.registry.resolve(selection).is_none() {
            return Err(ApplicationError::internal(format!(
                "{} client is not available",
                selection.display_name()
            )));
        }

        self.storage.ensure_writable().await?;

        let job = GenerationJob::new(request, selection);
        let job_id = self.job_manager.submit(job)?;

        tracing::info!(
            job_id = %job_id,
            backend = %selection.kind(),
            target = selection.display_name(),
            "Generation job submitted"
        );

        let message = format!(
            "Generating image with {} in the background (job {}). It will be saved to {} and set as your desktop background when ready.",
            selection.display_name(),
            job_id,
            self.storage.output_dir().display()
        );

        Ok(SubmitGenerationResponse {
            job_id,
            backend: selection,
            message,
        })
    }
}

/// QueryJobStatus Handler - 查询任务状态
pub struct QueryJobStatusHandler {
    job_manager: Arc<dyn JobManagerPort>,
}

impl QueryJobStatusHandler {
    pub fn new(job_manager: Arc<dyn JobManagerPort>) -> Self {
        Self { job_manager }
    }

    pub fn handle(&self, cmd: QueryJobStatusCommand) -> QueryJobStatusResponse {
        let mut jobs = Vec::new();
        let mut unknown = Vec::new();

        for job_id in cmd.job_ids {
            match self.job_manager.get(&job_id) {
                Some(job) => jobs.push(JobStatusInfo {
                    job_id: job.job_id,
                    state: job.state,
                    backend: job.selection.kind(),
                    target: job.selection.display_name(),
                    output_path: job.output_path,
                    error: job.error_message,
                }),
                None => unknown.push(job_id),
            }
        }

        QueryJobStatusResponse { jobs, unknown }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::JobState;
    use crate::application::selector::BackendSelection;
    use crate::domain::generation::{BackendKind, NimModel};
    use crate::infrastructure::adapters::fake::FakeBackend;
    use crate::infrastructure::adapters::storage::FileImageStorage;
    use crate::infrastructure::memory::InMemoryJobManager;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    struct Fixture {
        handler: SubmitGenerationHandler,
        jobs: Arc<InMemoryJobManager>,
        rx: mpsc::Receiver<String>,
        _dir: tempfile::TempDir,
    }

    fn fixture(mutate: impl FnOnce(&mut AppConfig)) -> Fixture {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.output_dir = dir.path().join("out");
        config.storage.gallery_dir = Some(dir.path().join("shots"));
        mutate(&mut config);

        let registry = BackendRegistry::new()
            .register(
                BackendSelection::Nim(NimModel::FluxDev),
                Arc::new(FakeBackend::new(BackendKind::Nim)),
            )
            .register(
                BackendSelection::Nim(NimModel::FluxKontext),
                Arc::new(FakeBackend::new(BackendKind::Nim)),
            )
            .register(
                BackendSelection::ComfyUi,
                Arc::new(FakeBackend::new(BackendKind::ComfyUi)),
            );

        let (tx, rx) = mpsc::channel(8);
        let jobs = Arc::new(InMemoryJobManager::new(tx));
        let storage = Arc::new(FileImageStorage::new(config.storage.output_dir.clone()));

        Fixture {
            handler: SubmitGenerationHandler::new(Arc::new(config), registry, jobs.clone(), storage),
            jobs,
            rx,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_generate_image_acknowledges_and_enqueues() {
        let mut fx = fixture(|c| c.backends.flux_nim_url = Some("http://localhost:8000".into()));

        let cmd = GenerateImageCommand {
            prompt: Some("a cat piloting a spaceship".into()),
            aspect_ratio: Some("1:1".into()),
            ..Default::default()
        };
        let ack = fx.handler.generate_image(cmd).await.unwrap();

        assert_eq!(ack.backend, BackendSelection::Nim(NimModel::FluxDev));
        assert_eq!(fx.rx.try_recv().unwrap(), ack.job_id);
        assert_eq!(fx.jobs.get_state(&ack.job_id), Some(JobState::Submitted));
    }

    #[tokio::test]
    async fn test_comfyui_override_without_url_creates_no_job() {
        let mut fx = fixture(|c| {
            c.backends.flux_kontext_nim_url = Some("http://localhost:8011".into());
            c.backends.kontext_backend = Some("COMFYUI".into());
        });

        let cmd = GenerateKontextCommand {
            image: Some(vec![1, 2, 3]),
            ..Default::default()
        };
        let err = fx.handler.generate_kontext(cmd).await.unwrap_err();

        assert!(matches!(err, ApplicationError::Configuration { .. }));
        assert!(fx.jobs.is_empty());
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_aspect_ratio_rejected_synchronously() {
        let fx = fixture(|c| c.backends.flux_nim_url = Some("http://localhost:8000".into()));

        let cmd = GenerateImageCommand {
            aspect_ratio: Some("21:9".into()),
            ..Default::default()
        };
        let err = fx.handler.generate_image(cmd).await.unwrap_err();

        assert!(matches!(err, ApplicationError::InvalidParameter(_)));
        assert!(fx.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_kontext_uses_gallery_when_no_image() {
        let fx = fixture(|c| c.backends.flux_kontext_nim_url = Some("http://localhost:8011".into()));

        let ack = fx
            .handler
            .generate_kontext(GenerateKontextCommand::default())
            .await
            .unwrap();

        let job = fx.jobs.get(&ack.job_id).unwrap();
        assert!(matches!(job.request.reference(), Some(ReferenceImage::LatestIn(_))));
        assert_eq!(job.request.prompt(), DEFAULT_KONTEXT_PROMPT);
        assert_eq!(job.request.steps(), 30);
    }

    #[tokio::test]
    async fn test_kontext_without_gallery_or_image() {
        let fx = fixture(|c| {
            c.backends.flux_kontext_nim_url = Some("http://localhost:8011".into());
            c.storage.gallery_dir = None;
        });

        let err = fx
            .handler
            .generate_kontext(GenerateKontextCommand::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_query_job_status() {
        let fx = fixture(|c| c.backends.flux_nim_url = Some("http://localhost:8000".into()));
        let ack = fx
            .handler
            .generate_image(GenerateImageCommand::default())
            .await
            .unwrap();

        let query = QueryJobStatusHandler::new(fx.jobs.clone());
        let response = query.handle(QueryJobStatusCommand {
            job_ids: vec![ack.job_id.clone(), "missing".to_string()],
        });

        assert_eq!(response.jobs.len(), 1);
        assert_eq!(response.jobs[0].state, JobState::Submitted);
        assert_eq!(response.jobs[0].target, "Flux NIM");
        assert_eq!(response.unknown, vec!["missing".to_string()]);
    }
}
