//! Service Command Handlers - 服务探活、生命周期与控制

use std::sync::Arc;

use crate::application::commands::service_commands::*;
use crate::application::error::ApplicationError;
use crate::application::ports::{
    FreeMemoryOptions, ImageBackendPort, ImageStoragePort, MemoryControlPort, NimServicePort,
    QueueControlPort, StartOutcome,
};
use crate::domain::generation::{BackendKind, NimModel};

/// NimService Handler - 单个 NIM 模型的服务命令
pub struct NimServiceHandler {
    model: NimModel,
    service: Option<Arc<dyn NimServicePort>>,
}

impl NimServiceHandler {
    pub fn new(model: NimModel, service: Option<Arc<dyn NimServicePort>>) -> Self {
        Self { model, service }
    }

    fn url_field(&self) -> &'static str {
        match self.model {
            NimModel::FluxDev => "flux_nim_url",
            NimModel::FluxKontext => "flux_kontext_nim_url",
        }
    }

    pub async fn handle(&self, action: NimServiceAction) -> Result<String, ApplicationError> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| ApplicationError::configuration(BackendKind::Nim, self.url_field()))?;
        let name = self.model.display_name();

        match action {
            NimServiceAction::ReadyCheck => {
                if service.is_hosted() {
                    return Ok(format!("Using NVIDIA hosted service for {}", name));
                }
                let readiness = service.check_ready().await;
                tracing::info!(
                    model = name,
                    live = readiness.live,
                    ready = readiness.ready,
                    "NIM readiness checked"
                );
                match (readiness.live, readiness.ready) {
                    (true, true) => Ok(format!("{} is live and ready", name)),
                    (true, false) => Err(ApplicationError::ServiceUnavailable(format!(
                        "{} is live but not ready yet",
                        name
                    ))),
                    _ => Err(ApplicationError::ServiceUnavailable(format!(
                        "{} is not reachable",
                        name
                    ))),
                }
            }
            NimServiceAction::Status => {
                if service.is_hosted() {
                    return Ok(format!("{} uses the NVIDIA hosted endpoint", name));
                }
                if service.is_running().await? {
                    Ok(format!("{} server is running.", name))
                } else {
                    Err(ApplicationError::ServiceUnavailable(format!(
                        "{} server is not running.",
                        name
                    )))
                }
            }
            NimServiceAction::Start => {
                if service.is_hosted() {
                    return Err(ApplicationError::invalid_parameter(format!(
                        "{} uses the NVIDIA hosted endpoint; there is no local container to start",
                        name
                    )));
                }
                match service.start().await? {
                    StartOutcome::Started => Ok(format!(
                        "{} server is starting. Use the ready check to see when it can accept requests.",
                        name
                    )),
                    StartOutcome::AlreadyRunning => {
                        Ok(format!("{} server is already running.", name))
                    }
                }
            }
            NimServiceAction::Stop => {
                if service.is_hosted() {
                    return Err(ApplicationError::invalid_parameter(format!(
                        "{} uses the NVIDIA hosted endpoint; there is no local container to stop",
                        name
                    )));
                }
                service.stop().await?;
                Ok(format!("{} server stopped successfully.", name))
            }
        }
    }
}

/// InvokeAiService Handler
pub struct InvokeAiServiceHandler {
    backend: Option<Arc<dyn ImageBackendPort>>,
    queue: Option<Arc<dyn QueueControlPort>>,
}

impl InvokeAiServiceHandler {
    pub fn new(
        backend: Option<Arc<dyn ImageBackendPort>>,
        queue: Option<Arc<dyn QueueControlPort>>,
    ) -> Self {
        Self { backend, queue }
    }

    pub async fn handle(&self, action: InvokeAiAction) -> Result<String, ApplicationError> {
        let missing = || ApplicationError::configuration(BackendKind::InvokeAi, "invokeai_url");

        match action {
            InvokeAiAction::Status => {
                let backend = self.backend.as_ref().ok_or_else(missing)?;
                Ok(backend.status().await?.to_message())
            }
            InvokeAiAction::PauseQueue => {
                self.queue.as_ref().ok_or_else(missing)?.pause_queue().await?;
                Ok("InvokeAI processor paused successfully.".to_string())
            }
            InvokeAiAction::ResumeQueue => {
                self.queue.as_ref().ok_or_else(missing)?.resume_queue().await?;
                Ok("InvokeAI processor resumed successfully.".to_string())
            }
            InvokeAiAction::EmptyModelCache => {
                self.queue.as_ref().ok_or_else(missing)?.empty_model_cache().await?;
                Ok("InvokeAI model cache emptied successfully.".to_string())
            }
        }
    }
}

/// ComfyUiService Handler
pub struct ComfyUiServiceHandler {
    backend: Option<Arc<dyn ImageBackendPort>>,
    memory: Option<Arc<dyn MemoryControlPort>>,
}

impl ComfyUiServiceHandler {
    pub fn new(
        backend: Option<Arc<dyn ImageBackendPort>>,
        memory: Option<Arc<dyn MemoryControlPort>>,
    ) -> Self {
        Self { backend, memory }
    }

    pub async fn handle(&self, action: ComfyUiAction) -> Result<String, ApplicationError> {
        let missing = || ApplicationError::configuration(BackendKind::ComfyUi, "comfyui_url");

        match action {
            ComfyUiAction::Status => {
                let backend = self.backend.as_ref().ok_or_else(missing)?;
                Ok(backend.status().await?.to_message())
            }
            ComfyUiAction::FreeMemory(options) => {
                let memory = self.memory.as_ref().ok_or_else(missing)?;
                memory.free_memory(options).await?;
                Ok(free_memory_message(options))
            }
        }
    }
}

fn free_memory_message(options: FreeMemoryOptions) -> String {
    let mut actions = Vec::new();
    if options.unload_models {
        actions.push("unload models");
    }
    if options.free_memory {
        actions.push("free memory");
    }
    if actions.is_empty() {
        "ComfyUI free endpoint called successfully (no actions requested)".to_string()
    } else {
        format!(
            "ComfyUI has been instructed to {} successfully",
            actions.join(" and ")
        )
    }
}

/// Initialize Handler - 启动时的配置自检
pub struct InitializeHandler {
    storage: Arc<dyn ImageStoragePort>,
    gallery_configured: bool,
}

impl InitializeHandler {
    pub fn new(storage: Arc<dyn ImageStoragePort>, gallery_configured: bool) -> Self {
        Self {
            storage,
            gallery_configured,
        }
    }

    pub async fn handle(&self) -> InitializeReport {
        let mut report = InitializeReport::default();

        if let Err(e) = self.storage.ensure_writable().await {
            tracing::error!(error = %e, "Output directory check failed");
            report
                .warnings
                .push("output directory configuration is invalid".to_string());
        }

        if !self.gallery_configured {
            report.warnings.push("gallery directory not configured".to_string());
        }

        if report.warnings.is_empty() {
            tracing::info!("Plugin initialized with all configurations valid");
        } else {
            tracing::warn!(warnings = ?report.warnings, "Plugin initialized with warnings");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{LifecycleError, Readiness};
    use async_trait::async_trait;

    struct StubNim {
        readiness: Readiness,
        hosted: bool,
    }

    #[async_trait]
    impl NimServicePort for StubNim {
        fn model(&self) -> NimModel {
            NimModel::FluxKontext
        }

        fn is_hosted(&self) -> bool {
            self.hosted
        }

        async fn check_ready(&self) -> Readiness {
            self.readiness
        }

        async fn is_running(&self) -> Result<bool, LifecycleError> {
            Ok(false)
        }

        async fn start(&self) -> Result<StartOutcome, LifecycleError> {
            Ok(StartOutcome::AlreadyRunning)
        }

        async fn stop(&self) -> Result<(), LifecycleError> {
            Ok(())
        }
    }

    fn handler(readiness: Readiness, hosted: bool) -> NimServiceHandler {
        NimServiceHandler::new(
            NimModel::FluxKontext,
            Some(Arc::new(StubNim { readiness, hosted })),
        )
    }

    #[tokio::test]
    async fn test_ready_check_messages() {
        let ok = handler(Readiness { live: true, ready: true }, false);
        assert!(ok.handle(NimServiceAction::ReadyCheck).await.is_ok());

        let warming = handler(Readiness { live: true, ready: false }, false);
        let err = warming.handle(NimServiceAction::ReadyCheck).await.unwrap_err();
        assert!(err.to_string().contains("not ready"));

        let down = handler(Readiness::DOWN, false);
        assert!(down.handle(NimServiceAction::ReadyCheck).await.is_err());

        let hosted = handler(Readiness::DOWN, true);
        assert!(hosted.handle(NimServiceAction::ReadyCheck).await.is_ok());
    }

    #[tokio::test]
    async fn test_start_reports_already_running() {
        let h = handler(Readiness::DOWN, false);
        let msg = h.handle(NimServiceAction::Start).await.unwrap();
        assert!(msg.contains("already running"));
    }

    #[tokio::test]
    async fn test_missing_service_is_configuration_error() {
        let h = NimServiceHandler::new(NimModel::FluxDev, None);
        let err = h.handle(NimServiceAction::Status).await.unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Configuration { field: "flux_nim_url", .. }
        ));

        let comfy = ComfyUiServiceHandler::new(None, None);
        assert!(comfy
            .handle(ComfyUiAction::FreeMemory(FreeMemoryOptions::default()))
            .await
            .is_err());
    }

    #[test]
    fn test_free_memory_message() {
        assert_eq!(
            free_memory_message(FreeMemoryOptions::default()),
            "ComfyUI has been instructed to unload models and free memory successfully"
        );
        assert!(free_memory_message(FreeMemoryOptions {
            free_memory: false,
            unload_models: false
        })
        .contains("no actions"));
    }
}
