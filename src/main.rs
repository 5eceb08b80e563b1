//! Fluxgate - 图像生成命令路由
//!
//! 默认以 HTTP 服务运行；`--pipe` 时改为 stdin/stdout 管道模式。

use std::sync::Arc;
use std::time::Duration;

use fluxgate::application::ports::{
    ImageBackendPort, ImageStoragePort, JobManagerPort, MemoryControlPort, NimServicePort,
    QueueControlPort, WallpaperPort,
};
use fluxgate::application::{
    BackendRegistry, BackendSelection, ComfyUiServiceHandler, CommandDispatcher,
    InitializeHandler, InvokeAiServiceHandler, NimServiceHandler, QueryJobStatusHandler,
    SubmitGenerationHandler,
};
use fluxgate::config::{load_config, non_empty, print_config, AppConfig, LogConfig};
use fluxgate::domain::generation::NimModel;
use fluxgate::infrastructure::adapters::{
    ComfyUiClient, ComfyUiConfig, CommandWallpaper, ContainerController, FileImageStorage,
    InvokeAiClient, InvokeAiConfig, NimClient, NimClientConfig, NimContainerConfig,
    NoopWallpaper, ProcessRunner, TokioProcessRunner,
};
use fluxgate::infrastructure::events::EventPublisher;
use fluxgate::infrastructure::http::{AppState, HttpServer};
use fluxgate::infrastructure::memory::InMemoryJobManager;
use fluxgate::infrastructure::pipe::PipeServer;
use fluxgate::infrastructure::worker::{spawn_job_gc, GenerationWorker, GenerationWorkerConfig};
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let pipe_mode = std::env::args().skip(1).any(|arg| arg == "--pipe");

    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    init_tracing(&config.log, pipe_mode);

    tracing::info!(pipe_mode, "Fluxgate starting");
    print_config(&config);
    let config = Arc::new(config);

    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new(Duration::from_secs(
        config.container.command_timeout_secs,
    )));
    let backends = build_backends(&config, runner.clone())?;

    // 存储与壁纸
    let storage: Arc<dyn ImageStoragePort> =
        Arc::new(FileImageStorage::new(&config.storage.output_dir));
    let wallpaper: Arc<dyn WallpaperPort> = if config.wallpaper.enabled {
        Arc::new(CommandWallpaper::new(runner, config.wallpaper.command.clone()))
    } else {
        Arc::new(NoopWallpaper)
    };

    // 任务队列与管理器
    let (queue_tx, queue_rx) = mpsc::channel(config.worker.queue_capacity.max(1));
    let job_manager: Arc<dyn JobManagerPort> = Arc::new(InMemoryJobManager::new(queue_tx));
    let event_publisher = EventPublisher::new().arc();

    let worker = GenerationWorker::new(
        GenerationWorkerConfig {
            max_concurrent: config.worker.max_concurrent,
            generation_timeout: Duration::from_secs(config.worker.generation_timeout_secs),
        },
        queue_rx,
        job_manager.clone(),
        backends.registry.clone(),
        storage.clone(),
        wallpaper,
        event_publisher.clone(),
    );
    tokio::spawn(worker.run());

    let _gc = spawn_job_gc(
        job_manager.clone(),
        Duration::from_secs(config.jobs.retention_secs),
        Duration::from_secs(config.jobs.gc_interval_secs),
    );

    let dispatcher = Arc::new(CommandDispatcher::new(
        SubmitGenerationHandler::new(
            config.clone(),
            backends.registry,
            job_manager.clone(),
            storage.clone(),
        ),
        QueryJobStatusHandler::new(job_manager.clone()),
        NimServiceHandler::new(NimModel::FluxDev, backends.flux_nim),
        NimServiceHandler::new(NimModel::FluxKontext, backends.flux_kontext_nim),
        InvokeAiServiceHandler::new(backends.invokeai, backends.invokeai_queue),
        ComfyUiServiceHandler::new(backends.comfyui, backends.comfyui_memory),
        InitializeHandler::new(storage, config.storage.gallery_dir.is_some()),
    ));

    if pipe_mode {
        PipeServer::new(dispatcher).run_stdio().await?;
        tracing::info!("Pipe transport finished");
        return Ok(());
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let state = Arc::new(AppState::new(
        dispatcher,
        job_manager,
        event_publisher,
        shutdown_tx,
    ));

    let server = HttpServer::new(config.server.addr(), state);
    server
        .run_with_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for ctrl-c");
                    }
                    tracing::info!("Received shutdown signal");
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Received shutdown command");
                }
            }
        })
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 初始化日志；管道模式写 stderr，stdout 只留给响应
fn init_tracing(log: &LogConfig, pipe_mode: bool) {
    let log_filter = format!("{},fluxgate={},tower_http=debug", log.level, log.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (log.json, pipe_mode) {
        (true, true) => builder.json().with_writer(std::io::stderr).init(),
        (true, false) => builder.json().init(),
        (false, true) => builder.with_ansi(false).with_writer(std::io::stderr).init(),
        (false, false) => builder.init(),
    }
}

/// 已配置的后端客户端
struct Backends {
    registry: BackendRegistry,
    flux_nim: Option<Arc<dyn NimServicePort>>,
    flux_kontext_nim: Option<Arc<dyn NimServicePort>>,
    invokeai: Option<Arc<dyn ImageBackendPort>>,
    invokeai_queue: Option<Arc<dyn QueueControlPort>>,
    comfyui: Option<Arc<dyn ImageBackendPort>>,
    comfyui_memory: Option<Arc<dyn MemoryControlPort>>,
}

/// 只为配置了 URL 的后端构造客户端
fn build_backends(config: &AppConfig, runner: Arc<dyn ProcessRunner>) -> anyhow::Result<Backends> {
    let runtime = Arc::new(ContainerController::new(
        runner,
        config.container.launcher.clone(),
        config.container.runtime.clone(),
    ));
    let generation_timeout = config.worker.generation_timeout_secs;

    let mut registry = BackendRegistry::new();
    let mut backends = Backends {
        registry: BackendRegistry::new(),
        flux_nim: None,
        flux_kontext_nim: None,
        invokeai: None,
        invokeai_queue: None,
        comfyui: None,
        comfyui_memory: None,
    };

    for (model, url, name, image) in [
        (
            NimModel::FluxDev,
            config.backends.flux_nim_url(),
            &config.nim.flux_dev_container,
            &config.nim.flux_dev_image,
        ),
        (
            NimModel::FluxKontext,
            non_empty(&config.backends.flux_kontext_nim_url),
            &config.nim.flux_kontext_container,
            &config.nim.flux_kontext_image,
        ),
    ] {
        let Some(url) = url else { continue };
        let client_config = NimClientConfig::new(model, url)
            .with_api_key(config.backends.nvidia_api_key().map(str::to_string))
            .with_timeout(generation_timeout)
            .with_health_timeout(config.backends.health_timeout_secs);
        let container = NimContainerConfig {
            name: name.clone(),
            image: image.clone(),
            cache_dir: config.nim.cache_dir.clone(),
            ngc_api_key: config.nim.ngc_api_key.clone(),
            hf_token: config.nim.hf_token.clone(),
        };
        let client = Arc::new(NimClient::new(client_config, container, runtime.clone())?);

        registry = registry.register(BackendSelection::Nim(model), client.clone());
        match model {
            NimModel::FluxDev => backends.flux_nim = Some(client),
            NimModel::FluxKontext => backends.flux_kontext_nim = Some(client),
        }
        tracing::info!(model = model.display_name(), url, "NIM client configured");
    }

    if let Some(url) = non_empty(&config.backends.invokeai_url) {
        let mut client_config = InvokeAiConfig::new(url);
        client_config.board_id = config.backends.board_id().map(str::to_string);
        client_config.generation_timeout_secs = generation_timeout;
        client_config.control_timeout_secs = config.backends.control_timeout_secs;
        let client = Arc::new(InvokeAiClient::new(client_config)?);

        registry = registry.register(BackendSelection::InvokeAi, client.clone());
        backends.invokeai = Some(client.clone());
        backends.invokeai_queue = Some(client);
        tracing::info!(url, "InvokeAI client configured");
    }

    if let Some(url) = non_empty(&config.backends.comfyui_url) {
        let mut client_config = ComfyUiConfig::new(url);
        client_config.generation_timeout_secs = generation_timeout;
        client_config.control_timeout_secs = config.backends.control_timeout_secs;
        let client = Arc::new(ComfyUiClient::new(client_config)?);

        registry = registry.register(BackendSelection::ComfyUi, client.clone());
        backends.comfyui = Some(client.clone());
        backends.comfyui_memory = Some(client);
        tracing::info!(url, "ComfyUI client configured");
    }

    backends.registry = registry;
    Ok(backends)
}
