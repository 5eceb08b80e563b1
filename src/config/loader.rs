//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（fluxgate.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::{non_empty, AppConfig};
use crate::domain::generation::BackendKind;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["fluxgate", "fluxgate.local"];

/// 加载应用配置
///
/// # 环境变量示例
/// - `FLUXGATE_SERVER__PORT=8080`
/// - `FLUXGATE_BACKENDS__FLUX_KONTEXT_NIM_URL=http://localhost:8011`
/// - `FLUXGATE_BACKENDS__KONTEXT_BACKEND=COMFYUI`
/// - `FLUXGATE_STORAGE__GALLERY_DIR=/home/me/Pictures/Screenshots`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 默认值（最低优先级）
    builder = builder
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 5060)?
        .set_default("backends.health_timeout_secs", 5)?
        .set_default("backends.control_timeout_secs", 30)?
        .set_default("container.runtime", "podman")?
        .set_default("container.launcher", vec!["wsl", "-d", "NVIDIA-Workbench"])?
        .set_default("container.command_timeout_secs", 30)?
        .set_default("worker.max_concurrent", 2)?
        .set_default("worker.queue_capacity", 64)?
        .set_default("worker.generation_timeout_secs", 300)?
        .set_default("jobs.retention_secs", 3600)?
        .set_default("jobs.gc_interval_secs", 300)?
        .set_default("storage.output_dir", "output")?
        .set_default("wallpaper.enabled", false)?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 环境变量（最高优先级）
    // 例如: FLUXGATE_BACKENDS__INVOKEAI_URL=http://localhost:9090
    builder = builder.add_source(
        Environment::with_prefix("FLUXGATE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
///
/// 只检查结构性错误；缺少某个后端 URL 不算错误，在选择后端时再报告。
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "Server port cannot be 0".to_string(),
        ));
    }

    if config.worker.max_concurrent == 0 {
        return Err(ConfigError::ValidationError(
            "worker.max_concurrent must be at least 1".to_string(),
        ));
    }

    if config.worker.queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "worker.queue_capacity must be at least 1".to_string(),
        ));
    }

    if config.worker.generation_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "worker.generation_timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.jobs.gc_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "jobs.gc_interval_secs cannot be 0".to_string(),
        ));
    }

    if config.container.runtime.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "container.runtime cannot be empty".to_string(),
        ));
    }

    if let Some(value) = non_empty(&config.backends.kontext_backend) {
        value.parse::<BackendKind>().map_err(|e| {
            ConfigError::ValidationError(format!("backends.kontext_backend: {}", e))
        })?;
    }

    for (field, url) in [
        ("flux_nim_url", &config.backends.flux_nim_url),
        ("flux_kontext_nim_url", &config.backends.flux_kontext_nim_url),
        ("invokeai_url", &config.backends.invokeai_url),
        ("comfyui_url", &config.backends.comfyui_url),
    ] {
        if let Some(url) = non_empty(url) {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "backends.{} must be an http(s) URL, got {}",
                    field, url
                )));
            }
        }
    }

    if config.wallpaper.enabled && config.wallpaper.command.is_empty() {
        return Err(ConfigError::ValidationError(
            "wallpaper.command cannot be empty when wallpaper is enabled".to_string(),
        ));
    }

    Ok(())
}

fn mask(value: &Option<String>) -> &'static str {
    if non_empty(value).is_some() {
        "****"
    } else {
        "<unset>"
    }
}

fn show(value: &Option<String>) -> &str {
    non_empty(value).unwrap_or("<unset>")
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Server: {}", config.server.addr());
    tracing::info!("Flux NIM URL: {}", show(&config.backends.flux_nim_url));
    tracing::info!("Flux Kontext NIM URL: {}", show(&config.backends.flux_kontext_nim_url));
    tracing::info!("InvokeAI URL: {}", show(&config.backends.invokeai_url));
    tracing::info!("ComfyUI URL: {}", show(&config.backends.comfyui_url));
    tracing::info!("Kontext Backend: {}", show(&config.backends.kontext_backend));
    tracing::info!("NVIDIA API Key: {}", mask(&config.backends.nvidia_api_key));
    tracing::info!("NGC API Key: {}", mask(&config.nim.ngc_api_key));
    tracing::info!("HF Token: {}", mask(&config.nim.hf_token));
    tracing::info!("Container Runtime: {} {}", config.container.launcher.join(" "), config.container.runtime);
    tracing::info!("Worker Concurrency: {}", config.worker.max_concurrent);
    tracing::info!("Generation Timeout: {}s", config.worker.generation_timeout_secs);
    tracing::info!("Output Directory: {:?}", config.storage.output_dir);
    tracing::info!("Gallery Directory: {:?}", config.storage.gallery_dir);
    tracing::info!("Wallpaper Enabled: {}", config.wallpaper.enabled);
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}
