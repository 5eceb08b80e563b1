//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;

use crate::domain::generation::BackendKind;

/// NVIDIA 托管 Flux 服务地址前缀
pub const HOSTED_NIM_PREFIX: &str = "https://ai.api.nvidia.com";

/// 仍为示例值的配置项视为未配置
const PLACEHOLDER_VALUES: &[&str] = &[
    "YOUR_NGC_API_KEY_HERE",
    "YOUR_HF_TOKEN_HERE",
    "YOUR_NVIDIA_API_KEY_HERE",
    "/path/to/your/nim/cache",
];

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,

    /// 推理后端地址
    #[serde(default)]
    pub backends: BackendsConfig,

    /// NIM 容器配置
    #[serde(default)]
    pub nim: NimConfig,

    /// 容器运行时
    #[serde(default)]
    pub container: ContainerConfig,

    /// 后台任务池
    #[serde(default)]
    pub worker: WorkerConfig,

    /// 任务保留策略
    #[serde(default)]
    pub jobs: JobsConfig,

    /// 输入 / 输出目录
    #[serde(default)]
    pub storage: StorageConfig,

    /// 壁纸设置
    #[serde(default)]
    pub wallpaper: WallpaperConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5060
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// 获取服务器地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 后端配置
///
/// 所有 URL 都没有默认值，空字符串等同于未配置。
#[derive(Debug, Clone, Deserialize)]
pub struct BackendsConfig {
    /// Flux dev NIM 地址（本地容器或 NVIDIA 托管端点）
    #[serde(default)]
    pub flux_nim_url: Option<String>,

    #[serde(default)]
    pub flux_kontext_nim_url: Option<String>,

    #[serde(default)]
    pub invokeai_url: Option<String>,

    #[serde(default)]
    pub comfyui_url: Option<String>,

    /// Kontext 后端覆盖: NIM / INVOKEAI / COMFYUI
    #[serde(default)]
    pub kontext_backend: Option<String>,

    /// InvokeAI 上传目标 board
    #[serde(default)]
    pub board_id: Option<String>,

    /// 托管端点使用的 nvapi- 密钥
    #[serde(default)]
    pub nvidia_api_key: Option<String>,

    /// 健康检查超时（秒）
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    /// 控制类请求超时（秒）
    #[serde(default = "default_control_timeout")]
    pub control_timeout_secs: u64,
}

fn default_health_timeout() -> u64 {
    5
}

fn default_control_timeout() -> u64 {
    30
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            flux_nim_url: None,
            flux_kontext_nim_url: None,
            invokeai_url: None,
            comfyui_url: None,
            kontext_backend: None,
            board_id: None,
            nvidia_api_key: None,
            health_timeout_secs: default_health_timeout(),
            control_timeout_secs: default_control_timeout(),
        }
    }
}

impl BackendsConfig {
    /// Kontext 后端对应的 URL
    pub fn kontext_url(&self, kind: BackendKind) -> Option<&str> {
        match kind {
            BackendKind::Nim => non_empty(&self.flux_kontext_nim_url),
            BackendKind::InvokeAi => non_empty(&self.invokeai_url),
            BackendKind::ComfyUi => non_empty(&self.comfyui_url),
        }
    }

    pub fn flux_nim_url(&self) -> Option<&str> {
        non_empty(&self.flux_nim_url)
    }

    pub fn kontext_backend(&self) -> Option<&str> {
        non_empty(&self.kontext_backend)
    }

    pub fn board_id(&self) -> Option<&str> {
        non_empty(&self.board_id)
    }

    pub fn nvidia_api_key(&self) -> Option<&str> {
        non_empty(&self.nvidia_api_key)
    }
}

/// 去掉首尾空白后非空，且不是占位值
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !PLACEHOLDER_VALUES.contains(v))
}

pub fn is_hosted_url(url: &str) -> bool {
    url.starts_with(HOSTED_NIM_PREFIX)
}

/// NIM 容器配置
#[derive(Debug, Clone, Deserialize)]
pub struct NimConfig {
    /// 宿主机上的模型缓存目录
    #[serde(default)]
    pub cache_dir: Option<String>,

    #[serde(default)]
    pub ngc_api_key: Option<String>,

    #[serde(default)]
    pub hf_token: Option<String>,

    #[serde(default = "default_flux_dev_container")]
    pub flux_dev_container: String,

    #[serde(default = "default_flux_dev_image")]
    pub flux_dev_image: String,

    #[serde(default = "default_flux_kontext_container")]
    pub flux_kontext_container: String,

    #[serde(default = "default_flux_kontext_image")]
    pub flux_kontext_image: String,
}

fn default_flux_dev_container() -> String {
    "nim-server".to_string()
}

fn default_flux_dev_image() -> String {
    "nvcr.io/nim/black-forest-labs/flux.1-dev:1.0.0".to_string()
}

fn default_flux_kontext_container() -> String {
    "FLUX_KONTEXT".to_string()
}

fn default_flux_kontext_image() -> String {
    "nvcr.io/nim/black-forest-labs/flux.1-kontext-dev:latest".to_string()
}

impl Default for NimConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            ngc_api_key: None,
            hf_token: None,
            flux_dev_container: default_flux_dev_container(),
            flux_dev_image: default_flux_dev_image(),
            flux_kontext_container: default_flux_kontext_container(),
            flux_kontext_image: default_flux_kontext_image(),
        }
    }
}

/// 容器运行时配置
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    /// 运行时命令前缀，例如 ["wsl", "-d", "NVIDIA-Workbench"]；为空则直接执行
    #[serde(default = "default_launcher")]
    pub launcher: Vec<String>,

    /// 容器运行时程序
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// 单条命令超时（秒）
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_launcher() -> Vec<String> {
    vec!["wsl".to_string(), "-d".to_string(), "NVIDIA-Workbench".to_string()]
}

fn default_runtime() -> String {
    "podman".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            launcher: default_launcher(),
            runtime: default_runtime(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// 后台任务池配置
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// 最大并发生成数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// 队列容量
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// 单次生成超时（秒）
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

fn default_generation_timeout() -> u64 {
    300
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            generation_timeout_secs: default_generation_timeout(),
        }
    }
}

/// 任务保留配置
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// 终态任务保留时间（秒）
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// 清理间隔（秒）
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
}

fn default_retention() -> u64 {
    3600 // 1 小时
}

fn default_gc_interval() -> u64 {
    300
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            gc_interval_secs: default_gc_interval(),
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 生成图片输出目录
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// 截图目录，Kontext 从中取最新一张
    #[serde(default)]
    pub gallery_dir: Option<PathBuf>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            gallery_dir: None,
        }
    }
}

/// 壁纸配置
#[derive(Debug, Clone, Deserialize)]
pub struct WallpaperConfig {
    #[serde(default)]
    pub enabled: bool,

    /// 设置壁纸的命令，`{path}` 替换为图片绝对路径
    #[serde(default = "default_wallpaper_command")]
    pub command: Vec<String>,
}

fn default_wallpaper_command() -> Vec<String> {
    [
        "gsettings",
        "set",
        "org.gnome.desktop.background",
        "picture-uri",
        "file://{path}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for WallpaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_wallpaper_command(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.addr(), "127.0.0.1:5060");
        assert!(config.backends.flux_nim_url.is_none());
        assert_eq!(config.worker.generation_timeout_secs, 300);
        assert_eq!(config.container.runtime, "podman");
        assert_eq!(config.nim.flux_kontext_container, "FLUX_KONTEXT");
    }

    #[test]
    fn test_empty_and_placeholder_urls_are_absent() {
        let backends = BackendsConfig {
            comfyui_url: Some("  ".to_string()),
            invokeai_url: Some("http://localhost:9090".to_string()),
            ..Default::default()
        };
        assert_eq!(backends.kontext_url(BackendKind::ComfyUi), None);
        assert_eq!(
            backends.kontext_url(BackendKind::InvokeAi),
            Some("http://localhost:9090")
        );

        assert_eq!(non_empty(&Some("YOUR_HF_TOKEN_HERE".to_string())), None);
    }

    #[test]
    fn test_hosted_url_detection() {
        assert!(is_hosted_url(
            "https://ai.api.nvidia.com/v1/genai/black-forest-labs/flux.1-dev"
        ));
        assert!(!is_hosted_url("http://localhost:8000"));
    }
}
