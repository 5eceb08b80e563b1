//! Backend Selector - 后端选择
//!
//! 纯函数，根据配置与请求种类决定使用哪个后端

use std::sync::Arc;

use serde::Serialize;

use crate::application::error::ApplicationError;
use crate::application::ports::ImageBackendPort;
use crate::config::{is_hosted_url, BackendsConfig};
use crate::domain::generation::{BackendKind, NimModel, RequestKind};

/// 选择结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "backend", content = "model", rename_all = "snake_case")]
pub enum BackendSelection {
    Nim(NimModel),
    InvokeAi,
    ComfyUi,
}

impl BackendSelection {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSelection::Nim(_) => BackendKind::Nim,
            BackendSelection::InvokeAi => BackendKind::InvokeAi,
            BackendSelection::ComfyUi => BackendKind::ComfyUi,
        }
    }

    /// 面向用户的后端名称
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendSelection::Nim(model) => model.display_name(),
            BackendSelection::InvokeAi => "InvokeAI",
            BackendSelection::ComfyUi => "ComfyUI",
        }
    }

    /// 输出文件名前缀
    pub fn file_prefix(&self) -> &'static str {
        match self {
            BackendSelection::Nim(NimModel::FluxDev) => "flux_image",
            BackendSelection::Nim(NimModel::FluxKontext) => "flux_kontext_nim",
            BackendSelection::InvokeAi => "flux_kontext_invokeai",
            BackendSelection::ComfyUi => "flux_kontext_comfyui",
        }
    }
}

/// 选择后端
///
/// - Kontext: 显式覆盖优先，必须有对应 URL；未覆盖时 NIM 优先于 InvokeAI，ComfyUI 只能显式选择
/// - 文生图: 固定使用 Flux dev NIM
pub fn select_backend(
    kind: RequestKind,
    config: &BackendsConfig,
) -> Result<BackendSelection, ApplicationError> {
    match kind {
        RequestKind::TextToImage => {
            let url = config
                .flux_nim_url()
                .ok_or_else(|| ApplicationError::configuration(BackendKind::Nim, "flux_nim_url"))?;
            if is_hosted_url(url) {
                let key_ok = config
                    .nvidia_api_key()
                    .map_or(false, |key| key.starts_with("nvapi-"));
                if !key_ok {
                    return Err(ApplicationError::configuration(
                        BackendKind::Nim,
                        "nvidia_api_key",
                    ));
                }
            }
            Ok(BackendSelection::Nim(NimModel::FluxDev))
        }
        RequestKind::Kontext => select_kontext(config),
    }
}

fn select_kontext(config: &BackendsConfig) -> Result<BackendSelection, ApplicationError> {
    if let Some(raw) = config.kontext_backend() {
        let backend: BackendKind = raw.parse().map_err(|_| {
            ApplicationError::configuration(BackendKind::Nim, "kontext_backend")
        })?;
        if config.kontext_url(backend).is_none() {
            return Err(ApplicationError::configuration(backend, backend.url_field()));
        }
        return Ok(kontext_selection(backend));
    }

    [BackendKind::Nim, BackendKind::InvokeAi]
        .into_iter()
        .find(|backend| config.kontext_url(*backend).is_some())
        .map(kontext_selection)
        .ok_or(ApplicationError::NoBackendConfigured)
}

fn kontext_selection(kind: BackendKind) -> BackendSelection {
    match kind {
        BackendKind::Nim => BackendSelection::Nim(NimModel::FluxKontext),
        BackendKind::InvokeAi => BackendSelection::InvokeAi,
        BackendKind::ComfyUi => BackendSelection::ComfyUi,
    }
}

/// 已构造的后端客户端，按选择结果查找
#[derive(Default, Clone)]
pub struct BackendRegistry {
    flux_dev: Option<Arc<dyn ImageBackendPort>>,
    flux_kontext: Option<Arc<dyn ImageBackendPort>>,
    invokeai: Option<Arc<dyn ImageBackendPort>>,
    comfyui: Option<Arc<dyn ImageBackendPort>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, selection: BackendSelection, backend: Arc<dyn ImageBackendPort>) -> Self {
        *self.slot_mut(selection) = Some(backend);
        self
    }

    pub fn resolve(&self, selection: BackendSelection) -> Option<Arc<dyn ImageBackendPort>> {
        match selection {
            BackendSelection::Nim(NimModel::FluxDev) => self.flux_dev.clone(),
            BackendSelection::Nim(NimModel::FluxKontext) => self.flux_kontext.clone(),
            BackendSelection::InvokeAi => self.invokeai.clone(),
            BackendSelection::ComfyUi => self.comfyui.clone(),
        }
    }

    fn slot_mut(&mut self, selection: BackendSelection) -> &mut Option<Arc<dyn ImageBackendPort>> {
        match selection {
            BackendSelection::Nim(NimModel::FluxDev) => &mut self.flux_dev,
            BackendSelection::Nim(NimModel::FluxKontext) => &mut self.flux_kontext,
            BackendSelection::InvokeAi => &mut self.invokeai,
            BackendSelection::ComfyUi => &mut self.comfyui,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends(nim: Option<&str>, invoke: Option<&str>, comfy: Option<&str>) -> BackendsConfig {
        BackendsConfig {
            flux_kontext_nim_url: nim.map(String::from),
            invokeai_url: invoke.map(String::from),
            comfyui_url: comfy.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_unset_override_prefers_nim() {
        let config = backends(Some("http://localhost:8011"), Some("http://localhost:9090"), None);
        for _ in 0..3 {
            assert_eq!(
                select_backend(RequestKind::Kontext, &config).unwrap(),
                BackendSelection::Nim(NimModel::FluxKontext)
            );
        }
    }

    #[test]
    fn test_falls_back_to_invokeai() {
        let config = backends(None, Some("http://localhost:9090"), Some("http://localhost:8188"));
        assert_eq!(
            select_backend(RequestKind::Kontext, &config).unwrap(),
            BackendSelection::InvokeAi
        );
    }

    #[test]
    fn test_override_changes_choice() {
        let mut config = backends(
            Some("http://localhost:8011"),
            Some("http://localhost:9090"),
            Some("http://localhost:8188"),
        );

        config.kontext_backend = Some("INVOKEAI".to_string());
        assert_eq!(select_backend(RequestKind::Kontext, &config).unwrap(), BackendSelection::InvokeAi);

        config.kontext_backend = Some("comfyui".to_string());
        assert_eq!(select_backend(RequestKind::Kontext, &config).unwrap(), BackendSelection::ComfyUi);

        config.kontext_backend = Some("NIM".to_string());
        assert_eq!(
            select_backend(RequestKind::Kontext, &config).unwrap(),
            BackendSelection::Nim(NimModel::FluxKontext)
        );
    }

    #[test]
    fn test_comfyui_override_without_url_is_configuration_error() {
        let mut config = backends(Some("http://localhost:8011"), None, None);
        config.kontext_backend = Some("COMFYUI".to_string());

        let err = select_backend(RequestKind::Kontext, &config).unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Configuration {
                backend: BackendKind::ComfyUi,
                field: "comfyui_url"
            }
        ));
    }

    #[test]
    fn test_empty_url_counts_as_absent() {
        let mut config = backends(None, None, Some(""));
        config.kontext_backend = Some("COMFYUI".to_string());
        assert!(matches!(
            select_backend(RequestKind::Kontext, &config),
            Err(ApplicationError::Configuration { .. })
        ));
    }

    #[test]
    fn test_nothing_configured() {
        let config = backends(None, None, Some("http://localhost:8188"));
        assert!(matches!(
            select_backend(RequestKind::Kontext, &config),
            Err(ApplicationError::NoBackendConfigured)
        ));
    }

    #[test]
    fn test_unparseable_override() {
        let mut config = backends(Some("http://localhost:8011"), None, None);
        config.kontext_backend = Some("A1111".to_string());
        assert!(matches!(
            select_backend(RequestKind::Kontext, &config),
            Err(ApplicationError::Configuration { field: "kontext_backend", .. })
        ));
    }

    #[test]
    fn test_text_to_image_requires_flux_url() {
        let config = BackendsConfig::default();
        assert!(matches!(
            select_backend(RequestKind::TextToImage, &config),
            Err(ApplicationError::Configuration { field: "flux_nim_url", .. })
        ));

        let config = BackendsConfig {
            flux_nim_url: Some("http://localhost:8000".to_string()),
            ..Default::default()
        };
        assert_eq!(
            select_backend(RequestKind::TextToImage, &config).unwrap(),
            BackendSelection::Nim(NimModel::FluxDev)
        );
    }

    #[test]
    fn test_hosted_endpoint_requires_nvapi_key() {
        let mut config = BackendsConfig {
            flux_nim_url: Some(
                "https://ai.api.nvidia.com/v1/genai/black-forest-labs/flux.1-dev".to_string(),
            ),
            nvidia_api_key: Some("sk-wrong".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            select_backend(RequestKind::TextToImage, &config),
            Err(ApplicationError::Configuration { field: "nvidia_api_key", .. })
        ));

        config.nvidia_api_key = Some("nvapi-abc".to_string());
        assert!(select_backend(RequestKind::TextToImage, &config).is_ok());
    }
}
