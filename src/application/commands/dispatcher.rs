//! Command Dispatcher - 函数名到处理器的映射
//!
//! HTTP 与管道两种传输共用，所有错误都转换为 `{success: false, message}`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::application::commands::handlers::{
    ComfyUiServiceHandler, InitializeHandler, InvokeAiServiceHandler, NimServiceHandler,
    QueryJobStatusHandler, SubmitGenerationHandler,
};
use crate::application::commands::*;
use crate::application::error::ApplicationError;
use crate::application::ports::FreeMemoryOptions;
use crate::domain::imaging;

const ERROR_PREFIX: &str = "Plugin Error!";

/// 工具调用信封
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub messages: Option<Value>,
    #[serde(default)]
    pub system_info: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub func: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl ToolCall {
    pub fn new(func: impl Into<String>, params: Value) -> Self {
        Self {
            func: Some(func.into()),
            params: Some(params),
        }
    }
}

/// 命令响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// 信封无法解析或缺少必需字段
    pub fn malformed() -> Self {
        Self::failure(format!("{} Malformed input.", ERROR_PREFIX))
    }
}

impl From<Result<String, ApplicationError>> for CommandResponse {
    fn from(result: Result<String, ApplicationError>) -> Self {
        match result {
            Ok(message) => CommandResponse::success(message),
            Err(e) => CommandResponse::failure(e.to_string()),
        }
    }
}

/// 一次分发的结果
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub response: CommandResponse,
    /// 收到 shutdown，传输层应结束循环
    pub shutdown: bool,
}

/// Command Dispatcher
pub struct CommandDispatcher {
    generation: SubmitGenerationHandler,
    job_status: QueryJobStatusHandler,
    flux_nim: NimServiceHandler,
    flux_kontext_nim: NimServiceHandler,
    invokeai: InvokeAiServiceHandler,
    comfyui: ComfyUiServiceHandler,
    initialize: InitializeHandler,
}

impl CommandDispatcher {
    pub fn new(
        generation: SubmitGenerationHandler,
        job_status: QueryJobStatusHandler,
        flux_nim: NimServiceHandler,
        flux_kontext_nim: NimServiceHandler,
        invokeai: InvokeAiServiceHandler,
        comfyui: ComfyUiServiceHandler,
        initialize: InitializeHandler,
    ) -> Self {
        Self {
            generation,
            job_status,
            flux_nim,
            flux_kontext_nim,
            invokeai,
            comfyui,
            initialize,
        }
    }

    /// 按顺序处理信封内所有工具调用，返回最后一个响应
    pub async fn dispatch(&self, envelope: CommandEnvelope) -> DispatchOutcome {
        let tool_calls = match envelope.tool_calls {
            Some(calls) if !calls.is_empty() => calls,
            _ => {
                tracing::warn!("Malformed input: missing tool_calls property");
                return DispatchOutcome {
                    response: CommandResponse::malformed(),
                    shutdown: false,
                };
            }
        };

        let mut outcome = DispatchOutcome {
            response: CommandResponse::malformed(),
            shutdown: false,
        };

        for call in tool_calls {
            let Some(func) = call.func else {
                tracing::warn!("Malformed input: missing function property");
                outcome.response = CommandResponse::malformed();
                continue;
            };

            let params = match call.params {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };

            tracing::info!(command = %func, "Processing command");
            outcome.response = self.execute(&func, &params).await;
            if func == "shutdown" {
                outcome.shutdown = true;
            }
        }

        outcome
    }

    /// 执行单个命令
    pub async fn execute(&self, func: &str, params: &Map<String, Value>) -> CommandResponse {
        let response = match func {
            "initialize" => CommandResponse::success(self.initialize.handle().await.message()),
            "shutdown" => CommandResponse::success("shutdown success."),
            "generate_image" => self.generate_image(params).await.into(),
            "generate_image_using_kontext" => self.generate_kontext(params).await.into(),
            "flux_nim_ready_check" => self.flux_nim.handle(NimServiceAction::ReadyCheck).await.into(),
            "check_nim_status" => self.flux_nim.handle(NimServiceAction::Status).await.into(),
            "start_nim" => self.flux_nim.handle(NimServiceAction::Start).await.into(),
            "stop_nim" => self.flux_nim.handle(NimServiceAction::Stop).await.into(),
            "flux_kontext_nim_ready_check" => {
                self.flux_kontext_nim.handle(NimServiceAction::ReadyCheck).await.into()
            }
            "check_flux_kontext_nim_status" => {
                self.flux_kontext_nim.handle(NimServiceAction::Status).await.into()
            }
            "start_flux_kontext_nim" => {
                self.flux_kontext_nim.handle(NimServiceAction::Start).await.into()
            }
            "stop_flux_kontext_nim" => {
                self.flux_kontext_nim.handle(NimServiceAction::Stop).await.into()
            }
            "invokeai_status" => self.invokeai.handle(InvokeAiAction::Status).await.into(),
            "pause_invokeai_processor" => {
                self.invokeai.handle(InvokeAiAction::PauseQueue).await.into()
            }
            "resume_invokeai_processor" => {
                self.invokeai.handle(InvokeAiAction::ResumeQueue).await.into()
            }
            "invokeai_empty_model_cache" => {
                self.invokeai.handle(InvokeAiAction::EmptyModelCache).await.into()
            }
            "comfyui_status" => self.comfyui.handle(ComfyUiAction::Status).await.into(),
            "comfyui_free_memory" => {
                let options = FreeMemoryOptions {
                    free_memory: flag(params, "free_memory"),
                    unload_models: flag(params, "unload_models"),
                };
                self.comfyui.handle(ComfyUiAction::FreeMemory(options)).await.into()
            }
            "job_status" => self.job_status(params).into(),
            unknown => {
                tracing::warn!(command = %unknown, "Unknown command");
                CommandResponse::failure(format!("{} Unknown command: {}", ERROR_PREFIX, unknown))
            }
        };

        // 传输层负责 warn 级别的失败日志
        if !response.success {
            tracing::debug!(
                command = %func,
                message = response.message.as_deref().unwrap_or(""),
                "Command failed"
            );
        }
        response
    }

    async fn generate_image(&self, params: &Map<String, Value>) -> Result<String, ApplicationError> {
        let cmd = GenerateImageCommand {
            prompt: string_param(params, "prompt"),
            aspect_ratio: string_param(params, "aspect_ratio"),
            steps: u32_param(params, "steps")?,
            cfg_scale: f32_param(params, "cfg_scale")?,
            seed: u64_param(params, "seed")?,
        };
        let ack = self.generation.generate_image(cmd).await?;
        Ok(ack.message)
    }

    async fn generate_kontext(&self, params: &Map<String, Value>) -> Result<String, ApplicationError> {
        let image = match string_param(params, "image") {
            Some(encoded) => Some(
                imaging::decode_base64(&encoded)
                    .map_err(|e| ApplicationError::invalid_parameter(e.to_string()))?,
            ),
            None => None,
        };
        let cmd = GenerateKontextCommand {
            prompt: string_param(params, "prompt"),
            image,
            steps: u32_param(params, "steps")?,
            cfg_scale: f32_param(params, "cfg_scale")?,
            seed: u64_param(params, "seed")?,
        };
        let ack = self.generation.generate_kontext(cmd).await?;
        Ok(ack.message)
    }

    fn job_status(&self, params: &Map<String, Value>) -> Result<String, ApplicationError> {
        let mut job_ids: Vec<String> = match params.get("job_ids") {
            Some(Value::Array(ids)) => ids
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        if let Some(id) = string_param(params, "job_id") {
            job_ids.push(id);
        }
        if job_ids.is_empty() {
            return Err(ApplicationError::invalid_parameter("job_id is required"));
        }

        let response = self.job_status.handle(QueryJobStatusCommand { job_ids });
        let mut lines: Vec<String> = response
            .jobs
            .iter()
            .map(|job| {
                let mut line = format!("{} [{}]: {}", job.job_id, job.target, job.state);
                if let Some(path) = &job.output_path {
                    line.push_str(&format!(" -> {}", path.display()));
                }
                if let Some(error) = &job.error {
                    line.push_str(&format!(" ({})", error));
                }
                line
            })
            .collect();
        lines.extend(response.unknown.iter().map(|id| format!("{}: unknown job", id)));
        Ok(lines.join("\n"))
    }
}

fn string_param(params: &Map<String, Value>, key: &str) -> Option<String> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// 数字参数，允许数字字符串
fn number_param(params: &Map<String, Value>, key: &str) -> Result<Option<f64>, ApplicationError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
            ApplicationError::invalid_parameter(format!("{} must be a number, got {}", key, s))
        }),
        Some(other) => Err(ApplicationError::invalid_parameter(format!(
            "{} must be a number, got {}",
            key, other
        ))),
    }
}

fn integer_param(params: &Map<String, Value>, key: &str) -> Result<Option<u64>, ApplicationError> {
    match number_param(params, key)? {
        None => Ok(None),
        Some(v) if v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 => Ok(Some(v as u64)),
        Some(v) => Err(ApplicationError::invalid_parameter(format!(
            "{} must be a non-negative integer, got {}",
            key, v
        ))),
    }
}

fn u32_param(params: &Map<String, Value>, key: &str) -> Result<Option<u32>, ApplicationError> {
    match integer_param(params, key)? {
        None => Ok(None),
        Some(v) => u32::try_from(v)
            .map(Some)
            .map_err(|_| ApplicationError::invalid_parameter(format!("{} is too large", key))),
    }
}

fn u64_param(params: &Map<String, Value>, key: &str) -> Result<Option<u64>, ApplicationError> {
    integer_param(params, key)
}

fn f32_param(params: &Map<String, Value>, key: &str) -> Result<Option<f32>, ApplicationError> {
    Ok(number_param(params, key)?.map(|v| v as f32))
}

/// 布尔开关，缺省为 true；字符串 "true" / "1" / "yes" / "on" 视为 true
fn flag(params: &Map<String, Value>, key: &str) -> bool {
    match params.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        Some(Value::Number(n)) => n.as_f64().map_or(false, |v| v != 0.0),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_flag_parsing() {
        let p = params(json!({
            "a": "YES", "b": "off", "c": false, "d": 1, "e": "0"
        }));
        assert!(flag(&p, "a"));
        assert!(!flag(&p, "b"));
        assert!(!flag(&p, "c"));
        assert!(flag(&p, "d"));
        assert!(!flag(&p, "e"));
        assert!(flag(&p, "missing"));
    }

    #[test]
    fn test_numeric_params_accept_strings() {
        let p = params(json!({"steps": "28", "cfg_scale": 3.5, "seed": 42, "bad": "many"}));
        assert_eq!(u32_param(&p, "steps").unwrap(), Some(28));
        assert_eq!(f32_param(&p, "cfg_scale").unwrap(), Some(3.5));
        assert_eq!(u64_param(&p, "seed").unwrap(), Some(42));
        assert_eq!(u32_param(&p, "missing").unwrap(), None);
        assert!(u32_param(&p, "bad").is_err());
    }

    #[test]
    fn test_negative_or_fractional_integers_rejected() {
        let p = params(json!({"steps": -5, "seed": 1.5}));
        assert!(u32_param(&p, "steps").is_err());
        assert!(u64_param(&p, "seed").is_err());
    }

    #[test]
    fn test_envelope_parsing() {
        let envelope: CommandEnvelope = serde_json::from_str(
            r#"{"tool_calls":[{"func":"comfyui_free_memory","params":{"unload_models":"false"}}],
                "messages":[], "system_info":"GPU"}"#,
        )
        .unwrap();
        let calls = envelope.tool_calls.unwrap();
        assert_eq!(calls[0].func.as_deref(), Some("comfyui_free_memory"));
    }

    #[test]
    fn test_response_serialization() {
        let ok = serde_json::to_string(&CommandResponse::success("done")).unwrap();
        assert_eq!(ok, r#"{"success":true,"message":"done"}"#);
    }
}
