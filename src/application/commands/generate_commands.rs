//! Generation Commands - 生成相关命令

use std::path::PathBuf;

use serde::Serialize;

use crate::application::ports::JobState;
use crate::application::selector::BackendSelection;
use crate::domain::generation::BackendKind;

pub const DEFAULT_TEXT_PROMPT: &str = "A beautiful landscape with mountains and a lake";
pub const DEFAULT_KONTEXT_PROMPT: &str = "make it in the style of studio ghibli anime";

/// 缺省或空白时使用默认提示词
fn prompt_or(prompt: &Option<String>, default: &str) -> String {
    prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// 文生图命令
#[derive(Debug, Clone, Default)]
pub struct GenerateImageCommand {
    pub prompt: Option<String>,
    pub aspect_ratio: Option<String>,
    pub steps: Option<u32>,
    pub cfg_scale: Option<f32>,
    pub seed: Option<u64>,
}

impl GenerateImageCommand {
    pub fn effective_prompt(&self) -> String {
        prompt_or(&self.prompt, DEFAULT_TEXT_PROMPT)
    }
}

/// Kontext 图生图命令
///
/// 未提供 `image` 时使用截图目录中最新的图片。
#[derive(Debug, Clone, Default)]
pub struct GenerateKontextCommand {
    pub prompt: Option<String>,
    pub image: Option<Vec<u8>>,
    pub steps: Option<u32>,
    pub cfg_scale: Option<f32>,
    pub seed: Option<u64>,
}

impl GenerateKontextCommand {
    pub fn effective_prompt(&self) -> String {
        prompt_or(&self.prompt, DEFAULT_KONTEXT_PROMPT)
    }
}

/// 提交确认，在任何后端调用之前返回
#[derive(Debug, Clone, Serialize)]
pub struct SubmitGenerationResponse {
    pub job_id: String,
    pub backend: BackendSelection,
    pub message: String,
}

/// 查询任务状态命令
#[derive(Debug, Clone)]
pub struct QueryJobStatusCommand {
    pub job_ids: Vec<String>,
}

/// 任务状态信息
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusInfo {
    pub job_id: String,
    pub state: JobState,
    pub backend: BackendKind,
    pub target: &'static str,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
}

/// 查询任务状态响应，未知 id 单独列出
#[derive(Debug, Clone, Serialize)]
pub struct QueryJobStatusResponse {
    pub jobs: Vec<JobStatusInfo>,
    pub unknown: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        assert_eq!(GenerateImageCommand::default().effective_prompt(), DEFAULT_TEXT_PROMPT);

        let cmd = GenerateKontextCommand {
            prompt: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(cmd.effective_prompt(), DEFAULT_KONTEXT_PROMPT);

        let cmd = GenerateImageCommand {
            prompt: Some(" a red fox ".to_string()),
            ..Default::default()
        };
        assert_eq!(cmd.effective_prompt(), "a red fox");
    }
}
