//! Generation Context - Request

use std::path::PathBuf;

use super::{AspectRatio, GenerationError, RequestKind};

/// 文生图默认步数
pub const DEFAULT_TEXT_STEPS: u32 = 50;
/// Kontext 默认步数
pub const DEFAULT_KONTEXT_STEPS: u32 = 30;
/// Kontext 模型接受的步数区间
pub const KONTEXT_STEPS_RANGE: (u32, u32) = (20, 50);
/// 文生图步数上限
pub const MAX_TEXT_STEPS: u32 = 50;

pub const DEFAULT_TEXT_CFG_SCALE: f32 = 5.0;
pub const DEFAULT_KONTEXT_CFG_SCALE: f32 = 3.5;
pub const MAX_CFG_SCALE: f32 = 20.0;

/// 参考图来源
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceImage {
    /// 调用方直接提供的图片字节
    Bytes(Vec<u8>),
    /// 目录中最新的截图，在执行时解析
    LatestIn(PathBuf),
}

/// 未校验的请求参数
#[derive(Debug, Clone, Default)]
pub struct GenerationDraft {
    pub prompt: String,
    pub reference: Option<ReferenceImage>,
    pub aspect_ratio: Option<String>,
    pub steps: Option<u32>,
    pub cfg_scale: Option<f32>,
    pub seed: Option<u64>,
}

impl GenerationDraft {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_reference(mut self, reference: ReferenceImage) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_aspect_ratio(mut self, token: impl Into<String>) -> Self {
        self.aspect_ratio = Some(token.into());
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_cfg_scale(mut self, cfg_scale: f32) -> Self {
        self.cfg_scale = Some(cfg_scale);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// 已校验的生成请求
///
/// 只能通过 [`GenerationRequest::validate`] 构造，提交后不可变。
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    kind: RequestKind,
    prompt: String,
    reference: Option<ReferenceImage>,
    aspect_ratio: AspectRatio,
    steps: u32,
    cfg_scale: f32,
    seed: u64,
}

impl GenerationRequest {
    /// 校验草稿并补全默认值
    pub fn validate(kind: RequestKind, draft: GenerationDraft) -> Result<Self, GenerationError> {
        let prompt = draft.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        let aspect_ratio = match draft.aspect_ratio.as_deref() {
            Some(token) => token.parse()?,
            None => AspectRatio::default(),
        };

        let (default_steps, (min_steps, max_steps)) = match kind {
            RequestKind::TextToImage => (DEFAULT_TEXT_STEPS, (1, MAX_TEXT_STEPS)),
            RequestKind::Kontext => (DEFAULT_KONTEXT_STEPS, KONTEXT_STEPS_RANGE),
        };
        let steps = draft.steps.unwrap_or(default_steps);
        if steps < min_steps || steps > max_steps {
            return Err(GenerationError::StepsOutOfRange {
                value: steps,
                min: min_steps,
                max: max_steps,
            });
        }

        let cfg_scale = draft.cfg_scale.unwrap_or(match kind {
            RequestKind::TextToImage => DEFAULT_TEXT_CFG_SCALE,
            RequestKind::Kontext => DEFAULT_KONTEXT_CFG_SCALE,
        });
        if !(cfg_scale > 0.0 && cfg_scale <= MAX_CFG_SCALE) {
            return Err(GenerationError::CfgScaleOutOfRange {
                value: cfg_scale,
                max: MAX_CFG_SCALE,
            });
        }

        if kind == RequestKind::Kontext && draft.reference.is_none() {
            return Err(GenerationError::MissingReference);
        }

        Ok(Self {
            kind,
            prompt,
            reference: draft.reference,
            aspect_ratio,
            steps,
            cfg_scale,
            seed: draft.seed.unwrap_or(0),
        })
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn reference(&self) -> Option<&ReferenceImage> {
        self.reference.as_ref()
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn cfg_scale(&self) -> f32 {
        self.cfg_scale
    }

    /// 0 表示由后端随机
    pub fn seed(&self) -> u64 {
        self.seed
    }
}
