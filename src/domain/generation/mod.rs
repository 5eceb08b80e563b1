//! Generation Context - 图像生成限界上下文
//!
//! 职责:
//! - 生成请求校验与默认值
//! - 宽高比查表
//! - 后端种类与生成结果

mod errors;
mod request;
mod result;
mod value_objects;

pub use errors::GenerationError;
pub use request::{
    GenerationDraft, GenerationRequest, ReferenceImage, DEFAULT_KONTEXT_STEPS, DEFAULT_TEXT_STEPS,
    KONTEXT_STEPS_RANGE,
};
pub use result::GenerationResult;
pub use value_objects::{
    AspectRatio, BackendKind, NimModel, RequestKind, Resolution, KONTEXT_TARGET,
};
