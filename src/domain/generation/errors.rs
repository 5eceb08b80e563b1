//! Generation Context - Errors

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GenerationError {
    #[error("Prompt must not be empty")]
    EmptyPrompt,

    #[error("Invalid aspect ratio: {0}. Valid options: 1:1, 16:9, 9:16, 5:4, 4:5, 3:2, 2:3")]
    UnknownAspectRatio(String),

    #[error("Invalid backend: {0}. Valid options: NIM, INVOKEAI, COMFYUI")]
    UnknownBackend(String),

    #[error("Steps must be between {min} and {max}, got {value}")]
    StepsOutOfRange { value: u32, min: u32, max: u32 },

    #[error("cfg_scale must be greater than 0 and at most {max}, got {value}")]
    CfgScaleOutOfRange { value: f32, max: f32 },

    #[error("Reference image is required for image-to-image generation")]
    MissingReference,
}
