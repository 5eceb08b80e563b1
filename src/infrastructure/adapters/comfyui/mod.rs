//! ComfyUI Adapter

mod client;
mod event_stream;

pub use client::{ComfyUiClient, ComfyUiConfig};
pub use event_stream::{parse_event, CorrelationTable, EventSubscription, PromptOutcome};
