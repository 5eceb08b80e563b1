//! InvokeAI Adapter

mod client;

pub use client::{InvokeAiClient, InvokeAiConfig};
