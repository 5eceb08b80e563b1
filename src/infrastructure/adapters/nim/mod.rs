//! NIM Adapter - NVIDIA NIM 推理服务

mod client;

pub use client::{NimClient, NimClientConfig, NimContainerConfig};
