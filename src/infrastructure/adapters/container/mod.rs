//! Container Adapter - 本地 NIM 容器生命周期

mod controller;
mod process;

pub use controller::ContainerController;
pub use process::{ProcessOutput, ProcessRunner, TokioProcessRunner};

#[cfg(test)]
pub(crate) use controller::tests::ScriptedRunner;
