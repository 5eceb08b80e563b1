//! Process Runner - 外部命令执行
//!
//! 独立成 trait，测试时替换为脚本化的假实现

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// 命令执行结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// 运行命令并收集输出；程序无法启动或超时返回 io::Error
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProcessOutput>;
}

/// 基于 tokio::process 的实现
pub struct TokioProcessRunner {
    timeout: Duration,
}

impl TokioProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProcessOutput> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("{} did not finish within {:?}", program, self.timeout),
                )
            })??;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let runner = TokioProcessRunner::new(Duration::from_secs(5));
        let result = runner
            .run("fluxgate-definitely-not-a-real-binary", &[])
            .await;
        assert!(result.is_err());
    }
}
