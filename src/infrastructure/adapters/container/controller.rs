//! Container Controller - 通过 <launcher> <runtime> 管理 NIM 容器
//!
//! 实现 ContainerRuntimePort；同名容器的 start / stop 串行执行

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::process::{ProcessOutput, ProcessRunner};
use crate::application::ports::{ContainerRuntimePort, ContainerSpec, LifecycleError, StartOutcome};

/// 容器内 NIM 监听端口
const CONTAINER_PORT: u16 = 8000;

/// stop 时表示容器本就不存在的输出片段
const NOT_FOUND_MARKERS: &[&str] = &["no such container", "not found", "no container with name"];

/// Container Controller
pub struct ContainerController {
    runner: Arc<dyn ProcessRunner>,
    launcher: Vec<String>,
    runtime: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ContainerController {
    pub fn new(runner: Arc<dyn ProcessRunner>, launcher: Vec<String>, runtime: impl Into<String>) -> Self {
        Self {
            runner,
            launcher,
            runtime: runtime.into(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 拼出最终的程序与参数
    fn command(&self, runtime_args: Vec<String>) -> (String, Vec<String>) {
        match self.launcher.split_first() {
            Some((program, prefix)) => {
                let mut args = prefix.to_vec();
                args.push(self.runtime.clone());
                args.extend(runtime_args);
                (program.clone(), args)
            }
            None => (self.runtime.clone(), runtime_args),
        }
    }

    async fn exec(&self, runtime_args: Vec<String>) -> Result<ProcessOutput, LifecycleError> {
        let (program, args) = self.command(runtime_args);
        tracing::debug!(program = %program, args = ?redact(&args), "Running container command");

        self.runner.run(&program, &args).await.map_err(|e| {
            LifecycleError::Launch(format!("failed to run {} {}: {}", program, self.runtime, e))
        })
    }

    async fn is_running_unlocked(&self, name: &str) -> Result<bool, LifecycleError> {
        let output = self
            .exec(vec![
                "ps".to_string(),
                "--filter".to_string(),
                format!("name={}", name),
                "--format".to_string(),
                "{{.Names}}".to_string(),
            ])
            .await?;

        if !output.success() {
            return Err(LifecycleError::Launch(format!(
                "{} ps exited with {:?}: {}",
                self.runtime,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        Ok(output.stdout.lines().any(|line| line.trim() == name))
    }

    fn run_args(spec: &ContainerSpec) -> Vec<String> {
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            format!("--name={}", spec.name),
            "--device".to_string(),
            "nvidia.com/gpu=all".to_string(),
            "-e".to_string(),
            format!("NGC_API_KEY={}", spec.ngc_api_key),
            "-e".to_string(),
            format!("HF_TOKEN={}", spec.hf_token),
            "-p".to_string(),
            format!("{}:{}", spec.host_port, CONTAINER_PORT),
            "-v".to_string(),
            format!("{}:/opt/nim/.cache/", spec.cache_dir),
            spec.image.clone(),
        ]
    }
}

/// 日志中隐藏 `-e KEY=value` 的值
fn redact(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            let key = arg.split('=').next().unwrap_or_default();
            out.push(format!("{}=****", key));
            hide_next = false;
        } else {
            hide_next = arg == "-e";
            out.push(arg.clone());
        }
    }
    out
}

fn check_spec(spec: &ContainerSpec) -> Result<(), LifecycleError> {
    if spec.ngc_api_key.trim().is_empty() {
        return Err(LifecycleError::Configuration { field: "ngc_api_key" });
    }
    if spec.hf_token.trim().is_empty() {
        return Err(LifecycleError::Configuration { field: "hf_token" });
    }
    if spec.cache_dir.trim().is_empty() {
        return Err(LifecycleError::Configuration { field: "cache_dir" });
    }
    Ok(())
}

#[async_trait]
impl ContainerRuntimePort for ContainerController {
    async fn start(&self, spec: &ContainerSpec) -> Result<StartOutcome, LifecycleError> {
        check_spec(spec)?;

        let lock = self.lock_for(&spec.name);
        let _guard = lock.lock().await;

        if self.is_running_unlocked(&spec.name).await? {
            tracing::info!(container = %spec.name, "Container already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let output = self.exec(Self::run_args(spec)).await?;
        if !output.success() {
            return Err(LifecycleError::Launch(format!(
                "{} run exited with {:?}: {}",
                self.runtime,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        tracing::info!(
            container = %spec.name,
            image = %spec.image,
            port = spec.host_port,
            "Container started"
        );
        Ok(StartOutcome::Started)
    }

    async fn stop(&self, name: &str) -> Result<(), LifecycleError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let output = self.exec(vec!["stop".to_string(), name.to_string()]).await?;
        if output.success() {
            tracing::info!(container = %name, "Container stopped");
            return Ok(());
        }

        let combined = format!("{} {}", output.stdout, output.stderr).to_lowercase();
        if NOT_FOUND_MARKERS.iter().any(|m| combined.contains(m)) {
            tracing::info!(container = %name, "Container was not running");
            return Ok(());
        }

        Err(LifecycleError::Launch(format!(
            "{} stop exited with {:?}: {}",
            self.runtime,
            output.exit_code,
            output.stderr.trim()
        )))
    }

    async fn is_running(&self, name: &str) -> Result<bool, LifecycleError> {
        self.is_running_unlocked(name).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// 按顺序返回预设结果，并记录每次调用
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        pub(crate) calls: StdMutex<Vec<(String, Vec<String>)>>,
        responses: StdMutex<VecDeque<std::io::Result<ProcessOutput>>>,
    }

    impl ScriptedRunner {
        pub(crate) fn push(&self, exit_code: i32, stdout: &str, stderr: &str) {
            self.responses.lock().unwrap().push_back(Ok(ProcessOutput {
                exit_code: Some(exit_code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }));
        }

        pub(crate) fn push_spawn_error(&self) {
            self.responses.lock().unwrap().push_back(Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "wsl not found",
            )));
        }

        pub(crate) fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProcessOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ProcessOutput { exit_code: Some(0), ..Default::default() }))
        }
    }

    fn controller(runner: Arc<ScriptedRunner>) -> ContainerController {
        ContainerController::new(
            runner,
            vec!["wsl".into(), "-d".into(), "NVIDIA-Workbench".into()],
            "podman",
        )
    }

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "FLUX_KONTEXT".into(),
            image: "nvcr.io/nim/black-forest-labs/flux.1-kontext-dev:latest".into(),
            host_port: 8011,
            cache_dir: "/home/me/.cache/nim".into(),
            ngc_api_key: "ngc-secret".into(),
            hf_token: "hf-secret".into(),
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(0, "FLUX_KONTEXT\n", "");
        runner.push(
            125,
            "",
            "Error: no container with name or ID \"FLUX_KONTEXT\" found: no such container",
        );
        let ctl = controller(runner.clone());

        ctl.stop("FLUX_KONTEXT").await.unwrap();
        ctl.stop("FLUX_KONTEXT").await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "wsl");
        assert_eq!(
            calls[0].1,
            vec!["-d", "NVIDIA-Workbench", "podman", "stop", "FLUX_KONTEXT"]
        );
    }

    #[tokio::test]
    async fn test_stop_other_failure_is_error() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(1, "", "permission denied");
        let ctl = controller(runner);
        assert!(matches!(
            ctl.stop("nim-server").await,
            Err(LifecycleError::Launch(_))
        ));
    }

    #[tokio::test]
    async fn test_status_exact_line_match() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(0, "nim-server-old\n", "");
        runner.push(0, "other\nnim-server\n", "");
        let ctl = controller(runner);

        assert!(!ctl.is_running("nim-server").await.unwrap());
        assert!(ctl.is_running("nim-server").await.unwrap());
    }

    #[tokio::test]
    async fn test_start_builds_run_command() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(0, "", "");
        runner.push(0, "abc123\n", "");
        let ctl = controller(runner.clone());

        let outcome = ctl.start(&spec()).await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);

        let calls = runner.calls();
        let run_args = &calls[1].1;
        assert_eq!(&run_args[..5], &["-d", "NVIDIA-Workbench", "podman", "run", "-d"]);
        assert!(run_args.contains(&"--name=FLUX_KONTEXT".to_string()));
        assert!(run_args.contains(&"8011:8000".to_string()));
        assert!(run_args.contains(&"/home/me/.cache/nim:/opt/nim/.cache/".to_string()));
        assert!(run_args.contains(&"NGC_API_KEY=ngc-secret".to_string()));
        assert_eq!(
            run_args.last().unwrap(),
            "nvcr.io/nim/black-forest-labs/flux.1-kontext-dev:latest"
        );
    }

    #[tokio::test]
    async fn test_start_when_running_reports_already_running() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(0, "FLUX_KONTEXT\n", "");
        let ctl = controller(runner.clone());

        assert_eq!(ctl.start(&spec()).await.unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_start_failures() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push_spawn_error();
        let ctl = controller(runner.clone());
        assert!(matches!(ctl.start(&spec()).await, Err(LifecycleError::Launch(_))));

        runner.push(0, "", "");
        runner.push(125, "", "Error: image not known");
        assert!(matches!(ctl.start(&spec()).await, Err(LifecycleError::Launch(_))));

        let mut missing = spec();
        missing.hf_token = String::new();
        assert!(matches!(
            ctl.start(&missing).await,
            Err(LifecycleError::Configuration { field: "hf_token" })
        ));
    }

    #[test]
    fn test_empty_launcher_runs_runtime_directly() {
        let ctl = ContainerController::new(Arc::new(ScriptedRunner::default()), vec![], "docker");
        let (program, args) = ctl.command(vec!["ps".into()]);
        assert_eq!(program, "docker");
        assert_eq!(args, vec!["ps"]);
    }

    #[test]
    fn test_redact_hides_env_values() {
        let args = ContainerController::run_args(&spec());
        let redacted = redact(&args);
        assert!(redacted.contains(&"NGC_API_KEY=****".to_string()));
        assert!(!redacted.iter().any(|a| a.contains("secret")));
    }
}
