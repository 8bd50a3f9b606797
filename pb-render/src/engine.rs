use crate::error::{RenderError, Result};
use crate::types::RenderConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Input images are scaled down to this size before shapes are fitted.
const WORKING_SIZE: u32 = 256;
const STDERR_TAIL_CHARS: usize = 2_000;

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render `input` into `output` using `config`. Long running.
    async fn render(&self, input: &Path, output: &Path, config: &RenderConfig) -> Result<()>;
}

/// Runs the `primitive` command line renderer as a child process.
#[derive(Debug, Clone)]
pub struct PrimitiveCli {
    binary: PathBuf,
    workers: usize,
    timeout: Duration,
}

impl PrimitiveCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            timeout: Duration::from_secs(900),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_args(&self, input: &Path, output: &Path, config: &RenderConfig) -> Vec<String> {
        vec![
            "-i".to_string(),
            input.display().to_string(),
            "-o".to_string(),
            output.display().to_string(),
            "-n".to_string(),
            config.iterations.to_string(),
            "-m".to_string(),
            config.shape.index().to_string(),
            "-a".to_string(),
            config.alpha.to_string(),
            "-rep".to_string(),
            config.repeat.to_string(),
            "-r".to_string(),
            WORKING_SIZE.to_string(),
            "-s".to_string(),
            config.output_size.to_string(),
            "-j".to_string(),
            self.workers.to_string(),
        ]
    }
}

#[async_trait]
impl Renderer for PrimitiveCli {
    #[tracing::instrument(level = "info", skip_all, fields(input = %input.display(), output = %output.display()))]
    async fn render(&self, input: &Path, output: &Path, config: &RenderConfig) -> Result<()> {
        if config.iterations == 0 || config.repeat == 0 {
            return Err(RenderError::InvalidConfig(format!(
                "iterations={} repeat={} must both be > 0",
                config.iterations, config.repeat
            )));
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.build_args(input, output, config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| RenderError::TimedOut(self.timeout.as_secs()))?
            .map_err(|e| RenderError::Launch(format!("{}: {e}", self.binary.display())))?;

        if !result.status.success() {
            return Err(RenderError::Failed {
                status: result.status.code().unwrap_or(-1),
                stderr: stderr_tail(&result.stderr),
            });
        }

        if tokio::fs::metadata(output).await.is_err() {
            return Err(RenderError::MissingOutput(output.display().to_string()));
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect()
}
