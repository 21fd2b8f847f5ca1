//! External process execution

use crate::command::{CommandPipeline, ExternalCommand};
use async_trait::async_trait;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// A pipeline stage that could not be started or exited unsuccessfully
#[derive(Debug, Clone)]
pub struct ProcessFailure {
    /// Exit code; `None` when the process never ran or was killed by a signal
    pub status: Option<i32>,
    /// Captured stdout lines, or stderr lines when stdout was empty
    pub output: Vec<String>,
    pub command: String,
}

impl ProcessFailure {
    fn spawn(command: &ExternalCommand, error: std::io::Error) -> Self {
        Self {
            status: None,
            output: vec![format!("failed to start {}: {}", command.program, error)],
            command: command.to_string(),
        }
    }

    fn exited(command: &ExternalCommand, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        let mut output = lines(stdout);
        if output.is_empty() {
            output = lines(stderr);
        }
        Self {
            status: status.code(),
            output,
            command: command.to_string(),
        }
    }

    fn summary(&self) -> String {
        if !self.output.is_empty() {
            return self.output.join("; ");
        }
        match self.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated without exit status".to_string(),
        }
    }
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` failed: {}", self.command, self.summary())
    }
}

impl std::error::Error for ProcessFailure {}

fn lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Runs command pipelines
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run every stage, piping stdout into the next stage's stdin. Returns
    /// the stdout lines of the last stage when every stage exits with 0.
    async fn run(&self, pipeline: &CommandPipeline) -> Result<Vec<String>, ProcessFailure>;
}

/// `ProcessRunner` backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

fn drain<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buffer).await {
                tracing::debug!(error = %e, "Failed to read process output");
            }
        }
        buffer
    })
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    #[tracing::instrument(skip(self, pipeline), fields(command = %pipeline))]
    async fn run(&self, pipeline: &CommandPipeline) -> Result<Vec<String>, ProcessFailure> {
        let start = std::time::Instant::now();
        let last = pipeline.stages.len().saturating_sub(1);

        let mut children: Vec<Child> = Vec::with_capacity(pipeline.stages.len());
        let mut upstream: Option<Stdio> = None;

        for (index, stage) in pipeline.stages.iter().enumerate() {
            let mut command = Command::new(&stage.program);
            command
                .args(&stage.args)
                .stdin(upstream.take().unwrap_or_else(Stdio::null))
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = command
                .spawn()
                .map_err(|e| ProcessFailure::spawn(stage, e))?;

            if index < last {
                let stdout = child.stdout.take().ok_or_else(|| ProcessFailure {
                    status: None,
                    output: vec!["stdout was not captured".to_string()],
                    command: stage.to_string(),
                })?;
                let stdin: Stdio = stdout
                    .try_into()
                    .map_err(|e| ProcessFailure::spawn(stage, e))?;
                upstream = Some(stdin);
            }
            children.push(child);
        }

        // Read every stream concurrently so no stage blocks on a full pipe.
        let stderr_readers: Vec<JoinHandle<Vec<u8>>> = children
            .iter_mut()
            .map(|child| drain(child.stderr.take()))
            .collect();
        let stdout_reader = drain(children.last_mut().and_then(|child| child.stdout.take()));

        let mut statuses = Vec::with_capacity(children.len());
        for (child, stage) in children.iter_mut().zip(&pipeline.stages) {
            let status = child.wait().await.map_err(|e| ProcessFailure::spawn(stage, e))?;
            statuses.push(status);
        }

        let stdout = stdout_reader.await.unwrap_or_default();
        let mut stderrs = Vec::with_capacity(stderr_readers.len());
        for reader in stderr_readers {
            stderrs.push(reader.await.unwrap_or_default());
        }

        // A stage killed by a signal (SIGPIPE after its consumer exited) is
        // reported only when no failing stage exited with a code.
        let failed = || statuses.iter().enumerate().filter(|(_, s)| !s.success());
        let culprit = failed()
            .find(|(_, s)| s.code().is_some())
            .or_else(|| failed().next());

        if let Some((index, status)) = culprit {
            let stage = &pipeline.stages[index];
            let stage_stdout: &[u8] = if index == last { &stdout } else { &[] };
            let failure = ProcessFailure::exited(stage, *status, stage_stdout, &stderrs[index]);
            tracing::warn!(
                command = %failure.command,
                status = ?failure.status,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "External command failed"
            );
            return Err(failure);
        }

        tracing::debug!(
            stages = pipeline.stages.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "External command completed"
        );

        Ok(lines(&stdout))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ExternalCommand {
        ExternalCommand::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_run_returns_stdout_lines() {
        let runner = TokioProcessRunner::new();
        let lines = runner
            .run(&CommandPipeline::single(sh("printf '1 2 3 4\\n\\n5 6 7 8\\n'")))
            .await
            .unwrap();
        assert_eq!(lines, vec!["1 2 3 4", "5 6 7 8"]);
    }

    #[tokio::test]
    async fn test_stages_are_piped() {
        let runner = TokioProcessRunner::new();
        let pipeline = CommandPipeline {
            stages: vec![sh("echo hello"), sh("tr a-z A-Z")],
        };
        let lines = runner.run(&pipeline).await.unwrap();
        assert_eq!(lines, vec!["HELLO"]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_prefers_stdout() {
        let runner = TokioProcessRunner::new();
        let failure = runner
            .run(&CommandPipeline::single(sh("echo partial; echo broken >&2; exit 3")))
            .await
            .unwrap_err();
        assert_eq!(failure.status, Some(3));
        assert_eq!(failure.output, vec!["partial"]);
        assert!(failure.command.starts_with("sh -c"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_falls_back_to_stderr_then_status() {
        let runner = TokioProcessRunner::new();
        let failure = runner
            .run(&CommandPipeline::single(sh("echo broken >&2; exit 2")))
            .await
            .unwrap_err();
        assert_eq!(failure.output, vec!["broken"]);

        let failure = runner
            .run(&CommandPipeline::single(sh("exit 4")))
            .await
            .unwrap_err();
        assert!(failure.output.is_empty());
        assert!(failure.to_string().contains("exit status 4"));
    }

    #[tokio::test]
    async fn test_failing_first_stage_is_reported() {
        let runner = TokioProcessRunner::new();
        let pipeline = CommandPipeline {
            stages: vec![sh("echo upstream >&2; exit 1"), sh("cat")],
        };
        let failure = runner.run(&pipeline).await.unwrap_err();
        assert_eq!(failure.status, Some(1));
        assert_eq!(failure.output, vec!["upstream"]);
        assert!(failure.command.contains("exit 1"));
    }

    #[tokio::test]
    async fn test_exit_code_wins_over_upstream_signal() {
        let runner = TokioProcessRunner::new();
        // `yes` dies of SIGPIPE once the encoder stage has exited.
        let pipeline = CommandPipeline {
            stages: vec![
                ExternalCommand::new("yes"),
                sh("echo 'cjpeg: not a targa file' >&2; exit 2"),
            ],
        };
        let failure = runner.run(&pipeline).await.unwrap_err();
        assert_eq!(failure.status, Some(2));
        assert_eq!(failure.output, vec!["cjpeg: not a targa file"]);
        assert!(failure.command.starts_with("sh -c"));
    }

    #[tokio::test]
    async fn test_missing_binary_has_no_status() {
        let runner = TokioProcessRunner::new();
        let failure = runner
            .run(&CommandPipeline::single(ExternalCommand::new(
                "/nonexistent/refract-test-binary",
            )))
            .await
            .unwrap_err();
        assert_eq!(failure.status, None);
        assert!(failure.output[0].contains("failed to start"));
    }
}
