use crate::trace::TraceWriter;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Everything a finished process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or -1 when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Captured stdout joined with newlines.
    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    /// Captured stderr joined with newlines.
    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

/// Spawns a child process, drains stdout/stderr on separate tasks and waits
/// for it to exit.
///
/// There is no cancellation or timeout: the external binary enforces its own
/// limits and a run either completes or fails.
pub struct ProcessInvoker {
    trace: Arc<dyn TraceWriter>,
}

impl ProcessInvoker {
    /// Create a new `ProcessInvoker` with the given trace writer.
    pub fn new(trace: Arc<dyn TraceWriter>) -> Self {
        Self { trace }
    }

    /// Execute a process and capture its output.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// `ProcessOutput::exit_code` so they keep the captured output.
    ///
    /// # Arguments
    /// * `working_directory` - The working directory for the process (ignored when empty).
    /// * `file_name` - The executable to run.
    /// * `arguments` - Command-line arguments, passed through without shell splitting.
    /// * `environment` - Optional environment variable overrides.
    pub async fn execute(
        &self,
        working_directory: &str,
        file_name: &str,
        arguments: &[String],
        environment: Option<&HashMap<String, String>>,
    ) -> Result<ProcessOutput> {
        if file_name.is_empty() {
            anyhow::bail!("file_name must not be empty");
        }

        let joined = arguments.join(" ");
        self.trace.info("Starting process:");
        self.trace.info(&format!("  File name: '{file_name}'"));
        self.trace.info(&format!("  Arguments: '{joined}'"));
        self.trace
            .info(&format!("  Working directory: '{working_directory}'"));

        let mut cmd = Command::new(file_name);
        cmd.args(arguments);

        if !working_directory.is_empty() && Path::new(working_directory).is_dir() {
            cmd.current_dir(working_directory);
        }

        if let Some(env) = environment {
            for (key, value) in env {
                cmd.env(key, value);
            }
        }

        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());

        let start = std::time::Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start process '{file_name}'"))?;

        let pid = child.id().unwrap_or(0);
        self.trace.info(&format!(
            "Process started with process id {pid}, waiting for process exit."
        ));

        let stdout_task = spawn_line_reader(child.stdout.take());
        let stderr_task = spawn_line_reader(child.stderr.take());

        let status = child
            .wait()
            .await
            .context("Failed to wait for process")?;
        let exit_code = status.code().unwrap_or(-1);

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let elapsed = start.elapsed();
        self.trace.info(&format!(
            "Finished process {pid} with exit code {exit_code}, and elapsed time {elapsed:.2?}."
        ));

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

fn spawn_line_reader<R>(stream: Option<R>) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = Vec::new();
        if let Some(stream) = stream {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
        }
        collected
    })
}
