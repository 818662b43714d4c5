//! Client process invocation.
//!
//! The engine talks to the client-under-test through the [`ClientInvoker`]
//! trait so that executor tests can substitute a scripted client.
//! [`ProcessClient`] is the real implementation: it spawns the executable
//! with the node's argv tail, feeds the rendered request on stdin, and drains
//! stdout/stderr concurrently until the process exits.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Result of one client invocation. Spawn and IO failures are folded into a
/// non-zero exit code with the error text in `stderr`.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    fn spawn_failure(message: String) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: message,
        }
    }
}

#[async_trait]
pub trait ClientInvoker: Send + Sync {
    async fn invoke(&self, args: &[String], stdin: &str) -> RunOutput;
}

/// Spawning is serialised process-wide: parent-side pipe setup is not atomic
/// everywhere, and concurrent spawns can otherwise race on inherited
/// descriptors. Waiting and pipe draining happen outside the lock.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

pub struct ProcessClient {
    executable: PathBuf,
}

impl ProcessClient {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    async fn try_invoke(&self, args: &[String], stdin: &str) -> std::io::Result<RunOutput> {
        let mut command = tokio::process::Command::new(&self.executable);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = {
            let _guard = SPAWN_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            command.spawn()?
        };

        let mut child_stdin = child.stdin.take().expect("stdin piped");
        let mut child_stdout = child.stdout.take().expect("stdout piped");
        let mut child_stderr = child.stderr.take().expect("stderr piped");

        let request = stdin.as_bytes().to_vec();
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let (_, out_result, err_result) = tokio::join!(
            async {
                // A client that never reads its stdin is fine; the broken
                // pipe must not fail the invocation.
                let _ = child_stdin.write_all(&request).await;
                drop(child_stdin);
            },
            child_stdout.read_to_end(&mut stdout_buf),
            child_stderr.read_to_end(&mut stderr_buf),
        );
        out_result?;
        err_result?;

        let status = child.wait().await?;
        Ok(RunOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
            stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
        })
    }
}

#[async_trait]
impl ClientInvoker for ProcessClient {
    async fn invoke(&self, args: &[String], stdin: &str) -> RunOutput {
        match self.try_invoke(args, stdin).await {
            Ok(output) => output,
            Err(err) => {
                tracing::error!(
                    executable = %self.executable.display(),
                    error = %err,
                    "client spawn failed"
                );
                RunOutput::spawn_failure(format!(
                    "failed to run '{}': {err}",
                    self.executable.display()
                ))
            }
        }
    }
}
