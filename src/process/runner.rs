//! Scoped external-command execution with line-oriented stdout scanning.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::EXIT_GRACE;
use crate::error::{AgentError, Result};

/// Marker SteamCMD prints in front of fatal messages.
const ERROR_MARKER: &str = "ERROR!";

/// One external command to run to completion.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub program: &'a Path,
    pub args: &'a [String],
    pub cwd: Option<&'a Path>,
    /// Case-insensitive substring that ends the run as soon as a stdout line contains it.
    pub sentinel: Option<&'a str>,
    /// Prefix used for the child's log lines.
    pub label: &'a str,
}

/// What a finished run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code, `None` when the process was killed or could not be reaped.
    pub exit_code: Option<i32>,
    /// The first stdout line that matched the sentinel.
    pub sentinel_line: Option<String>,
    /// The last stdout line carrying an error marker.
    pub error_line: Option<String>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.error_line.is_none() && (self.sentinel_line.is_some() || self.exit_code == Some(0))
    }

    /// The sentinel line, or an empty string when the process exited without one.
    pub fn sentinel_or_empty(&self) -> &str {
        self.sentinel_line.as_deref().unwrap_or("")
    }
}

/// A child process acquired together with its three stdio handles.
///
/// Dropping the guard closes stdin, drops the stdout reader, stops the stderr
/// drain and kills the child if it is still running, so every exit path of
/// [`run_process`] releases the same set of resources.
struct ChildGuard {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ChildGuard {
    fn spawn(request: &RunRequest<'_>) -> Result<Self> {
        let mut cmd = Command::new(request.program);
        cmd.args(request.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = request.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            AgentError::process(format!("Failed to start {:?}: {}", request.program, e))
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(BufReader::new);
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_line_logger(stderr, format!("[{} stderr]", request.label)));

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr_task,
        })
    }

    /// Read the next stdout line, lossily decoded and stripped of its line ending.
    async fn next_stdout_line(&mut self) -> Result<Option<String>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        let read = stdout
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| AgentError::process(format!("Failed to read process output: {e}")))?;
        if read == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()))
    }

    /// Close every stream, then wait for the exit code, killing the child after `EXIT_GRACE`.
    async fn finish(mut self) -> Option<i32> {
        self.stdin.take();
        self.stdout.take();

        let exit_code = match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                log::warn!("Failed to wait for process exit: {e}");
                None
            }
            Err(_) => {
                log::warn!(
                    "Process did not exit within {}s of finishing, killing it",
                    EXIT_GRACE.as_secs()
                );
                if let Err(e) = self.child.kill().await {
                    log::warn!("Failed to kill lingering process: {e}");
                }
                None
            }
        };

        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        exit_code
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.stdin.take();
        self.stdout.take();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

fn spawn_line_logger<R>(stream: R, prefix: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        log::warn!("{} {}", prefix, line);
                    }
                }
            }
        }
    })
}

/// Run an external command, scanning stdout line by line.
///
/// Returns as soon as a line matches the sentinel (that line is kept and reading
/// stops), otherwise once stdout closes. Either way the child is reaped or killed
/// and its handles are closed before this returns.
pub async fn run_process(request: RunRequest<'_>) -> Result<RunOutcome> {
    let mut guard = ChildGuard::spawn(&request)?;
    let sentinel = request.sentinel.map(str::to_lowercase);
    let mut outcome = RunOutcome::default();

    while let Some(line) = guard.next_stdout_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        log::info!("[{} stdout] {}", request.label, line);

        if line.contains(ERROR_MARKER) {
            outcome.error_line = Some(line.clone());
        }
        if let Some(sentinel) = sentinel.as_deref() {
            if line.to_lowercase().contains(sentinel) {
                outcome.sentinel_line = Some(line);
                break;
            }
        }
    }

    outcome.exit_code = guard.finish().await;
    Ok(outcome)
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use super::{run_process, RunOutcome, RunRequest};

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn returns_sentinel_line_and_stops_reading() {
        let args = sh("echo 'Loading'; echo ' - install state: Fully Installed,Update Required,'; echo after");
        let outcome = run_process(RunRequest {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            sentinel: Some("Install State:"),
            label: "test",
        })
        .await
        .unwrap();

        assert_eq!(
            outcome.sentinel_line.as_deref(),
            Some(" - install state: Fully Installed,Update Required,")
        );
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn reads_to_exit_without_sentinel() {
        let args = sh("echo one; echo two; exit 0");
        let outcome = run_process(RunRequest {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            sentinel: Some("install state:"),
            label: "test",
        })
        .await
        .unwrap();

        assert_eq!(outcome.sentinel_or_empty(), "");
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn error_marker_fails_the_run() {
        let args = sh("echo \"ERROR! Failed to install app '12345' (No subscription)\"; exit 0");
        let outcome = run_process(RunRequest {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            sentinel: None,
            label: "test",
        })
        .await
        .unwrap();

        assert!(!outcome.success());
        assert!(outcome.error_line.unwrap().contains("No subscription"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let args = sh("exit 7");
        let outcome = run_process(RunRequest {
            program: Path::new("/bin/sh"),
            args: &args,
            cwd: None,
            sentinel: None,
            label: "test",
        })
        .await
        .unwrap();
        assert_eq!(
            outcome,
            RunOutcome {
                exit_code: Some(7),
                sentinel_line: None,
                error_line: None,
            }
        );
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn missing_program_is_a_process_error() {
        let err = run_process(RunRequest {
            program: Path::new("/nonexistent/steamcmd.sh"),
            args: &[],
            cwd: None,
            sentinel: None,
            label: "test",
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Process);
    }
}
