//! Shell command runner with timeout, output cap, and optional line streaming.
//!
//! The timeout covers the whole run: the shell exiting and both pipes closing.
//! On Unix each command leads its own process group, and a timed-out run kills
//! that group, so children backgrounded with `&` go down with it.

use actiongate_core::config::ExecutionConfig;
use actiongate_core::error::ShellError;
use actiongate_core::ports::ShellPort;
use actiongate_core::types::CommandOutput;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Pipe read size. Also the longest progress line sent in one piece.
const CHUNK_SIZE: usize = 8 * 1024;

/// One line of live command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLine {
    pub text: String,
    pub is_stderr: bool,
}

/// [`ShellPort`] that runs commands through `sh -c` (`cmd /C` on Windows).
#[derive(Clone)]
pub struct ShellRunner {
    timeout: Duration,
    max_output_bytes: usize,
    progress_tx: Option<mpsc::UnboundedSender<ShellLine>>,
}

impl ShellRunner {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
            progress_tx: None,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            Duration::from_secs(config.command_timeout_secs),
            config.max_output_bytes,
        )
    }

    /// Stream stdout/stderr lines into `tx` while commands run.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ShellLine>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn command(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd.process_group(0);
            cmd
        }
    }

    fn spawn_reader<R>(&self, pipe: Option<R>, is_stderr: bool) -> JoinHandle<CappedOutput>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.progress_tx.clone();
        let mut output = CappedOutput::new(self.max_output_bytes);
        tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return output;
            };
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let mut lines = LineSplitter::default();
            loop {
                let n = match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                output.push(&chunk[..n]);
                if let Some(tx) = &tx {
                    lines.feed(&chunk[..n], |text| {
                        let _ = tx.send(ShellLine { text, is_stderr });
                    });
                }
            }
            if let Some(tx) = &tx
                && let Some(text) = lines.finish()
            {
                let _ = tx.send(ShellLine { text, is_stderr });
            }
            output
        })
    }
}

/// Kill every process in the group led by `pgid`.
fn kill_process_group(pgid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pgid) = pgid.and_then(|p| i32::try_from(p).ok()) {
            // SAFETY: a negative pid signals the whole group; no memory is touched.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
    }
}

#[async_trait]
impl ShellPort for ShellRunner {
    async fn run_command(
        &self,
        command: &str,
        working_dir: &Path,
    ) -> Result<CommandOutput, ShellError> {
        debug!(command = %command, cwd = %working_dir.display(), "Executing shell command");

        let mut child = Self::command(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ShellError::Spawn {
                command: command.to_string(),
                message: e.to_string(),
            })?;
        // Taken now: the id is gone once the shell is reaped, the group is not.
        let pgid = child.id();

        let mut stdout_task = self.spawn_reader(child.stdout.take(), false);
        let mut stderr_task = self.spawn_reader(child.stderr.take(), true);

        let finished = tokio::time::timeout(self.timeout, async {
            let status = child.wait().await?;
            let stdout = (&mut stdout_task).await;
            let stderr = (&mut stderr_task).await;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(ShellError::Output {
                    command: command.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    command = %command,
                    timeout_secs = self.timeout.as_secs(),
                    "Command timed out"
                );
                kill_process_group(pgid);
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ShellError::Timeout {
                    command: command.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let collect = |joined: Result<CappedOutput, tokio::task::JoinError>| {
            joined.map(CappedOutput::finish).map_err(|e| ShellError::Output {
                command: command.to_string(),
                message: e.to_string(),
            })
        };
        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;

        let exit_code = status.code().unwrap_or(-1);
        if !status.success() {
            warn!(command = %command, exit_code, "Command exited with non-zero status");
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            success: status.success(),
        })
    }
}

/// Byte accumulator that keeps at most `limit` bytes and only counts the rest.
struct CappedOutput {
    bytes: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl CappedOutput {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        let (kept, rest) = chunk.split_at(room.min(chunk.len()));
        self.bytes.extend_from_slice(kept);
        self.dropped += rest.len();
    }

    fn finish(self) -> String {
        let text = String::from_utf8_lossy(&self.bytes).replace("\r\n", "\n");
        let mut text = text.trim_end_matches(['\n', '\r']).to_string();
        if self.dropped > 0 {
            text.push_str(&format!(
                "\n... [output truncated: {} more bytes]",
                self.dropped
            ));
        }
        text
    }
}

/// Splits a byte stream into progress lines no longer than [`CHUNK_SIZE`].
#[derive(Default)]
struct LineSplitter {
    line: Vec<u8>,
}

impl LineSplitter {
    fn feed(&mut self, bytes: &[u8], mut emit: impl FnMut(String)) {
        for &byte in bytes {
            if byte == b'\n' {
                emit(self.take());
                continue;
            }
            if self.line.len() == CHUNK_SIZE {
                emit(self.take());
            }
            self.line.push(byte);
        }
    }

    fn finish(mut self) -> Option<String> {
        (!self.line.is_empty()).then(|| self.take())
    }

    fn take(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.line)
            .trim_end_matches('\r')
            .to_string();
        self.line.clear();
        text
    }
}
