//! Worker collaborator backed by an external process.
//!
//! Each dispatch spawns the configured command, writes the [`Dispatch`] as a
//! single JSON line on stdin and reads newline-delimited [`WorkerEvent`] JSON
//! from stdout. Lines that are not events are skipped, including lines that
//! are not valid UTF-8. Stderr is drained into the log. A non-zero exit
//! status surfaces as a stream error after the last event.

use async_stream::stream;
use scout_sdk::{async_trait, Dispatch, EventStream, WorkerCollaborator, WorkerError, WorkerEvent};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, warn};

/// Spawns one worker process per dispatch
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl ProcessWorker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the stream early (terminal event, event cap, timeout) kills the worker
            .kill_on_drop(true);
        cmd
    }
}

/// Parse one stdout line as a worker event
pub fn parse_event_line(line: &str) -> Option<WorkerEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<WorkerEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "skipping non-event worker output");
            None
        }
    }
}

/// Read one `\n`-terminated line, decoding invalid UTF-8 lossily.
/// `Ok(None)` at end of output.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

async fn drain_stderr(program: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    while let Ok(Some(line)) = read_line(&mut reader, &mut buf).await {
        debug!(worker = %program, "{}", line.trim_end());
    }
}

#[async_trait]
impl WorkerCollaborator for ProcessWorker {
    async fn dispatch(&self, dispatch: Dispatch) -> Result<EventStream, WorkerError> {
        let payload =
            serde_json::to_string(&dispatch).map_err(|e| WorkerError::Protocol(e.to_string()))?;

        let mut child = self.build_command().spawn().map_err(|e| {
            WorkerError::Unavailable(format!(
                "failed to spawn {}: {}",
                self.program.display(),
                e
            ))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Unavailable("worker stdin not available".to_string()))?;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| WorkerError::Failed(format!("failed to send dispatch: {}", e)))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| WorkerError::Failed(format!("failed to send dispatch: {}", e)))?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Unavailable("worker stdout not available".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(self.program.display().to_string(), stderr));
        }

        let stage = dispatch.stage.as_str();
        let events = stream! {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            let mut read_error = None;

            loop {
                match read_line(&mut reader, &mut buf).await {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_event_line(&line) {
                            yield Ok(event);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        read_error = Some(e);
                        break;
                    }
                }
            }

            if let Some(e) = read_error {
                yield Err(WorkerError::Protocol(format!("failed to read worker output: {}", e)));
            } else {
                match child.wait().await {
                    Ok(status) if status.success() => {
                        debug!(stage, "worker process finished");
                    }
                    Ok(status) => {
                        warn!(stage, %status, "worker process failed");
                        yield Err(WorkerError::Failed(format!("worker process exited with {}", status)));
                    }
                    Err(e) => {
                        yield Err(WorkerError::Failed(format!("failed to wait for worker: {}", e)));
                    }
                }
            }
        };

        Ok(Box::pin(events))
    }
}
