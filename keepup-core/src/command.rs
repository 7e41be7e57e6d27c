use chrono::TimeDelta;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
#[cfg(not(unix))]
use tokio::process::Child;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Error, ExitStatus, Result};

/// Upper bound on how long a timed-out command gets to exit after the
/// terminate signal before it is killed.
pub const MAX_TERMINATE_WAIT: Duration = Duration::from_secs(1);

const OUTPUT_DRAIN_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub pid: Option<u32>,
    pub status: Option<ExitStatus>,
}

impl CommandResult {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn combined_output(&self) -> String {
        format!(
            "[stdout]: {}\n[stderr]: {}",
            self.stdout_lossy().trim_end(),
            self.stderr_lossy().trim_end()
        )
    }
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

fn capture<R>(reader: Option<R>, buf: SharedBuf) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = reader?;
    Some(tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buf.lock().extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!("Output reader stopped: {}", e);
                    break;
                }
            }
        }
    }))
}

// Descendants that inherited the pipes can keep them open after the command
// itself is gone, so readers only get a bounded window to hit EOF.
async fn drain(readers: [Option<JoinHandle<()>>; 2], wait: Duration) {
    for mut handle in readers.into_iter().flatten() {
        if tokio::time::timeout(wait, &mut handle).await.is_err() {
            handle.abort();
        }
    }
}

fn snapshot(stdout: &SharedBuf, stderr: &SharedBuf, pid: Option<u32>, status: Option<ExitStatus>) -> CommandResult {
    CommandResult {
        stdout: stdout.lock().clone(),
        stderr: stderr.lock().clone(),
        pid,
        status,
    }
}

#[cfg(unix)]
fn request_terminate(pid: u32) {
    if let Err(e) = crate::process::send_signal(pid, crate::Signal::Terminate) {
        warn!("Unable to send terminate to PID {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child, pid: u32) {
    if let Err(e) = child.start_kill() {
        warn!("Unable to stop PID {}: {}", pid, e);
    }
}

/// Runs `path` with `args`, capturing its output, and stops it once `timeout`
/// has elapsed.
///
/// A command that outlives its timeout receives a terminate signal, gets
/// `min(timeout, 1s)` to exit and is then killed. Either way the call returns
/// [`Error::TimedOut`] carrying the output captured so far.
pub async fn exec<I, S>(path: impl AsRef<Path>, args: I, timeout: TimeDelta) -> Result<CommandResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(Error::NoCommand);
    }
    let timeout = timeout
        .to_std()
        .map_err(|_| Error::InvalidTimeout(format!("{}", timeout)))?;

    let command = path.display().to_string();
    let mut cmd = Command::new(path);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::SpawnFailed(format!("{}: {}", command, e)))?;
    let pid = child.id();
    debug!("Running {} (PID {:?}) with timeout {:?}", command, pid, timeout);

    let stdout: SharedBuf = Arc::default();
    let stderr: SharedBuf = Arc::default();
    let readers = [
        capture(child.stdout.take(), stdout.clone()),
        capture(child.stderr.take(), stderr.clone()),
    ];

    let exited = tokio::select! {
        status = child.wait() => Some(status?),
        _ = tokio::time::sleep(timeout) => None,
    };

    if let Some(status) = exited {
        let status = ExitStatus::from_std(status);
        drain(readers, OUTPUT_DRAIN_WAIT).await;
        let result = snapshot(&stdout, &stderr, pid, Some(status));
        if status.success() {
            return Ok(result);
        }
        return Err(Error::CommandFailed {
            command,
            status,
            result: Box::new(result),
        });
    }

    let Some(running_pid) = child.id() else {
        return Err(Error::NoProcess);
    };
    debug!("{} (PID {}) timed out after {:?}, terminating", command, running_pid, timeout);
    #[cfg(unix)]
    request_terminate(running_pid);
    #[cfg(not(unix))]
    request_terminate(&mut child, running_pid);

    let grace = timeout.min(MAX_TERMINATE_WAIT);
    let status = match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(ExitStatus::from_std(status)),
        _ => {
            warn!("{} (PID {}) still running after {:?}, killing", command, running_pid, grace);
            if let Err(e) = child.kill().await {
                warn!("Unable to kill PID {}: {}", running_pid, e);
            }
            None
        }
    };

    drain(readers, Duration::from_millis(100)).await;
    Err(Error::TimedOut {
        command,
        timeout,
        result: Box::new(snapshot(&stdout, &stderr, pid, status)),
    })
}

/// Runs a command and decodes its stdout as JSON.
pub async fn exec_for_json<T, I, S>(path: impl AsRef<Path>, args: I, timeout: TimeDelta) -> Result<T>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let path = path.as_ref().to_path_buf();
    let result = exec(&path, args, timeout).await?;
    serde_json::from_slice(&result.stdout).map_err(|e| {
        warn!("Invalid JSON from {}: {}", path.display(), result.combined_output());
        Error::Json(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let result = CommandResult {
            stdout: b"hello\n".to_vec(),
            stderr: b"oops\n".to_vec(),
            pid: Some(1),
            status: None,
        };
        assert_eq!(result.combined_output(), "[stdout]: hello\n[stderr]: oops");
    }

    #[tokio::test]
    async fn test_empty_path_is_no_command() {
        let err = exec("", Vec::<String>::new(), TimeDelta::seconds(1)).await.unwrap_err();
        assert!(matches!(err, Error::NoCommand));
    }

    #[tokio::test]
    async fn test_negative_timeout_is_rejected() {
        let err = exec("echo", ["hi"], TimeDelta::milliseconds(-1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTimeout(_)));
    }
}
