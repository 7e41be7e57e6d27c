use async_trait::async_trait;
use chrono::TimeDelta;
use keepup_core::{Error, ProcessEnumerator, ProcessInfo, Result, exec};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lists processes with `ps ax -o pid,comm`, for Unix systems without procfs.
///
/// `comm` is the full executable path on macOS; on other systems it may only
/// be the executable name, in which case no path is reported.
#[derive(Debug, Clone, Default)]
pub struct PsEnumerator;

impl PsEnumerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessEnumerator for PsEnumerator {
    async fn processes(&self) -> Result<Vec<ProcessInfo>> {
        debug!("Listing processes with ps");
        let result = exec("ps", ["ax", "-o", "pid,comm"], TimeDelta::minutes(1))
            .await
            .map_err(|e| Error::Enumerate(format!("ps: {}", e)))?;
        Ok(parse_ps(&result.stdout_lossy()))
    }
}

/// Parses `ps ax -o pid,comm` output, e.g.
///
/// ```text
///   PID COMM
///     1 /sbin/launchd
/// 67833 /Applications/Keybase.app/Contents/MacOS/Keybase
/// ```
pub fn parse_ps(output: &str) -> Vec<ProcessInfo> {
    let mut processes = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some((pid, comm)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let comm = comm.trim();
        if pid == "PID" || comm.is_empty() {
            continue;
        }
        let pid = match pid.parse::<u32>() {
            Ok(pid) if pid > 0 => pid,
            _ => {
                warn!("Invalid pid in ps output: {:?}", line);
                continue;
            }
        };
        let (name, path) = if comm.starts_with('/') {
            let path = PathBuf::from(comm);
            let name = Path::new(comm)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| comm.to_string());
            (name, Some(path))
        } else {
            (comm.to_string(), None)
        };
        processes.push(ProcessInfo::new(pid, name, path));
    }
    processes
}
