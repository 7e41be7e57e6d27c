use keepup_core::{Error, ProcessEnumerator, Result, Signal, send_signal};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::matcher::{Matcher, find_processes};

pub const DEFAULT_KILL_DELAY: Duration = Duration::from_secs(1);

/// Sends terminate to `pid`, waits `kill_delay`, then sends kill.
///
/// The kill is sent unconditionally and its failure ignored: the process has
/// usually exited by then. A failure to deliver the terminate signal is
/// returned but the kill is still attempted.
pub async fn terminate_pid(
    enumerator: &dyn ProcessEnumerator,
    pid: u32,
    kill_delay: Duration,
) -> Result<()> {
    debug!("Searching OS for PID {}", pid);
    if find_processes(enumerator, &Matcher::pid(pid)).await?.is_empty() {
        return Err(Error::ProcessNotFound(pid));
    }

    debug!("Terminating PID {}", pid);
    let terminated = send_signal(pid, Signal::Terminate);
    if let Err(ref e) = terminated {
        warn!("Error sending terminate to PID {}: {}", pid, e);
    }

    tokio::time::sleep(kill_delay).await;
    let _ = send_signal(pid, Signal::Kill);
    terminated
}

/// Terminates every process selected by `matcher`, one after another.
///
/// Failures are logged per process; the PIDs that were attempted are returned.
pub async fn terminate_all(
    enumerator: &dyn ProcessEnumerator,
    matcher: &Matcher,
    kill_delay: Duration,
) -> Vec<u32> {
    let found = match find_processes(enumerator, matcher).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Error finding processes for {:?}: {}", matcher.predicate(), e);
            return Vec::new();
        }
    };
    if found.is_empty() {
        debug!("No processes found for {:?}", matcher.predicate());
        return Vec::new();
    }

    let mut attempted = Vec::with_capacity(found.len());
    for process in found {
        info!("Terminating {} (PID {})", process.exe().display(), process.pid);
        if let Err(e) = terminate_pid(enumerator, process.pid, kill_delay).await {
            warn!("Error terminating PID {}: {}", process.pid, e);
        }
        attempted.push(process.pid);
    }
    attempted
}
