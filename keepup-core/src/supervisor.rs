use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::{ExitStatus, ProcessInfo};

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    ProcessStarted { program: PathBuf, pid: u32 },
    ProcessExited { program: PathBuf, pid: u32, status: ExitStatus, uptime: Duration },
    SpawnFailed { program: PathBuf, reason: String },
    ProcessRestarting { program: PathBuf, attempt: u32, delay: Duration },
    ProgramStopped { program: PathBuf },
}

/// Lists live processes on the host.
///
/// Each call builds a fresh snapshot, so implementations can be shared between
/// tasks without coordination.
#[async_trait]
pub trait ProcessEnumerator: Send + Sync {
    async fn processes(&self) -> crate::Result<Vec<ProcessInfo>>;

    async fn process(&self, pid: u32) -> crate::Result<Option<ProcessInfo>> {
        Ok(self.processes().await?.into_iter().find(|p| p.pid == pid))
    }
}
