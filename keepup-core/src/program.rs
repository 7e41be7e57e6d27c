use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ExitStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitPolicy {
    #[default]
    #[serde(rename = "restart")]
    RestartAlways,
    #[serde(rename = "success")]
    ExitOnSuccess,
}

/// A long-lived program kept alive by the watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub exit_on: ExitPolicy,
}

impl Program {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            exit_on: ExitPolicy::RestartAlways,
        }
    }

    pub fn exit_on(mut self, policy: ExitPolicy) -> Self {
        self.exit_on = policy;
        self
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    NotStarted,
    Running { pid: u32 },
    Restarting { attempt: u32, next_start: Instant },
    Stopped,
}

impl ProgramState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Runtime view of one supervised program, shared between its supervision
/// task and observers.
#[derive(Debug)]
pub struct Supervised {
    pub program: Program,
    pub state: Arc<RwLock<ProgramState>>,
    pub pid: Arc<RwLock<Option<u32>>>,
    pub start_time: Arc<RwLock<Option<Instant>>>,
    pub restart_count: Arc<RwLock<u32>>,
    pub last_exit: Arc<RwLock<Option<ExitStatus>>>,
}

impl Supervised {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            state: Arc::new(RwLock::new(ProgramState::NotStarted)),
            pid: Arc::new(RwLock::new(None)),
            start_time: Arc::new(RwLock::new(None)),
            restart_count: Arc::new(RwLock::new(0)),
            last_exit: Arc::new(RwLock::new(None)),
        }
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.start_time.read().map(|t| t.elapsed())
    }

    pub fn set_state(&self, state: ProgramState) {
        *self.state.write() = state;
    }

    pub fn get_state(&self) -> ProgramState {
        *self.state.read()
    }

    pub fn set_pid(&self, pid: Option<u32>) {
        *self.pid.write() = pid;
        if pid.is_some() {
            *self.start_time.write() = Some(Instant::now());
        } else {
            *self.start_time.write() = None;
        }
    }

    pub fn get_pid(&self) -> Option<u32> {
        *self.pid.read()
    }

    pub fn increment_restart_count(&self) -> u32 {
        let mut count = self.restart_count.write();
        *count += 1;
        *count
    }

    pub fn get_restart_count(&self) -> u32 {
        *self.restart_count.read()
    }

    pub fn set_last_exit(&self, status: Option<ExitStatus>) {
        *self.last_exit.write() = status;
    }

    pub fn get_last_exit(&self) -> Option<ExitStatus> {
        *self.last_exit.read()
    }
}
