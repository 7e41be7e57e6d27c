use keepup_core::{
    ExitStatus, ProcessEnumerator, Program, ProgramState, Result, Signal, Supervised,
    SupervisorEvent, send_signal,
};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::ProcessRegistry;
use crate::matcher::{Matcher, find_processes};
use crate::terminate::{DEFAULT_KILL_DELAY, terminate_all, terminate_pid};

/// Keeps a fixed set of programs running.
///
/// Instances of the programs left over from a previous watchdog are
/// terminated before anything is started. Two watchdogs starting at the same
/// moment can still kill each other's fresh instances; nothing coordinates
/// them.
pub struct Watchdog {
    programs: Vec<Program>,
    restart_delay: Duration,
    kill_delay: Duration,
    exclusive: bool,
    enumerator: Arc<dyn ProcessEnumerator>,
    registry: ProcessRegistry,
    event_tx: mpsc::Sender<SupervisorEvent>,
    event_rx: parking_lot::Mutex<Option<mpsc::Receiver<SupervisorEvent>>>,
}

impl Watchdog {
    pub fn new(
        programs: Vec<Program>,
        restart_delay: Duration,
        enumerator: Arc<dyn ProcessEnumerator>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);
        Self {
            programs,
            restart_delay,
            kill_delay: DEFAULT_KILL_DELAY,
            exclusive: false,
            enumerator,
            registry: ProcessRegistry::new(),
            event_tx,
            event_rx: parking_lot::Mutex::new(Some(event_rx)),
        }
    }

    pub fn with_kill_delay(mut self, kill_delay: Duration) -> Self {
        self.kill_delay = kill_delay;
        self
    }

    /// Also terminate other processes running this executable, i.e. other
    /// watchdogs.
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Supervision events. The receiver can only be taken once; later calls get
    /// a closed channel.
    pub fn events(&self) -> mpsc::Receiver<SupervisorEvent> {
        self.event_rx.lock().take().unwrap_or_else(|| {
            let (_, rx) = mpsc::channel(1);
            rx
        })
    }

    /// Runs the pre-flight termination, then spawns one supervision task per
    /// program. Tasks run until `shutdown` is cancelled or their program stops
    /// under its exit policy.
    pub async fn watch(&self, shutdown: CancellationToken) -> Result<Vec<JoinHandle<()>>> {
        let own_pid = std::process::id();
        info!("Watchdog running as PID {}", own_pid);

        if self.exclusive {
            self.terminate_watchdogs(own_pid).await?;
        }
        self.terminate_existing(own_pid).await;

        let mut handles = Vec::with_capacity(self.programs.len());
        for program in &self.programs {
            let supervised = Arc::new(Supervised::new(program.clone()));
            self.registry.register(supervised.clone());
            let task = SupervisionTask {
                supervised,
                restart_delay: self.restart_delay,
                kill_delay: self.kill_delay,
                events: self.event_tx.clone(),
                shutdown: shutdown.clone(),
            };
            handles.push(tokio::spawn(task.run()));
        }
        Ok(handles)
    }

    async fn terminate_watchdogs(&self, own_pid: u32) -> Result<()> {
        let exe = std::env::current_exe()?;
        let matcher = Matcher::path_equal(&exe).except_pid(own_pid);
        for process in find_processes(self.enumerator.as_ref(), &matcher).await? {
            warn!("Another watchdog is running as PID {}, terminating", process.pid);
            if let Err(e) = terminate_pid(self.enumerator.as_ref(), process.pid, self.kill_delay).await {
                warn!("Error terminating watchdog PID {}: {}", process.pid, e);
            }
        }
        Ok(())
    }

    async fn terminate_existing(&self, own_pid: u32) {
        info!("Terminating existing instances of {} programs", self.programs.len());
        for program in &self.programs {
            let matcher = Matcher::path_equal(&program.path).except_pid(own_pid);
            let pids = terminate_all(self.enumerator.as_ref(), &matcher, self.kill_delay).await;
            if !pids.is_empty() {
                info!("Terminated existing {} (PIDs {:?})", program, pids);
            }
        }
    }
}

struct SupervisionTask {
    supervised: Arc<Supervised>,
    restart_delay: Duration,
    kill_delay: Duration,
    events: mpsc::Sender<SupervisorEvent>,
    shutdown: CancellationToken,
}

impl SupervisionTask {
    fn emit(&self, event: SupervisorEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Dropping supervisor event: {}", e);
        }
    }

    async fn run(self) {
        let program = self.supervised.program.clone();

        while !self.shutdown.is_cancelled() {
            let start = Instant::now();
            let status = match spawn(&program) {
                Ok(child) => match self.wait(child).await {
                    Some(status) => status,
                    None => break,
                },
                Err(e) => {
                    error!("Error running program {}: {}", program, e);
                    self.emit(SupervisorEvent::SpawnFailed {
                        program: program.path.clone(),
                        reason: e.to_string(),
                    });
                    None
                }
            };

            if let Some(status) = status
                && !status.should_restart(program.exit_on)
            {
                info!("Program {} finished with {}, not restarting", program, status);
                break;
            }

            let attempt = self.supervised.increment_restart_count();
            let delay = self.restart_delay.saturating_sub(start.elapsed());
            self.supervised.set_state(ProgramState::Restarting {
                attempt,
                next_start: std::time::Instant::now() + delay,
            });
            self.emit(SupervisorEvent::ProcessRestarting {
                program: program.path.clone(),
                attempt,
                delay,
            });

            if !delay.is_zero() {
                info!("Waiting {:?} before starting {} again", delay, program);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.shutdown.cancelled() => break,
                }
            }
        }

        self.supervised.set_pid(None);
        self.supervised.set_state(ProgramState::Stopped);
        self.emit(SupervisorEvent::ProgramStopped {
            program: program.path.clone(),
        });
    }

    /// Waits for the child to exit. Returns `None` when shutdown interrupted
    /// the wait, `Some(None)` when the exit status could not be read.
    async fn wait(&self, mut child: Child) -> Option<Option<ExitStatus>> {
        let program = &self.supervised.program;
        let pid = child.id().unwrap_or_default();
        info!("Started {} with PID {}", program, pid);
        self.supervised.set_pid(Some(pid));
        self.supervised.set_state(ProgramState::Running { pid });
        self.emit(SupervisorEvent::ProcessStarted {
            program: program.path.clone(),
            pid,
        });

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = self.shutdown.cancelled() => None,
        };
        let uptime = self.supervised.uptime().unwrap_or_default();

        let Some(exited) = exited else {
            info!("Stopping {} (PID {})", program, pid);
            stop_child(&mut child, pid, self.kill_delay).await;
            return None;
        };

        self.supervised.set_pid(None);
        match exited {
            Ok(status) => {
                let status = ExitStatus::from_std(status);
                if status.success() {
                    info!("Program {} (PID {}) finished", program, pid);
                } else {
                    error!("Program {} (PID {}) exited with {}", program, pid, status);
                }
                self.supervised.set_last_exit(Some(status));
                self.emit(SupervisorEvent::ProcessExited {
                    program: program.path.clone(),
                    pid,
                    status,
                    uptime,
                });
                Some(Some(status))
            }
            Err(e) => {
                error!("Error waiting for {} (PID {}): {}", program, pid, e);
                Some(None)
            }
        }
    }
}

fn spawn(program: &Program) -> std::io::Result<Child> {
    debug!("Spawning {} {:?}", program, program.args);
    Command::new(&program.path)
        .args(&program.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

async fn stop_child(child: &mut Child, pid: u32, kill_delay: Duration) {
    if let Err(e) = send_signal(pid, Signal::Terminate) {
        warn!("Error sending terminate to PID {}: {}", pid, e);
    }
    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(kill_delay) => {
            if let Err(e) = child.kill().await {
                warn!("Error killing PID {}: {}", pid, e);
            }
        }
    }
}
