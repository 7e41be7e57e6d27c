use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::program::ExitPolicy;

/// An entry of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub path: Option<PathBuf>,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            pid,
            name: name.into(),
            path,
        }
    }

    /// Executable path, or the bare executable name when the path is unknown.
    pub fn exe(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(&self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    #[cfg(unix)]
    fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal as NixSignal;
        match self {
            Signal::Terminate => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Terminate => f.write_str("terminate"),
            Signal::Kill => f.write_str("kill"),
        }
    }
}

/// Sends `signal` to a process this service did not necessarily start.
pub fn send_signal(pid: u32, signal: Signal) -> crate::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        let raw = i32::try_from(pid)
            .map_err(|_| crate::Error::Signal(format!("PID {} out of range", pid)))?;
        kill(Pid::from_raw(raw), signal.to_nix())?;
        Ok(())
    }
    #[cfg(windows)]
    {
        let mut cmd = std::process::Command::new("taskkill");
        cmd.args(["/PID", &pid.to_string()]);
        if signal == Signal::Kill {
            cmd.arg("/F");
        }
        let output = cmd.output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(crate::Error::Signal(format!(
                "taskkill {} for PID {} failed: {}",
                signal,
                pid,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    pub fn from_std(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
            #[cfg(not(unix))]
            signal: None,
        }
    }

    pub fn new(code: Option<i32>, signal: Option<i32>) -> Self {
        Self { code, signal }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    pub fn should_restart(&self, policy: ExitPolicy) -> bool {
        match policy {
            ExitPolicy::RestartAlways => true,
            ExitPolicy::ExitOnSuccess => !self.success(),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_success() {
        let status = ExitStatus::new(Some(0), None);

        assert!(status.success());
        assert_eq!(status.code(), Some(0));
        assert_eq!(status.signal(), None);
        assert_eq!(status.to_string(), "exit code 0");
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_signal() {
        let status = ExitStatus::new(None, Some(9));

        assert!(!status.success());
        assert_eq!(status.code(), None);
        assert_eq!(status.to_string(), "signal 9");
    }

    #[test]
    fn test_restart_always() {
        assert!(ExitStatus::new(Some(0), None).should_restart(ExitPolicy::RestartAlways));
        assert!(ExitStatus::new(Some(1), None).should_restart(ExitPolicy::RestartAlways));
    }

    #[test]
    fn test_exit_on_success() {
        assert!(!ExitStatus::new(Some(0), None).should_restart(ExitPolicy::ExitOnSuccess));
        assert!(ExitStatus::new(Some(2), None).should_restart(ExitPolicy::ExitOnSuccess));
        assert!(ExitStatus::new(None, Some(15)).should_restart(ExitPolicy::ExitOnSuccess));
    }

    #[test]
    fn test_process_info_exe_fallback() {
        let with_path = ProcessInfo::new(1, "sleep", Some(PathBuf::from("/bin/sleep")));
        assert_eq!(with_path.exe(), Path::new("/bin/sleep"));

        let without_path = ProcessInfo::new(2, "sleep", None);
        assert_eq!(without_path.exe(), Path::new("sleep"));
    }

    #[cfg(unix)]
    #[test]
    fn test_send_signal_to_missing_process() {
        // PIDs near i32::MAX are never handed out on Linux or macOS.
        let err = send_signal(i32::MAX as u32 - 1, Signal::Terminate).unwrap_err();
        assert!(matches!(err, crate::Error::Unix(_)));
    }
}
