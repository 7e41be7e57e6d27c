use async_trait::async_trait;
use keepup_core::{Error, ProcessEnumerator, ProcessInfo, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const DELETED_SUFFIX: &str = " (deleted)";

/// Reads the process table from procfs.
#[derive(Debug, Clone)]
pub struct ProcfsEnumerator {
    root: PathBuf,
}

impl Default for ProcfsEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsEnumerator {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ProcessEnumerator for ProcfsEnumerator {
    async fn processes(&self) -> Result<Vec<ProcessInfo>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan(&root))
            .await
            .map_err(|e| Error::Enumerate(e.to_string()))?
    }

    async fn process(&self, pid: u32) -> Result<Option<ProcessInfo>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || read_entry(&root, pid))
            .await
            .map_err(|e| Error::Enumerate(e.to_string()))
    }
}

fn scan(root: &Path) -> Result<Vec<ProcessInfo>> {
    let entries =
        fs::read_dir(root).map_err(|e| Error::Enumerate(format!("{}: {}", root.display(), e)))?;

    let mut processes = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if let Some(info) = read_entry(root, pid) {
            processes.push(info);
        }
    }
    Ok(processes)
}

// Processes can exit between listing and reading, so a missing entry is not
// an error.
fn read_entry(root: &Path, pid: u32) -> Option<ProcessInfo> {
    let dir = root.join(pid.to_string());
    let name = fs::read_to_string(dir.join("comm")).ok()?;
    let path = match fs::read_link(dir.join("exe")) {
        Ok(path) => Some(strip_deleted(path)),
        Err(e) => {
            debug!("No executable path for PID {}: {}", pid, e);
            None
        }
    };
    Some(ProcessInfo::new(pid, name.trim_end(), path))
}

// The kernel appends a marker once the binary was replaced on disk, which is
// exactly what happens to a running program after an update.
fn strip_deleted(path: PathBuf) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_suffix(DELETED_SUFFIX)) {
        Some(stripped) => PathBuf::from(stripped),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_proc(root: &Path, pid: u32, comm: &str, exe: Option<&str>) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("comm"), format!("{}\n", comm)).unwrap();
        if let Some(exe) = exe {
            std::os::unix::fs::symlink(exe, dir.join("exe")).unwrap();
        }
    }

    #[test]
    fn test_strip_deleted() {
        assert_eq!(
            strip_deleted(PathBuf::from("/opt/app/bin/app (deleted)")),
            PathBuf::from("/opt/app/bin/app")
        );
        assert_eq!(
            strip_deleted(PathBuf::from("/opt/app/bin/app")),
            PathBuf::from("/opt/app/bin/app")
        );
    }

    #[tokio::test]
    async fn test_scan_fake_procfs() {
        let root = TempDir::new().unwrap();
        fake_proc(root.path(), 10, "sleep", Some("/usr/bin/sleep"));
        fake_proc(root.path(), 11, "kworker/0:1", None);
        fake_proc(root.path(), 12, "app", Some("/opt/app/app (deleted)"));
        fs::create_dir_all(root.path().join("self")).unwrap();
        fs::write(root.path().join("uptime"), "1 1").unwrap();

        let enumerator = ProcfsEnumerator::with_root(root.path());
        let mut processes = enumerator.processes().await.unwrap();
        processes.sort_by_key(|p| p.pid);

        assert_eq!(processes.len(), 3);
        assert_eq!(processes[0].path.as_deref(), Some(Path::new("/usr/bin/sleep")));
        assert_eq!(processes[1].name, "kworker/0:1");
        assert_eq!(processes[1].path, None);
        assert_eq!(processes[2].path.as_deref(), Some(Path::new("/opt/app/app")));

        assert_eq!(enumerator.process(12).await.unwrap().unwrap().name, "app");
        assert!(enumerator.process(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let enumerator = ProcfsEnumerator::with_root("/nonexistent/keepup-proc");
        assert!(matches!(
            enumerator.processes().await,
            Err(Error::Enumerate(_))
        ));
    }

    #[tokio::test]
    async fn test_real_procfs_contains_self() {
        let own = std::process::id();
        let info = ProcfsEnumerator::new().process(own).await.unwrap().unwrap();
        assert_eq!(info.path, Some(std::env::current_exe().unwrap()));
    }
}
