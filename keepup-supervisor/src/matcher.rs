use keepup_core::{ProcessEnumerator, ProcessInfo, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const MIN_POLL_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPredicate {
    PathEqual(PathBuf),
    /// Matches whole path components: `/bin/sleep` matches `/bin/sleep` and
    /// `/bin/sleep/x` but not `/bin/sleep-other`.
    PathPrefix(PathBuf),
    Pid(u32),
}

impl MatchPredicate {
    fn uses_path(&self) -> bool {
        !matches!(self, MatchPredicate::Pid(_))
    }

    fn matches(&self, info: &ProcessInfo) -> bool {
        match self {
            MatchPredicate::PathEqual(path) => info.exe() == path,
            MatchPredicate::PathPrefix(prefix) => info.exe().starts_with(prefix),
            MatchPredicate::Pid(pid) => info.pid == *pid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    predicate: MatchPredicate,
    except_pid: Option<u32>,
}

impl Matcher {
    pub fn new(predicate: MatchPredicate) -> Self {
        Self {
            predicate,
            except_pid: None,
        }
    }

    pub fn path_equal(path: impl Into<PathBuf>) -> Self {
        Self::new(MatchPredicate::PathEqual(path.into()))
    }

    pub fn path_prefix(prefix: impl Into<PathBuf>) -> Self {
        Self::new(MatchPredicate::PathPrefix(prefix.into()))
    }

    pub fn pid(pid: u32) -> Self {
        Self::new(MatchPredicate::Pid(pid))
    }

    /// Never match `pid`, typically the caller's own process.
    pub fn except_pid(mut self, pid: u32) -> Self {
        self.except_pid = Some(pid);
        self
    }

    pub fn predicate(&self) -> &MatchPredicate {
        &self.predicate
    }

    pub fn matches(&self, info: &ProcessInfo) -> bool {
        if self.except_pid == Some(info.pid) {
            return false;
        }
        self.predicate.matches(info)
    }
}

/// Returns the live processes selected by `matcher`.
///
/// Processes whose executable path cannot be resolved are compared by their
/// executable name instead.
pub async fn find_processes(
    enumerator: &dyn ProcessEnumerator,
    matcher: &Matcher,
) -> Result<Vec<ProcessInfo>> {
    let processes = enumerator.processes().await?;

    if matcher.predicate.uses_path() {
        let unresolved: Vec<_> = processes
            .iter()
            .filter(|p| p.path.is_none())
            .map(|p| p.pid)
            .collect();
        if !unresolved.is_empty() {
            warn!(
                "Unable to get path for {} processes, matching them by executable name (PIDs {:?})",
                unresolved.len(),
                unresolved
            );
        }
    }

    let found: Vec<ProcessInfo> = processes
        .into_iter()
        .filter(|p| matcher.matches(p))
        .collect();
    debug!("Found {} processes matching {:?}", found.len(), matcher);
    Ok(found)
}

/// Like [`find_processes`], but polls every `delay` for up to `wait` until at
/// least one process matches.
pub async fn find_processes_wait(
    enumerator: &dyn ProcessEnumerator,
    matcher: &Matcher,
    wait: Duration,
    delay: Duration,
) -> Result<Vec<ProcessInfo>> {
    let deadline = Instant::now() + wait;
    let delay = delay.max(MIN_POLL_DELAY);
    loop {
        let found = find_processes(enumerator, matcher).await?;
        if !found.is_empty() || Instant::now() >= deadline {
            return Ok(found);
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn info(pid: u32, path: &str) -> ProcessInfo {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        ProcessInfo::new(pid, name, Some(PathBuf::from(path)))
    }

    #[test]
    fn test_prefix_is_component_wise() {
        let matcher = Matcher::path_prefix("/bin/sleep");
        assert!(matcher.matches(&info(1, "/bin/sleep")));
        assert!(matcher.matches(&info(2, "/bin/sleep/inner")));
        assert!(!matcher.matches(&info(3, "/bin/sleep-other")));
        assert!(!matcher.matches(&info(4, "/bin/sleeper")));
    }

    #[test]
    fn test_directory_prefix() {
        let matcher = Matcher::path_prefix("/Applications/Keybase.app/Contents/MacOS/");
        assert!(matcher.matches(&info(1, "/Applications/Keybase.app/Contents/MacOS/Keybase")));
        assert!(!matcher.matches(&info(2, "/Applications/Other.app/Contents/MacOS/Other")));
    }

    #[test]
    fn test_path_equal_and_except() {
        let matcher = Matcher::path_equal("/usr/bin/app").except_pid(7);
        assert!(matcher.matches(&info(6, "/usr/bin/app")));
        assert!(!matcher.matches(&info(7, "/usr/bin/app")));
        assert!(!matcher.matches(&info(8, "/usr/bin/app2")));
    }

    #[test]
    fn test_name_fallback() {
        let nameless = ProcessInfo::new(9, "app", None);
        assert!(Matcher::path_equal("app").matches(&nameless));
        assert!(!Matcher::path_equal("/usr/bin/app").matches(&nameless));
        assert!(Matcher::pid(9).matches(&nameless));
    }
}
