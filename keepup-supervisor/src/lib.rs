#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::ProcfsEnumerator;

#[cfg(unix)]
mod ps;
#[cfg(unix)]
pub use ps::{PsEnumerator, parse_ps};

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use windows::SysinfoEnumerator;

#[cfg(target_os = "linux")]
pub use linux::ProcfsEnumerator as PlatformEnumerator;
#[cfg(all(unix, not(target_os = "linux")))]
pub use ps::PsEnumerator as PlatformEnumerator;
#[cfg(target_os = "windows")]
pub use windows::SysinfoEnumerator as PlatformEnumerator;

mod common;
pub mod matcher;
pub mod terminate;
pub mod watchdog;

pub use common::*;
pub use matcher::{MatchPredicate, Matcher, find_processes, find_processes_wait};
pub use terminate::{DEFAULT_KILL_DELAY, terminate_all, terminate_pid};
pub use watchdog::Watchdog;

use keepup_core::ProcessEnumerator;
use std::sync::Arc;
use tracing::debug;

pub fn create_enumerator() -> Arc<dyn ProcessEnumerator> {
    debug!("Creating platform-specific process enumerator");
    Arc::new(PlatformEnumerator::new())
}
