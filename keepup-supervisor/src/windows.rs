use async_trait::async_trait;
use keepup_core::{Error, ProcessEnumerator, ProcessInfo, Result};
use std::path::Path;
use sysinfo::{ProcessesToUpdate, System};

#[derive(Debug, Clone, Default)]
pub struct SysinfoEnumerator;

impl SysinfoEnumerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessEnumerator for SysinfoEnumerator {
    async fn processes(&self) -> Result<Vec<ProcessInfo>> {
        tokio::task::spawn_blocking(|| {
            let mut sys = System::new();
            sys.refresh_processes(ProcessesToUpdate::All, true);
            sys.processes()
                .iter()
                .map(|(pid, process)| {
                    ProcessInfo::new(
                        pid.as_u32(),
                        process.name().to_string_lossy(),
                        process.exe().map(Path::to_path_buf),
                    )
                })
                .collect()
        })
        .await
        .map_err(|e| Error::Enumerate(e.to_string()))
    }
}
