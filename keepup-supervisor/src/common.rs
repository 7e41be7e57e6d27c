use keepup_core::Supervised;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Supervised programs, keyed by executable path.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    programs: Arc<RwLock<HashMap<PathBuf, Arc<Supervised>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, supervised: Arc<Supervised>) {
        let path = supervised.program.path.clone();
        self.programs.write().insert(path, supervised);
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Supervised>> {
        self.programs.read().get(path).cloned()
    }

    /// Every registered program, ordered by path.
    pub fn list(&self) -> Vec<Arc<Supervised>> {
        let mut programs: Vec<_> = self.programs.read().values().cloned().collect();
        programs.sort_by(|a, b| a.program.path.cmp(&b.program.path));
        programs
    }
}
