use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "updater.json";

/// Preferences the updater persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    #[serde(default)]
    pub install_id: String,
    #[serde(default)]
    pub auto: bool,
    #[serde(default)]
    pub auto_set: bool,
}

#[async_trait]
pub trait UpdaterConfig: Send + Sync {
    /// Returns `(auto, auto_set)`; `auto_set` is false until the user has
    /// answered a prompt.
    fn get_update_auto(&self) -> (bool, bool);

    async fn set_update_auto(&self, auto: bool) -> crate::Result<()>;

    fn get_install_id(&self) -> String;

    async fn set_install_id(&self, install_id: &str) -> crate::Result<()>;
}

/// JSON-file backed [`UpdaterConfig`].
#[derive(Debug)]
pub struct FileConfig {
    path: PathBuf,
    store: RwLock<Store>,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: RwLock::new(Store::default()),
        }
    }

    pub async fn load(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path).await?;
        let store: Store = serde_json::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded updater config from {}", path.display());
        Ok(Self {
            path,
            store: RwLock::new(store),
        })
    }

    /// Loads `path`, falling back to defaults if it is missing or unreadable.
    pub async fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path).await {
            Ok(config) => config,
            Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::new(path),
            Err(e) => {
                warn!("Ignoring unreadable updater config {}: {}", path.display(), e);
                Self::new(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> Store {
        self.store.read().clone()
    }

    async fn update(&self, f: impl FnOnce(&mut Store)) -> crate::Result<()> {
        let snapshot = {
            let mut store = self.store.write();
            f(&mut store);
            store.clone()
        };
        save(&self.path, &snapshot).await
    }
}

#[async_trait]
impl UpdaterConfig for FileConfig {
    fn get_update_auto(&self) -> (bool, bool) {
        let store = self.store.read();
        (store.auto, store.auto_set)
    }

    async fn set_update_auto(&self, auto: bool) -> crate::Result<()> {
        self.update(|store| {
            store.auto = auto;
            store.auto_set = true;
        })
        .await
    }

    fn get_install_id(&self) -> String {
        self.store.read().install_id.clone()
    }

    async fn set_install_id(&self, install_id: &str) -> crate::Result<()> {
        let install_id = install_id.to_string();
        self.update(move |store| store.install_id = install_id).await
    }
}

/// Writes `store` to a sibling temp file and renames it over `path`, so a
/// reader sees either the old or the new content.
pub async fn save(path: &Path, store: &Store) -> crate::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .ok_or_else(|| crate::Error::Config(format!("Invalid config path {}", path.display())))?;
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name.to_string_lossy(), suffix));

    let data = serde_json::to_vec_pretty(store)?;
    if let Err(e) = fs::write(&tmp, &data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    debug!("Saved updater config to {}", path.display());
    Ok(())
}

pub fn config_dir(app_name: &str) -> crate::Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(app_name))
        .ok_or_else(|| crate::Error::Config("No config directory for this user".to_string()))
}

pub fn log_dir(app_name: &str) -> crate::Result<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join(app_name))
        .ok_or_else(|| crate::Error::Config("No cache directory for this user".to_string()))
}

pub fn default_config_path(app_name: &str) -> crate::Result<PathBuf> {
    Ok(config_dir(app_name)?.join(CONFIG_FILE_NAME))
}
