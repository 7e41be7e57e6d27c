use async_trait::async_trait;
use keepup_core::{ErrorKind, ProcessEnumerator, Update, UpdateError, UpdateOptions};
use keepup_supervisor::{DEFAULT_KILL_DELAY, Matcher, terminate_all};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Installs a downloaded asset over the running application.
#[async_trait]
pub trait PlatformApplier: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, update: &Update, options: &UpdateOptions) -> anyhow::Result<()>;
}

/// Picks the applier for a platform name as reported by the client.
pub fn applier_for_platform(
    platform: &str,
    enumerator: Arc<dyn ProcessEnumerator>,
) -> Arc<dyn PlatformApplier> {
    match platform {
        "darwin" | "macos" | "linux" => Arc::new(UnzipApplier::new(enumerator)),
        "windows" => Arc::new(InstallerApplier::default()),
        other => {
            debug!("No applier for platform {:?}, updates will not be installed", other);
            Arc::new(NoopApplier)
        }
    }
}

fn asset_path(update: &Update) -> anyhow::Result<&Path> {
    update
        .asset
        .as_ref()
        .and_then(|a| a.local_path())
        .ok_or_else(|| anyhow::anyhow!("No asset"))
}

fn unpack_error(err: impl Into<anyhow::Error>) -> anyhow::Error {
    UpdateError::new(ErrorKind::Unpack, err).into()
}

/// Replaces the destination directory with the contents of a zip asset.
///
/// The archive is extracted next to the destination first, then processes
/// running from the destination are terminated and the directories swapped.
pub struct UnzipApplier {
    enumerator: Arc<dyn ProcessEnumerator>,
    kill_delay: Duration,
}

impl UnzipApplier {
    pub fn new(enumerator: Arc<dyn ProcessEnumerator>) -> Self {
        Self {
            enumerator,
            kill_delay: DEFAULT_KILL_DELAY,
        }
    }

    pub fn with_kill_delay(mut self, delay: Duration) -> Self {
        self.kill_delay = delay;
        self
    }
}

#[async_trait]
impl PlatformApplier for UnzipApplier {
    fn name(&self) -> &str {
        "unzip"
    }

    async fn apply(&self, update: &Update, options: &UpdateOptions) -> anyhow::Result<()> {
        let archive = asset_path(update).map_err(unpack_error)?.to_path_buf();
        if archive.extension().is_none_or(|ext| ext != "zip") {
            return Err(unpack_error(anyhow::anyhow!(
                "File has unsupported extension: {}",
                archive.display()
            )));
        }
        let destination = options.destination_path.clone();
        let staging = sibling(&destination, "staging")?;

        info!("Unzipping {} to {}", archive.display(), staging.display());
        let extract_to = staging.clone();
        tokio::task::spawn_blocking(move || unzip_over(&archive, &extract_to))
            .await
            .map_err(unpack_error)?
            .map_err(unpack_error)?;

        let matcher = Matcher::path_prefix(&destination).except_pid(std::process::id());
        let stopped = terminate_all(self.enumerator.as_ref(), &matcher, self.kill_delay).await;
        if !stopped.is_empty() {
            info!("Terminated {} process(es) under {}", stopped.len(), destination.display());
        }

        install_staged(&staging, &destination).await?;
        info!("Installed {} to {}", update, destination.display());
        Ok(())
    }
}

/// `.<name>.<suffix>` next to `destination`.
fn sibling(destination: &Path, suffix: &str) -> anyhow::Result<PathBuf> {
    let Some(name) = destination.file_name() else {
        return Err(unpack_error(anyhow::anyhow!(
            "Invalid destination {:?}",
            destination
        )));
    };
    let mut sibling = OsString::from(".");
    sibling.push(name);
    sibling.push(".");
    sibling.push(suffix);
    Ok(destination.with_file_name(sibling))
}

/// Moves `staging` to `destination`. The current install is moved aside to
/// `.<name>.old` first and moved back if the new tree cannot be put in place.
pub async fn install_staged(staging: &Path, destination: &Path) -> anyhow::Result<()> {
    let backup = sibling(destination, "old")?;
    if fs::symlink_metadata(&backup).is_ok() {
        tokio::fs::remove_dir_all(&backup).await?;
    }

    let had_install = fs::symlink_metadata(destination).is_ok();
    if had_install {
        debug!("Moving {} to {}", destination.display(), backup.display());
        tokio::fs::rename(destination, &backup).await?;
    }

    if let Err(e) = tokio::fs::rename(staging, destination).await {
        if had_install {
            warn!("Unable to install {}: {}, restoring previous install", destination.display(), e);
            tokio::fs::rename(&backup, destination).await?;
        }
        return Err(e.into());
    }

    if had_install && let Err(e) = tokio::fs::remove_dir_all(&backup).await {
        warn!("Unable to remove previous install {}: {}", backup.display(), e);
    }
    Ok(())
}

/// Extracts `archive` into `dest`, removing anything already there.
///
/// Entries and symlinks that would resolve outside `dest` are rejected.
pub fn unzip_over(archive: &Path, dest: &Path) -> anyhow::Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;
    let root = fs::canonicalize(dest)?;

    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            anyhow::bail!("Archive entry {:?} escapes the destination", entry.name());
        };
        let target = root.join(&relative);
        ensure_within(&root, &target)?;
        let mode = entry.unix_mode();

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            set_mode(&target, mode)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        if mode.is_some_and(|m| m & 0o170000 == 0o120000) {
            let mut link = String::new();
            io::Read::read_to_string(&mut entry, &mut link)?;
            if !link_stays_within(&relative, Path::new(&link)) {
                anyhow::bail!("Symlink {:?} -> {} escapes the destination", entry.name(), link);
            }
            symlink(&link, &target)?;
            if let Ok(resolved) = fs::canonicalize(&target)
                && !resolved.starts_with(&root)
            {
                fs::remove_file(&target)?;
                anyhow::bail!("Symlink {:?} -> {} escapes the destination", entry.name(), link);
            }
            continue;
        }

        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        set_mode(&target, mode)?;
    }
    debug!("Extracted {} entries to {}", zip.len(), dest.display());
    Ok(())
}

/// Fails if the closest existing ancestor of `path` resolves outside `root`.
fn ensure_within(root: &Path, path: &Path) -> anyhow::Result<()> {
    let mut existing = path;
    while fs::symlink_metadata(existing).is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    let resolved = fs::canonicalize(existing)?;
    if !resolved.starts_with(root) {
        anyhow::bail!(
            "{} resolves to {}, outside the destination",
            path.display(),
            resolved.display()
        );
    }
    Ok(())
}

/// Whether a link stored at `entry` (relative to the archive root) pointing
/// at `link` stays inside the archive root, judged on the path alone.
fn link_stays_within(entry: &Path, link: &Path) -> bool {
    let parent = entry.parent().unwrap_or(Path::new(""));
    let mut depth = 0usize;
    for component in parent.components().chain(link.components()) {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn symlink(original: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(original: &str, link: &Path) -> io::Result<()> {
    warn!("Skipping symlink {} -> {}", link.display(), original);
    Ok(())
}

/// Runs the downloaded installer unattended.
pub struct InstallerApplier {
    args: Vec<String>,
}

impl Default for InstallerApplier {
    fn default() -> Self {
        Self {
            args: vec!["/SILENT".to_string()],
        }
    }
}

impl InstallerApplier {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }
}

#[async_trait]
impl PlatformApplier for InstallerApplier {
    fn name(&self) -> &str {
        "installer"
    }

    /// Starts the installer and returns without waiting for it. The installer
    /// replaces this process along with the application.
    async fn apply(&self, update: &Update, _options: &UpdateOptions) -> anyhow::Result<()> {
        let installer = asset_path(update)?;
        info!("Running installer {} {:?}", installer.display(), self.args);
        let child = Command::new(installer)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        match child.id() {
            Some(pid) => info!("Installer started with PID {}", pid),
            None => warn!("Installer exited before it could be tracked"),
        }
        Ok(())
    }
}

/// Leaves installation to something else, such as a package manager.
pub struct NoopApplier;

#[async_trait]
impl PlatformApplier for NoopApplier {
    fn name(&self) -> &str {
        "none"
    }

    async fn apply(&self, update: &Update, _options: &UpdateOptions) -> anyhow::Result<()> {
        info!("Not applying {}", update);
        Ok(())
    }
}
