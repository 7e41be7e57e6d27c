use async_trait::async_trait;
use keepup_core::{
    ErrorKind, Update, UpdateAction, UpdateError, UpdateOptions, UpdatePromptOptions,
    UpdatePromptResponse, UpdaterConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::apply::PlatformApplier;
use crate::download::{
    DEFAULT_DOWNLOAD_TIMEOUT, DownloadOptions, DownloadOutcome, Downloader, download_path,
};
use crate::sources::UpdateSource;

pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

/// Asks the user what to do about an update.
#[async_trait]
pub trait UpdateUi: Send + Sync {
    async fn update_prompt(
        &self,
        update: &Update,
        options: &UpdateOptions,
        prompt_options: UpdatePromptOptions,
    ) -> anyhow::Result<UpdatePromptResponse>;
}

/// Environment an update run executes in.
///
/// Reporting hooks are fire-and-forget: they log their own failures and
/// never change the outcome of a run.
#[async_trait]
pub trait Context: Send + Sync {
    async fn update_options(&self) -> UpdateOptions;

    fn update_ui(&self) -> &dyn UpdateUi;

    async fn verify(&self, update: &Update) -> anyhow::Result<()>;

    async fn before_apply(&self, update: &Update) -> anyhow::Result<()>;

    async fn after_apply(&self, update: &Update) -> anyhow::Result<()>;

    async fn restart(&self) -> anyhow::Result<()>;

    async fn report_error(&self, err: &UpdateError, update: Option<&Update>, options: &UpdateOptions);

    async fn report_action(&self, action: UpdateAction, update: &Update, options: &UpdateOptions);

    async fn report_success(&self, update: &Update, options: &UpdateOptions);
}

/// Runs the check, prompt, download, verify, apply and restart sequence.
pub struct Updater {
    source: Arc<dyn UpdateSource>,
    config: Arc<dyn UpdaterConfig>,
    applier: Arc<dyn PlatformApplier>,
    downloader: Downloader,
    download_dir: PathBuf,
    lock: Mutex<()>,
}

impl Updater {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        config: Arc<dyn UpdaterConfig>,
        applier: Arc<dyn PlatformApplier>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            source,
            config,
            applier,
            downloader: Downloader::new(DEFAULT_DOWNLOAD_TIMEOUT)?,
            download_dir: std::env::temp_dir().join("keepup-updates"),
            lock: Mutex::new(()),
        })
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn source(&self) -> &dyn UpdateSource {
        self.source.as_ref()
    }

    /// Performs one update run. Concurrent calls wait for each other.
    ///
    /// Returns the update that was found, or `None` if there was nothing to
    /// do. Every run that gets past the check is reported exactly once unless
    /// the user cancelled it.
    pub async fn update(&self, ctx: &dyn Context) -> UpdateResult<Option<Update>> {
        let _guard = self.lock.lock().await;
        let mut options = ctx.update_options().await;
        let mut found = None;

        let result = self.run(ctx, &mut options, &mut found).await;
        match &result {
            Ok(Some(update)) => ctx.report_success(update, &options).await,
            Ok(None) => {}
            Err(err) if err.is_cancel() => info!("Update cancelled: {}", err.message()),
            Err(err) => ctx.report_error(err, found.as_ref(), &options).await,
        }
        result
    }

    async fn run(
        &self,
        ctx: &dyn Context,
        options: &mut UpdateOptions,
        found: &mut Option<Update>,
    ) -> UpdateResult<Option<Update>> {
        info!(
            "Checking for update ({}), current version is {}",
            self.source.description(),
            options.version
        );
        let update = self
            .source
            .find_update(options)
            .await
            .map_err(|e| UpdateError::new(ErrorKind::Find, e))?;
        let Some(update) = update else {
            info!("No update available");
            return Ok(None);
        };
        info!("Got update {}", update);
        let update = found.insert(update);

        self.save_install_id(update, options).await;

        let action = self.prompt(ctx, update, options).await?;
        ctx.report_action(action, update, options).await;
        match action {
            UpdateAction::Apply | UpdateAction::Auto => {}
            UpdateAction::Snooze => {
                return Err(UpdateError::cancel(ErrorKind::Prompt, anyhow::anyhow!("Snoozed update")));
            }
            UpdateAction::Cancel => {
                return Err(UpdateError::cancel(ErrorKind::Prompt, anyhow::anyhow!("Canceled update")));
            }
            UpdateAction::Error | UpdateAction::Unknown => {
                return Err(UpdateError::new(
                    ErrorKind::Prompt,
                    anyhow::anyhow!("Unknown prompt action: {}", action),
                ));
            }
        }

        if update.is_metadata_only() {
            info!("Update {} has no asset to install", update);
            return Ok(Some(update.clone()));
        }

        self.download(update).await?;
        self.verify(ctx, update, options).await?;
        self.apply(ctx, update, options).await?;

        info!("Restarting");
        ctx.restart()
            .await
            .map_err(|e| UpdateError::new(ErrorKind::Restart, e))?;
        Ok(Some(update.clone()))
    }

    async fn save_install_id(&self, update: &Update, options: &mut UpdateOptions) {
        if update.install_id.is_empty() || update.install_id == self.config.get_install_id() {
            return;
        }
        info!("Saving install id: {}", update.install_id);
        if let Err(e) = self.config.set_install_id(&update.install_id).await {
            warn!("Error saving install id: {}", e);
        }
        options.install_id = update.install_id.clone();
    }

    async fn prompt(
        &self,
        ctx: &dyn Context,
        update: &Update,
        options: &UpdateOptions,
    ) -> UpdateResult<UpdateAction> {
        let (auto, auto_set) = self.config.get_update_auto();
        if auto {
            debug!("Auto update is enabled, skipping prompt");
            return Ok(UpdateAction::Auto);
        }

        let prompt_options = UpdatePromptOptions {
            auto_update: !auto_set,
        };
        let response = ctx
            .update_ui()
            .update_prompt(update, options, prompt_options)
            .await
            .map_err(|e| UpdateError::new(ErrorKind::Prompt, e))?;
        info!("Prompt response: {:?}", response);

        if let Err(e) = self.config.set_update_auto(response.auto_update).await {
            warn!("Error setting auto update preference: {}", e);
        }
        Ok(response.action)
    }

    async fn download(&self, update: &mut Update) -> UpdateResult<()> {
        let Some(asset) = update.asset.as_mut() else {
            return Ok(());
        };
        let file_name = Path::new(&asset.name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("asset"));
        let dest = download_path(&self.download_dir, &asset.url, &file_name);

        let download_options = DownloadOptions {
            digest: asset.digest.clone(),
            ..Default::default()
        };
        let outcome = self
            .downloader
            .download(&asset.url, &dest, &download_options)
            .await
            .map_err(|e| UpdateError::new(e.kind(), e))?;
        match outcome {
            DownloadOutcome::Downloaded => info!("Downloaded {} to {}", asset.url, dest.display()),
            DownloadOutcome::Cached => info!("Using cached download {}", dest.display()),
        }

        asset
            .set_local_path(&dest)
            .map_err(|e| UpdateError::new(ErrorKind::Download, e))
    }

    async fn verify(
        &self,
        ctx: &dyn Context,
        update: &mut Update,
        options: &UpdateOptions,
    ) -> UpdateResult<()> {
        if let Some(path) = &options.signature_path
            && let Some(asset) = update.asset.as_mut()
        {
            info!("Using signature from {}", path.display());
            let signature = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| UpdateError::new(ErrorKind::Signature, e))?;
            asset.signature = signature.trim().to_string();
        }
        ctx.verify(update)
            .await
            .map_err(|e| UpdateError::new(ErrorKind::Signature, e))
    }

    async fn apply(
        &self,
        ctx: &dyn Context,
        update: &Update,
        options: &UpdateOptions,
    ) -> UpdateResult<()> {
        let apply_err = |e: anyhow::Error| UpdateError::new(ErrorKind::Apply, e);
        ctx.before_apply(update).await.map_err(apply_err)?;
        info!("Applying update {} with {}", update, self.applier.name());
        self.applier.apply(update, options).await.map_err(apply_err)?;
        ctx.after_apply(update).await.map_err(apply_err)
    }
}
