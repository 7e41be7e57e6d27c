use async_trait::async_trait;
use keepup_core::{Asset, Update, UpdateOptions};
use reqwest::Url;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

use super::{UpdateSource, parse_update};
use crate::download::file_digest;

/// Serves a release described by a JSON file on disk, optionally pointing
/// its asset at a local archive.
pub struct LocalUpdateSource {
    json_path: PathBuf,
    asset_path: Option<PathBuf>,
}

impl LocalUpdateSource {
    pub fn new(json_path: impl Into<PathBuf>, asset_path: Option<PathBuf>) -> Self {
        Self {
            json_path: json_path.into(),
            asset_path,
        }
    }
}

#[async_trait]
impl UpdateSource for LocalUpdateSource {
    fn description(&self) -> &str {
        "Local"
    }

    async fn find_update(&self, _options: &UpdateOptions) -> anyhow::Result<Option<Update>> {
        info!("Reading update from {}", self.json_path.display());
        let content = fs::read(&self.json_path).await?;
        let Some(mut update) = parse_update(&content)? else {
            return Ok(None);
        };

        if let Some(asset_path) = &self.asset_path {
            let asset_path = std::path::absolute(asset_path)?;
            let url = Url::from_file_path(&asset_path)
                .map_err(|_| anyhow::anyhow!("Invalid asset path {}", asset_path.display()))?;
            let name = asset_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let asset = update.asset.get_or_insert_with(|| Asset::new(name, ""));
            asset.url = url.to_string();
            if asset.digest.is_empty() {
                asset.digest = file_digest(&asset_path).await?;
                debug!("Computed digest {} for {}", asset.digest, asset_path.display());
            }
        }

        Ok(Some(update))
    }
}
