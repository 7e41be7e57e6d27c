use async_trait::async_trait;
use keepup_core::{Update, UpdateOptions, UpdaterConfig};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{DEFAULT_SOURCE_TIMEOUT, UpdateSource, http_client, parse_update};

/// Asks an update API whether this install should update, describing the
/// install in the query string.
pub struct QueryUpdateSource {
    endpoint: String,
    config: Arc<dyn UpdaterConfig>,
    client: reqwest::Client,
}

impl QueryUpdateSource {
    pub fn new(endpoint: impl Into<String>, config: Arc<dyn UpdaterConfig>) -> anyhow::Result<Self> {
        Self::with_timeout(endpoint, config, DEFAULT_SOURCE_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        config: Arc<dyn UpdaterConfig>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: endpoint.into(),
            config,
            client: http_client(timeout)?,
        })
    }

    pub fn request_url(&self, options: &UpdateOptions) -> anyhow::Result<Url> {
        if !options.url.is_empty() {
            anyhow::bail!("Custom URLs not supported for this update source");
        }
        let (auto, _) = self.config.get_update_auto();
        let url = Url::parse_with_params(
            &self.endpoint,
            [
                ("install_id", options.install_id.as_str()),
                ("version", options.version.as_str()),
                ("platform", options.platform.as_str()),
                ("run_mode", options.env.as_str()),
                ("os_version", options.os_version.as_str()),
                ("upd_version", options.updater_version.as_str()),
                ("auto_update", if auto { "1" } else { "0" }),
            ],
        )?;
        Ok(url)
    }
}

#[async_trait]
impl UpdateSource for QueryUpdateSource {
    fn description(&self) -> &str {
        "Query"
    }

    async fn find_update(&self, options: &UpdateOptions) -> anyhow::Result<Option<Update>> {
        let url = self.request_url(options)?;
        info!("Request {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Find update returned bad HTTP status {}", response.status());
        }
        let body = response.bytes().await?;
        let update = parse_update(&body)?;
        debug!("Received update: {:?}", update);
        Ok(update)
    }
}
