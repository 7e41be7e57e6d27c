use async_trait::async_trait;
use keepup_core::{Update, UpdateOptions};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};

use super::{DEFAULT_SOURCE_TIMEOUT, UpdateSource, http_client, parse_update};

/// Reads `update-<platform>-<env>-<channel>.json` from a static feed.
pub struct RemoteUpdateSource {
    default_url: String,
    client: reqwest::Client,
}

impl RemoteUpdateSource {
    pub fn new(default_url: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_timeout(default_url, DEFAULT_SOURCE_TIMEOUT)
    }

    pub fn with_timeout(default_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            default_url: default_url.into(),
            client: http_client(timeout)?,
        })
    }

    /// Feed URL for `options`; `options.url` replaces the default base.
    pub fn source_url(&self, options: &UpdateOptions) -> anyhow::Result<String> {
        let base = if options.url.is_empty() {
            &self.default_url
        } else {
            &options.url
        };
        if base.is_empty() {
            anyhow::bail!("No update URL configured");
        }
        let params = [&options.platform, &options.env, &options.channel]
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("-");
        Ok(format!("{}/update-{}.json", base.trim_end_matches('/'), params))
    }
}

#[async_trait]
impl UpdateSource for RemoteUpdateSource {
    fn description(&self) -> &str {
        "Remote"
    }

    async fn find_update(&self, options: &UpdateOptions) -> anyhow::Result<Option<Update>> {
        let url = self.source_url(options)?;
        info!("Request {}", url);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                info!("No update published at {}", url);
                Ok(None)
            }
            status if !status.is_success() => {
                anyhow::bail!("Updater remote returned bad status {}", status)
            }
            _ => {
                let body = response.bytes().await?;
                let update = parse_update(&body)?;
                debug!("Received update {:?}", update);
                Ok(update)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(platform: &str, env: &str, channel: &str) -> UpdateOptions {
        UpdateOptions {
            platform: platform.to_string(),
            env: env.to_string(),
            channel: channel.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_source_url_skips_empty_parts() {
        let source = RemoteUpdateSource::new("https://updates.example.com/").unwrap();
        assert_eq!(
            source.source_url(&options("linux", "prod", "")).unwrap(),
            "https://updates.example.com/update-linux-prod.json"
        );
        assert_eq!(
            source.source_url(&options("darwin", "", "beta")).unwrap(),
            "https://updates.example.com/update-darwin-beta.json"
        );
    }

    #[test]
    fn test_source_url_override() {
        let source = RemoteUpdateSource::new("https://updates.example.com").unwrap();
        let mut opts = options("linux", "prod", "test");
        opts.url = "http://localhost:8080".to_string();
        assert_eq!(
            source.source_url(&opts).unwrap(),
            "http://localhost:8080/update-linux-prod-test.json"
        );
    }

    #[test]
    fn test_source_url_missing() {
        let source = RemoteUpdateSource::new("").unwrap();
        assert!(source.source_url(&options("linux", "", "")).is_err());
    }
}
