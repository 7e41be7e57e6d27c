mod local;
mod query;
mod remote;

pub use local::LocalUpdateSource;
pub use query::QueryUpdateSource;
pub use remote::RemoteUpdateSource;

use async_trait::async_trait;
use keepup_core::{Update, UpdateOptions};
use std::time::Duration;

pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Where releases are looked up.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    fn description(&self) -> &str;

    /// Returns `None` when no newer release is published for `options`.
    async fn find_update(&self, options: &UpdateOptions) -> anyhow::Result<Option<Update>>;
}

pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Decodes an update document. An empty body, `null` or `{}` means no update.
pub(crate) fn parse_update(body: &[u8]) -> anyhow::Result<Option<Update>> {
    let value: serde_json::Value = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body).map_err(|e| anyhow::anyhow!("Invalid update response: {}", e))?
    };
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(ref map) if map.is_empty() => Ok(None),
        value => {
            let update: Update = serde_json::from_value(value)
                .map_err(|e| anyhow::anyhow!("Invalid update response: {}", e))?;
            Ok(Some(update))
        }
    }
}
