use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(pub i64);

/// Release type as sent by the server. Values this client does not know are
/// kept as `Other`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum UpdateType {
    #[default]
    Normal,
    Bugfix,
    Critical,
    Other(i32),
}

impl From<UpdateType> for i32 {
    fn from(t: UpdateType) -> Self {
        match t {
            UpdateType::Normal => 0,
            UpdateType::Bugfix => 1,
            UpdateType::Critical => 2,
            UpdateType::Other(value) => value,
        }
    }
}

impl From<i32> for UpdateType {
    fn from(value: i32) -> Self {
        match value {
            0 => UpdateType::Normal,
            1 => UpdateType::Bugfix,
            2 => UpdateType::Critical,
            other => UpdateType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Asset {
    pub name: String,
    pub url: String,
    pub digest: String,
    pub signature: String,
    #[serde(rename = "localPath")]
    local_path: String,
}

impl Asset {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        if self.local_path.is_empty() {
            None
        } else {
            Some(Path::new(&self.local_path))
        }
    }

    /// Records where the asset was downloaded. Only the first call succeeds.
    pub fn set_local_path(&mut self, path: impl AsRef<Path>) -> crate::Result<()> {
        if !self.local_path.is_empty() {
            return Err(crate::Error::Config(format!(
                "Asset {} already downloaded to {}",
                self.name, self.local_path
            )));
        }
        self.local_path = path.as_ref().to_string_lossy().into_owned();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub install_id: String,
    #[serde(rename = "type", default)]
    pub update_type: UpdateType,
    #[serde(default)]
    pub published_at: Time,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<Asset>,
}

impl Update {
    /// An update without a downloadable asset only carries metadata.
    pub fn is_metadata_only(&self) -> bool {
        self.asset.as_ref().is_none_or(|a| a.url.is_empty())
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{} {}", self.name, self.version)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptions {
    pub version: String,
    pub platform: String,
    #[serde(default)]
    pub arch: String,
    pub destination_path: PathBuf,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub install_id: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub signature_path: Option<PathBuf>,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub updater_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Apply,
    Auto,
    Snooze,
    Cancel,
    Error,
    #[serde(other)]
    Unknown,
}

impl UpdateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateAction::Apply => "apply",
            UpdateAction::Auto => "auto",
            UpdateAction::Snooze => "snooze",
            UpdateAction::Cancel => "cancel",
            UpdateAction::Error => "error",
            UpdateAction::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePromptOptions {
    pub auto_update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePromptResponse {
    pub action: UpdateAction,
    #[serde(default)]
    pub auto_update: bool,
}

impl UpdatePromptResponse {
    pub fn new(action: UpdateAction, auto_update: bool) -> Self {
        Self { action, auto_update }
    }
}
