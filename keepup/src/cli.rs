use clap::{Args, Parser, Subcommand, ValueEnum};
use keepup_core::ExitPolicy;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "keepup")]
#[command(about = "Keeps a client application up to date and running", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub debug: bool,

    /// Also write logs to a daily rotated file in the cache directory
    #[arg(long, global = true)]
    pub log_to_file: bool,

    /// Name used for the config and log directories
    #[arg(long, global = true, env = "KEEPUP_APP_NAME", default_value = "keepup")]
    pub app_name: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check for an update once and apply it
    Check(UpdateArgs),

    /// Check for updates periodically and keep programs running
    Service(ServiceArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Static JSON feed
    Remote,
    /// Update API answering per install
    Query,
    /// JSON file on disk
    Local,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Remote => "remote",
            SourceKind::Query => "query",
            SourceKind::Local => "local",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    /// Application executable
    #[arg(long, env = "KEEPUP_PATH_TO_APP")]
    pub path_to_app: Option<PathBuf>,

    /// Current application version (asked from the app with --version if omitted)
    #[arg(long)]
    pub app_version: Option<String>,

    /// Where to look for updates
    #[arg(long, value_enum, default_value = "remote")]
    pub source: SourceKind,

    /// Feed base URL or API endpoint
    #[arg(long, env = "KEEPUP_UPDATE_URL")]
    pub url: Option<String>,

    #[arg(long, default_value = "")]
    pub channel: String,

    #[arg(long, default_value = "")]
    pub env: String,

    /// Platform name sent to the source and used to pick the installer
    #[arg(long, default_value = std::env::consts::OS)]
    pub platform: String,

    /// Update JSON for the local source
    #[arg(long)]
    pub local_update_json: Option<PathBuf>,

    /// Asset file for the local source
    #[arg(long)]
    pub local_asset: Option<PathBuf>,

    /// Trusted signer public key, hex encoded (repeatable)
    #[arg(long = "signing-key", env = "KEEPUP_SIGNING_KEYS", value_delimiter = ',')]
    pub signing_keys: Vec<String>,

    /// Program that shows the update prompt
    #[arg(long)]
    pub prompt: Option<PathBuf>,

    /// Apply updates without prompting
    #[arg(long)]
    pub silent: bool,

    /// Base URL for error, action and success reports
    #[arg(long, env = "KEEPUP_REPORT_URL")]
    pub report_url: Option<String>,

    /// Directory the update is installed to (defaults to the app's directory)
    #[arg(long)]
    pub destination: Option<PathBuf>,

    #[arg(long)]
    pub force: bool,

    /// Read the asset signature from this file instead
    #[arg(long)]
    pub signature_path: Option<PathBuf>,

    /// Seconds between update checks
    #[arg(long, default_value = "3600", value_parser = clap::value_parser!(u64).range(1..))]
    pub check_interval: u64,

    /// Updater preferences file
    #[arg(long, env = "KEEPUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory downloads are cached in
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    #[command(flatten)]
    pub update: UpdateArgs,

    /// Program to keep running, as PATH or PATH:exit-on-success (repeatable)
    #[arg(long = "watch")]
    pub watch: Vec<WatchSpec>,

    /// Minimum milliseconds between restarts of a watched program
    #[arg(long, default_value = "10000")]
    pub restart_delay: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    pub path: PathBuf,
    pub exit_on: ExitPolicy,
}

impl FromStr for WatchSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, exit_on) = match s.rsplit_once(':') {
            Some((path, "exit-on-success")) => (path, ExitPolicy::ExitOnSuccess),
            _ => (s, ExitPolicy::RestartAlways),
        };
        if path.is_empty() {
            return Err("empty program path".to_string());
        }
        Ok(Self {
            path: PathBuf::from(path),
            exit_on,
        })
    }
}
