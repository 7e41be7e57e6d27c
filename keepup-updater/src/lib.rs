pub mod apply;
pub mod checker;
pub mod download;
pub mod error;
pub mod sources;
pub mod updater;
pub mod verify;

pub use apply::{InstallerApplier, NoopApplier, PlatformApplier, UnzipApplier, applier_for_platform};
pub use checker::UpdateChecker;
pub use download::{DownloadOptions, DownloadOutcome, Downloader, file_digest};
pub use error::{DownloadError, VerifyError};
pub use sources::{LocalUpdateSource, QueryUpdateSource, RemoteUpdateSource, UpdateSource};
pub use updater::{Context, UpdateResult, UpdateUi, Updater};
pub use verify::SignatureVerifier;
