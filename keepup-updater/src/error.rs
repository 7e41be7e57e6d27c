use keepup_core::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} responded with {status}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing digest")]
    MissingDigest,

    #[error("Invalid digest: expected {expected}, got {actual}")]
    Digest { expected: String, actual: String },
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::MissingDigest | DownloadError::Digest { .. } => ErrorKind::Digest,
            _ => ErrorKind::Download,
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("No signature")]
    MissingSignature,

    #[error("Invalid signature encoding: {0}")]
    Encoding(String),

    #[error("Invalid signing key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Signer {0} is not trusted")]
    UnknownSigner(String),

    #[error("Bad signature")]
    BadSignature,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
