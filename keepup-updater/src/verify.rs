use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::error::VerifyError;

/// Domain separation for update signatures.
pub const SIGNATURE_CONTEXT: &[u8] = b"keepup-update-v1";

/// Checks detached asset signatures against a fixed set of trusted signers.
///
/// A signature is the base64 encoding of the signer's 32-byte Ed25519 public
/// key followed by a 64-byte Ed25519ph signature over the SHA-512 of the file.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    signers: HashMap<[u8; PUBLIC_KEY_LENGTH], VerifyingKey>,
}

impl SignatureVerifier {
    /// Builds a verifier trusting the given hex-encoded public keys.
    pub fn new<I, S>(keys: I) -> Result<Self, VerifyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut signers = HashMap::new();
        for key in keys {
            let key = key.as_ref().trim();
            let invalid = |reason: String| VerifyError::InvalidKey {
                key: key.to_string(),
                reason,
            };
            let bytes: [u8; PUBLIC_KEY_LENGTH] = hex::decode(key)
                .map_err(|e| invalid(e.to_string()))?
                .try_into()
                .map_err(|_| invalid("wrong length".to_string()))?;
            let verifying = VerifyingKey::from_bytes(&bytes).map_err(|e| invalid(e.to_string()))?;
            signers.insert(bytes, verifying);
        }
        Ok(Self { signers })
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub async fn verify_file(&self, path: &Path, signature: &str) -> Result<(), VerifyError> {
        let digest = file_prehash(path).await?;
        self.verify_prehashed(digest, signature)?;
        info!("Verified signature for {}", path.display());
        Ok(())
    }

    pub fn verify_bytes(&self, message: &[u8], signature: &str) -> Result<(), VerifyError> {
        let mut digest = Sha512::new();
        digest.update(message);
        self.verify_prehashed(digest, signature)
    }

    fn verify_prehashed(&self, digest: Sha512, signature: &str) -> Result<(), VerifyError> {
        let signature = signature.trim();
        if signature.is_empty() {
            return Err(VerifyError::MissingSignature);
        }
        let raw = STANDARD
            .decode(signature)
            .map_err(|e| VerifyError::Encoding(e.to_string()))?;
        if raw.len() != PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH {
            return Err(VerifyError::Encoding(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH,
                raw.len()
            )));
        }
        let (key, sig) = raw.split_at(PUBLIC_KEY_LENGTH);
        let key: [u8; PUBLIC_KEY_LENGTH] = key
            .try_into()
            .map_err(|_| VerifyError::Encoding("truncated key".to_string()))?;
        let Some(signer) = self.signers.get(&key) else {
            return Err(VerifyError::UnknownSigner(hex::encode(key)));
        };
        let sig = Signature::from_slice(sig).map_err(|e| VerifyError::Encoding(e.to_string()))?;
        signer
            .verify_prehashed(digest, Some(SIGNATURE_CONTEXT), &sig)
            .map_err(|_| VerifyError::BadSignature)?;
        debug!("Signature by {} is valid", hex::encode(key));
        Ok(())
    }
}

async fn file_prehash(path: &Path) -> std::io::Result<Sha512> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut digest = Sha512::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(digest);
        }
        digest.update(&buf[..n]);
    }
}

/// Produces a signature [`SignatureVerifier`] accepts.
pub fn sign(key: &SigningKey, message: &[u8]) -> String {
    let mut digest = Sha512::new();
    digest.update(message);
    sign_prehashed(key, digest)
}

pub async fn sign_file(key: &SigningKey, path: &Path) -> std::io::Result<String> {
    Ok(sign_prehashed(key, file_prehash(path).await?))
}

fn sign_prehashed(key: &SigningKey, digest: Sha512) -> String {
    // Only fails for contexts longer than 255 bytes.
    let signature = key
        .sign_prehashed(digest, Some(SIGNATURE_CONTEXT))
        .map(|s| s.to_bytes())
        .unwrap_or([0u8; SIGNATURE_LENGTH]);
    let mut raw = Vec::with_capacity(PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH);
    raw.extend_from_slice(key.verifying_key().as_bytes());
    raw.extend_from_slice(&signature);
    STANDARD.encode(raw)
}
