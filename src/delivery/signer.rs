use anyhow::{bail, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A delivery link together with the expiry baked into its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: i64,
}

/// Produces and verifies HMAC-signed, time-limited download URLs.
///
/// The signature covers the exact byte string `token:expires:filePath`,
/// so a link can neither be replayed against another file nor have its
/// expiry extended. The file path baked into the signature is the path as
/// stored on the grant's product; links issued before a file is relocated
/// stop verifying.
pub struct UrlSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl UrlSigner {
    pub fn new<S: AsRef<str>>(secret: S, base_url: S) -> Result<Self> {
        if secret.as_ref().is_empty() {
            bail!("Signing secret must not be empty");
        }
        Ok(Self {
            secret: secret.as_ref().as_bytes().to_vec(),
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
        })
    }

    fn compute_signature(&self, token: &str, expires_at: i64, file_path: &str) -> Result<String> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).context("Failed to key signature HMAC")?;
        mac.update(format!("{}:{}:{}", token, expires_at, file_path).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build a signed URL valid for `ttl_seconds` from `now`.
    pub fn sign(
        &self,
        token: &str,
        file_path: &str,
        ttl_seconds: i64,
        now: i64,
    ) -> Result<SignedUrl> {
        let expires_at = now + ttl_seconds;
        let signature = self.compute_signature(token, expires_at, file_path)?;
        Ok(SignedUrl {
            url: format!(
                "{}/secure-download/{}?expires={}&signature={}",
                self.base_url, token, expires_at, signature
            ),
            expires_at,
        })
    }

    /// Check a presented signature against the expected one. Expired links
    /// and malformed signatures verify false; this never panics, and the
    /// comparison itself is constant-time.
    pub fn verify(
        &self,
        token: &str,
        expires_at: i64,
        signature: &str,
        file_path: &str,
        now: i64,
    ) -> bool {
        if now > expires_at {
            return false;
        }
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(format!("{}:{}:{}", token, expires_at, file_path).as_bytes());
        let presented = match hex::decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        mac.verify_slice(&presented).is_ok()
    }
}
