use crate::access_store::AccessStore;
use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

/// Why an access attempt was refused.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("unknown token")]
    Unknown,
    #[error("token expired")]
    Expired,
    #[error("download limit reached")]
    Exhausted,
    #[error("backing file missing")]
    FileMissing,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GateError {
    /// Machine-readable tag for audit log entries.
    pub fn reason(&self) -> &'static str {
        match self {
            GateError::Unknown => "unknown_token",
            GateError::Expired => "expired",
            GateError::Exhausted => "exhausted",
            GateError::FileMissing => "file_missing",
            GateError::Internal(_) => "internal_error",
        }
    }
}

/// A granted delivery, ready to be streamed.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Absolute path of the file to serve.
    pub file_path: PathBuf,
    /// Filename suggested to the client.
    pub file_name: String,
    /// Usage count after this consumption.
    pub downloads_used: i64,
    pub max_downloads: i64,
}

/// Validates a token against expiry and usage limits and consumes one use.
///
/// Per token the evaluation is a fresh state check on every attempt:
/// a valid grant can report expired or exhausted, never the other way
/// around. The usage decrement happens before any bytes are streamed; a
/// client disconnecting mid-transfer does not get the use refunded.
pub struct DownloadGate {
    store: Arc<dyn AccessStore>,
    media_dir: PathBuf,
}

impl DownloadGate {
    pub fn new(store: Arc<dyn AccessStore>, media_dir: PathBuf) -> Self {
        Self { store, media_dir }
    }

    pub fn validate_and_consume(&self, token: &str, now: i64) -> Result<Delivery, GateError> {
        let access = self
            .store
            .get_access_by_token(token)?
            .ok_or(GateError::Unknown)?;

        if access.is_expired(now) {
            return Err(GateError::Expired);
        }

        // The count check and increment are a single conditional store
        // update returning the new count; no row means another request won
        // the race or the limit was already reached.
        let downloads_used = self
            .store
            .consume_use(token, now)?
            .ok_or(GateError::Exhausted)?;

        let product = self
            .store
            .get_product(access.product_id)?
            .ok_or_else(|| {
                error!(
                    "Grant {} references missing product {}",
                    access.id, access.product_id
                );
                GateError::FileMissing
            })?;

        let file_path = self.resolve_file(&product.file_path);
        if !file_path.is_file() {
            // The use is already consumed and is deliberately not rolled
            // back; a delivery lost to storage loss is an operator problem.
            error!(
                "Backing file {:?} for product {} is missing from storage",
                file_path, product.id
            );
            return Err(GateError::FileMissing);
        }

        if downloads_used == access.max_downloads {
            warn!("Token {} has consumed its last download", access.id);
        }

        Ok(Delivery {
            file_path,
            file_name: product.file_name,
            downloads_used,
            max_downloads: access.max_downloads,
        })
    }

    /// The stored file path of the grant's product, needed by signed-URL
    /// verification before the gate runs.
    pub fn stored_file_path(&self, token: &str) -> Result<Option<String>, GateError> {
        let access = match self.store.get_access_by_token(token)? {
            Some(access) => access,
            None => return Ok(None),
        };
        let product = self
            .store
            .get_product(access.product_id)?
            .ok_or_else(|| GateError::Internal(anyhow!("Missing product {}", access.product_id)))?;
        Ok(Some(product.file_path))
    }

    fn resolve_file(&self, stored_path: &str) -> PathBuf {
        let stored = Path::new(stored_path);
        if stored.is_absolute() {
            stored.to_path_buf()
        } else {
            self.media_dir.join(stored)
        }
    }
}
