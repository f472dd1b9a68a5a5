use crate::access_store::{AccessStore, DownloadAccess, NewDownloadAccess};
use crate::config::DeliverySettings;
use anyhow::{bail, Result};
use rand::Rng;
use rand_distr::Alphanumeric;
use std::sync::Arc;
use tracing::info;

/// A completed purchase, as reported by the external payment collaborator.
#[derive(Debug, Clone)]
pub struct PurchaseEvent {
    pub transaction_id: i64,
    pub user_id: i64,
    pub product_id: i64,
}

/// Creates download grants for completed purchases.
pub struct TokenIssuer {
    store: Arc<dyn AccessStore>,
    settings: DeliverySettings,
}

/// 64 alphanumeric chars from the OS CSPRNG, ~381 bits of entropy.
fn new_download_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

impl TokenIssuer {
    pub fn new(store: Arc<dyn AccessStore>, settings: DeliverySettings) -> Self {
        Self { store, settings }
    }

    /// Create a grant for the purchase, or return the existing one when the
    /// payment event is a retry. Idempotent on `transaction_id`.
    pub fn issue(&self, purchase: &PurchaseEvent, now: i64) -> Result<DownloadAccess> {
        if let Some(existing) = self
            .store
            .get_access_by_transaction(purchase.transaction_id)?
        {
            info!(
                "Transaction {} already has a grant, returning it",
                purchase.transaction_id
            );
            return Ok(existing);
        }

        let product = match self.store.get_product(purchase.product_id)? {
            Some(product) => product,
            None => bail!("Product {} does not exist", purchase.product_id),
        };
        if !product.active {
            bail!("Product {} is not active", product.id);
        }

        let new_access = NewDownloadAccess {
            transaction_id: purchase.transaction_id,
            user_id: purchase.user_id,
            product_id: purchase.product_id,
            token: new_download_token(),
            max_downloads: self.settings.max_downloads,
            expires_at: now + self.settings.expiry_hours * 3600,
            created_at: now,
        };
        let access = match self.store.insert_access(&new_access) {
            Ok(access) => access,
            Err(err) => {
                // A concurrent retry of the same payment can slip between the
                // lookup and the insert; the unique transaction constraint
                // rejects the loser, which then returns the winner's grant.
                match self
                    .store
                    .get_access_by_transaction(purchase.transaction_id)?
                {
                    Some(existing) => {
                        info!(
                            "Transaction {} was granted concurrently, returning it",
                            purchase.transaction_id
                        );
                        return Ok(existing);
                    }
                    None => return Err(err),
                }
            }
        };

        info!(
            "Issued grant for transaction {} (user {}, product {}, expires at {})",
            access.transaction_id, access.user_id, access.product_id, access.expires_at
        );
        Ok(access)
    }
}
