//! End-to-end purchase-to-delivery flow against the public crate API.

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use vidgate_server::access_store::{AccessStore, Product, SqliteAccessStore};
use vidgate_server::config::DeliverySettings;
use vidgate_server::delivery::{
    DownloadGate, GateError, PiracyMonitor, PurchaseEvent, TokenIssuer, UrlSigner,
};

const NOW: i64 = 1_700_000_000;

struct Harness {
    _media: TempDir,
    store: Arc<SqliteAccessStore>,
    issuer: TokenIssuer,
    signer: UrlSigner,
    gate: DownloadGate,
    product_id: i64,
}

fn harness() -> Harness {
    let media = TempDir::new().unwrap();
    fs::write(media.path().join("feature.mp4"), b"feature bytes").unwrap();

    let store = Arc::new(SqliteAccessStore::in_memory().unwrap());
    let product_id = store
        .insert_product(&Product {
            id: 0,
            title: "Feature".to_string(),
            file_path: "feature.mp4".to_string(),
            file_name: "feature.mp4".to_string(),
            active: true,
        })
        .unwrap();

    let issuer = TokenIssuer::new(store.clone(), DeliverySettings::default());
    let signer = UrlSigner::new("integration-secret", "https://shop.example.com").unwrap();
    let gate = DownloadGate::new(store.clone(), media.path().to_path_buf());

    Harness {
        _media: media,
        store,
        issuer,
        signer,
        gate,
        product_id,
    }
}

#[test]
fn purchase_to_delivery_lifecycle() {
    let h = harness();
    let purchase = PurchaseEvent {
        transaction_id: 42,
        user_id: 7,
        product_id: h.product_id,
    };

    let access = h.issuer.issue(&purchase, NOW).unwrap();
    assert_eq!(access.expires_at, NOW + 24 * 3600);
    assert_eq!(access.max_downloads, 3);

    // A payment retry returns the same grant
    let again = h.issuer.issue(&purchase, NOW + 5).unwrap();
    assert_eq!(again.token, access.token);

    // The signed link verifies against the stored path
    let signed = h
        .signer
        .sign(&access.token, "feature.mp4", 600, NOW)
        .unwrap();
    assert!(signed
        .url
        .starts_with("https://shop.example.com/secure-download/"));
    let signature = signed.url.rsplit_once("signature=").unwrap().1.to_string();
    assert!(h
        .signer
        .verify(&access.token, signed.expires_at, &signature, "feature.mp4", NOW));

    // Three deliveries, then the grant is spent
    for expected in 1..=3 {
        let delivery = h.gate.validate_and_consume(&access.token, NOW).unwrap();
        assert_eq!(delivery.downloads_used, expected);
        assert_eq!(delivery.file_name, "feature.mp4");
    }
    assert!(matches!(
        h.gate.validate_and_consume(&access.token, NOW),
        Err(GateError::Exhausted)
    ));
}

#[test]
fn blocked_grant_is_spent_immediately() {
    let h = harness();
    let access = h
        .issuer
        .issue(
            &PurchaseEvent {
                transaction_id: 1,
                user_id: 7,
                product_id: h.product_id,
            },
            NOW,
        )
        .unwrap();

    let monitor = PiracyMonitor::new(h.store.clone(), 10);
    assert!(monitor.block(&access.token, "manual review").unwrap());

    assert!(matches!(
        h.gate.validate_and_consume(&access.token, NOW),
        Err(GateError::Exhausted)
    ));
}

#[test]
fn heavy_usage_is_flagged_but_not_blocked() {
    let h = harness();
    let mut tokens = Vec::new();
    for txn in 1..=4 {
        let access = h
            .issuer
            .issue(
                &PurchaseEvent {
                    transaction_id: txn,
                    user_id: 7,
                    product_id: h.product_id,
                },
                NOW,
            )
            .unwrap();
        tokens.push(access.token);
    }
    for token in &tokens {
        for _ in 0..3 {
            h.gate.validate_and_consume(token, NOW).unwrap();
        }
    }

    let monitor = PiracyMonitor::new(h.store.clone(), 10);
    let assessment = monitor.assess(7, NOW + 60).unwrap();
    assert_eq!(assessment.recent_downloads, 12);
    assert!(!assessment.warnings.is_empty());

    // Advisory only; remaining grants still refuse solely on their own state
    let spare = h
        .issuer
        .issue(
            &PurchaseEvent {
                transaction_id: 99,
                user_id: 7,
                product_id: h.product_id,
            },
            NOW,
        )
        .unwrap();
    assert!(h.gate.validate_and_consume(&spare.token, NOW).is_ok());
}

#[test]
fn sweep_removes_expired_grant_entirely() {
    let h = harness();
    let access = h
        .issuer
        .issue(
            &PurchaseEvent {
                transaction_id: 1,
                user_id: 7,
                product_id: h.product_id,
            },
            NOW,
        )
        .unwrap();

    let later = NOW + 25 * 3600;
    assert!(matches!(
        h.gate.validate_and_consume(&access.token, later),
        Err(GateError::Expired)
    ));

    assert_eq!(h.store.delete_expired(later).unwrap(), 1);
    assert!(matches!(
        h.gate.validate_and_consume(&access.token, later),
        Err(GateError::Unknown)
    ));
}
