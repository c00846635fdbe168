//! Live tests against the real vendor API
//!
//! These tests spend real credits and need network access, so they are
//! compiled only with the `live-tests` feature and marked #[ignore].
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --features live-tests --test live_vendor -- --ignored --nocapture
//! ```
//!
//! # Required environment variables (.env file)
//!
//! - `VMODEL_API_TOKEN` - Vendor API token
//! - `VMODEL_BASE_URL` - Vendor base URL (optional)
//! - `LIVE_DETECT_MEDIA_URL` - Public video URL with at least one face (detection test only)

#![cfg(feature = "live-tests")]

mod common;

use common::has_live_credentials;
use faceswap_tasks::{Config, FaceSwapService};
use serial_test::serial;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn live_service(dir: &TempDir) -> FaceSwapService {
    let mut config = Config::from_env();
    config.storage.local_dir = dir.path().to_path_buf();
    FaceSwapService::with_local_storage(config).expect("failed to create live service")
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_credits_query() {
    if !has_live_credentials() {
        eprintln!("Skipping: VMODEL_API_TOKEN not found in .env");
        return;
    }

    let dir = TempDir::new().unwrap();
    let service = live_service(&dir);
    let credits = service
        .credits(&CancellationToken::new())
        .await
        .expect("credits query should succeed with a valid token");
    assert!(credits >= 0.0, "credits should be non-negative, got {}", credits);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_detect_faces_end_to_end() {
    if !has_live_credentials() {
        eprintln!("Skipping: VMODEL_API_TOKEN not found in .env");
        return;
    }
    let Ok(media_url) = std::env::var("LIVE_DETECT_MEDIA_URL") else {
        eprintln!("Skipping: LIVE_DETECT_MEDIA_URL not set");
        return;
    };

    let dir = TempDir::new().unwrap();
    let service = live_service(&dir);
    let result = service
        .detect_faces(&media_url, &CancellationToken::new())
        .await
        .expect("detection should finish");

    println!("detect_id={:?} faces={}", result.detect_id, result.faces.len());
    assert!(result.detect_id.is_some(), "expected at least one usable sub-result");
    assert!(!result.faces.is_empty());
}
