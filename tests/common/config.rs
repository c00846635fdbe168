//! Test configuration helpers for mock vendors and live credentials

use faceswap_tasks::{
    Config, FaceSwapService, PollConfig, RetryConfig, StorageConfig, VendorConfig,
};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

/// Configuration pointing at a mock vendor, storing files under `dir`
///
/// Retries and polling are shortened so scenarios finish in milliseconds.
pub fn mock_config(server: &MockServer, dir: &TempDir) -> Config {
    Config {
        vendor: VendorConfig {
            base_url: server.uri(),
            api_token: Some("test-token".to_string()),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        retry: RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        poll: PollConfig {
            interval: Duration::from_millis(50),
            detect_timeout: Duration::from_secs(5),
        },
        storage: StorageConfig {
            local_dir: dir.path().join("uploads"),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Start a mock vendor and a service wired to it
///
/// The `TempDir` must outlive the service.
pub async fn create_mock_service() -> (MockServer, FaceSwapService, TempDir) {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let service = FaceSwapService::with_local_storage(mock_config(&server, &dir))
        .expect("failed to create service");
    (server, service, dir)
}

/// Check if live test credentials are available
pub fn has_live_credentials() -> bool {
    dotenvy::dotenv().ok();
    std::env::var("VMODEL_API_TOKEN").is_ok_and(|token| !token.is_empty())
}
