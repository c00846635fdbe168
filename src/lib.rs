//! # faceswap-tasks
//!
//! Orchestration layer for asynchronous face detection and face swap tasks
//! running on a third-party inference vendor.
//!
//! ## Design Philosophy
//!
//! faceswap-tasks is designed to be:
//! - **Honest about vendor state** - The vendor owns task state; this crate only reports it
//! - **Safe to retry** - Only idempotent calls are retried, never task creation
//! - **Non-blocking** - Result mirroring happens in the background, callers always get an answer
//! - **Library-first** - No HTTP routing, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use faceswap_tasks::{Config, FaceSwapService};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = FaceSwapService::with_local_storage(Config::from_env())?;
//!     let cancel = CancellationToken::new();
//!
//!     let detection = service
//!         .detect_faces("https://example.com/video.mp4", &cancel)
//!         .await?;
//!     println!("found {} faces", detection.faces.len());
//!
//!     let view = service.swap_status("task-id", &cancel).await?;
//!     println!("{}: {:?}", view.status, view.result_url);
//!
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Akool face swap API client
pub mod akool;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Retry logic with exponential backoff
pub mod retry;
/// Orchestration facade
pub mod service;
/// Object storage capability and local fallback
pub mod storage;
/// Result transfer cache with TTL eviction
pub mod transfer;
/// Vendor task API client (decomposed into focused submodules)
pub mod vendor;

// Re-export commonly used types
pub use akool::{AkoolClient, AkoolDetection, AkoolFace, AkoolSwapPair, AkoolSwapRequest};
pub use config::{
    AkoolConfig, Config, PollConfig, RetryConfig, StorageConfig, TransferConfig, VendorConfig,
};
pub use error::{Error, Result, ToHttpStatus};
pub use retry::{IsRetryable, with_retry};
pub use service::FaceSwapService;
pub use storage::{LocalStorage, ObjectStorage, generate_key};
pub use transfer::{TransferCache, TransferEntry};
pub use vendor::{
    DetectResult, DetectStatus, DetectedFace, FaceSwapPair, RemoteTask, SwapTask, TaskStatus,
    TaskView, TransferStatus, VendorClient, normalize_status,
};

/// Helper function to run the service with graceful signal handling.
///
/// Waits for a termination signal and then calls the service's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use faceswap_tasks::{Config, FaceSwapService, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = FaceSwapService::with_local_storage(Config::from_env())?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(service).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: FaceSwapService) -> Result<()> {
    wait_for_signal().await;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register both signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
