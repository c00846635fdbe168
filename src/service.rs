//! Orchestration facade over the vendor client and the transfer cache.
//!
//! [`FaceSwapService`] is constructed once at startup and handed to whatever
//! serves requests. It owns exactly one [`VendorClient`], one
//! [`TransferCache`] and, when Akool credentials are present, one
//! [`AkoolClient`]; nothing here is global.

use crate::akool::{AkoolClient, AkoolDetection, AkoolSwapRequest};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::{LocalStorage, ObjectStorage};
use crate::transfer::{TransferCache, TransferEntry};
use crate::vendor::{
    DetectResult, DetectStatus, FaceSwapPair, SwapTask, TaskStatus, TaskView, TransferStatus,
    VendorClient,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Face detection and face swap task orchestration
pub struct FaceSwapService {
    config: Config,
    vendor: VendorClient,
    akool: Option<AkoolClient>,
    transfers: Arc<TransferCache>,
}

impl FaceSwapService {
    /// Build the service around an object storage implementation
    ///
    /// Validates the configuration and starts the transfer cache's eviction
    /// sweep, so it must be called from within a Tokio runtime. A missing
    /// vendor token is not an error here; vendor calls report
    /// [`Error::NotConfigured`] instead.
    pub fn new(config: Config, storage: Arc<dyn ObjectStorage>) -> Result<Self> {
        config.validate()?;

        let vendor = VendorClient::new(&config)?;
        let akool = if config.is_akool_configured() {
            Some(AkoolClient::new(&config)?)
        } else {
            None
        };
        let transfers = TransferCache::new(storage, config.transfer.clone());

        match (config.is_vendor_configured(), akool.is_some()) {
            (true, _) => {}
            (false, true) => {
                tracing::warn!("vendor API token not configured, swap status falls back to Akool");
            }
            (false, false) => {
                tracing::warn!("vendor API token not configured, face operations will be unavailable");
            }
        }
        tracing::info!(
            base_url = %config.vendor.base_url,
            transfer_ttl_secs = config.transfer.ttl.as_secs(),
            "face swap service initialized"
        );

        Ok(Self {
            config,
            vendor,
            akool,
            transfers,
        })
    }

    /// Build the service with [`LocalStorage`] under `config.storage`
    pub fn with_local_storage(config: Config) -> Result<Self> {
        let storage = LocalStorage::new(&config.storage)?;
        Self::new(config, Arc::new(storage))
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared vendor client
    pub fn vendor(&self) -> &VendorClient {
        &self.vendor
    }

    /// The result transfer cache
    pub fn transfers(&self) -> &Arc<TransferCache> {
        &self.transfers
    }

    /// The Akool client, when Akool credentials are configured
    pub fn akool(&self) -> Result<&AkoolClient> {
        self.akool
            .as_ref()
            .ok_or_else(|| Error::NotConfigured("Akool API key".to_string()))
    }

    fn ensure_vendor(&self) -> Result<&VendorClient> {
        if self.config.is_vendor_configured() {
            Ok(&self.vendor)
        } else {
            Err(Error::NotConfigured("vendor API token".to_string()))
        }
    }

    /// Detect faces in a media file, waiting for the task to finish
    pub async fn detect_faces(
        &self,
        media_url: &str,
        cancel: &CancellationToken,
    ) -> Result<DetectResult> {
        self.ensure_vendor()?.detect_faces(media_url, cancel).await
    }

    /// Start a detection task without waiting for it
    pub async fn create_detect_task(
        &self,
        media_url: &str,
        cancel: &CancellationToken,
    ) -> Result<DetectStatus> {
        self.ensure_vendor()?
            .create_detect_task(media_url, cancel)
            .await
    }

    /// Current state of a detection task
    pub async fn detect_status(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DetectStatus> {
        self.ensure_vendor()?
            .detect_task_status(task_id, cancel)
            .await
    }

    /// Start a swap task on a previous detection
    pub async fn create_swap_task(
        &self,
        detect_id: &str,
        pairs: &[FaceSwapPair],
        face_enhance: bool,
        cancel: &CancellationToken,
    ) -> Result<SwapTask> {
        if pairs.is_empty() {
            return Err(Error::InvalidInput(
                "at least one face swap pair is required".to_string(),
            ));
        }
        self.ensure_vendor()?
            .create_swap_task(detect_id, pairs, face_enhance, cancel)
            .await
    }

    /// Detect faces in a still image with Akool
    pub async fn detect_image_faces(
        &self,
        image_url: &str,
        cancel: &CancellationToken,
    ) -> Result<AkoolDetection> {
        self.akool()?.detect_faces(image_url, cancel).await
    }

    /// Start an Akool video swap from detected landmarks
    pub async fn create_video_swap(
        &self,
        request: &AkoolSwapRequest,
        cancel: &CancellationToken,
    ) -> Result<SwapTask> {
        self.akool()?.create_swap_task(request, cancel).await
    }

    /// Canonical status of a swap task
    ///
    /// The primary vendor answers when it has a token, Akool otherwise.
    /// When the provider reports the task completed with a result URL, mirroring
    /// of that artifact is started (at most once per task id). The answer
    /// carries the mirrored URL once the copy has completed and the vendor URL
    /// until then, including when the copy failed.
    pub async fn swap_status(&self, task_id: &str, cancel: &CancellationToken) -> Result<TaskView> {
        let task = if self.config.is_vendor_configured() {
            self.vendor.swap_task_status(task_id, cancel).await?
        } else if let Some(akool) = &self.akool {
            akool.task_status(task_id, cancel).await?
        } else {
            return Err(Error::NotConfigured(
                "vendor API token or Akool API key".to_string(),
            ));
        };

        let mut view = TaskView {
            task_id: task.task_id,
            status: task.status,
            result_url: task.result_url,
            error: task.error,
            transfer: None,
        };

        if view.status == TaskStatus::Completed {
            if let Some(vendor_url) = view.result_url.as_deref() {
                self.transfers.start(&view.task_id, vendor_url);
                view.transfer = self.transfers.status(&view.task_id);
            }
        }

        if let Some(mirrored) = view.transfer.as_ref().and_then(mirrored_url) {
            view.result_url = Some(mirrored.to_string());
        }

        Ok(view)
    }

    /// Transfer state for a task, without contacting the vendor
    pub fn transfer_status(&self, task_id: &str) -> Option<TransferEntry> {
        self.transfers.status(task_id)
    }

    /// Remaining vendor account credits
    pub async fn credits(&self, cancel: &CancellationToken) -> Result<f64> {
        self.ensure_vendor()?.credits(cancel).await
    }

    /// Stop background work
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down face swap service");
        self.transfers.shutdown().await;
        Ok(())
    }
}

fn mirrored_url(entry: &TransferEntry) -> Option<&str> {
    match entry.status {
        TransferStatus::Completed => entry.mirrored_url.as_deref(),
        _ => None,
    }
}
