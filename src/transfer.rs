//! Result transfer cache.
//!
//! Mirrors a completed task's result artifact from vendor-hosted storage into
//! owned storage, once per task, in the background. Callers start a transfer
//! and then poll [`TransferCache::status`]; they never wait on the copy.
//!
//! # State machine (per task id)
//!
//! ```text
//! (absent) --start--> pending --success--> completed
//!                        \--failure--> failed --start--> pending
//! ```
//!
//! # Concurrency
//!
//! Entries live in a [`DashMap`], so unrelated task ids never contend on one
//! lock. `start` performs its check-and-set inside a single entry guard:
//! a `pending` or `completed` entry is never replaced, which bounds each task
//! id to one in-flight copy. Every (re)start is stamped with a generation
//! number and a finishing copy only writes back to the entry it created.
//! Each entry also owns a cancellation token for its copy: replacing or
//! evicting the entry cancels the copy, so a task id never has two copies
//! running at once.
//!
//! # Eviction
//!
//! Entries older than the TTL are treated as absent on read and removed by a
//! periodic sweep that the cache owns. The sweep only drops cache entries;
//! mirrored artifacts stay in storage under their own retention policy.

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::storage::{ObjectStorage, generate_key};
use crate::vendor::TransferStatus;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest file extension carried over from a vendor URL, dot included
const MAX_EXTENSION_LEN: usize = 6;

/// The cache's view of one task's artifact mirroring
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransferEntry {
    /// Task whose result is being mirrored
    pub task_id: String,
    /// Mirroring state
    pub status: TransferStatus,
    /// Owned-storage URL, set once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrored_url: Option<String>,
    /// Failure reason, set once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time of the most recent (re)start
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    born: Instant,
    #[serde(skip)]
    generation: u64,
}

impl TransferEntry {
    fn pending(task_id: &str, generation: u64) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TransferStatus::Pending,
            mirrored_url: None,
            error: None,
            created_at: Utc::now(),
            born: Instant::now(),
            generation,
        }
    }

    /// Time since the most recent (re)start
    pub fn age(&self) -> Duration {
        self.born.elapsed()
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

/// An entry plus the token that stops its copy
struct Slot {
    entry: TransferEntry,
    copy: CancellationToken,
}

impl Slot {
    fn pending(task_id: &str, generation: u64, parent: &CancellationToken) -> Self {
        Self {
            entry: TransferEntry::pending(task_id, generation),
            copy: parent.child_token(),
        }
    }
}

/// Per-task-id background copy cache with TTL eviction
pub struct TransferCache {
    entries: Arc<DashMap<String, Slot>>,
    storage: Arc<dyn ObjectStorage>,
    config: TransferConfig,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TransferCache {
    /// Create the cache and start its eviction sweep
    ///
    /// Must be called from within a Tokio runtime. The sweep runs every
    /// `config.sweep_interval` until [`shutdown`](Self::shutdown) is called
    /// or the cache is dropped.
    pub fn new(storage: Arc<dyn ObjectStorage>, config: TransferConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let shutdown = CancellationToken::new();
            let sweeper = spawn_sweeper(weak.clone(), shutdown.clone(), config.sweep_interval);
            Self {
                entries: Arc::new(DashMap::new()),
                storage,
                config,
                next_generation: AtomicU64::new(1),
                shutdown,
                sweeper: Mutex::new(Some(sweeper)),
            }
        })
    }

    /// Begin mirroring `vendor_url` for `task_id`
    ///
    /// Creates a `pending` entry and copies in the background when the task
    /// has no entry, a `failed` entry, or an expired one. Otherwise this is a
    /// no-op. Returns `true` when a copy was scheduled.
    pub fn start(&self, task_id: &str, vendor_url: &str) -> bool {
        if self.shutdown.is_cancelled() {
            tracing::warn!(task_id = %task_id, "transfer cache shut down, not starting transfer");
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let ttl = self.config.ttl;

        let copy = match self.entries.entry(task_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = &occupied.get().entry;
                if current.status == TransferStatus::Failed || current.is_expired(ttl) {
                    let slot = Slot::pending(task_id, generation, &self.shutdown);
                    let copy = slot.copy.clone();
                    let replaced = occupied.insert(slot);
                    replaced.copy.cancel();
                    Some(copy)
                } else {
                    None
                }
            }
            Entry::Vacant(vacant) => {
                let slot = Slot::pending(task_id, generation, &self.shutdown);
                let copy = slot.copy.clone();
                vacant.insert(slot);
                Some(copy)
            }
        };

        let Some(copy) = copy else {
            tracing::debug!(task_id = %task_id, "transfer already pending or completed");
            return false;
        };

        tracing::info!(task_id = %task_id, generation = generation, "starting result transfer");
        self.spawn_copy(task_id.to_string(), vendor_url.to_string(), generation, copy);
        true
    }

    /// Current transfer state, if any. Never triggers work.
    pub fn status(&self, task_id: &str) -> Option<TransferEntry> {
        let ttl = self.config.ttl;
        let slot = self.entries.get(task_id)?;
        if slot.entry.is_expired(ttl) {
            drop(slot);
            if let Some((_, evicted)) = self
                .entries
                .remove_if(task_id, |_, s| s.entry.is_expired(ttl))
            {
                evicted.copy.cancel();
            }
            return None;
        }
        Some(slot.entry.clone())
    }

    /// Remove every entry older than the TTL, returning how many were removed
    pub fn sweep(&self) -> usize {
        let ttl = self.config.ttl;
        let mut evicted = 0;
        self.entries.retain(|_, slot| {
            let keep = !slot.entry.is_expired(ttl);
            if !keep {
                slot.copy.cancel();
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Number of entries currently held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are held
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop the eviction sweep and interrupt in-flight copies
    ///
    /// Interrupted copies are recorded as failed. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.sweeper.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "transfer sweeper ended abnormally");
            }
            tracing::info!("transfer cache sweeper stopped");
        }
    }

    fn spawn_copy(
        &self,
        task_id: String,
        vendor_url: String,
        generation: u64,
        copy: CancellationToken,
    ) {
        let entries = self.entries.clone();
        let storage = self.storage.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = copy_artifact(storage.as_ref(), &vendor_url, &config) => result,
                _ = copy.cancelled() => Err(Error::Cancelled),
            };

            let outcome = outcome.map_err(|e| {
                tracing::warn!(task_id = %task_id, url = %vendor_url, error = %e, "result transfer failed");
                Error::Transfer {
                    task_id: task_id.clone(),
                    reason: e.to_string(),
                }
            });
            finish(&entries, &task_id, generation, outcome);
        });
    }
}

impl Drop for TransferCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Download from the vendor and upload under a fresh key
async fn copy_artifact(
    storage: &dyn ObjectStorage,
    vendor_url: &str,
    config: &TransferConfig,
) -> Result<String> {
    let bytes = storage.download(vendor_url).await?;
    let ext = artifact_extension(vendor_url).unwrap_or_else(|| config.key_extension.clone());
    let key = generate_key(&config.key_prefix, &ext);
    storage.upload(&key, bytes, &config.content_type).await
}

/// Record a copy outcome, unless the entry was restarted or evicted meanwhile
fn finish(entries: &DashMap<String, Slot>, task_id: &str, generation: u64, outcome: Result<String>) {
    let Some(mut slot) = entries.get_mut(task_id) else {
        tracing::debug!(task_id = %task_id, "transfer entry evicted before copy finished");
        return;
    };
    let entry = &mut slot.entry;
    if entry.generation != generation || entry.status != TransferStatus::Pending {
        tracing::debug!(task_id = %task_id, generation = generation, "discarding stale transfer outcome");
        return;
    }

    match outcome {
        Ok(url) => {
            tracing::info!(task_id = %task_id, url = %url, "result transfer completed");
            entry.status = TransferStatus::Completed;
            entry.mirrored_url = Some(url);
        }
        Err(e) => {
            entry.status = TransferStatus::Failed;
            entry.error = Some(match e {
                Error::Transfer { reason, .. } => reason,
                other => other.to_string(),
            });
        }
    }
}

/// File extension of the URL's last path segment, e.g. `.mp4`
fn artifact_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    let valid = !ext.is_empty()
        && ext.len() < MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| format!(".{}", ext.to_ascii_lowercase()))
}

fn spawn_sweeper(
    cache: Weak<TransferCache>,
    shutdown: CancellationToken,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(cache) = cache.upgrade() else {
                        break;
                    };
                    let evicted = cache.sweep();
                    if evicted > 0 {
                        tracing::info!(evicted = evicted, remaining = cache.len(), "evicted expired transfer entries");
                    } else {
                        tracing::debug!(remaining = cache.len(), "transfer sweep found nothing to evict");
                    }
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }
    })
}
