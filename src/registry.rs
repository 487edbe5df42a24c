//! Download descriptor registry
//!
//! Maps an opaque id to the parameters of a pending download. Descriptors
//! expire after a time-to-live: an expired descriptor is evicted when it is
//! looked up, and a background sweep removes the ones nobody asks for again.

use crate::error::{Error, Result};
use crate::types::DescriptorId;
use crate::utils::sanitize_filename;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

/// Hex characters kept from the id hash
const ID_LEN: usize = 16;

/// Server-side record of a pending download
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDescriptor {
    /// Opaque id handed to the client
    pub id: DescriptorId,
    /// Remote page URL given to the extractor
    pub source_url: String,
    /// Selected extractor format id
    pub format_id: String,
    /// Sanitized attachment filename
    pub filename: String,
    /// Creation time; expiry is measured from here
    pub created_at: DateTime<Utc>,
    /// The selected format already contains audio
    pub has_embedded_audio: bool,
    /// Stream through the real-time muxer rather than the temp-file fallback
    pub use_realtime_mux: bool,
}

/// Store of download descriptors with time-to-live expiry
///
/// Cloning is cheap and clones share the same store.
#[derive(Clone, Debug)]
pub struct DescriptorRegistry {
    entries: Arc<RwLock<HashMap<DescriptorId, DownloadDescriptor>>>,
    ttl: Duration,
    realtime_mux: bool,
    counter: Arc<AtomicU64>,
}

impl DescriptorRegistry {
    /// Create an empty registry
    ///
    /// `realtime_mux` decides whether descriptors for formats without audio
    /// are streamed through the real-time muxer.
    pub fn new(ttl: Duration, realtime_mux: bool) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            realtime_mux,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a new descriptor and return it
    pub async fn create(
        &self,
        source_url: &str,
        format_id: &str,
        filename: &str,
        has_embedded_audio: bool,
    ) -> DownloadDescriptor {
        let created_at = Utc::now();
        let id = self.next_id(source_url, format_id, created_at);

        let descriptor = DownloadDescriptor {
            id: id.clone(),
            source_url: source_url.to_string(),
            format_id: format_id.to_string(),
            filename: sanitize_filename(filename),
            created_at,
            has_embedded_audio,
            use_realtime_mux: self.realtime_mux && !has_embedded_audio,
        };

        self.entries.write().await.insert(id, descriptor.clone());

        tracing::debug!(
            download_id = %descriptor.id,
            format_id = %descriptor.format_id,
            realtime = descriptor.use_realtime_mux,
            "Descriptor created"
        );
        descriptor
    }

    /// Look up a descriptor
    ///
    /// # Errors
    ///
    /// [`Error::DescriptorExpired`] when the id is unknown or older than the
    /// time-to-live; an expired entry is evicted.
    pub async fn get(&self, id: &DescriptorId) -> Result<DownloadDescriptor> {
        self.get_at(id, Utc::now()).await
    }

    pub(crate) async fn get_at(
        &self,
        id: &DescriptorId,
        now: DateTime<Utc>,
    ) -> Result<DownloadDescriptor> {
        let expired = || Error::DescriptorExpired { id: id.to_string() };

        let descriptor = {
            let entries = self.entries.read().await;
            entries.get(id).cloned().ok_or_else(expired)?
        };

        if self.is_expired(&descriptor, now) {
            let mut entries = self.entries.write().await;
            // re-check under the write lock; the id may have been swept meanwhile
            if entries
                .get(id)
                .is_some_and(|d| self.is_expired(d, now))
            {
                entries.remove(id);
            }
            tracing::debug!(download_id = %id, "Descriptor expired on lookup");
            return Err(expired());
        }

        Ok(descriptor)
    }

    /// Remove every expired descriptor, returning how many were removed
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    pub(crate) async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, d| !self.is_expired(d, now));
        before - entries.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = registry.sweep().await;
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired descriptors");
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::debug!("Descriptor sweeper stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Remove every descriptor (shutdown)
    pub async fn drain(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    /// Number of stored descriptors, expired ones included until swept
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry holds no descriptors
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, descriptor: &DownloadDescriptor, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(descriptor.created_at);
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => age > ttl,
            Err(_) => false,
        }
    }

    fn next_id(&self, source_url: &str, format_id: &str, created_at: DateTime<Utc>) -> DescriptorId {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = created_at.timestamp_nanos_opt().unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(source_url.as_bytes());
        hasher.update(format_id.as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(sequence.to_le_bytes());
        let digest = hasher.finalize();

        let hex: String = digest
            .iter()
            .take(ID_LEN / 2)
            .map(|b| format!("{b:02x}"))
            .collect();

        DescriptorId::from_trusted(hex)
    }
}
