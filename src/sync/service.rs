use super::queue::{OfflineQueueStore, QueueError, QueuedSubmission};
use crate::activity::{ActivityPayload, ActivityRecord};
use crate::store::{ActivityStore, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Mutex, TryLockError};
use thiserror::Error;

/// What to keep when a flush fails part-way through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlushPolicy {
    /// Keep every item, including ones the store already accepted. A later
    /// flush resubmits them.
    #[default]
    Batch,
    /// Drop the accepted prefix; keep the failed item and everything after it.
    RequeueUnacknowledged,
}

impl FlushPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushPolicy::Batch => "batch",
            FlushPolicy::RequeueUnacknowledged => "requeueUnacknowledged",
        }
    }
}

impl FromStr for FlushPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "batch" => Ok(FlushPolicy::Batch),
            "requeueUnacknowledged" => Ok(FlushPolicy::RequeueUnacknowledged),
            other => Err(format!("unknown flush policy: {}", other)),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SubmitOutcome {
    Stored { activity: ActivityRecord },
    /// The store could not be reached; the write waits in the queue.
    #[serde(rename_all = "camelCase")]
    SavedOffline { pending: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FlushReport {
    /// Nothing queued.
    Idle,
    /// Another flush holds the queue.
    Busy,
    Synced { sent: usize },
    /// Status for "sync failed, will retry".
    #[serde(rename_all = "camelCase")]
    SyncFailed {
        sent: usize,
        failed_index: usize,
        pending: usize,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The store answered and refused the write; retrying will not help.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Submission path plus flush protocol over one store and one queue slot.
pub struct SyncService {
    store: Box<dyn ActivityStore>,
    queue: OfflineQueueStore,
    policy: FlushPolicy,
    flushing: Mutex<()>,
}

impl SyncService {
    pub fn new(store: Box<dyn ActivityStore>, queue: OfflineQueueStore, policy: FlushPolicy) -> Self {
        Self {
            store,
            queue,
            policy,
            flushing: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &dyn ActivityStore {
        self.store.as_ref()
    }

    pub fn queue(&self) -> &OfflineQueueStore {
        &self.queue
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Tries the store directly; on a transient store failure the payload is
    /// queued with the current time. The payload must already be validated.
    pub fn submit(&self, payload: ActivityPayload) -> Result<SubmitOutcome, SyncError> {
        let submitted_at = Utc::now();
        match self.store.write(&payload, submitted_at) {
            Ok(activity) => Ok(SubmitOutcome::Stored { activity }),
            Err(e) if !e.is_transient() => {
                log::warn!("activity store refused submit: {}", e);
                Err(SyncError::Store(e))
            }
            Err(e) => {
                let pending = self.queue.enqueue(QueuedSubmission {
                    payload,
                    submitted_at,
                })?;
                log::warn!(
                    "direct submit failed, saved offline ({} pending): {}",
                    pending,
                    e
                );
                Ok(SubmitOutcome::SavedOffline {
                    pending,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Replays the queue in FIFO order, one write at a time.
    pub fn flush(&self) -> Result<FlushReport, SyncError> {
        let _flushing = match self.flushing.try_lock() {
            Ok(g) => g,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(FlushReport::Busy),
        };

        let items = self.queue.load();
        if items.is_empty() {
            return Ok(FlushReport::Idle);
        }
        log::info!(
            "flushing {} queued submission(s) to {}",
            items.len(),
            self.store.describe()
        );

        let mut failure: Option<(usize, StoreError)> = None;
        for (i, item) in items.iter().enumerate() {
            if let Err(e) = self.store.write(&item.payload, item.submitted_at) {
                failure = Some((i, e));
                break;
            }
        }

        let Some((failed_index, e)) = failure else {
            self.settle(&items, items.len())?;
            log::info!("offline queue synced ({} sent)", items.len());
            return Ok(FlushReport::Synced { sent: items.len() });
        };

        let keep_from = match self.policy {
            FlushPolicy::Batch => 0,
            FlushPolicy::RequeueUnacknowledged => failed_index,
        };
        let pending = self.settle(&items, keep_from)?;
        if !e.is_transient() {
            log::error!(
                "queued item {} refused by the store and will block later flushes: {}",
                failed_index + 1,
                e
            );
        }
        log::warn!(
            "flush failed at item {} of {}, {} left queued: {}",
            failed_index + 1,
            items.len(),
            pending,
            e
        );
        Ok(FlushReport::SyncFailed {
            sent: failed_index,
            failed_index,
            pending,
            reason: e.to_string(),
        })
    }

    /// Removes the first `sent` items of the flushed snapshot from the slot,
    /// keeping anything enqueued while the flush was running. Returns the
    /// remaining length.
    fn settle(&self, snapshot: &[QueuedSubmission], sent: usize) -> Result<usize, SyncError> {
        let _g = self.queue.lock();
        if sent == 0 {
            return Ok(self.queue.load_unlocked().len());
        }
        let current = self.queue.load_unlocked();
        let remaining: Vec<QueuedSubmission> = if current.starts_with(snapshot) {
            current.into_iter().skip(sent).collect()
        } else {
            // The slot was rewritten underneath us; keep what is there.
            log::warn!("offline queue changed during flush, leaving it as found");
            current
        };
        self.queue.save_unlocked(&remaining)?;
        Ok(remaining.len())
    }
}
