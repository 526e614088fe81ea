use crate::activity::ActivityPayload;
use crate::db::{self, SharedConn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const QUEUE_SLOT: &str = "eduwhisper.offlineQueue";

/// One write that could not reach the store, in the order it was attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSubmission {
    pub payload: ActivityPayload,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue slot storage failed: {0}")]
    Storage(String),
    #[error("queue serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A named durable string slot, the local-storage equivalent.
pub trait SlotStorage: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<String>, QueueError>;
    fn write(&self, name: &str, value: &str) -> Result<(), QueueError>;
}

pub struct SqliteSlotStorage {
    conn: SharedConn,
}

impl SqliteSlotStorage {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }
}

impl SlotStorage for SqliteSlotStorage {
    fn read(&self, name: &str) -> Result<Option<String>, QueueError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        db::slot_get(&conn, name).map_err(|e| QueueError::Storage(e.to_string()))
    }

    fn write(&self, name: &str, value: &str) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        db::slot_set(&conn, name, value).map_err(|e| QueueError::Storage(e.to_string()))
    }
}

/// Owns the persisted queue slot. Every read-modify-write happens under
/// `guard`, so interleaved submits cannot drop each other's entries.
pub struct OfflineQueueStore {
    storage: Box<dyn SlotStorage>,
    guard: Mutex<()>,
}

impl OfflineQueueStore {
    pub fn new(storage: Box<dyn SlotStorage>) -> Self {
        Self {
            storage,
            guard: Mutex::new(()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Full queue in FIFO order. Unreadable or corrupt slot contents count
    /// as an empty queue.
    pub fn load(&self) -> Vec<QueuedSubmission> {
        let _g = self.lock();
        self.load_unlocked()
    }

    pub(crate) fn load_unlocked(&self) -> Vec<QueuedSubmission> {
        let raw = match self.storage.read(QUEUE_SLOT) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("offline queue slot unreadable, treating as empty: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<QueuedSubmission>>(&raw) {
            Ok(items) => items,
            Err(e) => {
                log::warn!(
                    "offline queue slot corrupt ({} bytes), treating as empty: {}",
                    raw.len(),
                    e
                );
                Vec::new()
            }
        }
    }

    pub(crate) fn save_unlocked(&self, items: &[QueuedSubmission]) -> Result<(), QueueError> {
        let raw = serde_json::to_string(items)?;
        self.storage.write(QUEUE_SLOT, &raw)
    }

    /// Appends one submission and returns the new queue length.
    pub fn enqueue(&self, item: QueuedSubmission) -> Result<usize, QueueError> {
        let _g = self.lock();
        let mut items = self.load_unlocked();
        items.push(item);
        self.save_unlocked(&items)?;
        Ok(items.len())
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemorySlots;
    use super::*;
    use crate::activity::ActivityType;
    use std::sync::Arc;
    use std::thread;

    fn item(name: &str) -> QueuedSubmission {
        QueuedSubmission {
            payload: ActivityPayload {
                student_name: name.to_string(),
                grade: "N/A".to_string(),
                subject: String::new(),
                kind: ActivityType::Note,
                details: "note".to_string(),
                score: None,
                attachment: None,
            },
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn enqueue_preserves_insertion_order() {
        let slots = MemorySlots::default();
        let q = OfflineQueueStore::new(Box::new(slots.clone()));
        assert_eq!(q.enqueue(item("a")).expect("enqueue"), 1);
        assert_eq!(q.enqueue(item("b")).expect("enqueue"), 2);
        let names: Vec<_> = q
            .load()
            .into_iter()
            .map(|i| i.payload.student_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(slots.raw(QUEUE_SLOT).is_some());
    }

    #[test]
    fn corrupt_slot_reads_as_empty_and_is_replaced_on_enqueue() {
        let slots = MemorySlots::default();
        slots.put(QUEUE_SLOT, "{not json");
        let q = OfflineQueueStore::new(Box::new(slots.clone()));
        assert_eq!(q.len(), 0);
        q.enqueue(item("a")).expect("enqueue");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn concurrent_enqueues_are_not_lost() {
        let slots = MemorySlots::default();
        let q = Arc::new(OfflineQueueStore::new(Box::new(slots)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..10 {
                        q.enqueue(item(&format!("{t}-{i}"))).expect("enqueue");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join");
        }
        assert_eq!(q.len(), 80);
    }

    #[test]
    fn sqlite_slot_survives_reopen_of_the_store() {
        let conn = crate::db::shared(crate::db::open_in_memory().expect("db"));
        {
            let q = OfflineQueueStore::new(Box::new(SqliteSlotStorage::new(conn.clone())));
            q.enqueue(item("a")).expect("enqueue");
        }
        let q = OfflineQueueStore::new(Box::new(SqliteSlotStorage::new(conn)));
        assert_eq!(q.load()[0].payload.student_name, "a");
    }
}
