//! Bounded in-memory log buffer.
//!
//! Holds the most recent `game:log` payloads from engine nodes and hub
//! lifecycle notes so consoles can fetch a tail without a datastore. Every
//! new entry is also published to live subscribers.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use pixelhub_protocol::{LogEntry, LogKind};
use tokio::sync::broadcast;

/// Default number of entries kept.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Entries a live subscriber may fall behind before it skips ahead.
const LIVE_BUFFER: usize = 256;

struct Inner {
    entries: VecDeque<LogEntry>,
    next_id: u64,
}

/// Ring buffer of [`LogEntry`] values; the oldest entry is evicted first.
pub struct LogStore {
    inner: Mutex<Inner>,
    capacity: usize,
    live: broadcast::Sender<LogEntry>,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (live, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                next_id: 1,
            }),
            capacity,
            live,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries are plain data, a poisoned lock still holds a usable buffer.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry, publish it to subscribers and return its id.
    pub fn push(&self, kind: LogKind, message: impl Into<String>) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
        }
        let entry = LogEntry {
            id,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        };
        inner.entries.push_back(entry.clone());
        drop(inner);

        // No subscribers is fine.
        let _ = self.live.send(entry);
        id
    }

    /// Receive every entry pushed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.live.subscribe()
    }

    /// The newest `limit` entries (all when `None`), oldest first,
    /// optionally restricted to one kind.
    pub fn tail(&self, limit: Option<usize>, kind: Option<LogKind>) -> Vec<LogEntry> {
        let inner = self.lock();
        let mut selected: Vec<LogEntry> = inner
            .entries
            .iter()
            .rev()
            .filter(|entry| kind.is_none_or(|k| entry.kind == k))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    /// Drop every entry. Ids restart at 1. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.next_id = 1;
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
