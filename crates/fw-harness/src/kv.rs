//! Key/value and list storage with watch-based optimistic transactions.
//!
//! The model is the familiar WATCH / MULTI / EXEC one: read a key together
//! with its version, then submit a batch of writes guarded by the versions
//! you saw. The batch applies atomically when none of the watched keys has
//! been written in between, and is rejected as a whole otherwise.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("list `{0}` is closed")]
    Closed(String),
}

/// A key's current value and the version of its last write.
///
/// Absent keys still carry a version (0 until a key is first removed), so "absent" can
/// be watched like any other state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Option<String>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub key: String,
    pub version: u64,
}

impl Watch {
    pub fn new(key: impl Into<String>, version: u64) -> Self {
        Self {
            key: key.into(),
            version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    /// Append to the tail of a FIFO list.
    Push {
        list: String,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Committed,
    /// A watched key changed; nothing was applied.
    Conflict,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Versioned, KvError>;

    /// Apply `ops` atomically if every watched key is still at its version.
    async fn exec(&self, watches: &[Watch], ops: Vec<KvOp>) -> Result<ExecOutcome, KvError>;

    /// Pop the head of `list`, waiting up to `timeout` (forever if `None`).
    async fn blocking_pop(&self, list: &str, timeout: Option<Duration>) -> Result<Option<String>, KvError>;

    async fn list_len(&self, list: &str) -> Result<usize, KvError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.exec(
            &[],
            vec![KvOp::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            }],
        )
        .await
        .map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.exec(&[], vec![KvOp::Delete { key: key.to_string() }])
            .await
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    value: Option<String>,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live_value(&self, now: Instant) -> Option<&String> {
        match self.expires_at {
            Some(at) if at <= now => None,
            _ => self.value.as_ref(),
        }
    }
}

type List = (flume::Sender<String>, flume::Receiver<String>);

/// Process-local [`KvStore`].
///
/// Reads are lock-free; every write goes through `exec` under a single
/// commit mutex, which makes the watch check and the apply one step.
/// Versions come from one global counter, so a key that is deleted and
/// re-created never returns to a version a watcher has already seen.
///
/// Deleted and expired keys are dropped from the map. An absent key reads
/// at the version of the latest removal, so a watch on "absent" still
/// conflicts if the key was written and removed in between.
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
    lists: DashMap<String, List>,
    commit: Mutex<()>,
    next_version: AtomicU64,
    removed_at: AtomicU64,
    forced_conflicts: AtomicUsize,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            lists: DashMap::new(),
            commit: Mutex::new(()),
            next_version: AtomicU64::new(1),
            removed_at: AtomicU64::new(0),
            forced_conflicts: AtomicUsize::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make the next `n` guarded `exec` calls report a conflict, as if
    /// another client had written a watched key.
    #[cfg(any(test, feature = "test-util"))]
    pub fn force_conflicts(&self, n: usize) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    fn list(&self, name: &str) -> List {
        self.lists
            .entry(name.to_string())
            .or_insert_with(flume::unbounded)
            .value()
            .clone()
    }

    fn absent_version(&self) -> u64 {
        self.removed_at.load(Ordering::SeqCst)
    }

    /// Caller holds the commit lock.
    fn sweep_expired(&self, now: Instant) {
        let mut swept = false;
        self.entries.retain(|_, entry| {
            let live = entry.live_value(now).is_some();
            swept |= !live;
            live
        });
        if swept {
            let version = self.next_version.fetch_add(1, Ordering::SeqCst);
            self.removed_at.store(version, Ordering::SeqCst);
        }
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Versioned, KvError> {
        let now = Instant::now();
        Ok(match self.entries.get(key) {
            Some(entry) => Versioned {
                value: entry.live_value(now).cloned(),
                version: entry.version,
            },
            None => Versioned {
                value: None,
                version: self.absent_version(),
            },
        })
    }

    async fn exec(&self, watches: &[Watch], ops: Vec<KvOp>) -> Result<ExecOutcome, KvError> {
        let _guard = self.commit.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        self.sweep_expired(now);

        if !watches.is_empty() && self.take_forced_conflict() {
            debug!("forced conflict");
            return Ok(ExecOutcome::Conflict);
        }
        for watch in watches {
            let current = self
                .entries
                .get(&watch.key)
                .map(|e| e.version)
                .unwrap_or_else(|| self.absent_version());
            if current != watch.version {
                debug!(key = %watch.key, seen = watch.version, current, "watched key changed");
                return Ok(ExecOutcome::Conflict);
            }
        }

        for op in ops {
            match op {
                KvOp::Set { key, value, ttl } => {
                    let version = self.next_version.fetch_add(1, Ordering::SeqCst);
                    self.entries.insert(
                        key,
                        Entry {
                            value: Some(value),
                            version,
                            expires_at: ttl.map(|t| now + t),
                        },
                    );
                }
                KvOp::Delete { key } => {
                    if self.entries.remove(&key).is_some() {
                        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
                        self.removed_at.store(version, Ordering::SeqCst);
                    }
                }
                KvOp::Push { list, value } => {
                    let (tx, _) = self.list(&list);
                    tx.send(value).map_err(|_| KvError::Closed(list))?;
                }
            }
        }
        Ok(ExecOutcome::Committed)
    }

    async fn blocking_pop(&self, list: &str, timeout: Option<Duration>) -> Result<Option<String>, KvError> {
        let (_, rx) = self.list(list);
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.recv_async()).await {
                Ok(r) => r,
                Err(_) => return Ok(None),
            },
            None => rx.recv_async().await,
        };
        received
            .map(Some)
            .map_err(|_| KvError::Closed(list.to_string()))
    }

    async fn list_len(&self, list: &str) -> Result<usize, KvError> {
        Ok(self.list(list).1.len())
    }
}
