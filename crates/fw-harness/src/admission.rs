//! Per-user single-flight admission.
//!
//! A user is admitted by writing `queued` to their lock key and pushing
//! their id onto the task queue in one optimistic transaction guarded by a
//! watch on the key. The lock stays until [`AdmissionLock::release`] or,
//! if the worker dies, until its safety-net expiry.

use std::sync::Arc;
use std::time::Duration;

use fw_core::config::AdmissionConfig;
use fw_core::types::UserId;
use tracing::{debug, info};

use crate::kv::{ExecOutcome, KvError, KvOp, KvStore, Watch};
use crate::queue::TaskQueue;

pub const QUEUED: &str = "queued";
pub const RUNNING: &str = "running";

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("admission store: {0}")]
    Kv(#[from] KvError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Absent,
    Queued,
    Running,
}

impl LockState {
    /// Unknown values count as queued: any present value means admitted.
    fn from_value(value: Option<&str>) -> Self {
        match value {
            None => LockState::Absent,
            Some(RUNNING) => LockState::Running,
            Some(_) => LockState::Queued,
        }
    }
}

#[derive(Clone)]
pub struct AdmissionLock {
    kv: Arc<dyn KvStore>,
    queue: TaskQueue,
    prefix: String,
    ttl: Duration,
}

impl AdmissionLock {
    pub fn new(kv: Arc<dyn KvStore>, queue: TaskQueue, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            kv,
            queue,
            prefix: prefix.into(),
            ttl,
        }
    }

    pub fn from_config(kv: Arc<dyn KvStore>, config: &AdmissionConfig) -> Self {
        let queue = TaskQueue::new(kv.clone(), config.queue_name.clone());
        Self::new(
            kv,
            queue,
            config.lock_prefix.clone(),
            Duration::from_secs(config.lock_ttl_secs),
        )
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn key(&self, user_id: UserId) -> String {
        format!("{}:{}", self.prefix, user_id)
    }

    /// Admit `user_id` unless a task for them is already queued or running.
    ///
    /// On success the lock reads `queued` and the user id is on the queue;
    /// both writes land together or not at all. A concurrent write to the
    /// key between the read and the commit restarts the attempt.
    pub async fn try_admit(&self, user_id: UserId) -> Result<bool, AdmissionError> {
        let key = self.key(user_id);
        let mut conflicts = 0u32;
        loop {
            let current = self.kv.get(&key).await?;
            if current.value.is_some() {
                debug!(user_id, "reconciliation already admitted");
                return Ok(false);
            }

            let ops = vec![
                KvOp::Set {
                    key: key.clone(),
                    value: QUEUED.to_string(),
                    ttl: Some(self.ttl),
                },
                self.queue.push_op(user_id),
            ];
            match self.kv.exec(&[Watch::new(&key, current.version)], ops).await? {
                ExecOutcome::Committed => {
                    info!(user_id, conflicts, "reconciliation admitted");
                    return Ok(true);
                }
                ExecOutcome::Conflict => {
                    conflicts += 1;
                    debug!(user_id, conflicts, "admission conflict, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Flip the lock to `running` and restart its expiry.
    pub async fn mark_running(&self, user_id: UserId) -> Result<(), AdmissionError> {
        self.kv.set(&self.key(user_id), RUNNING, Some(self.ttl)).await?;
        Ok(())
    }

    /// Drop the lock unconditionally.
    pub async fn release(&self, user_id: UserId) -> Result<(), AdmissionError> {
        self.kv.delete(&self.key(user_id)).await?;
        debug!(user_id, "admission lock released");
        Ok(())
    }

    pub async fn state(&self, user_id: UserId) -> Result<LockState, AdmissionError> {
        let current = self.kv.get(&self.key(user_id)).await?;
        Ok(LockState::from_value(current.value.as_deref()))
    }
}
