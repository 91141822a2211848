use std::sync::Arc;
use std::time::Duration;

use fw_core::types::UserId;
use tracing::warn;

use crate::kv::{KvError, KvOp, KvStore};

/// FIFO hand-off of user ids from admission to the worker pool.
///
/// Payloads are decimal user ids. Delivery is at-least-once from the
/// consumer's point of view: a worker that dies after popping loses the
/// entry, and the lock's expiry eventually re-opens admission.
#[derive(Clone)]
pub struct TaskQueue {
    kv: Arc<dyn KvStore>,
    name: String,
}

impl TaskQueue {
    pub fn new(kv: Arc<dyn KvStore>, name: impl Into<String>) -> Self {
        Self {
            kv,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The write that enqueues `user_id`, for use inside a larger
    /// transaction.
    pub fn push_op(&self, user_id: UserId) -> KvOp {
        KvOp::Push {
            list: self.name.clone(),
            value: user_id.to_string(),
        }
    }

    pub async fn push(&self, user_id: UserId) -> Result<(), KvError> {
        self.kv.exec(&[], vec![self.push_op(user_id)]).await.map(|_| ())
    }

    /// Pop the next user id, waiting up to `timeout` for one to arrive.
    ///
    /// Entries that do not parse as a user id are logged and dropped; the
    /// wait then starts over.
    pub async fn pop(&self, timeout: Option<Duration>) -> Result<Option<UserId>, KvError> {
        loop {
            let Some(raw) = self.kv.blocking_pop(&self.name, timeout).await? else {
                return Ok(None);
            };
            match raw.trim().parse::<UserId>() {
                Ok(user_id) => return Ok(Some(user_id)),
                Err(e) => warn!(queue = %self.name, payload = %raw, error = %e, "dropping invalid queue entry"),
            }
        }
    }

    pub async fn len(&self) -> Result<usize, KvError> {
        self.kv.list_len(&self.name).await
    }

    pub async fn is_empty(&self) -> Result<bool, KvError> {
        Ok(self.len().await? == 0)
    }
}
