use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fw_core::types::UserId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

/// Where end-of-attempt reports go. Delivery is fire-and-forget.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: UserId, title: &str, content: &str) -> Result<(), NotifyError>;
}

/// Deliver and swallow any failure.
pub async fn deliver(sink: &dyn NotificationSink, user_id: UserId, title: &str, content: &str) {
    if let Err(e) = sink.notify(user_id, title, content).await {
        warn!(user_id, error = %e, "notification dropped");
    }
}

// ---------------------------------------------------------------------------
// InboxSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// Bounded in-memory inbox; the oldest entries fall off first.
#[derive(Debug)]
pub struct InboxSink {
    notifications: Mutex<Vec<Notification>>,
    max_notifications: usize,
}

impl InboxSink {
    pub fn new(max: usize) -> Self {
        Self {
            notifications: Mutex::new(Vec::new()),
            max_notifications: max,
        }
    }

    fn with_inbox<R>(&self, f: impl FnOnce(&mut Vec<Notification>) -> R) -> R {
        let mut guard = self.notifications.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn push(&self, n: Notification) {
        self.with_inbox(|inbox| {
            inbox.push(n);
            while inbox.len() > self.max_notifications {
                inbox.remove(0);
            }
        });
    }

    pub fn list_all(&self) -> Vec<Notification> {
        self.with_inbox(|inbox| inbox.clone())
    }

    pub fn list_for(&self, user_id: UserId) -> Vec<Notification> {
        self.with_inbox(|inbox| inbox.iter().filter(|n| n.user_id == user_id).cloned().collect())
    }

    pub fn list_unread(&self) -> Vec<Notification> {
        self.with_inbox(|inbox| inbox.iter().filter(|n| !n.read).cloned().collect())
    }

    pub fn count_unread(&self) -> usize {
        self.with_inbox(|inbox| inbox.iter().filter(|n| !n.read).count())
    }

    pub fn mark_read(&self, id: &Uuid) -> bool {
        self.with_inbox(|inbox| match inbox.iter_mut().find(|n| n.id == *id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        })
    }

    pub fn mark_all_read(&self) {
        self.with_inbox(|inbox| inbox.iter_mut().for_each(|n| n.read = true));
    }

    pub fn clear_read(&self) {
        self.with_inbox(|inbox| inbox.retain(|n| !n.read));
    }
}

impl Default for InboxSink {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl NotificationSink for InboxSink {
    async fn notify(&self, user_id: UserId, title: &str, content: &str) -> Result<(), NotifyError> {
        self.push(Notification {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            read: false,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LogSink
// ---------------------------------------------------------------------------

/// Writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, user_id: UserId, title: &str, content: &str) -> Result<(), NotifyError> {
        info!(user_id, title, "{content}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSink;

    #[async_trait]
    impl NotificationSink for BrokenSink {
        async fn notify(&self, _: UserId, _: &str, _: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn inbox_keeps_newest() {
        let inbox = InboxSink::new(2);
        for title in ["n1", "n2", "n3"] {
            inbox.notify(1, title, "body").await.unwrap();
        }
        let all = inbox.list_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "n2");
        assert_eq!(all[1].title, "n3");
    }

    #[tokio::test]
    async fn unread_tracking() {
        let inbox = InboxSink::new(10);
        inbox.notify(1, "a", "").await.unwrap();
        inbox.notify(2, "b", "").await.unwrap();
        assert_eq!(inbox.count_unread(), 2);

        let id = inbox.list_for(1)[0].id;
        assert!(inbox.mark_read(&id));
        assert!(!inbox.mark_read(&Uuid::new_v4()));
        assert_eq!(inbox.list_unread().len(), 1);

        inbox.clear_read();
        assert_eq!(inbox.list_all().len(), 1);
        inbox.mark_all_read();
        assert_eq!(inbox.count_unread(), 0);
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() {
        deliver(&BrokenSink, 1, "t", "c").await;
        deliver(&LogSink, 1, "t", "c").await;
    }
}
