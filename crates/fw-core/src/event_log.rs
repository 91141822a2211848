//! Append-only log of structural tree mutations.
//!
//! The log is an advisory side channel: every writer swallows storage
//! failures (logging a warning) so a broken log can never abort the tree
//! mutation that produced the event. Reads propagate errors normally.

use chrono::Utc;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::db::{parse_json, parse_kind, parse_timestamp, Database, StoreError};
use crate::types::{ChangeEvent, EventId, NewChangeEvent, UserId};

const EVENT_COLUMNS: &str = "id, user_id, entity_type, entity_id, action, old_parent_id, \
     new_parent_id, old_name, new_name, payload, created_at";

/// A bounded slice of the log together with the exact size of the range it
/// was taken from.
#[derive(Debug, Clone, Default)]
pub struct EventWindow {
    /// Exact number of events in `(after, upto]`, independent of `limit`.
    pub total: u64,
    /// At most `limit` events from the start of the range, ascending by id.
    pub events: Vec<ChangeEvent>,
}

#[derive(Clone)]
pub struct EventLog {
    conn: Connection,
}

impl EventLog {
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection().clone(),
        }
    }

    /// Append one event. Returns `false` (after logging) on any failure.
    pub async fn append(&self, user_id: UserId, event: NewChangeEvent) -> bool {
        self.append_batch(user_id, vec![event]).await > 0
    }

    /// Append several events in one transaction.
    ///
    /// Events without an `entity_id` are dropped before insertion and are
    /// not counted as failures. Returns the number of rows written, which is
    /// 0 when the whole batch failed.
    pub async fn append_batch(&self, user_id: UserId, events: Vec<NewChangeEvent>) -> usize {
        let rows: Vec<(NewChangeEvent, i64)> = events
            .into_iter()
            .filter_map(|e| e.entity_id.map(|id| (e, id)))
            .collect();
        if rows.is_empty() {
            return 0;
        }

        let created_at = Utc::now().to_rfc3339();
        let result = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO file_change_events (user_id, entity_type, entity_id,
                            action, old_parent_id, new_parent_id, old_name, new_name,
                            payload, created_at)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                    )?;
                    for (event, entity_id) in &rows {
                        stmt.execute(rusqlite::params![
                            user_id,
                            event.entity_type.as_str(),
                            entity_id,
                            event.action.as_str(),
                            event.old_parent_id,
                            event.new_parent_id,
                            event.old_name,
                            event.new_name,
                            event.payload.as_ref().map(|v| v.to_string()),
                            created_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await;

        match result {
            Ok(written) => {
                debug!(user_id, written, "change events appended");
                written
            }
            Err(e) => {
                warn!(user_id, error = %e, "failed to write change events");
                0
            }
        }
    }

    /// Highest event id for the user, or 0 when the user has no events.
    pub async fn latest_event_id(&self, user_id: UserId) -> Result<EventId, StoreError> {
        let id = self
            .conn
            .call(move |conn| {
                let id: Option<i64> = conn.query_row(
                    "SELECT MAX(id) FROM file_change_events WHERE user_id = ?1",
                    rusqlite::params![user_id],
                    |r| r.get(0),
                )?;
                Ok(id.unwrap_or(0))
            })
            .await?;
        Ok(id)
    }

    /// Read the events in `(after, upto]` for a user, capped at `limit`
    /// rows, together with the exact count of the range.
    ///
    /// Both reads run inside one transaction so the count and the rows
    /// describe the same snapshot.
    pub async fn window(
        &self,
        user_id: UserId,
        after: EventId,
        upto: EventId,
        limit: usize,
    ) -> Result<EventWindow, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let window = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let total: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM file_change_events
                     WHERE user_id = ?1 AND id > ?2 AND id <= ?3",
                    rusqlite::params![user_id, after, upto],
                    |r| r.get(0),
                )?;
                let total = total.max(0) as u64;
                let events = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {EVENT_COLUMNS} FROM file_change_events
                         WHERE user_id = ?1 AND id > ?2 AND id <= ?3
                         ORDER BY id ASC LIMIT ?4"
                    ))?;
                    let mut rows = stmt.query(rusqlite::params![user_id, after, upto, limit])?;
                    let mut out = Vec::new();
                    while let Some(row) = rows.next()? {
                        out.push(row_to_event(row)?);
                    }
                    out
                };
                tx.commit()?;
                Ok(EventWindow { total, events })
            })
            .await?;
        Ok(window)
    }

    /// All events for a user with `id > after`, ascending.
    pub async fn events_after(
        &self,
        user_id: UserId,
        after: EventId,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        let window = self.window(user_id, after, EventId::MAX, usize::MAX).await?;
        Ok(window.events)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeEvent> {
    let entity_type: String = row.get(2)?;
    let action: String = row.get(4)?;
    let payload: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;

    Ok(ChangeEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        entity_type: parse_kind(2, &entity_type)?,
        entity_id: row.get(3)?,
        action: parse_kind(4, &action)?,
        old_parent_id: row.get(5)?,
        new_parent_id: row.get(6)?,
        old_name: row.get(7)?,
        new_name: row.get(8)?,
        payload: parse_json(9, payload)?,
        created_at: parse_timestamp(10, &created_at)?,
    })
}
