use chrono::Utc;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::db::{parse_timestamp, Database, StoreError};
use crate::types::{Checkpoint, EventId, UserId};

/// Per-user reconciliation cursors.
///
/// `last_event_id` only ever moves forward: the upsert takes the max of the
/// stored and requested values inside a single statement, so concurrent
/// writers cannot regress it.
#[derive(Clone)]
pub struct CheckpointStore {
    conn: Connection,
}

impl CheckpointStore {
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection().clone(),
        }
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<Checkpoint>, StoreError> {
        let checkpoint = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT user_id, last_event_id, last_full_scan_at, updated_at
                         FROM organize_checkpoints WHERE user_id = ?1",
                        rusqlite::params![user_id],
                        row_to_checkpoint,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(checkpoint)
    }

    /// Move the cursor forward to `event_id` (never backwards), optionally
    /// stamping `last_full_scan_at`.
    ///
    /// Returns `false` when the write failed. The failure is logged and
    /// swallowed: the stored value is left as it was and the next cycle
    /// recomputes its window from it.
    pub async fn advance(&self, user_id: UserId, event_id: EventId, mark_full_scan: bool) -> bool {
        let target = event_id.max(0);
        let now = Utc::now().to_rfc3339();
        let result = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO organize_checkpoints
                        (user_id, last_event_id, last_full_scan_at, updated_at)
                     VALUES (?1, ?2, CASE WHEN ?3 THEN ?4 ELSE NULL END, ?4)
                     ON CONFLICT(user_id) DO UPDATE SET
                        last_event_id = MAX(organize_checkpoints.last_event_id,
                                            excluded.last_event_id),
                        last_full_scan_at = CASE WHEN ?3 THEN excluded.last_full_scan_at
                                                 ELSE organize_checkpoints.last_full_scan_at END,
                        updated_at = excluded.updated_at",
                    rusqlite::params![user_id, target, mark_full_scan, now],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                debug!(user_id, event_id = target, mark_full_scan, "checkpoint advanced");
                true
            }
            Err(e) => {
                // The transaction is dropped uncommitted, which rolls it back.
                warn!(user_id, event_id = target, error = %e, "failed to update checkpoint");
                false
            }
        }
    }
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    let full_scan: Option<String> = row.get(2)?;
    let updated_at: String = row.get(3)?;
    Ok(Checkpoint {
        user_id: row.get(0)?,
        last_event_id: row.get(1)?,
        last_full_scan_at: full_scan.map(|s| parse_timestamp(2, &s)).transpose()?,
        updated_at: parse_timestamp(3, &updated_at)?,
    })
}
