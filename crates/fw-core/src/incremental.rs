use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::CheckpointStore;
use crate::db::StoreError;
use crate::event_log::EventLog;
use crate::summary::{summarize, DEFAULT_SUMMARY_LINES};
use crate::types::{ChangeEvent, EventId, FileId, FolderId, UserId};

/// Default ceiling on the number of events one attempt absorbs.
pub const DEFAULT_MAX_EVENTS: usize = 200;

pub const NO_CHANGES_SUMMARY: &str = "No file-system changes since last organize checkpoint.";

/// What changed for a user since their checkpoint, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalContext {
    pub has_changes: bool,
    pub has_checkpoint: bool,
    /// More events are pending than were loaded.
    pub overflow: bool,
    pub checkpoint_event_id: EventId,
    /// Latest event id at load time; a commit advances the checkpoint here.
    pub target_event_id: EventId,
    pub total_events: u64,
    pub events: Vec<ChangeEvent>,
    pub summary_text: String,
    pub changed_file_ids: Vec<FileId>,
    pub changed_folder_ids: Vec<FolderId>,
    pub action_breakdown: BTreeMap<String, u64>,
}

impl IncrementalContext {
    fn unchanged(has_checkpoint: bool, checkpoint_event_id: EventId, target_event_id: EventId) -> Self {
        Self {
            has_changes: false,
            has_checkpoint,
            overflow: false,
            checkpoint_event_id,
            target_event_id,
            total_events: 0,
            events: Vec::new(),
            summary_text: NO_CHANGES_SUMMARY.to_string(),
            changed_file_ids: Vec::new(),
            changed_folder_ids: Vec::new(),
            action_breakdown: BTreeMap::new(),
        }
    }
}

#[derive(Clone)]
pub struct IncrementalLoader {
    events: EventLog,
    checkpoints: CheckpointStore,
    summary_lines: usize,
}

impl IncrementalLoader {
    pub fn new(events: EventLog, checkpoints: CheckpointStore) -> Self {
        Self {
            events,
            checkpoints,
            summary_lines: DEFAULT_SUMMARY_LINES,
        }
    }

    pub fn with_summary_lines(mut self, lines: usize) -> Self {
        self.summary_lines = lines;
        self
    }

    /// Build the context for `user_id`. `max_events` is clamped to at least 1.
    pub async fn load(&self, user_id: UserId, max_events: usize) -> Result<IncrementalContext, StoreError> {
        let max_events = max_events.max(1);

        let checkpoint = self.checkpoints.get(user_id).await?;
        let has_checkpoint = checkpoint.is_some();
        let checkpoint_event_id = checkpoint.map(|c| c.last_event_id).unwrap_or(0);
        let target_event_id = self.events.latest_event_id(user_id).await?;

        if target_event_id <= checkpoint_event_id {
            debug!(user_id, checkpoint_event_id, target_event_id, "no pending changes");
            return Ok(IncrementalContext::unchanged(
                has_checkpoint,
                checkpoint_event_id,
                target_event_id,
            ));
        }

        let window = self
            .events
            .window(user_id, checkpoint_event_id, target_event_id, max_events)
            .await?;
        let overflow = window.total > max_events as u64;
        let summary = summarize(
            &window.events,
            window.total,
            checkpoint_event_id,
            target_event_id,
            self.summary_lines,
        );
        debug!(
            user_id,
            checkpoint_event_id,
            target_event_id,
            total = window.total,
            overflow,
            "incremental context loaded"
        );

        Ok(IncrementalContext {
            has_changes: window.total > 0,
            has_checkpoint,
            overflow,
            checkpoint_event_id,
            target_event_id,
            total_events: window.total,
            events: window.events,
            summary_text: summary.summary_text,
            changed_file_ids: summary.changed_file_ids,
            changed_folder_ids: summary.changed_folder_ids,
            action_breakdown: summary.action_breakdown,
        })
    }
}
