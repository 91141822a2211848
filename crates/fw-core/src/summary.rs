//! Condenses a window of change events into the text and scope hints an
//! incremental reconciliation brief is built from.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Write as _};

use serde::{Deserialize, Serialize};

use crate::types::{ChangeEvent, EntityType, EventId, FileId, FolderId};

/// Default number of sampled event lines in a summary.
pub const DEFAULT_SUMMARY_LINES: usize = 40;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub summary_text: String,
    /// Sorted, deduplicated.
    pub changed_file_ids: Vec<FileId>,
    /// Sorted, deduplicated. Includes the old/new parents of every event.
    pub changed_folder_ids: Vec<FolderId>,
    /// `"{entity_type}:{action}"` -> count, over the whole batch.
    pub action_breakdown: BTreeMap<String, u64>,
}

/// Summarize `events`, which were read from the range `(from, to]`.
///
/// `total` is the exact size of that range and may exceed `events.len()`
/// when the window was truncated. Only the first `max_lines` events are
/// rendered as sample lines; the breakdown and id sets cover every event
/// passed in.
pub fn summarize(
    events: &[ChangeEvent],
    total: u64,
    from: EventId,
    to: EventId,
    max_lines: usize,
) -> ChangeSummary {
    let mut breakdown: BTreeMap<String, u64> = BTreeMap::new();
    let mut files = BTreeSet::new();
    let mut folders = BTreeSet::new();
    let mut lines = Vec::new();

    for event in events {
        *breakdown
            .entry(format!("{}:{}", event.entity_type, event.action))
            .or_default() += 1;

        if event.entity_id > 0 {
            match event.entity_type {
                EntityType::File => files.insert(event.entity_id),
                EntityType::Folder => folders.insert(event.entity_id),
            };
        }
        folders.extend(event.old_parent_id);
        folders.extend(event.new_parent_id);

        if lines.len() < max_lines {
            lines.push(format!(
                "- #{} {}:{} id={} parent({}->{}) name({}->{})",
                event.id,
                event.entity_type,
                event.action,
                event.entity_id,
                Nullable(&event.old_parent_id),
                Nullable(&event.new_parent_id),
                Nullable(&event.old_name),
                Nullable(&event.new_name),
            ));
        }
    }

    let mut text = String::new();
    let _ = writeln!(text, "Event range: ({from}, {to}]");
    let _ = writeln!(text, "Total events: {total}");
    text.push_str("Action breakdown:\n");
    if breakdown.is_empty() {
        text.push_str("- none\n");
    }
    for (key, count) in &breakdown {
        let _ = writeln!(text, "- {key}: {count}");
    }
    text.push_str("Sample changes:");
    if lines.is_empty() {
        text.push_str("\n- none");
    }
    for line in &lines {
        text.push('\n');
        text.push_str(line);
    }
    let omitted = events.len().saturating_sub(lines.len());
    if omitted > 0 {
        let _ = write!(text, "\n- ... {omitted} more not shown");
    }

    ChangeSummary {
        summary_text: text,
        changed_file_ids: files.into_iter().collect(),
        changed_folder_ids: folders.into_iter().collect(),
        action_breakdown: breakdown,
    }
}

struct Nullable<'a, T>(&'a Option<T>);

impl<T: Display> Display for Nullable<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(v) => v.fmt(f),
            None => f.write_str("null"),
        }
    }
}
