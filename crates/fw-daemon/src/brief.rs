//! Plain-text briefs handed to the policy executor.

use fw_core::incremental::IncrementalContext;
use fw_core::invariants::ValidationReport;
use fw_core::types::UserId;

const GOALS: &str = "\
Structural goals:
- Single-content principle: a folder must not hold both files and subfolders. Resolve it by creating folders and moving items.
- No empty folders: delete every folder left without files or subfolders.
- Merge duplicate folders (same name under the same parent) with `merge_folders`.
- Group sibling folders of the same topic under a common parent with `move_folder`.
- Classify files by topic or project rather than by file format; call `get_file_information` when a file is unclear.";

const CONSTRAINTS: &str = "\
Constraints:
- Only move, rename and inspect files; never change or delete file content.
- Work in small steps and check the result of each call before continuing.
- Before finishing, call `find_mixed_content_folders` and `find_empty_folders` and make sure both report clean.";

/// Whole-tree brief, used for bootstrap and overflow attempts.
pub fn full_scan_brief(user_id: UserId) -> String {
    format!(
        "You are organizing the folder tree of user {user_id}.\n\n\
         Start by calling `list_tree`, `find_duplicate_folders`, \
         `find_mixed_content_folders` and `find_empty_folders` to survey the whole tree.\n\n\
         {GOALS}\n\n{CONSTRAINTS}"
    )
}

/// Brief scoped to what changed since the checkpoint.
pub fn incremental_brief(user_id: UserId, ctx: &IncrementalContext) -> String {
    format!(
        "You are organizing the folder tree of user {user_id}.\n\n\
         Only part of the tree changed since the last organize pass. \
         Focus on the affected items first, then confirm the rest of the tree is still clean.\n\n\
         Changed folder ids: {folders}\n\
         Changed file ids: {files}\n\n\
         Change summary:\n{summary}\n\n\
         {GOALS}\n\n{CONSTRAINTS}",
        folders = join_ids(&ctx.changed_folder_ids),
        files = join_ids(&ctx.changed_file_ids),
        summary = ctx.summary_text,
    )
}

/// Follow-up brief listing the violations validation found.
pub fn corrective_brief(report: &ValidationReport) -> String {
    format!(
        "Organization is not yet complete. Please resolve the following issues:\n{}\nConfirm again once fixed.",
        report.render_violations()
    )
}

fn join_ids(ids: &[i64]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_core::invariants::{InvariantKind, InvariantReport};
    use fw_core::types::FolderRef;
    use std::collections::BTreeMap;

    #[test]
    fn full_scan_has_no_scoping_hints() {
        let brief = full_scan_brief(7);
        assert!(brief.contains("user 7"));
        assert!(brief.contains("list_tree"));
        assert!(!brief.contains("Changed folder ids"));
    }

    #[test]
    fn incremental_lists_changed_ids_and_summary() {
        let ctx = IncrementalContext {
            has_changes: true,
            has_checkpoint: true,
            overflow: false,
            checkpoint_event_id: 10,
            target_event_id: 11,
            total_events: 1,
            events: Vec::new(),
            summary_text: "Event range: (10, 11]".into(),
            changed_file_ids: Vec::new(),
            changed_folder_ids: vec![2, 9],
            action_breakdown: BTreeMap::new(),
        };
        let brief = incremental_brief(3, &ctx);
        assert!(brief.contains("Changed folder ids: 2, 9"));
        assert!(brief.contains("Changed file ids: none"));
        assert!(brief.contains("Event range: (10, 11]"));
    }

    #[test]
    fn corrective_brief_quotes_violations() {
        let report = ValidationReport {
            mixed_content: InvariantReport {
                kind: InvariantKind::MixedContent,
                violations: vec![FolderRef::root()],
            },
            empty_folders: InvariantReport {
                kind: InvariantKind::EmptyFolder,
                violations: Vec::new(),
            },
        };
        let brief = corrective_brief(&report);
        assert!(brief.starts_with("Organization is not yet complete."));
        assert!(brief.contains(&report.render_violations()));
    }
}
