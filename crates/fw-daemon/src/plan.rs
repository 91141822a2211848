use std::fmt;

use fw_core::incremental::IncrementalContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Incremental,
    FullScan,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Incremental => "incremental",
            ScanMode::FullScan => "full_scan",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    /// No checkpoint and no events: the tree predates change logging.
    Bootstrap,
    /// More events pending than one attempt absorbs.
    Overflow,
    PendingChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    NoOp,
    Run { mode: ScanMode, reason: PlanReason },
}

/// Choose what an attempt does from the loaded context.
pub fn select_plan(ctx: &IncrementalContext) -> Plan {
    match (ctx.has_changes, ctx.has_checkpoint, ctx.overflow) {
        (false, true, _) => Plan::NoOp,
        (false, false, _) => Plan::Run {
            mode: ScanMode::FullScan,
            reason: PlanReason::Bootstrap,
        },
        (true, _, true) => Plan::Run {
            mode: ScanMode::FullScan,
            reason: PlanReason::Overflow,
        },
        (true, _, false) => Plan::Run {
            mode: ScanMode::Incremental,
            reason: PlanReason::PendingChanges,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx(has_changes: bool, has_checkpoint: bool, overflow: bool) -> IncrementalContext {
        IncrementalContext {
            has_changes,
            has_checkpoint,
            overflow,
            checkpoint_event_id: 0,
            target_event_id: 0,
            total_events: 0,
            events: Vec::new(),
            summary_text: String::new(),
            changed_file_ids: Vec::new(),
            changed_folder_ids: Vec::new(),
            action_breakdown: BTreeMap::new(),
        }
    }

    #[test]
    fn nothing_pending_with_checkpoint_is_noop() {
        assert_eq!(select_plan(&ctx(false, true, false)), Plan::NoOp);
    }

    #[test]
    fn first_run_on_quiet_tree_bootstraps() {
        assert_eq!(
            select_plan(&ctx(false, false, false)),
            Plan::Run {
                mode: ScanMode::FullScan,
                reason: PlanReason::Bootstrap
            }
        );
    }

    #[test]
    fn overflow_falls_back_to_full_scan() {
        assert_eq!(
            select_plan(&ctx(true, true, true)),
            Plan::Run {
                mode: ScanMode::FullScan,
                reason: PlanReason::Overflow
            }
        );
    }

    #[test]
    fn pending_changes_run_incrementally() {
        for has_checkpoint in [true, false] {
            assert_eq!(
                select_plan(&ctx(true, has_checkpoint, false)),
                Plan::Run {
                    mode: ScanMode::Incremental,
                    reason: PlanReason::PendingChanges
                }
            );
        }
    }
}
