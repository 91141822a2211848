//! The policy executor seam.
//!
//! A reconciliation attempt hands an executor a brief (plain text describing
//! the goal) plus a [`CapabilityHost`], and the executor decides which
//! capabilities to invoke. The driver treats it as a black box: it only
//! looks at the trace the host recorded, the usage the executor reported,
//! and whether the call failed.
//!
//! Two implementations live here:
//!
//! - [`ScriptedExecutor`] replays pre-queued rounds of tool calls and
//!   records every request it receives. Tests use it to drive the
//!   reconciler through exact sequences.
//! - [`RuleExecutor`] repairs the two structural invariants directly: it
//!   splits mixed folders by moving their files into an `Unsorted` child and
//!   deletes empty folders until none are left.
//!
//! # Implementing an executor
//!
//! Call [`CapabilityHost::invoke`] for every action and report token usage
//! through [`CapabilityHost::record_usage`] as it is consumed. Treat
//! [`CapabilityError::StepLimit`] as the end of the round rather than as a
//! failure: the driver validates whatever state the tree is in afterwards.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use fw_core::types::{FileId, FolderId, UserId, ROOT_FOLDER_ID};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::capabilities::{CapabilityError, CapabilityHost, TokenUsage, ToolCall};

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub user_id: UserId,
    /// Stable per-user conversation identity, e.g. `file_org_42`.
    pub session_id: String,
    pub brief: String,
    /// 1-based executor round within the attempt.
    pub round: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Usage consumed by this round.
    pub usage: TokenUsage,
    /// Free-form closing remark from the executor, if any.
    pub final_message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("executor failed: {0}")]
    Failed(String),
    #[error("executor unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

#[async_trait]
pub trait PolicyExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        request: &ExecutionRequest,
        host: &CapabilityHost,
    ) -> Result<ExecutionOutcome, PolicyError>;
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ScriptedRound {
    Calls { calls: Vec<ToolCall>, usage: TokenUsage },
    Fail(String),
}

/// Replays queued rounds in order; once the script runs out every further
/// round does nothing.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rounds: Mutex<VecDeque<ScriptedRound>>,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_calls(self, calls: Vec<ToolCall>) -> Self {
        self.then_calls_with_usage(calls, TokenUsage::default())
    }

    pub fn then_calls_with_usage(self, calls: Vec<ToolCall>, usage: TokenUsage) -> Self {
        self.push(ScriptedRound::Calls { calls, usage });
        self
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(ScriptedRound::Fail(message.into()));
        self
    }

    fn push(&self, round: ScriptedRound) {
        self.rounds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(round);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn invocations(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl PolicyExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        host: &CapabilityHost,
    ) -> Result<ExecutionOutcome, PolicyError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let next = self
            .rounds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            None => Ok(ExecutionOutcome::default()),
            Some(ScriptedRound::Fail(message)) => Err(PolicyError::Failed(message)),
            Some(ScriptedRound::Calls { calls, usage }) => {
                for call in calls {
                    match host.invoke(call).await {
                        Ok(_) => {}
                        Err(CapabilityError::StepLimit(_)) => break,
                        Err(e) => return Err(e.into()),
                    }
                }
                host.record_usage(usage);
                Ok(ExecutionOutcome {
                    usage,
                    final_message: None,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RuleExecutor
// ---------------------------------------------------------------------------

pub const UNSORTED_FOLDER: &str = "Unsorted";

/// Upper bound on list/repair passes in one round.
const MAX_PASSES: usize = 32;

/// Deterministic structural repair, used when no other executor is wired.
#[derive(Debug, Clone, Default)]
pub struct RuleExecutor;

impl RuleExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    /// parent id (0 = root) -> child folder ids
    subfolders: BTreeMap<FolderId, Vec<FolderId>>,
    /// parent id (0 = root) -> file ids
    files: BTreeMap<FolderId, Vec<FileId>>,
    folders: Vec<FolderId>,
}

impl Snapshot {
    fn parse(body: &Value) -> Option<Self> {
        let mut snap = Snapshot::default();
        for folder in body.get("folders")?.as_array()? {
            let id = folder.get("id")?.as_i64()?;
            let parent = folder.get("parent_id")?.as_i64()?;
            snap.folders.push(id);
            snap.subfolders.entry(parent).or_default().push(id);
        }
        for file in body.get("files")?.as_array()? {
            let id = file.get("id")?.as_i64()?;
            let parent = file.get("parent_id")?.as_i64()?;
            snap.files.entry(parent).or_default().push(id);
        }
        Some(snap)
    }

    fn has_subfolders(&self, id: FolderId) -> bool {
        self.subfolders.get(&id).is_some_and(|v| !v.is_empty())
    }

    fn has_files(&self, id: FolderId) -> bool {
        self.files.get(&id).is_some_and(|v| !v.is_empty())
    }

    /// First mixed container, the root included.
    fn first_mixed(&self) -> Option<FolderId> {
        std::iter::once(ROOT_FOLDER_ID)
            .chain(self.folders.iter().copied())
            .find(|id| self.has_subfolders(*id) && self.has_files(*id))
    }

    fn empty_folders(&self) -> Vec<FolderId> {
        self.folders
            .iter()
            .copied()
            .filter(|id| !self.has_subfolders(*id) && !self.has_files(*id))
            .collect()
    }
}

enum Pass {
    Changed,
    Settled,
}

impl RuleExecutor {
    async fn snapshot(&self, host: &CapabilityHost) -> Result<Snapshot, CapabilityError> {
        let outcome = host.invoke(ToolCall::new("list_tree", json!({}))).await?;
        outcome
            .json()
            .as_ref()
            .and_then(Snapshot::parse)
            .ok_or_else(|| CapabilityError::BadArguments {
                capability: "list_tree".into(),
                reason: format!("unreadable listing: {}", outcome.content),
            })
    }

    async fn repair_pass(&self, host: &CapabilityHost) -> Result<Pass, CapabilityError> {
        let snap = self.snapshot(host).await?;

        if let Some(mixed) = snap.first_mixed() {
            let created = host
                .invoke(ToolCall::new(
                    "create_folder",
                    json!({ "name": UNSORTED_FOLDER, "parent_id": mixed }),
                ))
                .await?;
            let Some(target) = created
                .json()
                .and_then(|v| v.get("folder_id").and_then(Value::as_i64))
            else {
                warn!(folder = mixed, outcome = %created.content, "could not create unsorted folder");
                return Ok(Pass::Settled);
            };
            for file in snap.files.get(&mixed).into_iter().flatten() {
                host.invoke(ToolCall::new(
                    "move_file",
                    json!({ "file_id": file, "target_folder_id": target }),
                ))
                .await?;
            }
            return Ok(Pass::Changed);
        }

        let empties = snap.empty_folders();
        if empties.is_empty() {
            return Ok(Pass::Settled);
        }
        let mut deleted = 0;
        for folder in empties {
            let outcome = host
                .invoke(ToolCall::new("delete_folder", json!({ "folder_id": folder })))
                .await?;
            if !outcome.is_error {
                deleted += 1;
            }
        }
        Ok(if deleted > 0 { Pass::Changed } else { Pass::Settled })
    }
}

#[async_trait]
impl PolicyExecutor for RuleExecutor {
    fn name(&self) -> &str {
        "rules"
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        host: &CapabilityHost,
    ) -> Result<ExecutionOutcome, PolicyError> {
        for pass in 0..MAX_PASSES {
            match self.repair_pass(host).await {
                Ok(Pass::Changed) => continue,
                Ok(Pass::Settled) => {
                    debug!(user_id = request.user_id, pass, "tree settled");
                    break;
                }
                Err(CapabilityError::StepLimit(limit)) => {
                    debug!(user_id = request.user_id, limit, "round ended at step limit");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ExecutionOutcome {
            usage: TokenUsage::default(),
            final_message: Some("structural repair pass complete".to_string()),
        })
    }
}
