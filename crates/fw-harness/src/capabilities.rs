use std::fmt;
use std::sync::Mutex;

use fw_core::db::StoreError;
use fw_core::invariants::{InvariantChecker, InvariantReport};
use fw_core::tree::{TreeError, TreeStore};
use fw_core::types::{parent_from_id, FolderId, UserId, ROOT_FOLDER_ID};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A capability the policy executor may invoke, described by a JSON schema
/// for its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// The capability never mutates the tree.
    pub read_only: bool,
}

fn def(name: &str, description: &str, read_only: bool, schema: Value) -> CapabilityDef {
    CapabilityDef {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: schema,
        read_only,
    }
}

fn id_prop(description: &str) -> Value {
    json!({ "type": "integer", "minimum": 0, "description": description })
}

/// The fixed capability set, in a stable order.
pub fn capability_definitions() -> Vec<CapabilityDef> {
    vec![
        def(
            "create_folder",
            "Create a folder, or return the existing one with the same name under the same parent.",
            false,
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Folder name" },
                    "parent_id": id_prop("Parent folder ID, 0 for the root")
                },
                "required": ["name"]
            }),
        ),
        def(
            "rename_folder",
            "Rename a folder. Fails if a sibling already has the new name.",
            false,
            json!({
                "type": "object",
                "properties": {
                    "folder_id": id_prop("Folder to rename"),
                    "new_name": { "type": "string" }
                },
                "required": ["folder_id", "new_name"]
            }),
        ),
        def(
            "move_folder",
            "Move a folder under another folder (0 for the root). Cannot move into itself or a descendant.",
            false,
            json!({
                "type": "object",
                "properties": {
                    "folder_id": id_prop("Folder to move"),
                    "target_folder_id": id_prop("New parent, 0 for the root")
                },
                "required": ["folder_id", "target_folder_id"]
            }),
        ),
        def(
            "merge_folders",
            "Move every file and subfolder of the source folder into the target folder, then delete the source.",
            false,
            json!({
                "type": "object",
                "properties": {
                    "source_folder_id": id_prop("Folder to empty and delete"),
                    "target_folder_id": id_prop("Folder receiving the contents")
                },
                "required": ["source_folder_id", "target_folder_id"]
            }),
        ),
        def(
            "delete_folder",
            "Delete an empty folder. Fails if it still holds files or subfolders.",
            false,
            json!({
                "type": "object",
                "properties": { "folder_id": id_prop("Folder to delete") },
                "required": ["folder_id"]
            }),
        ),
        def(
            "move_file",
            "Move a file into a folder (0 for the root).",
            false,
            json!({
                "type": "object",
                "properties": {
                    "file_id": id_prop("File to move"),
                    "target_folder_id": id_prop("Destination folder, 0 for the root")
                },
                "required": ["file_id", "target_folder_id"]
            }),
        ),
        def(
            "get_file_information",
            "Return the metadata of one file: name, size, type, description.",
            true,
            json!({
                "type": "object",
                "properties": { "file_id": id_prop("File to inspect") },
                "required": ["file_id"]
            }),
        ),
        def(
            "list_tree",
            "List every folder and file with its parent (0 = root).",
            true,
            json!({ "type": "object", "properties": {} }),
        ),
        def(
            "find_duplicate_folders",
            "List groups of folders that share a name under the same parent.",
            true,
            json!({ "type": "object", "properties": {} }),
        ),
        def(
            "find_mixed_content_folders",
            "List folders, the root included, that hold both files and subfolders.",
            true,
            json!({ "type": "object", "properties": {} }),
        ),
        def(
            "find_empty_folders",
            "List folders that hold neither files nor subfolders.",
            true,
            json!({ "type": "object", "properties": {} }),
        ),
    ]
}

// ---------------------------------------------------------------------------
// Calls, results, usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Result handed back to the executor. `content` is a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(body: Value) -> Self {
        Self {
            content: body.to_string(),
            is_error: false,
        }
    }

    fn error(message: impl fmt::Display) -> Self {
        Self {
            content: json!({ "error": message.to_string() }).to_string(),
            is_error: true,
        }
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.content).ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    Round { round: u32 },
    Call { call: ToolCall, outcome: ToolOutcome },
    Usage { usage: TokenUsage },
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEntry::Round { round } => write!(f, "== round {round} =="),
            TraceEntry::Call { call, outcome } => {
                let marker = if outcome.is_error { "!" } else { ">" };
                write!(f, "{marker} {}({}) -> {}", call.name, call.arguments, outcome.content)
            }
            TraceEntry::Usage { usage } => write!(
                f,
                "usage: input={} output={} total={}",
                usage.input_tokens, usage.output_tokens, usage.total_tokens
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("unknown capability `{0}`")]
    Unknown(String),
    #[error("bad arguments for `{capability}`: {reason}")]
    BadArguments { capability: String, reason: String },
    #[error("step limit of {0} capability calls reached for this round")]
    StepLimit(u32),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HostState {
    round: u32,
    steps_in_round: u32,
    total_steps: u64,
    usage: TokenUsage,
    trace: Vec<TraceEntry>,
}

/// Executes capability calls for one user and keeps the operation trace.
///
/// The host owns an untracked view of the tree, so nothing it does shows up
/// in the change log. Every call, successful or not, is appended to the
/// trace. Calls beyond the per-round ceiling are refused with
/// [`CapabilityError::StepLimit`] and are not executed; other failures are
/// reported back to the executor as error outcomes.
pub struct CapabilityHost {
    user_id: UserId,
    tree: TreeStore,
    checker: InvariantChecker,
    max_steps: u32,
    state: Mutex<HostState>,
}

impl CapabilityHost {
    pub fn new(user_id: UserId, tree: &TreeStore, checker: InvariantChecker, max_steps: u32) -> Self {
        Self {
            user_id,
            tree: tree.untracked(),
            checker,
            max_steps,
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn definitions(&self) -> Vec<CapabilityDef> {
        capability_definitions()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut HostState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Start a new executor round: resets the step counter.
    pub fn begin_round(&self) -> u32 {
        self.with_state(|s| {
            s.round += 1;
            s.steps_in_round = 0;
            s.trace.push(TraceEntry::Round { round: s.round });
            s.round
        })
    }

    pub fn record_usage(&self, usage: TokenUsage) {
        self.with_state(|s| {
            s.usage.add(usage);
            s.trace.push(TraceEntry::Usage { usage });
        });
    }

    pub fn usage(&self) -> TokenUsage {
        self.with_state(|s| s.usage)
    }

    pub fn total_steps(&self) -> u64 {
        self.with_state(|s| s.total_steps)
    }

    pub fn trace(&self) -> Vec<TraceEntry> {
        self.with_state(|s| s.trace.clone())
    }

    pub fn render_trace(&self) -> String {
        self.with_state(|s| {
            s.trace
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    pub async fn invoke(&self, call: ToolCall) -> Result<ToolOutcome, CapabilityError> {
        let admitted = self.with_state(|s| {
            if s.steps_in_round >= self.max_steps {
                false
            } else {
                s.steps_in_round += 1;
                s.total_steps += 1;
                true
            }
        });
        if !admitted {
            debug!(user_id = self.user_id, capability = %call.name, "step limit reached");
            return Err(CapabilityError::StepLimit(self.max_steps));
        }

        let outcome = match self.dispatch(&call).await {
            Ok(body) => ToolOutcome::ok(body),
            Err(e) => ToolOutcome::error(e),
        };
        info!(
            user_id = self.user_id,
            capability = %call.name,
            is_error = outcome.is_error,
            "capability invoked"
        );
        self.with_state(|s| {
            s.trace.push(TraceEntry::Call {
                call,
                outcome: outcome.clone(),
            })
        });
        Ok(outcome)
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<Value, CapabilityError> {
        let user = self.user_id;
        let args = Args {
            capability: &call.name,
            value: &call.arguments,
        };
        match call.name.as_str() {
            "create_folder" => {
                let name = args.string("name")?;
                let parent = parent_from_id(args.id_or_root("parent_id")?);
                let ensured = self.tree.ensure_folder(user, &name, parent).await?;
                let message = if ensured.created {
                    format!("Created folder '{}' (ID: {})", ensured.folder.name, ensured.folder.id)
                } else {
                    format!("Folder '{}' already exists (ID: {})", ensured.folder.name, ensured.folder.id)
                };
                Ok(json!({
                    "message": message,
                    "folder_id": ensured.folder.id,
                    "created": ensured.created,
                }))
            }
            "rename_folder" => {
                let id = args.id("folder_id")?;
                let name = args.string("new_name")?;
                let folder = self.tree.rename_folder(user, id, &name).await?;
                Ok(json!({
                    "message": format!("Renamed folder {id} to '{}'", folder.name),
                    "folder_id": id,
                }))
            }
            "move_folder" => {
                let id = args.id("folder_id")?;
                let target = args.id_or_root("target_folder_id")?;
                self.tree.move_folder(user, id, parent_from_id(target)).await?;
                Ok(json!({
                    "message": format!("Moved folder {id} into {}", describe_parent(target)),
                    "folder_id": id,
                }))
            }
            "merge_folders" => {
                let source = args.id("source_folder_id")?;
                let target = args.id("target_folder_id")?;
                self.tree.merge_folders(user, source, target).await?;
                Ok(json!({
                    "message": format!("Merged folder {source} into {target}"),
                    "folder_id": target,
                }))
            }
            "delete_folder" => {
                let id = args.id("folder_id")?;
                self.tree.delete_empty_folder(user, id).await?;
                Ok(json!({ "message": format!("Deleted folder {id}"), "folder_id": id }))
            }
            "move_file" => {
                let id = args.id("file_id")?;
                let target = args.id_or_root("target_folder_id")?;
                self.tree.move_file(user, id, parent_from_id(target)).await?;
                Ok(json!({
                    "message": format!("Moved file {id} into {}", describe_parent(target)),
                    "file_id": id,
                }))
            }
            "get_file_information" => {
                let id = args.id("file_id")?;
                let file = self.tree.file_info(user, id).await?;
                Ok(json!({
                    "id": file.id,
                    "name": file.name,
                    "parent_id": file.parent_id.unwrap_or(ROOT_FOLDER_ID),
                    "size": file.size,
                    "mime_type": file.mime_type,
                    "description": file.description,
                    "created_at": file.created_at.to_rfc3339(),
                }))
            }
            "list_tree" => {
                let folders = self.tree.list_folders(user).await?;
                let files = self.tree.list_files(user).await?;
                Ok(json!({
                    "folders": folders.iter().map(|f| json!({
                        "id": f.id,
                        "name": f.name,
                        "parent_id": f.parent_id.unwrap_or(ROOT_FOLDER_ID),
                    })).collect::<Vec<_>>(),
                    "files": files.iter().map(|f| json!({
                        "id": f.id,
                        "name": f.name,
                        "parent_id": f.parent_id.unwrap_or(ROOT_FOLDER_ID),
                    })).collect::<Vec<_>>(),
                }))
            }
            "find_duplicate_folders" => {
                let groups = self.tree.find_duplicate_folders(user).await?;
                let message = if groups.is_empty() {
                    "No duplicate folders found.".to_string()
                } else {
                    let lines: Vec<String> = groups
                        .iter()
                        .map(|g| {
                            let ids: Vec<String> = g.folder_ids.iter().map(ToString::to_string).collect();
                            format!(
                                "Name: '{}', Parent ID: {}, IDs: {}",
                                g.name,
                                g.parent_id.unwrap_or(ROOT_FOLDER_ID),
                                ids.join(", ")
                            )
                        })
                        .collect();
                    format!("Duplicate folders found:\n{}", lines.join("\n"))
                };
                Ok(json!({ "message": message, "groups": groups }))
            }
            "find_mixed_content_folders" => {
                Ok(report_body(self.checker.mixed_content_violations(user).await?))
            }
            "find_empty_folders" => Ok(report_body(self.checker.empty_folder_violations(user).await?)),
            other => Err(CapabilityError::Unknown(other.to_string())),
        }
    }
}

fn describe_parent(id: FolderId) -> String {
    if id == ROOT_FOLDER_ID {
        "the root".to_string()
    } else {
        format!("folder {id}")
    }
}

fn report_body(report: InvariantReport) -> Value {
    json!({
        "message": report.render(),
        "folder_ids": report.violations.iter().map(|f| f.id).collect::<Vec<_>>(),
        "clean": report.is_clean(),
    })
}

struct Args<'a> {
    capability: &'a str,
    value: &'a Value,
}

impl Args<'_> {
    fn bad(&self, reason: String) -> CapabilityError {
        CapabilityError::BadArguments {
            capability: self.capability.to_string(),
            reason,
        }
    }

    fn id(&self, key: &str) -> Result<i64, CapabilityError> {
        match self.value.get(key) {
            Some(v) => self.parse_id(key, v),
            None => Err(self.bad(format!("missing required parameter: {key}"))),
        }
    }

    /// Optional folder id; absent or null means the root.
    fn id_or_root(&self, key: &str) -> Result<i64, CapabilityError> {
        match self.value.get(key) {
            None | Some(Value::Null) => Ok(ROOT_FOLDER_ID),
            Some(v) => self.parse_id(key, v),
        }
    }

    fn parse_id(&self, key: &str, v: &Value) -> Result<i64, CapabilityError> {
        // Executors sometimes send ids as strings.
        let id = v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()));
        match id {
            Some(id) if id >= 0 => Ok(id),
            _ => Err(self.bad(format!("`{key}` must be a non-negative integer, got {v}"))),
        }
    }

    fn string(&self, key: &str) -> Result<String, CapabilityError> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.bad(format!("missing required parameter: {key}")))
    }
}
