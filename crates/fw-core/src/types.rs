use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type EventId = i64;
pub type FolderId = i64;
pub type FileId = i64;

/// Folder id used in reports and capability arguments for the virtual root
/// (rows whose `parent_id` is NULL).
pub const ROOT_FOLDER_ID: FolderId = 0;

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    File,
    Folder,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::File => "file",
            EntityType::Folder => "folder",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(EntityType::File),
            "folder" => Ok(EntityType::Folder),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Rename,
    Move,
    Delete,
    UpdateMeta,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Rename => "rename",
            ChangeAction::Move => "move",
            ChangeAction::Delete => "delete",
            ChangeAction::UpdateMeta => "update_meta",
        }
    }

    /// Classify an update from which of name / parent actually changed.
    ///
    /// Returns `None` when nothing changed (no event should be written).
    pub fn for_update(name_changed: bool, parent_changed: bool) -> Option<Self> {
        match (name_changed, parent_changed) {
            (false, false) => None,
            (true, false) => Some(ChangeAction::Rename),
            (false, true) => Some(ChangeAction::Move),
            (true, true) => Some(ChangeAction::UpdateMeta),
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeAction::Create),
            "rename" => Ok(ChangeAction::Rename),
            "move" => Ok(ChangeAction::Move),
            "delete" => Ok(ChangeAction::Delete),
            "update_meta" => Ok(ChangeAction::UpdateMeta),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown kind `{0}`")]
pub struct ParseKindError(pub String);

// ---------------------------------------------------------------------------
// ChangeEvent
// ---------------------------------------------------------------------------

/// One structural mutation of a user's tree, as stored in the event log.
///
/// Events are write-once: nothing in the crate updates or deletes them.
/// Ordering is by `id`; `created_at` is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: EventId,
    pub user_id: UserId,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub action: ChangeAction,
    pub old_parent_id: Option<FolderId>,
    pub new_parent_id: Option<FolderId>,
    pub old_name: Option<String>,
    pub new_name: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// An event that has not been written yet.
///
/// `entity_id` is optional so batch writers can hand over whatever the
/// mutation produced; entries without one are dropped before insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChangeEvent {
    pub entity_type: EntityType,
    pub entity_id: Option<i64>,
    pub action: ChangeAction,
    pub old_parent_id: Option<FolderId>,
    pub new_parent_id: Option<FolderId>,
    pub old_name: Option<String>,
    pub new_name: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl NewChangeEvent {
    pub fn new(entity_type: EntityType, entity_id: i64, action: ChangeAction) -> Self {
        Self {
            entity_type,
            entity_id: Some(entity_id),
            action,
            old_parent_id: None,
            new_parent_id: None,
            old_name: None,
            new_name: None,
            payload: None,
        }
    }

    pub fn with_parents(mut self, old: Option<FolderId>, new: Option<FolderId>) -> Self {
        self.old_parent_id = old;
        self.new_parent_id = new;
        self
    }

    pub fn with_names(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_name = old;
        self.new_name = new;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Per-user reconciliation cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub user_id: UserId,
    pub last_event_id: EventId,
    pub last_full_scan_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tree rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub user_id: UserId,
    pub name: String,
    pub parent_id: Option<FolderId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: FileId,
    pub user_id: UserId,
    pub name: String,
    pub parent_id: Option<FolderId>,
    pub size: Option<i64>,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Metadata supplied when registering a new file in the tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewFile {
    pub name: String,
    pub parent_id: Option<FolderId>,
    pub size: Option<i64>,
    pub mime_type: Option<String>,
    pub description: Option<String>,
}

impl NewFile {
    pub fn named(name: impl Into<String>, parent_id: Option<FolderId>) -> Self {
        Self {
            name: name.into(),
            parent_id,
            ..Self::default()
        }
    }
}

/// A reference to a folder in reports; id 0 is the virtual root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FolderRef {
    pub id: FolderId,
    pub name: String,
}

impl FolderRef {
    pub fn root() -> Self {
        Self {
            id: ROOT_FOLDER_ID,
            name: "<root>".to_string(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_FOLDER_ID
    }
}

impl fmt::Display for FolderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {}, Name: {}", self.id, self.name)
    }
}

/// Map a capability-level folder id (0 = root) to a nullable parent column.
pub fn parent_from_id(id: FolderId) -> Option<FolderId> {
    if id == ROOT_FOLDER_ID {
        None
    } else {
        Some(id)
    }
}
