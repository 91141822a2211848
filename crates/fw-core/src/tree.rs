//! The user's folder/file tree and the mutations allowed on it.
//!
//! Every mutation commits its primary write first and only then appends the
//! matching change events to the [`EventLog`], best-effort. A store built
//! with [`TreeStore::untracked`] skips the event log entirely; the
//! reconciler's capabilities use that view so an attempt never schedules
//! its own follow-up work.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use crate::db::{parse_timestamp, Database, StoreError};
use crate::event_log::EventLog;
use crate::types::{
    ChangeAction, EntityType, FileEntry, FileId, Folder, FolderId, NewChangeEvent, NewFile,
    UserId,
};

/// Upper bound on parent-chain walks; a tree deeper than this is treated as
/// corrupt rather than looped over forever.
const MAX_DEPTH: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("folder {0} does not exist")]
    FolderNotFound(FolderId),
    #[error("file {0} does not exist")]
    FileNotFound(FileId),
    #[error("a folder named '{name}' already exists here (ID: {existing})")]
    NameConflict { name: String, existing: FolderId },
    #[error("folder {folder} cannot be placed inside {target}: target is the folder itself or one of its descendants")]
    Cycle { folder: FolderId, target: FolderId },
    #[error("folder {0} is not empty")]
    NotEmpty(FolderId),
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl From<tokio_rusqlite::Error> for TreeError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        TreeError::Store(StoreError::Sqlite(e))
    }
}

pub type Result<T> = std::result::Result<T, TreeError>;

/// Partial update for a folder. `parent_id: Some(None)` moves to the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderPatch {
    pub name: Option<String>,
    pub parent_id: Option<Option<FolderId>>,
}

/// Folders sharing a name under the same parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub name: String,
    pub parent_id: Option<FolderId>,
    pub folder_ids: Vec<FolderId>,
}

/// Result of [`TreeStore::ensure_folder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredFolder {
    pub folder: Folder,
    pub created: bool,
}

#[derive(Clone)]
pub struct TreeStore {
    conn: Connection,
    change_log: Option<EventLog>,
}

impl TreeStore {
    /// A tree store that records every mutation in `change_log`.
    pub fn new(db: &Database, change_log: EventLog) -> Self {
        Self {
            conn: db.connection().clone(),
            change_log: Some(change_log),
        }
    }

    /// A view of the same tree whose mutations are not logged.
    pub fn untracked(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            change_log: None,
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.change_log.is_some()
    }

    async fn record(&self, user_id: UserId, events: Vec<NewChangeEvent>) {
        if let Some(log) = &self.change_log {
            // Best-effort: the log swallows and reports its own failures.
            log.append_batch(user_id, events).await;
        }
    }

    // -----------------------------------------------------------------------
    // Folders
    // -----------------------------------------------------------------------

    /// Create a folder under `parent_id` (`None` = root).
    pub async fn create_folder(
        &self,
        user_id: UserId,
        name: &str,
        parent_id: Option<FolderId>,
    ) -> Result<Folder> {
        let name = validate_name(name)?;
        let folder = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if let Some(pid) = parent_id {
                    if load_folder(&tx, user_id, pid)?.is_none() {
                        return Ok(Err(TreeError::FolderNotFound(pid)));
                    }
                }
                tx.execute(
                    "INSERT INTO folders (user_id, name, parent_id) VALUES (?1, ?2, ?3)",
                    rusqlite::params![user_id, name, parent_id],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(Ok(Folder {
                    id,
                    user_id,
                    name,
                    parent_id,
                }))
            })
            .await??;

        self.record(
            user_id,
            vec![NewChangeEvent::new(EntityType::Folder, folder.id, ChangeAction::Create)
                .with_parents(None, folder.parent_id)
                .with_names(None, Some(folder.name.clone()))],
        )
        .await;
        Ok(folder)
    }

    /// Return the folder named `name` under `parent_id`, creating it when it
    /// does not exist yet.
    pub async fn ensure_folder(
        &self,
        user_id: UserId,
        name: &str,
        parent_id: Option<FolderId>,
    ) -> Result<EnsuredFolder> {
        let trimmed = validate_name(name)?;
        let existing = self
            .conn
            .call(move |conn| Ok(find_sibling(conn, user_id, parent_id, &trimmed)?))
            .await?;
        if let Some(folder) = existing {
            return Ok(EnsuredFolder {
                folder,
                created: false,
            });
        }
        let folder = self.create_folder(user_id, name, parent_id).await?;
        Ok(EnsuredFolder {
            folder,
            created: true,
        })
    }

    pub async fn get_folder(&self, user_id: UserId, id: FolderId) -> Result<Folder> {
        self.conn
            .call(move |conn| Ok(load_folder(conn, user_id, id)?))
            .await?
            .ok_or(TreeError::FolderNotFound(id))
    }

    /// Apply a rename and/or move. Emits `folder:rename`, `folder:move` or
    /// `folder:update_meta` depending on what actually changed, and nothing
    /// for a no-op patch.
    pub async fn update_folder(
        &self,
        user_id: UserId,
        id: FolderId,
        patch: FolderPatch,
    ) -> Result<Folder> {
        let new_name = patch.name.as_deref().map(validate_name).transpose()?;
        let (before, after) = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(before) = load_folder(&tx, user_id, id)? else {
                    return Ok(Err(TreeError::FolderNotFound(id)));
                };
                let mut after = before.clone();
                if let Some(name) = new_name {
                    after.name = name;
                }
                if let Some(parent) = patch.parent_id {
                    if let Some(target) = parent {
                        if load_folder(&tx, user_id, target)?.is_none() {
                            return Ok(Err(TreeError::FolderNotFound(target)));
                        }
                        if target == id || is_descendant(&tx, target, id)? {
                            return Ok(Err(TreeError::Cycle { folder: id, target }));
                        }
                    }
                    after.parent_id = parent;
                }
                tx.execute(
                    "UPDATE folders SET name = ?1, parent_id = ?2 WHERE id = ?3",
                    rusqlite::params![after.name, after.parent_id, id],
                )?;
                tx.commit()?;
                Ok(Ok((before, after)))
            })
            .await??;

        let action = ChangeAction::for_update(
            before.name != after.name,
            before.parent_id != after.parent_id,
        );
        if let Some(action) = action {
            self.record(
                user_id,
                vec![NewChangeEvent::new(EntityType::Folder, id, action)
                    .with_parents(before.parent_id, after.parent_id)
                    .with_names(Some(before.name), Some(after.name.clone()))],
            )
            .await;
        }
        Ok(after)
    }

    /// Rename a folder, refusing when a sibling already carries the name.
    pub async fn rename_folder(&self, user_id: UserId, id: FolderId, new_name: &str) -> Result<Folder> {
        let folder = self.get_folder(user_id, id).await?;
        let name = validate_name(new_name)?;
        let parent = folder.parent_id;
        let lookup = name.clone();
        let clash = self
            .conn
            .call(move |conn| Ok(find_sibling(conn, user_id, parent, &lookup)?))
            .await?;
        if let Some(existing) = clash {
            if existing.id != id {
                return Err(TreeError::NameConflict {
                    name,
                    existing: existing.id,
                });
            }
        }
        self.update_folder(
            user_id,
            id,
            FolderPatch {
                name: Some(name),
                parent_id: None,
            },
        )
        .await
    }

    /// Move a folder under `target` (`None` = root).
    pub async fn move_folder(
        &self,
        user_id: UserId,
        id: FolderId,
        target: Option<FolderId>,
    ) -> Result<Folder> {
        self.update_folder(
            user_id,
            id,
            FolderPatch {
                name: None,
                parent_id: Some(target),
            },
        )
        .await
    }

    /// Delete a folder only when it has no subfolders and no files.
    pub async fn delete_empty_folder(&self, user_id: UserId, id: FolderId) -> Result<Folder> {
        let folder = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(folder) = load_folder(&tx, user_id, id)? else {
                    return Ok(Err(TreeError::FolderNotFound(id)));
                };
                let (subfolders, files) = child_counts(&tx, id)?;
                if subfolders > 0 || files > 0 {
                    return Ok(Err(TreeError::NotEmpty(id)));
                }
                tx.execute("DELETE FROM folders WHERE id = ?1", rusqlite::params![id])?;
                tx.commit()?;
                Ok(Ok(folder))
            })
            .await??;

        self.record(
            user_id,
            vec![delete_event(EntityType::Folder, folder.id, folder.parent_id, &folder.name)],
        )
        .await;
        Ok(folder)
    }

    /// Delete a folder together with everything below it.
    ///
    /// Emits one batch: a `file:delete` per contained file and a
    /// `folder:delete` per folder, children before their parent, the target
    /// folder last. Returns the number of deleted rows.
    pub async fn delete_folder_recursive(&self, user_id: UserId, id: FolderId) -> Result<usize> {
        let events = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(folder) = load_folder(&tx, user_id, id)? else {
                    return Ok(Err(TreeError::FolderNotFound(id)));
                };
                let mut events = Vec::new();
                collect_subtree(&tx, &folder, &mut events, 0)?;
                events.push(delete_event(
                    EntityType::Folder,
                    folder.id,
                    folder.parent_id,
                    &folder.name,
                ));
                for event in &events {
                    let table = match event.entity_type {
                        EntityType::File => "files",
                        EntityType::Folder => "folders",
                    };
                    tx.execute(
                        &format!("DELETE FROM {table} WHERE id = ?1"),
                        rusqlite::params![event.entity_id],
                    )?;
                }
                tx.commit()?;
                Ok(Ok(events))
            })
            .await??;

        let deleted = events.len();
        self.record(user_id, events).await;
        Ok(deleted)
    }

    /// Move every file and subfolder of `source` into `target`, then delete
    /// `source`.
    pub async fn merge_folders(
        &self,
        user_id: UserId,
        source: FolderId,
        target: FolderId,
    ) -> Result<Folder> {
        if source == target {
            return Err(TreeError::Invalid("cannot merge a folder into itself".into()));
        }
        let (source_folder, events) = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(src) = load_folder(&tx, user_id, source)? else {
                    return Ok(Err(TreeError::FolderNotFound(source)));
                };
                if load_folder(&tx, user_id, target)?.is_none() {
                    return Ok(Err(TreeError::FolderNotFound(target)));
                }
                if is_descendant(&tx, target, source)? {
                    return Ok(Err(TreeError::Cycle {
                        folder: source,
                        target,
                    }));
                }

                let mut events = Vec::new();
                for file in list_child_files(&tx, source)? {
                    events.push(
                        NewChangeEvent::new(EntityType::File, file.0, ChangeAction::Move)
                            .with_parents(Some(source), Some(target))
                            .with_names(Some(file.1.clone()), Some(file.1)),
                    );
                }
                for sub in list_child_folders(&tx, source)? {
                    events.push(
                        NewChangeEvent::new(EntityType::Folder, sub.0, ChangeAction::Move)
                            .with_parents(Some(source), Some(target))
                            .with_names(Some(sub.1.clone()), Some(sub.1)),
                    );
                }
                tx.execute(
                    "UPDATE files SET parent_id = ?1 WHERE parent_id = ?2",
                    rusqlite::params![target, source],
                )?;
                tx.execute(
                    "UPDATE folders SET parent_id = ?1 WHERE parent_id = ?2",
                    rusqlite::params![target, source],
                )?;
                tx.execute("DELETE FROM folders WHERE id = ?1", rusqlite::params![source])?;
                tx.commit()?;

                events.push(delete_event(EntityType::Folder, src.id, src.parent_id, &src.name));
                Ok(Ok((src, events)))
            })
            .await??;

        self.record(user_id, events).await;
        Ok(source_folder)
    }

    pub async fn list_folders(&self, user_id: UserId) -> Result<Vec<Folder>> {
        let folders = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, name, parent_id FROM folders
                     WHERE user_id = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id], row_to_folder)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(folders)
    }

    /// Groups of folders sharing the same name and parent.
    pub async fn find_duplicate_folders(&self, user_id: UserId) -> Result<Vec<DuplicateGroup>> {
        let folders = self.list_folders(user_id).await?;
        let mut grouped: BTreeMap<(Option<FolderId>, String), Vec<FolderId>> = BTreeMap::new();
        for folder in folders {
            grouped
                .entry((folder.parent_id, folder.name))
                .or_default()
                .push(folder.id);
        }
        Ok(grouped
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|((parent_id, name), folder_ids)| DuplicateGroup {
                name,
                parent_id,
                folder_ids,
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    pub async fn create_file(&self, user_id: UserId, file: NewFile) -> Result<FileEntry> {
        let name = validate_name(&file.name)?;
        let created_at = Utc::now();
        let stamp = created_at.to_rfc3339();
        let entry = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if let Some(pid) = file.parent_id {
                    if load_folder(&tx, user_id, pid)?.is_none() {
                        return Ok(Err(TreeError::FolderNotFound(pid)));
                    }
                }
                tx.execute(
                    "INSERT INTO files (user_id, name, parent_id, size, mime_type,
                        description, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)",
                    rusqlite::params![
                        user_id,
                        name,
                        file.parent_id,
                        file.size,
                        file.mime_type,
                        file.description,
                        stamp,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(Ok(FileEntry {
                    id,
                    user_id,
                    name,
                    parent_id: file.parent_id,
                    size: file.size,
                    mime_type: file.mime_type,
                    description: file.description,
                    created_at,
                }))
            })
            .await??;

        self.record(
            user_id,
            vec![NewChangeEvent::new(EntityType::File, entry.id, ChangeAction::Create)
                .with_parents(None, entry.parent_id)
                .with_names(None, Some(entry.name.clone()))],
        )
        .await;
        Ok(entry)
    }

    pub async fn file_info(&self, user_id: UserId, id: FileId) -> Result<FileEntry> {
        self.conn
            .call(move |conn| Ok(load_file(conn, user_id, id)?))
            .await?
            .ok_or(TreeError::FileNotFound(id))
    }

    pub async fn rename_file(&self, user_id: UserId, id: FileId, new_name: &str) -> Result<FileEntry> {
        let name = validate_name(new_name)?;
        let (before, after) = self
            .update_file(user_id, id, move |entry| entry.name = name)
            .await?;
        if before.name != after.name {
            self.record(
                user_id,
                vec![NewChangeEvent::new(EntityType::File, id, ChangeAction::Rename)
                    .with_parents(before.parent_id, after.parent_id)
                    .with_names(Some(before.name), Some(after.name.clone()))],
            )
            .await;
        }
        Ok(after)
    }

    /// Move a file under `target` (`None` = root).
    pub async fn move_file(
        &self,
        user_id: UserId,
        id: FileId,
        target: Option<FolderId>,
    ) -> Result<FileEntry> {
        if let Some(folder) = target {
            self.get_folder(user_id, folder).await?;
        }
        let (before, after) = self
            .update_file(user_id, id, move |entry| entry.parent_id = target)
            .await?;
        if before.parent_id != after.parent_id {
            self.record(
                user_id,
                vec![NewChangeEvent::new(EntityType::File, id, ChangeAction::Move)
                    .with_parents(before.parent_id, after.parent_id)
                    .with_names(Some(before.name), Some(after.name.clone()))],
            )
            .await;
        }
        Ok(after)
    }

    pub async fn delete_file(&self, user_id: UserId, id: FileId) -> Result<FileEntry> {
        let entry = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(entry) = load_file(&tx, user_id, id)? else {
                    return Ok(Err(TreeError::FileNotFound(id)));
                };
                tx.execute("DELETE FROM files WHERE id = ?1", rusqlite::params![id])?;
                tx.commit()?;
                Ok(Ok(entry))
            })
            .await??;

        self.record(
            user_id,
            vec![delete_event(EntityType::File, entry.id, entry.parent_id, &entry.name)],
        )
        .await;
        Ok(entry)
    }

    pub async fn list_files(&self, user_id: UserId) -> Result<Vec<FileEntry>> {
        let files = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, name, parent_id, size, mime_type, description, created_at
                     FROM files WHERE user_id = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id], row_to_file)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(files)
    }

    async fn update_file<F>(
        &self,
        user_id: UserId,
        id: FileId,
        apply: F,
    ) -> Result<(FileEntry, FileEntry)>
    where
        F: FnOnce(&mut FileEntry) + Send + 'static,
    {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(before) = load_file(&tx, user_id, id)? else {
                    return Ok(Err(TreeError::FileNotFound(id)));
                };
                let mut after = before.clone();
                apply(&mut after);
                tx.execute(
                    "UPDATE files SET name = ?1, parent_id = ?2 WHERE id = ?3",
                    rusqlite::params![after.name, after.parent_id, id],
                )?;
                tx.commit()?;
                Ok(Ok((before, after)))
            })
            .await?
    }
}

// ---------------------------------------------------------------------------
// Query helpers (run on the connection thread)
// ---------------------------------------------------------------------------

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TreeError::Invalid("name must not be empty".into()));
    }
    if trimmed.len() > 255 {
        return Err(TreeError::Invalid("name longer than 255 bytes".into()));
    }
    Ok(trimmed.to_string())
}

fn delete_event(
    entity_type: EntityType,
    id: i64,
    parent: Option<FolderId>,
    name: &str,
) -> NewChangeEvent {
    NewChangeEvent::new(entity_type, id, ChangeAction::Delete)
        .with_parents(parent, None)
        .with_names(Some(name.to_string()), None)
}

fn load_folder(
    conn: &rusqlite::Connection,
    user_id: UserId,
    id: FolderId,
) -> rusqlite::Result<Option<Folder>> {
    conn.query_row(
        "SELECT id, user_id, name, parent_id FROM folders WHERE id = ?1 AND user_id = ?2",
        rusqlite::params![id, user_id],
        row_to_folder,
    )
    .optional()
}

fn load_file(
    conn: &rusqlite::Connection,
    user_id: UserId,
    id: FileId,
) -> rusqlite::Result<Option<FileEntry>> {
    conn.query_row(
        "SELECT id, user_id, name, parent_id, size, mime_type, description, created_at
         FROM files WHERE id = ?1 AND user_id = ?2",
        rusqlite::params![id, user_id],
        row_to_file,
    )
    .optional()
}

fn find_sibling(
    conn: &rusqlite::Connection,
    user_id: UserId,
    parent_id: Option<FolderId>,
    name: &str,
) -> rusqlite::Result<Option<Folder>> {
    conn.query_row(
        "SELECT id, user_id, name, parent_id FROM folders
         WHERE user_id = ?1 AND parent_id IS ?2 AND name = ?3
         ORDER BY id LIMIT 1",
        rusqlite::params![user_id, parent_id, name],
        row_to_folder,
    )
    .optional()
}

/// Whether `candidate` sits somewhere below `ancestor`.
fn is_descendant(
    conn: &rusqlite::Connection,
    candidate: FolderId,
    ancestor: FolderId,
) -> rusqlite::Result<bool> {
    let mut current = Some(candidate);
    for _ in 0..MAX_DEPTH {
        let Some(id) = current else {
            return Ok(false);
        };
        let parent: Option<FolderId> = conn
            .query_row(
                "SELECT parent_id FROM folders WHERE id = ?1",
                rusqlite::params![id],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        if parent == Some(ancestor) {
            return Ok(true);
        }
        current = parent;
    }
    Ok(true)
}

pub(crate) fn child_counts(conn: &rusqlite::Connection, id: FolderId) -> rusqlite::Result<(u64, u64)> {
    let subfolders: i64 = conn.query_row(
        "SELECT COUNT(*) FROM folders WHERE parent_id = ?1",
        rusqlite::params![id],
        |r| r.get(0),
    )?;
    let files: i64 = conn.query_row(
        "SELECT COUNT(*) FROM files WHERE parent_id = ?1",
        rusqlite::params![id],
        |r| r.get(0),
    )?;
    Ok((subfolders.max(0) as u64, files.max(0) as u64))
}

fn list_child_files(
    conn: &rusqlite::Connection,
    id: FolderId,
) -> rusqlite::Result<Vec<(FileId, String)>> {
    let mut stmt = conn.prepare("SELECT id, name FROM files WHERE parent_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(rusqlite::params![id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect();
    rows
}

fn list_child_folders(
    conn: &rusqlite::Connection,
    id: FolderId,
) -> rusqlite::Result<Vec<(FolderId, String)>> {
    let mut stmt = conn.prepare("SELECT id, name FROM folders WHERE parent_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(rusqlite::params![id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect();
    rows
}

/// Push delete events for everything below `folder`, deepest first.
fn collect_subtree(
    conn: &rusqlite::Connection,
    folder: &Folder,
    events: &mut Vec<NewChangeEvent>,
    depth: usize,
) -> rusqlite::Result<()> {
    if depth >= MAX_DEPTH {
        return Ok(());
    }
    for (file_id, name) in list_child_files(conn, folder.id)? {
        events.push(delete_event(EntityType::File, file_id, Some(folder.id), &name));
    }
    for (sub_id, name) in list_child_folders(conn, folder.id)? {
        let sub = Folder {
            id: sub_id,
            user_id: folder.user_id,
            name,
            parent_id: Some(folder.id),
        };
        collect_subtree(conn, &sub, events, depth + 1)?;
        events.push(delete_event(EntityType::Folder, sub.id, sub.parent_id, &sub.name));
    }
    Ok(())
}

fn row_to_folder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        parent_id: row.get(3)?,
    })
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileEntry> {
    let created_at: String = row.get(7)?;
    Ok(FileEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        parent_id: row.get(3)?,
        size: row.get(4)?,
        mime_type: row.get(5)?,
        description: row.get(6)?,
        created_at: parse_timestamp(7, &created_at)?,
    })
}
