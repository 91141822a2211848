//! Structural predicates a reconciliation must satisfy before it commits.
//!
//! Both checks read the live tree. Their rendered reports are fed back to
//! the policy executor verbatim, so the wording is part of the contract.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use crate::db::{Database, StoreError};
use crate::types::{FolderRef, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantKind {
    /// A folder holds direct files and direct subfolders at the same time.
    MixedContent,
    /// A folder holds nothing at all.
    EmptyFolder,
}

impl InvariantKind {
    fn clean_message(&self) -> &'static str {
        match self {
            InvariantKind::MixedContent => "No folder contains both files and subfolders.",
            InvariantKind::EmptyFolder => "No empty folders found.",
        }
    }

    fn violation_header(&self) -> &'static str {
        match self {
            InvariantKind::MixedContent => {
                "The following folders contain both files and subfolders \
                 (single-content principle violated):"
            }
            InvariantKind::EmptyFolder => "The following folders are empty, delete them:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantReport {
    pub kind: InvariantKind,
    pub violations: Vec<FolderRef>,
}

impl InvariantReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for InvariantReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return f.write_str(self.kind.clean_message());
        }
        f.write_str(self.kind.violation_header())?;
        for folder in &self.violations {
            write!(f, "\n{folder}")?;
        }
        Ok(())
    }
}

/// Both reports taken together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub mixed_content: InvariantReport,
    pub empty_folders: InvariantReport,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.mixed_content.is_clean() && self.empty_folders.is_clean()
    }

    /// Reports of the failing checks only, separated by blank lines.
    pub fn render_violations(&self) -> String {
        [&self.mixed_content, &self.empty_folders]
            .into_iter()
            .filter(|r| !r.is_clean())
            .map(InvariantReport::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Clone)]
pub struct InvariantChecker {
    conn: Connection,
}

impl InvariantChecker {
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection().clone(),
        }
    }

    /// Folders (the virtual root included) with >=1 direct subfolder and
    /// >=1 direct file.
    pub async fn mixed_content_violations(&self, user_id: UserId) -> Result<InvariantReport, StoreError> {
        let violations = self
            .conn
            .call(move |conn| {
                let root_mixed: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM folders WHERE user_id = ?1 AND parent_id IS NULL)
                        AND EXISTS(SELECT 1 FROM files WHERE user_id = ?1 AND parent_id IS NULL)",
                    rusqlite::params![user_id],
                    |r| r.get(0),
                )?;
                let mut out = Vec::new();
                if root_mixed {
                    out.push(FolderRef::root());
                }
                let mut stmt = conn.prepare(
                    "SELECT f.id, f.name FROM folders f
                     WHERE f.user_id = ?1
                       AND EXISTS(SELECT 1 FROM folders c WHERE c.parent_id = f.id)
                       AND EXISTS(SELECT 1 FROM files x WHERE x.parent_id = f.id)
                     ORDER BY f.id",
                )?;
                let rows = stmt.query_map(rusqlite::params![user_id], |r| {
                    Ok(FolderRef {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;
        Ok(InvariantReport {
            kind: InvariantKind::MixedContent,
            violations,
        })
    }

    /// Folders with no subfolders and no files.
    pub async fn empty_folder_violations(&self, user_id: UserId) -> Result<InvariantReport, StoreError> {
        let violations = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT f.id, f.name FROM folders f
                     WHERE f.user_id = ?1
                       AND NOT EXISTS(SELECT 1 FROM folders c WHERE c.parent_id = f.id)
                       AND NOT EXISTS(SELECT 1 FROM files x WHERE x.parent_id = f.id)
                     ORDER BY f.id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id], |r| {
                        Ok(FolderRef {
                            id: r.get(0)?,
                            name: r.get(1)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(InvariantReport {
            kind: InvariantKind::EmptyFolder,
            violations,
        })
    }

    pub async fn validate(&self, user_id: UserId) -> Result<ValidationReport, StoreError> {
        Ok(ValidationReport {
            mixed_content: self.mixed_content_violations(user_id).await?,
            empty_folders: self.empty_folder_violations(user_id).await?,
        })
    }
}
