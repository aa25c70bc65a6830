// crates/muninn-server/src/db/project.rs
// Project rows: created on first reference, never hard-deleted.

use crate::args;
use crate::store::Store;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub id: i64,
    pub path: String,
    pub name: Option<String>,
}

/// Get or create the project for a working directory.
pub async fn get_or_create_project(
    store: &Store,
    path: &str,
    name: Option<&str>,
) -> Result<ProjectInfo> {
    if let Some(row) = store
        .get("SELECT id, path, name FROM projects WHERE path = ?1", args![path])
        .await?
    {
        return Ok(ProjectInfo {
            id: row.get(0)?,
            path: row.get(1)?,
            name: row.get(2)?,
        });
    }

    let inferred = name
        .map(str::to_string)
        .or_else(|| {
            std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        });
    let result = store
        .run(
            "INSERT INTO projects (path, name) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET updated_at = CURRENT_TIMESTAMP",
            args![path, inferred.clone()],
        )
        .await?;

    Ok(ProjectInfo {
        id: result.last_insert_id,
        path: path.to_string(),
        name: inferred,
    })
}

pub async fn get_project_by_id(store: &Store, project_id: i64) -> Result<Option<ProjectInfo>> {
    let row = store
        .get(
            "SELECT id, path, name FROM projects WHERE id = ?1",
            args![project_id],
        )
        .await?;
    row.map(|r| {
        Ok(ProjectInfo {
            id: r.get(0)?,
            path: r.get(1)?,
            name: r.get(2)?,
        })
    })
    .transpose()
}
