// crates/muninn-server/src/db/files.rs
// File rows: fragility, temperature, and change velocity tracking.

use crate::args;
use crate::store::Store;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub id: i64,
    pub path: String,
    pub fragility: f64,
    pub fragility_reason: Option<String>,
    pub temperature: String,
    pub change_count: i64,
    pub velocity_score: f64,
    pub content_hash: Option<String>,
    pub archived: bool,
}

fn file_from_row(row: &crate::store::Row) -> Result<FileInfo> {
    Ok(FileInfo {
        id: row.get(0)?,
        path: row.get(1)?,
        fragility: row.get(2)?,
        fragility_reason: row.get(3)?,
        temperature: row.get(4)?,
        change_count: row.get(5)?,
        velocity_score: row.get(6)?,
        content_hash: row.get(7)?,
        archived: row.get::<Option<String>>(8)?.is_some(),
    })
}

const FILE_COLUMNS: &str = "id, path, fragility, fragility_reason, temperature, \
                            change_count, velocity_score, content_hash, archived_at";

pub async fn get_file(store: &Store, project_id: i64, path: &str) -> Result<Option<FileInfo>> {
    let row = store
        .get(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE project_id = ?1 AND path = ?2"),
            args![project_id, path],
        )
        .await?;
    row.as_ref().map(file_from_row).transpose()
}

pub async fn list_project_files(
    store: &Store,
    project_id: i64,
    limit: usize,
) -> Result<Vec<FileInfo>> {
    let rows = store
        .all(
            &format!(
                "SELECT {FILE_COLUMNS} FROM files
                 WHERE project_id = ?1 AND archived_at IS NULL
                 ORDER BY change_count DESC LIMIT ?2"
            ),
            args![project_id, limit],
        )
        .await?;
    rows.iter().map(file_from_row).collect()
}

/// Register a commit touching a file: create the row on first reference,
/// bump change_count, mark hot, set first_changed_at once, and recompute
/// velocity_score = change_count / (1 + days_since_first_change).
pub async fn touch_file_for_commit(store: &Store, project_id: i64, path: &str) -> Result<()> {
    store
        .run(
            "INSERT INTO files (project_id, path, change_count, temperature, first_changed_at)
             VALUES (?1, ?2, 1, 'hot', CURRENT_TIMESTAMP)
             ON CONFLICT(project_id, path) DO UPDATE SET
                change_count = change_count + 1,
                temperature = 'hot',
                first_changed_at = COALESCE(first_changed_at, CURRENT_TIMESTAMP),
                updated_at = CURRENT_TIMESTAMP",
            args![project_id, path],
        )
        .await?;

    store
        .run(
            "UPDATE files SET velocity_score =
                CAST(change_count AS REAL) /
                (1.0 + MAX(0, julianday('now') - julianday(first_changed_at)))
             WHERE project_id = ?1 AND path = ?2",
            args![project_id, path],
        )
        .await?;
    Ok(())
}

/// Update last_referenced_at for a file mentioned by a tool call.
pub async fn mark_referenced(store: &Store, project_id: i64, path: &str) -> Result<()> {
    store
        .run(
            "UPDATE files SET last_referenced_at = CURRENT_TIMESTAMP
             WHERE project_id = ?1 AND path = ?2",
            args![project_id, path],
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::get_or_create_project;

    #[tokio::test]
    async fn test_touch_creates_then_increments() {
        let store = Store::open_in_memory().await.unwrap();
        let project = get_or_create_project(&store, "/p", None).await.unwrap();

        touch_file_for_commit(&store, project.id, "src/a.ts").await.unwrap();
        touch_file_for_commit(&store, project.id, "src/a.ts").await.unwrap();

        let file = get_file(&store, project.id, "src/a.ts").await.unwrap().unwrap();
        assert_eq!(file.change_count, 2);
        assert_eq!(file.temperature, "hot");
        assert!(file.velocity_score > 0.0, "velocity must be recomputed");
    }

    #[tokio::test]
    async fn test_get_file_missing() {
        let store = Store::open_in_memory().await.unwrap();
        let project = get_or_create_project(&store, "/p", None).await.unwrap();
        assert!(get_file(&store, project.id, "nope.rs").await.unwrap().is_none());
    }
}
