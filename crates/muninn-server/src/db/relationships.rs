// crates/muninn-server/src/db/relationships.rs
// Entity relationships stored as an adjacency table; traversal is
// query-driven, never pointer-chasing.

use crate::args;
use crate::error::{MuninnError, Result as MResult};
use crate::store::Store;
use anyhow::Result;

/// Relationship kinds accepted by `relate`.
pub const RELATIONSHIP_KINDS: &[&str] = &[
    "causes",
    "fixes",
    "supersedes",
    "depends_on",
    "contradicts",
    "supports",
    "follows",
    "related",
    "made",
    "found",
    "resolved",
    "learned",
    "often_changes_with",
    "tests",
];

/// Entity tables addressable from a relationship endpoint.
const ENTITY_TABLES: &[(&str, &str)] = &[
    ("file", "files"),
    ("decision", "decisions"),
    ("issue", "issues"),
    ("learning", "learnings"),
    ("session", "sessions"),
    ("commit", "git_commits"),
];

#[derive(Debug, Clone)]
pub struct Relationship {
    pub id: i64,
    pub source_type: String,
    pub source_id: i64,
    pub target_type: String,
    pub target_id: i64,
    pub relationship: String,
    pub strength: f64,
    pub notes: Option<String>,
}

fn table_for(entity_type: &str) -> Option<&'static str> {
    ENTITY_TABLES
        .iter()
        .find(|(t, _)| *t == entity_type)
        .map(|(_, table)| *table)
}

/// Verify an endpoint exists and is not archived.
async fn endpoint_exists(store: &Store, entity_type: &str, id: i64) -> MResult<bool> {
    let table = table_for(entity_type)
        .ok_or_else(|| MuninnError::InvalidInput(format!("unknown entity type: {entity_type}")))?;
    // Only knowledge tables carry archived_at
    let sql = if matches!(entity_type, "file" | "decision" | "learning") {
        format!("SELECT 1 FROM {table} WHERE id = ?1 AND archived_at IS NULL")
    } else {
        format!("SELECT 1 FROM {table} WHERE id = ?1")
    };
    Ok(store
        .get(&sql, args![id])
        .await
        .map_err(|e| MuninnError::Store(e.to_string()))?
        .is_some())
}

/// Insert (or refresh) a relationship. Both endpoints must exist and be
/// unarchived at insert time.
pub async fn relate(
    store: &Store,
    project_id: i64,
    source: (&str, i64),
    target: (&str, i64),
    relationship: &str,
    strength: f64,
    notes: Option<&str>,
) -> MResult<i64> {
    if !RELATIONSHIP_KINDS.contains(&relationship) {
        return Err(MuninnError::InvalidInput(format!(
            "unknown relationship: {relationship}"
        )));
    }
    if !endpoint_exists(store, source.0, source.1).await? {
        return Err(MuninnError::NotFound(format!("{} {}", source.0, source.1)));
    }
    if !endpoint_exists(store, target.0, target.1).await? {
        return Err(MuninnError::NotFound(format!("{} {}", target.0, target.1)));
    }

    let result = store
        .run(
            "INSERT INTO relationships
                (project_id, source_type, source_id, target_type, target_id, relationship, strength, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(project_id, source_type, source_id, target_type, target_id, relationship)
             DO UPDATE SET strength = ?7, notes = COALESCE(?8, notes)",
            args![
                project_id,
                source.0,
                source.1,
                target.0,
                target.1,
                relationship,
                strength.clamp(1.0, 10.0),
                notes
            ],
        )
        .await
        .map_err(|e| MuninnError::Store(e.to_string()))?;
    Ok(result.last_insert_id)
}

/// Relationships where the entity appears on either end.
pub async fn relations_for(
    store: &Store,
    project_id: i64,
    entity: (&str, i64),
) -> Result<Vec<Relationship>> {
    let rows = store
        .all(
            "SELECT id, source_type, source_id, target_type, target_id, relationship, strength, notes
             FROM relationships
             WHERE project_id = ?1
               AND ((source_type = ?2 AND source_id = ?3) OR (target_type = ?2 AND target_id = ?3))
             ORDER BY strength DESC",
            args![project_id, entity.0, entity.1],
        )
        .await?;
    rows.iter()
        .map(|row| {
            Ok(Relationship {
                id: row.get(0)?,
                source_type: row.get(1)?,
                source_id: row.get(2)?,
                target_type: row.get(3)?,
                target_id: row.get(4)?,
                relationship: row.get(5)?,
                strength: row.get(6)?,
                notes: row.get(7)?,
            })
        })
        .collect()
}

pub async fn unrelate(store: &Store, project_id: i64, relationship_id: i64) -> Result<bool> {
    let result = store
        .run(
            "DELETE FROM relationships WHERE project_id = ?1 AND id = ?2",
            args![project_id, relationship_id],
        )
        .await?;
    Ok(result.changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::get_or_create_project;

    async fn seed(store: &Store) -> (i64, i64, i64) {
        let project = get_or_create_project(store, "/p", None).await.unwrap();
        let file = store
            .run(
                "INSERT INTO files (project_id, path) VALUES (?1, 'src/a.ts')",
                args![project.id],
            )
            .await
            .unwrap()
            .last_insert_id;
        let issue = store
            .run(
                "INSERT INTO issues (project_id, title) VALUES (?1, 'flaky test')",
                args![project.id],
            )
            .await
            .unwrap()
            .last_insert_id;
        (project.id, file, issue)
    }

    #[tokio::test]
    async fn test_relate_and_list() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, file, issue) = seed(&store).await;

        relate(&store, project_id, ("issue", issue), ("file", file), "causes", 7.0, None)
            .await
            .unwrap();

        let rels = relations_for(&store, project_id, ("file", file)).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relationship, "causes");
    }

    #[tokio::test]
    async fn test_relate_rejects_missing_endpoint() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, file, _) = seed(&store).await;

        let err = relate(&store, project_id, ("file", file), ("decision", 999), "supports", 5.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MuninnError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_relate_rejects_unknown_kind() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, file, issue) = seed(&store).await;
        let err = relate(&store, project_id, ("issue", issue), ("file", file), "likes", 5.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MuninnError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_relate_rejects_archived_endpoint() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, file, issue) = seed(&store).await;
        store
            .run("UPDATE files SET archived_at = CURRENT_TIMESTAMP WHERE id = ?1", args![file])
            .await
            .unwrap();
        let err = relate(&store, project_id, ("issue", issue), ("file", file), "causes", 5.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MuninnError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unrelate() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, file, issue) = seed(&store).await;
        relate(&store, project_id, ("issue", issue), ("file", file), "causes", 7.0, None)
            .await
            .unwrap();
        let rels = relations_for(&store, project_id, ("file", file)).await.unwrap();
        assert!(unrelate(&store, project_id, rels[0].id).await.unwrap());
        assert!(!unrelate(&store, project_id, rels[0].id).await.unwrap());
    }
}
