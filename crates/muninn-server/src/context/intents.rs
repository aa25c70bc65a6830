// crates/muninn-server/src/context/intents.rs
// Multi-agent intent declarations: short-lived claims on files, with
// conflict detection against other agents' active intents.

use crate::args;
use crate::db::{from_json_array, to_json_array};
use crate::store::Store;
use anyhow::Result;

/// Intent TTL in minutes.
const INTENT_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone)]
pub struct AgentIntent {
    pub id: i64,
    pub agent_id: String,
    pub intent_type: String,
    pub description: Option<String>,
    pub target_files: Vec<String>,
}

/// Declare an intent. Returns the new intent plus any conflicting active
/// intents from other agents whose target files intersect ours.
pub async fn declare_intent(
    store: &Store,
    project_id: i64,
    agent_id: &str,
    intent_type: &str,
    description: &str,
    files: &[String],
) -> Result<(i64, Vec<AgentIntent>)> {
    let conflicts = query_intents(store, project_id, Some(files))
        .await?
        .into_iter()
        .filter(|intent| intent.agent_id != agent_id)
        .collect();

    let result = store
        .run(
            "INSERT INTO agent_intents
                (project_id, agent_id, intent_type, description, target_files, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now', ?6))",
            args![
                project_id,
                agent_id,
                intent_type,
                description,
                to_json_array(files),
                format!("+{INTENT_TTL_MINUTES} minutes")
            ],
        )
        .await?;

    Ok((result.last_insert_id, conflicts))
}

/// Active (unexpired, unreleased) intents; optionally filtered to those
/// intersecting a file set.
pub async fn query_intents(
    store: &Store,
    project_id: i64,
    files: Option<&[String]>,
) -> Result<Vec<AgentIntent>> {
    let rows = store
        .all(
            "SELECT id, agent_id, intent_type, description, target_files
             FROM agent_intents
             WHERE project_id = ?1 AND released = 0 AND expires_at > datetime('now')
             ORDER BY id",
            args![project_id],
        )
        .await?;

    let mut intents = Vec::new();
    for row in rows {
        let intent = AgentIntent {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            intent_type: row.get(2)?,
            description: row.get(3)?,
            target_files: from_json_array(row.get::<Option<String>>(4)?.as_deref()),
        };
        let keep = match files {
            Some(filter) => intent.target_files.iter().any(|f| filter.contains(f)),
            None => true,
        };
        if keep {
            intents.push(intent);
        }
    }
    Ok(intents)
}

/// Release an agent's intents (all of them, or one by id).
pub async fn release_intent(
    store: &Store,
    project_id: i64,
    agent_id: &str,
    intent_id: Option<i64>,
) -> Result<usize> {
    let result = match intent_id {
        Some(id) => {
            store
                .run(
                    "UPDATE agent_intents SET released = 1
                     WHERE project_id = ?1 AND agent_id = ?2 AND id = ?3",
                    args![project_id, agent_id, id],
                )
                .await?
        }
        None => {
            store
                .run(
                    "UPDATE agent_intents SET released = 1
                     WHERE project_id = ?1 AND agent_id = ?2 AND released = 0",
                    args![project_id, agent_id],
                )
                .await?
        }
    };
    Ok(result.changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_conflict_detection_on_overlap() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        let files = vec!["src/a.ts".to_string()];

        let (_, conflicts) =
            declare_intent(&store, project_id, "agent-1", "edit", "refactor a", &files)
                .await
                .unwrap();
        assert!(conflicts.is_empty());

        let (_, conflicts) =
            declare_intent(&store, project_id, "agent-2", "edit", "also edit a", &files)
                .await
                .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].agent_id, "agent-1");
    }

    #[tokio::test]
    async fn test_own_intents_not_conflicts() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        let files = vec!["src/a.ts".to_string()];

        declare_intent(&store, project_id, "agent-1", "edit", "first", &files).await.unwrap();
        let (_, conflicts) =
            declare_intent(&store, project_id, "agent-1", "edit", "second", &files)
                .await
                .unwrap();
        assert!(conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_released_and_expired_ignored() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        let files = vec!["src/a.ts".to_string()];

        declare_intent(&store, project_id, "agent-1", "edit", "i", &files).await.unwrap();
        assert_eq!(release_intent(&store, project_id, "agent-1", None).await.unwrap(), 1);
        assert!(query_intents(&store, project_id, None).await.unwrap().is_empty());

        // Expired intents also drop out
        declare_intent(&store, project_id, "agent-2", "edit", "i", &files).await.unwrap();
        store
            .run(
                "UPDATE agent_intents SET expires_at = datetime('now', '-1 minute')
                 WHERE agent_id = 'agent-2'",
                args![],
            )
            .await
            .unwrap();
        assert!(query_intents(&store, project_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disjoint_files_no_conflict() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;

        declare_intent(&store, project_id, "agent-1", "edit", "a", &["src/a.ts".to_string()])
            .await
            .unwrap();
        let (_, conflicts) =
            declare_intent(&store, project_id, "agent-2", "edit", "b", &["src/b.ts".to_string()])
                .await
                .unwrap();
        assert!(conflicts.is_empty());
    }
}
