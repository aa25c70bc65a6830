// crates/muninn-server/src/db/sessions.rs
// Session rows. Invariant: at most one session per project with
// ended_at IS NULL at any instant.

use crate::args;
use crate::store::Store;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: i64,
    pub project_id: i64,
    pub session_number: i64,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub goal: Option<String>,
    pub success: Option<i64>,
}

fn session_from_row(row: &crate::store::Row) -> Result<SessionInfo> {
    Ok(SessionInfo {
        id: row.get(0)?,
        project_id: row.get(1)?,
        session_number: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        goal: row.get(5)?,
        success: row.get(6)?,
    })
}

const SESSION_COLUMNS: &str =
    "id, project_id, session_number, started_at, ended_at, goal, success";

/// The open session for a project, if any.
pub async fn current_session(store: &Store, project_id: i64) -> Result<Option<SessionInfo>> {
    let row = store
        .get(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE project_id = ?1 AND ended_at IS NULL
                 ORDER BY id DESC LIMIT 1"
            ),
            args![project_id],
        )
        .await?;
    row.as_ref().map(session_from_row).transpose()
}

pub async fn session_by_id(store: &Store, session_id: i64) -> Result<Option<SessionInfo>> {
    let row = store
        .get(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            args![session_id],
        )
        .await?;
    row.as_ref().map(session_from_row).transpose()
}

/// Open a session, reusing the existing open one to preserve the
/// single-open-session invariant.
pub async fn open_session(store: &Store, project_id: i64, goal: &str) -> Result<SessionInfo> {
    if let Some(open) = current_session(store, project_id).await? {
        return Ok(open);
    }

    let number: i64 = store
        .get(
            "SELECT COALESCE(MAX(session_number), 0) + 1 FROM sessions WHERE project_id = ?1",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(1);

    let result = store
        .run(
            "INSERT INTO sessions (project_id, session_number, goal) VALUES (?1, ?2, ?3)",
            args![project_id, number, goal],
        )
        .await?;

    Ok(SessionInfo {
        id: result.last_insert_id,
        project_id,
        session_number: number,
        started_at: String::new(),
        ended_at: None,
        goal: Some(goal.to_string()),
        success: None,
    })
}

/// Close a session with its inferred outcome.
pub async fn close_session(
    store: &Store,
    session_id: i64,
    outcome: &str,
    success: i64,
) -> Result<()> {
    store
        .run(
            "UPDATE sessions SET ended_at = CURRENT_TIMESTAMP, outcome = ?2, success = ?3
             WHERE id = ?1 AND ended_at IS NULL",
            args![session_id, outcome, success],
        )
        .await?;
    Ok(())
}

/// Total sessions recorded for a project (used for every-Nth-session jobs).
pub async fn count_sessions(store: &Store, project_id: i64) -> Result<i64> {
    Ok(store
        .get(
            "SELECT COUNT(*) FROM sessions WHERE project_id = ?1",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::get_or_create_project;

    #[tokio::test]
    async fn test_single_open_session_invariant() {
        let store = Store::open_in_memory().await.unwrap();
        let project = get_or_create_project(&store, "/p", None).await.unwrap();

        let first = open_session(&store, project.id, "Auto-started session").await.unwrap();
        let second = open_session(&store, project.id, "another goal").await.unwrap();
        assert_eq!(first.id, second.id, "open_session must reuse the open session");

        close_session(&store, first.id, "done", 2).await.unwrap();
        let third = open_session(&store, project.id, "Auto-started session").await.unwrap();
        assert_ne!(first.id, third.id);
        assert_eq!(third.session_number, 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let project = get_or_create_project(&store, "/p", None).await.unwrap();
        let session = open_session(&store, project.id, "g").await.unwrap();

        close_session(&store, session.id, "done", 1).await.unwrap();
        close_session(&store, session.id, "done again", 0).await.unwrap();

        let closed = session_by_id(&store, session.id).await.unwrap().unwrap();
        assert_eq!(closed.success, Some(1), "second close must not overwrite");
    }
}
