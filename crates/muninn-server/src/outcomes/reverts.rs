// crates/muninn-server/src/outcomes/reverts.rs
// Revert detection. Scans commits without a revert_events row for the
// three revert shapes, resolves the original commit, and downgrades the
// knowledge derived from it: linked learnings lose confidence, decisions
// touching the reverted files drop to needs_review.

use crate::args;
use crate::db::from_json_array;
use crate::store::Store;
use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static RE_REVERT_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^Revert\s+"(?P<subject>.+)""#).expect("valid regex"));
#[allow(clippy::expect_used)]
static RE_REVERT_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\brevert(?:s|ed)?\s+(?P<hash>[0-9a-f]{7,40})\b").expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_REVERT_LEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^revert[:\s-]").expect("valid regex"));

/// How a revert referenced its original.
#[derive(Debug, Clone, PartialEq)]
pub enum RevertRef {
    Subject(String),
    HashPrefix(String),
    Bare,
}

/// Classify a commit message as a revert, if it is one.
pub fn detect_revert(message: &str) -> Option<RevertRef> {
    let subject = message.lines().next().unwrap_or("");
    if let Some(caps) = RE_REVERT_QUOTED.captures(subject) {
        return Some(RevertRef::Subject(caps["subject"].to_string()));
    }
    if let Some(caps) = RE_REVERT_HASH.captures(subject) {
        return Some(RevertRef::HashPrefix(caps["hash"].to_string()));
    }
    if RE_REVERT_LEADING.is_match(subject) {
        return Some(RevertRef::Bare);
    }
    None
}

/// Scan unprocessed commits for reverts and apply knowledge impact.
/// Returns the number of revert events recorded.
pub async fn detect_reverts(store: &Store, project_id: i64) -> Result<usize> {
    let commits = store
        .all(
            "SELECT c.id, c.commit_hash, c.message, c.files_changed
             FROM git_commits c
             LEFT JOIN revert_events r
               ON r.project_id = c.project_id AND r.revert_commit_hash = c.commit_hash
             WHERE c.project_id = ?1 AND r.id IS NULL
             ORDER BY c.id",
            args![project_id],
        )
        .await?;

    let mut recorded = 0;
    for commit in commits {
        let hash: String = commit.get(1)?;
        let message: String = commit.get::<Option<String>>(2)?.unwrap_or_default();
        let files = from_json_array(commit.get::<Option<String>>(3)?.as_deref());

        let Some(revert_ref) = detect_revert(&message) else {
            continue;
        };

        let original = resolve_original(store, project_id, &hash, &revert_ref).await?;

        if let Some((original_id, original_hash)) = &original {
            apply_revert_impact(store, project_id, *original_id, original_hash, &files).await?;
        }

        store
            .run(
                "INSERT INTO revert_events
                    (project_id, revert_commit_hash, original_commit_hash, reverted_files, processed)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT(project_id, revert_commit_hash) DO NOTHING",
                args![
                    project_id,
                    hash,
                    original.as_ref().map(|(_, h)| h.clone()),
                    crate::db::to_json_array(&files)
                ],
            )
            .await?;
        recorded += 1;
    }
    Ok(recorded)
}

/// Resolve the reverted commit by hash prefix or subject substring.
async fn resolve_original(
    store: &Store,
    project_id: i64,
    revert_hash: &str,
    revert_ref: &RevertRef,
) -> Result<Option<(i64, String)>> {
    let row = match revert_ref {
        RevertRef::HashPrefix(prefix) => {
            store
                .get(
                    "SELECT id, commit_hash FROM git_commits
                     WHERE project_id = ?1 AND commit_hash LIKE ?2 AND commit_hash != ?3",
                    args![project_id, format!("{prefix}%"), revert_hash],
                )
                .await?
        }
        RevertRef::Subject(subject) => {
            store
                .get(
                    "SELECT id, commit_hash FROM git_commits
                     WHERE project_id = ?1 AND message LIKE ?2 AND commit_hash != ?3
                     ORDER BY id DESC LIMIT 1",
                    args![project_id, format!("%{subject}%"), revert_hash],
                )
                .await?
        }
        RevertRef::Bare => None,
    };
    row.map(|r| Ok((r.get::<i64>(0)?, r.get::<String>(1)?))).transpose()
}

/// Knowledge impact: learnings from the original commit's session lose
/// 30% confidence (floor 1.0); decisions whose affects overlap the
/// reverted files drop to needs_review.
async fn apply_revert_impact(
    store: &Store,
    project_id: i64,
    original_commit_id: i64,
    _original_hash: &str,
    reverted_files: &[String],
) -> Result<()> {
    store
        .run(
            "UPDATE learnings SET confidence = MAX(1.0, confidence * 0.7),
                    updated_at = CURRENT_TIMESTAMP
             WHERE project_id = ?1
               AND id IN (
                   SELECT r.target_id FROM relationships r
                   WHERE r.project_id = ?1 AND r.target_type = 'learning'
                     AND r.source_type = 'session'
                     AND r.source_id = (SELECT session_id FROM git_commits WHERE id = ?2)
               )",
            args![project_id, original_commit_id],
        )
        .await?;

    for file in reverted_files {
        store
            .run(
                "UPDATE decisions SET outcome_status = 'needs_review',
                        updated_at = CURRENT_TIMESTAMP
                 WHERE project_id = ?1 AND status = 'active' AND affects LIKE ?2",
                args![project_id, format!("%{file}%")],
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_quoted_revert() {
        assert_eq!(
            detect_revert("Revert \"feat: add cache layer\""),
            Some(RevertRef::Subject("feat: add cache layer".into()))
        );
    }

    #[test]
    fn test_detect_hash_revert() {
        assert_eq!(
            detect_revert("This reverts abc1234 due to regressions"),
            Some(RevertRef::HashPrefix("abc1234".into()))
        );
    }

    #[test]
    fn test_detect_leading_revert() {
        assert_eq!(detect_revert("revert: cache layer"), Some(RevertRef::Bare));
        assert_eq!(detect_revert("revert - bad idea"), Some(RevertRef::Bare));
    }

    #[test]
    fn test_normal_commit_not_revert() {
        assert_eq!(detect_revert("feat: reverter utility"), None);
        assert_eq!(detect_revert("fix: restore behavior"), None);
    }

    async fn seed(store: &Store) -> (i64, i64) {
        let project = crate::db::get_or_create_project(store, "/p", None).await.unwrap();
        let session = crate::db::open_session(store, project.id, "g").await.unwrap();
        (project.id, session.id)
    }

    #[tokio::test]
    async fn test_revert_downgrades_decision_and_learning() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, session_id) = seed(&store).await;

        // Original commit in the session
        store
            .run(
                "INSERT INTO git_commits (project_id, session_id, commit_hash, message, files_changed, analyzed)
                 VALUES (?1, ?2, 'orig123', 'feat: add cache layer', '[\"src/cache.ts\"]', 0)",
                args![project_id, session_id],
            )
            .await
            .unwrap();
        // Learning linked to that session
        let learning_id = store
            .run(
                "INSERT INTO learnings (project_id, title, content, confidence)
                 VALUES (?1, 'cache tip', 'use LRU', 5.0)",
                args![project_id],
            )
            .await
            .unwrap()
            .last_insert_id;
        store
            .run(
                "INSERT INTO relationships
                    (project_id, source_type, source_id, target_type, target_id, relationship)
                 VALUES (?1, 'session', ?2, 'learning', ?3, 'learned')",
                args![project_id, session_id, learning_id],
            )
            .await
            .unwrap();
        // Decision affecting the reverted file
        store
            .run(
                "INSERT INTO decisions (project_id, title, affects, status)
                 VALUES (?1, 'Cache everything', '[\"src/cache.ts\"]', 'active')",
                args![project_id],
            )
            .await
            .unwrap();
        // The revert commit
        store
            .run(
                "INSERT INTO git_commits (project_id, commit_hash, message, files_changed, analyzed)
                 VALUES (?1, 'rev456', 'Revert \"feat: add cache layer\"', '[\"src/cache.ts\"]', 0)",
                args![project_id],
            )
            .await
            .unwrap();

        assert_eq!(detect_reverts(&store, project_id).await.unwrap(), 1);

        let confidence: f64 = store
            .get("SELECT confidence FROM learnings WHERE id = ?1", args![learning_id])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert!((confidence - 3.5).abs() < 1e-9, "5.0 * 0.7 = 3.5");

        let outcome: String = store
            .get("SELECT outcome_status FROM decisions", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(outcome, "needs_review");

        let event = store
            .get(
                "SELECT original_commit_hash, processed FROM revert_events",
                args![],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.get::<Option<String>>(0).unwrap().as_deref(), Some("orig123"));
        assert_eq!(event.get::<i64>(1).unwrap(), 1);

        // Second pass left-joins against processed hashes: no double impact
        assert_eq!(detect_reverts(&store, project_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_learning_confidence_floor() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, session_id) = seed(&store).await;
        store
            .run(
                "INSERT INTO git_commits (project_id, session_id, commit_hash, message, files_changed, analyzed)
                 VALUES (?1, ?2, 'abcdef1234', 'feat: tiny', '[]', 0)",
                args![project_id, session_id],
            )
            .await
            .unwrap();
        let learning_id = store
            .run(
                "INSERT INTO learnings (project_id, title, content, confidence)
                 VALUES (?1, 't', 'c', 1.2)",
                args![project_id],
            )
            .await
            .unwrap()
            .last_insert_id;
        store
            .run(
                "INSERT INTO relationships
                    (project_id, source_type, source_id, target_type, target_id, relationship)
                 VALUES (?1, 'session', ?2, 'learning', ?3, 'learned')",
                args![project_id, session_id, learning_id],
            )
            .await
            .unwrap();
        store
            .run(
                "INSERT INTO git_commits (project_id, commit_hash, message, files_changed, analyzed)
                 VALUES (?1, 'rev1', 'reverted abcdef1 for safety', '[]', 0)",
                args![project_id],
            )
            .await
            .unwrap();

        detect_reverts(&store, project_id).await.unwrap();
        let confidence: f64 = store
            .get("SELECT confidence FROM learnings WHERE id = ?1", args![learning_id])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert!((confidence - 1.0).abs() < 1e-9, "floor at 1.0");
    }
}
