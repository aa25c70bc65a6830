// crates/muninn-server/src/outcomes/decisions.rs
// Session-scoped follow-ups on recorded knowledge: the decision outcome
// tracker, the confidence calibrator, and the context-feedback processor.
// All three share the shape "read raw, compute derived, upsert on
// conflict keys".

use crate::args;
use crate::db::from_json_array;
use crate::store::Store;
use anyhow::Result;

/// Decision outcome tracking. A pending decision whose affected files
/// were all touched by commits without a subsequent revert succeeds;
/// a decision overlapping reverted files fails. Only the tracker (and an
/// explicit user call) may change decision status.
pub async fn track_decision_outcomes(store: &Store, project_id: i64) -> Result<usize> {
    let decisions = store
        .all(
            "SELECT id, affects FROM decisions
             WHERE project_id = ?1 AND status = 'active' AND outcome_status = 'pending'",
            args![project_id],
        )
        .await?;

    let reverted: Vec<String> = {
        let rows = store
            .all(
                "SELECT reverted_files FROM revert_events WHERE project_id = ?1",
                args![project_id],
            )
            .await?;
        let mut all = Vec::new();
        for row in rows {
            all.extend(from_json_array(row.get::<Option<String>>(0)?.as_deref()));
        }
        all
    };

    let mut updated = 0;
    for decision in decisions {
        let id: i64 = decision.get(0)?;
        let affects = from_json_array(decision.get::<Option<String>>(1)?.as_deref());
        if affects.is_empty() {
            continue;
        }

        if affects.iter().any(|f| reverted.contains(f)) {
            store
                .run(
                    "UPDATE decisions SET outcome_status = 'failed',
                            outcome_notes = 'affected files were reverted',
                            updated_at = CURRENT_TIMESTAMP
                     WHERE id = ?1",
                    args![id],
                )
                .await?;
            updated += 1;
            continue;
        }

        // Succeeded: every affected file committed since the decision,
        // and the decision has aged past the churn window
        let committed: i64 = store
            .get(
                "SELECT COUNT(DISTINCT f.path) FROM files f
                 WHERE f.project_id = ?1
                   AND f.path IN (SELECT value FROM json_each((SELECT affects FROM decisions WHERE id = ?2)))
                   AND f.change_count > 0",
                args![project_id, id],
            )
            .await?
            .map(|r| r.get(0))
            .transpose()?
            .unwrap_or(0);

        let aged = store
            .get(
                "SELECT 1 FROM decisions WHERE id = ?1 AND created_at < datetime('now', '-7 days')",
                args![id],
            )
            .await?
            .is_some();

        if aged && committed as usize == affects.len() {
            store
                .run(
                    "UPDATE decisions SET outcome_status = 'succeeded',
                            updated_at = CURRENT_TIMESTAMP
                     WHERE id = ?1",
                    args![id],
                )
                .await?;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Confidence calibration: compare each decision's outcome against the
/// confidence of learnings injected alongside it, nudging learnings whose
/// confidence disagrees with observed outcomes.
pub async fn calibrate_confidence(store: &Store, project_id: i64) -> Result<usize> {
    // Overconfident: high-confidence learnings co-injected into failing sessions
    let overconfident = store
        .run(
            "UPDATE learnings SET confidence = MAX(0.5, confidence - 0.2),
                    updated_at = CURRENT_TIMESTAMP
             WHERE project_id = ?1 AND confidence > 7.0 AND archived_at IS NULL
               AND id IN (
                   SELECT ci.source_id FROM context_injections ci
                   JOIN sessions s ON s.id = ci.session_id
                   WHERE ci.source_type = 'learning' AND s.success = 0
               )",
            args![project_id],
        )
        .await?;

    // Underconfident: low-confidence learnings repeatedly in winning sessions
    let underconfident = store
        .run(
            "UPDATE learnings SET confidence = MIN(10.0, confidence + 0.1),
                    updated_at = CURRENT_TIMESTAMP
             WHERE project_id = ?1 AND confidence < 2.0 AND times_applied >= 3
               AND archived_at IS NULL
               AND id IN (
                   SELECT ci.source_id FROM context_injections ci
                   JOIN sessions s ON s.id = ci.session_id
                   WHERE ci.source_type = 'learning' AND s.success = 2
               )",
            args![project_id],
        )
        .await?;

    Ok(overconfident.changes + underconfident.changes)
}

/// Context-feedback processing: roll injection relevance signals into
/// per-source hit counts on value_metrics for the current month.
pub async fn process_context_feedback(store: &Store, project_id: i64) -> Result<()> {
    let row = store
        .get(
            "SELECT
                COUNT(*),
                SUM(CASE WHEN relevance_signal = 'positive' THEN 1 ELSE 0 END),
                COUNT(DISTINCT CASE WHEN source_type = 'decision' THEN source_id END),
                COUNT(DISTINCT CASE WHEN source_type = 'learning' THEN source_id END)
             FROM context_injections
             WHERE project_id = ?1 AND injected_at >= date('now', 'start of month')",
            args![project_id],
        )
        .await?;
    let Some(row) = row else { return Ok(()) };

    let total: i64 = row.get(0)?;
    let hits: i64 = row.get::<Option<i64>>(1)?.unwrap_or(0);
    let decisions: i64 = row.get(2)?;
    let learnings: i64 = row.get(3)?;

    let contradictions: i64 = store
        .get(
            "SELECT COUNT(*) FROM contradiction_alerts
             WHERE project_id = ?1 AND created_at >= date('now', 'start of month')",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);

    let sessions: i64 = store
        .get(
            "SELECT COUNT(*) FROM sessions
             WHERE project_id = ?1 AND started_at >= date('now', 'start of month')",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);

    // Last writer wins on the (project, month) key
    store
        .run(
            "INSERT INTO value_metrics
                (project_id, month, contradictions_caught, injections_total, injection_hits,
                 decisions_recalled, learnings_recalled, sessions_count)
             VALUES (?1, strftime('%Y-%m', 'now'), ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(project_id, month) DO UPDATE SET
                contradictions_caught = ?2, injections_total = ?3, injection_hits = ?4,
                decisions_recalled = ?5, learnings_recalled = ?6, sessions_count = ?7,
                updated_at = CURRENT_TIMESTAMP",
            args![project_id, contradictions, total, hits, decisions, learnings, sessions],
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &Store) -> i64 {
        crate::db::get_or_create_project(store, "/p", None).await.unwrap().id
    }

    #[tokio::test]
    async fn test_decision_fails_on_reverted_overlap() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = seed(&store).await;
        store
            .run(
                "INSERT INTO decisions (project_id, title, affects, status, outcome_status)
                 VALUES (?1, 'd', '[\"src/cache.ts\"]', 'active', 'pending')",
                args![project_id],
            )
            .await
            .unwrap();
        store
            .run(
                "INSERT INTO revert_events (project_id, revert_commit_hash, reverted_files, processed)
                 VALUES (?1, 'r1', '[\"src/cache.ts\"]', 1)",
                args![project_id],
            )
            .await
            .unwrap();

        assert_eq!(track_decision_outcomes(&store, project_id).await.unwrap(), 1);
        let outcome: String = store
            .get("SELECT outcome_status FROM decisions", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(outcome, "failed");
    }

    #[tokio::test]
    async fn test_aged_committed_decision_succeeds() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = seed(&store).await;
        store
            .run(
                "INSERT INTO decisions (project_id, title, affects, status, outcome_status, created_at)
                 VALUES (?1, 'd', '[\"src/a.ts\"]', 'active', 'pending', datetime('now', '-10 days'))",
                args![project_id],
            )
            .await
            .unwrap();
        crate::db::touch_file_for_commit(&store, project_id, "src/a.ts").await.unwrap();

        assert_eq!(track_decision_outcomes(&store, project_id).await.unwrap(), 1);
        let outcome: String = store
            .get("SELECT outcome_status FROM decisions", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(outcome, "succeeded");
    }

    #[tokio::test]
    async fn test_young_decision_stays_pending() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = seed(&store).await;
        store
            .run(
                "INSERT INTO decisions (project_id, title, affects, status, outcome_status)
                 VALUES (?1, 'd', '[\"src/a.ts\"]', 'active', 'pending')",
                args![project_id],
            )
            .await
            .unwrap();
        crate::db::touch_file_for_commit(&store, project_id, "src/a.ts").await.unwrap();

        assert_eq!(track_decision_outcomes(&store, project_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_value_metrics_upsert() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = seed(&store).await;
        let session = crate::db::open_session(&store, project_id, "g").await.unwrap();
        let learning = store
            .run(
                "INSERT INTO learnings (project_id, title, content) VALUES (?1, 't', 'c')",
                args![project_id],
            )
            .await
            .unwrap()
            .last_insert_id;
        store
            .run(
                "INSERT INTO context_injections
                    (project_id, session_id, source_type, source_id, relevance_signal)
                 VALUES (?1, ?2, 'learning', ?3, 'positive')",
                args![project_id, session.id, learning],
            )
            .await
            .unwrap();

        process_context_feedback(&store, project_id).await.unwrap();
        process_context_feedback(&store, project_id).await.unwrap();

        let rows = store
            .all("SELECT injections_total, injection_hits, learnings_recalled FROM value_metrics", args![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1, "monthly upsert, not append");
        assert_eq!(rows[0].get::<i64>(0).unwrap(), 1);
        assert_eq!(rows[0].get::<i64>(1).unwrap(), 1);
        assert_eq!(rows[0].get::<i64>(2).unwrap(), 1);
    }
}
