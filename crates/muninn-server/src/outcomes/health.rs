// crates/muninn-server/src/outcomes/health.rs
// Project health score: a weighted composite of five 0-100 components.
// Weights: fragility 0.25, decision success 0.20, learning confidence
// 0.20, issue resolution 0.20, knowledge freshness 0.15.

use crate::args;
use crate::store::Store;
use anyhow::Result;

const W_FRAGILITY: f64 = 0.25;
const W_DECISIONS: f64 = 0.20;
const W_LEARNINGS: f64 = 0.20;
const W_ISSUES: f64 = 0.20;
const W_FRESHNESS: f64 = 0.15;

/// Component scores plus the weighted overall.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthScore {
    pub fragility: i64,
    pub decision_success: i64,
    pub learning_confidence: i64,
    pub issue_resolution: i64,
    pub freshness: i64,
    pub overall: i64,
}

/// Compute the health composite for a project.
pub async fn health_score(store: &Store, project_id: i64) -> Result<HealthScore> {
    let fragility = fragility_component(store, project_id).await?;
    let decision_success = decision_component(store, project_id).await?;
    let learning_confidence = learning_component(store, project_id).await?;
    let issue_resolution = issue_component(store, project_id).await?;
    let freshness = freshness_component(store, project_id).await?;

    let overall = (fragility as f64 * W_FRAGILITY
        + decision_success as f64 * W_DECISIONS
        + learning_confidence as f64 * W_LEARNINGS
        + issue_resolution as f64 * W_ISSUES
        + freshness as f64 * W_FRESHNESS)
        .round() as i64;

    Ok(HealthScore {
        fragility,
        decision_success,
        learning_confidence,
        issue_resolution,
        freshness,
        overall,
    })
}

/// 100 when nothing is fragile; scaled down by the share of files at
/// fragility >= 7.
async fn fragility_component(store: &Store, project_id: i64) -> Result<i64> {
    let row = store
        .get(
            "SELECT COUNT(*), SUM(CASE WHEN fragility >= 7 THEN 1 ELSE 0 END)
             FROM files WHERE project_id = ?1 AND archived_at IS NULL",
            args![project_id],
        )
        .await?;
    let Some(row) = row else { return Ok(100) };
    let total: i64 = row.get(0)?;
    let fragile: i64 = row.get::<Option<i64>>(1)?.unwrap_or(0);
    if total == 0 {
        return Ok(100);
    }
    Ok((100.0 * (1.0 - fragile as f64 / total as f64)).round() as i64)
}

/// Share of resolved decision outcomes that succeeded.
async fn decision_component(store: &Store, project_id: i64) -> Result<i64> {
    let row = store
        .get(
            "SELECT
                SUM(CASE WHEN outcome_status = 'succeeded' THEN 1 ELSE 0 END),
                SUM(CASE WHEN outcome_status IN ('succeeded', 'failed', 'revised') THEN 1 ELSE 0 END)
             FROM decisions WHERE project_id = ?1 AND archived_at IS NULL",
            args![project_id],
        )
        .await?;
    let Some(row) = row else { return Ok(100) };
    let succeeded: i64 = row.get::<Option<i64>>(0)?.unwrap_or(0);
    let resolved: i64 = row.get::<Option<i64>>(1)?.unwrap_or(0);
    if resolved == 0 {
        return Ok(100);
    }
    Ok((100.0 * succeeded as f64 / resolved as f64).round() as i64)
}

/// Mean learning confidence mapped from [0.5, 10] to 0-100.
async fn learning_component(store: &Store, project_id: i64) -> Result<i64> {
    let mean: Option<f64> = store
        .get(
            "SELECT AVG(confidence) FROM learnings
             WHERE project_id = ?1 AND archived_at IS NULL",
            args![project_id],
        )
        .await?
        .and_then(|r| r.get::<Option<f64>>(0).ok().flatten());
    let Some(mean) = mean else { return Ok(100) };
    Ok(((mean - 0.5) / 9.5 * 100.0).clamp(0.0, 100.0).round() as i64)
}

/// Share of issues resolved.
async fn issue_component(store: &Store, project_id: i64) -> Result<i64> {
    let row = store
        .get(
            "SELECT COUNT(*), SUM(CASE WHEN status = 'resolved' THEN 1 ELSE 0 END)
             FROM issues WHERE project_id = ?1",
            args![project_id],
        )
        .await?;
    let Some(row) = row else { return Ok(100) };
    let total: i64 = row.get(0)?;
    let resolved: i64 = row.get::<Option<i64>>(1)?.unwrap_or(0);
    if total == 0 {
        return Ok(100);
    }
    Ok((100.0 * resolved as f64 / total as f64).round() as i64)
}

/// Share of knowledge touched in the last 90 days.
async fn freshness_component(store: &Store, project_id: i64) -> Result<i64> {
    let row = store
        .get(
            "SELECT
                (SELECT COUNT(*) FROM decisions WHERE project_id = ?1 AND archived_at IS NULL)
              + (SELECT COUNT(*) FROM learnings WHERE project_id = ?1 AND archived_at IS NULL),
                (SELECT COUNT(*) FROM decisions WHERE project_id = ?1 AND archived_at IS NULL
                    AND updated_at > datetime('now', '-90 days'))
              + (SELECT COUNT(*) FROM learnings WHERE project_id = ?1 AND archived_at IS NULL
                    AND updated_at > datetime('now', '-90 days'))",
            args![project_id],
        )
        .await?;
    let Some(row) = row else { return Ok(100) };
    let total: i64 = row.get(0)?;
    let fresh: i64 = row.get(1)?;
    if total == 0 {
        return Ok(100);
    }
    Ok((100.0 * fresh as f64 / total as f64).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_project_is_healthy() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        let score = health_score(&store, project_id).await.unwrap();
        assert_eq!(score.overall, 100);
    }

    #[tokio::test]
    async fn test_fragile_files_lower_score() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        store
            .run(
                "INSERT INTO files (project_id, path, fragility) VALUES (?1, 'a.ts', 9)",
                args![project_id],
            )
            .await
            .unwrap();
        store
            .run(
                "INSERT INTO files (project_id, path, fragility) VALUES (?1, 'b.ts', 1)",
                args![project_id],
            )
            .await
            .unwrap();

        let score = health_score(&store, project_id).await.unwrap();
        assert_eq!(score.fragility, 50);
        // 50*0.25 + 100*0.75 weights elsewhere
        assert_eq!(score.overall, 88);
    }

    #[tokio::test]
    async fn test_decision_success_rate() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        for outcome in ["succeeded", "succeeded", "failed", "pending"] {
            store
                .run(
                    "INSERT INTO decisions (project_id, title, outcome_status) VALUES (?1, 'd', ?2)",
                    args![project_id, outcome],
                )
                .await
                .unwrap();
        }
        let score = health_score(&store, project_id).await.unwrap();
        assert_eq!(score.decision_success, 67, "2 of 3 resolved succeeded");
    }

    #[tokio::test]
    async fn test_weighted_sum_rounds() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        // learning at confidence 5.25 -> (5.25-0.5)/9.5*100 = 50
        store
            .run(
                "INSERT INTO learnings (project_id, title, content, confidence)
                 VALUES (?1, 't', 'c', 5.25)",
                args![project_id],
            )
            .await
            .unwrap();
        let score = health_score(&store, project_id).await.unwrap();
        assert_eq!(score.learning_confidence, 50);
        assert_eq!(score.overall, 90, "100*0.8 + 50*0.2");
    }
}
