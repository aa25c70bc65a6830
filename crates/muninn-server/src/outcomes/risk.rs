// crates/muninn-server/src/outcomes/risk.rs
// Risk alerts: a periodic sweep over the knowledge tables producing
// deduplicated alert rows. Dismissed alerts older than 30 days are purged.

use crate::args;
use crate::store::Store;
use anyhow::Result;

/// A candidate alert before dedup.
#[derive(Debug, Clone)]
struct Alert {
    alert_type: &'static str,
    severity: &'static str,
    title: String,
    details: String,
    source_file: Option<String>,
}

/// Compute and upsert the alert set for a project. Returns how many new
/// alerts were inserted.
pub async fn compute_risk_alerts(store: &Store, project_id: i64) -> Result<usize> {
    let mut alerts = Vec::new();
    fragile_churn(store, project_id, &mut alerts).await?;
    stale_decisions(store, project_id, &mut alerts).await?;
    critical_issue_backlog(store, project_id, &mut alerts).await?;
    knowledge_staleness(store, project_id, &mut alerts).await?;
    low_confidence_glut(store, project_id, &mut alerts).await?;

    let mut inserted = 0;
    for alert in alerts {
        // Dedup on (alert_type, title, dismissed=0)
        let exists = store
            .get(
                "SELECT 1 FROM risk_alerts
                 WHERE project_id = ?1 AND alert_type = ?2 AND title = ?3 AND dismissed = 0",
                args![project_id, alert.alert_type, alert.title.clone()],
            )
            .await?;
        if exists.is_some() {
            continue;
        }
        store
            .run(
                "INSERT INTO risk_alerts
                    (project_id, alert_type, severity, title, details, source_file)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                args![
                    project_id,
                    alert.alert_type,
                    alert.severity,
                    alert.title,
                    alert.details,
                    alert.source_file
                ],
            )
            .await?;
        inserted += 1;
    }

    // Purge dismissed alerts older than 30 days
    store
        .run(
            "DELETE FROM risk_alerts
             WHERE project_id = ?1 AND dismissed = 1
               AND updated_at < datetime('now', '-30 days')",
            args![project_id],
        )
        .await?;

    Ok(inserted)
}

/// Fragile files changing fast.
async fn fragile_churn(store: &Store, project_id: i64, out: &mut Vec<Alert>) -> Result<()> {
    let rows = store
        .all(
            "SELECT path, fragility, velocity_score FROM files
             WHERE project_id = ?1 AND archived_at IS NULL
               AND fragility >= 7 AND temperature = 'hot' AND velocity_score > 0.5",
            args![project_id],
        )
        .await?;
    for row in rows {
        let path: String = row.get(0)?;
        let fragility: f64 = row.get(1)?;
        let velocity: f64 = row.get(2)?;
        out.push(Alert {
            alert_type: "fragile_churn",
            severity: "critical",
            title: format!("Fragile file under churn: {path}"),
            details: format!("fragility {fragility:.0}/10, velocity {velocity:.2}"),
            source_file: Some(path),
        });
    }
    Ok(())
}

/// Active decisions pending for months.
async fn stale_decisions(store: &Store, project_id: i64, out: &mut Vec<Alert>) -> Result<()> {
    let count: i64 = store
        .get(
            "SELECT COUNT(*) FROM decisions
             WHERE project_id = ?1 AND status = 'active' AND outcome_status = 'pending'
               AND created_at < datetime('now', '-90 days')",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);
    if count > 0 {
        out.push(Alert {
            alert_type: "stale_decisions",
            severity: "warning",
            title: format!("{count} decisions pending over 90 days"),
            details: "outcomes were never confirmed or revised".to_string(),
            source_file: None,
        });
    }
    Ok(())
}

/// Open issues at severity >= 8.
async fn critical_issue_backlog(store: &Store, project_id: i64, out: &mut Vec<Alert>) -> Result<()> {
    let count: i64 = store
        .get(
            "SELECT COUNT(*) FROM issues
             WHERE project_id = ?1 AND status = 'open' AND severity >= 8",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);
    if count >= 3 {
        out.push(Alert {
            alert_type: "critical_backlog",
            severity: "critical",
            title: format!("{count} open critical issues"),
            details: "severity >= 8 issues are accumulating".to_string(),
            source_file: None,
        });
    }
    Ok(())
}

/// Nothing recorded recently despite sessions happening.
async fn knowledge_staleness(store: &Store, project_id: i64, out: &mut Vec<Alert>) -> Result<()> {
    let recent_sessions: i64 = store
        .get(
            "SELECT COUNT(*) FROM sessions
             WHERE project_id = ?1 AND started_at > datetime('now', '-14 days')",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);
    let recent_knowledge: i64 = store
        .get(
            "SELECT (SELECT COUNT(*) FROM decisions
                     WHERE project_id = ?1 AND created_at > datetime('now', '-14 days'))
                  + (SELECT COUNT(*) FROM learnings
                     WHERE project_id = ?1 AND created_at > datetime('now', '-14 days'))",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);
    if recent_sessions >= 5 && recent_knowledge == 0 {
        out.push(Alert {
            alert_type: "knowledge_staleness",
            severity: "info",
            title: "Sessions without recorded knowledge".to_string(),
            details: format!("{recent_sessions} sessions in 14 days, no new decisions or learnings"),
            source_file: None,
        });
    }
    Ok(())
}

/// Too many barely-trusted learnings.
async fn low_confidence_glut(store: &Store, project_id: i64, out: &mut Vec<Alert>) -> Result<()> {
    let count: i64 = store
        .get(
            "SELECT COUNT(*) FROM learnings
             WHERE project_id = ?1 AND archived_at IS NULL AND confidence < 1.0",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);
    if count >= 20 {
        out.push(Alert {
            alert_type: "low_confidence_glut",
            severity: "info",
            title: format!("{count} low-confidence learnings"),
            details: "consider archiving learnings below confidence 1.0".to_string(),
            source_file: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fragile_churn_alert_and_dedup() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        store
            .run(
                "INSERT INTO files (project_id, path, fragility, temperature, velocity_score)
                 VALUES (?1, 'src/core.ts', 9, 'hot', 1.5)",
                args![project_id],
            )
            .await
            .unwrap();

        assert_eq!(compute_risk_alerts(&store, project_id).await.unwrap(), 1);
        // Same sweep again: deduplicated
        assert_eq!(compute_risk_alerts(&store, project_id).await.unwrap(), 0);

        let row = store
            .get(
                "SELECT severity, source_file FROM risk_alerts WHERE alert_type = 'fragile_churn'",
                args![],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "critical");
        assert_eq!(row.get::<Option<String>>(1).unwrap().as_deref(), Some("src/core.ts"));
    }

    #[tokio::test]
    async fn test_dismissed_alert_allows_reinsert_and_purge() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        store
            .run(
                "INSERT INTO files (project_id, path, fragility, temperature, velocity_score)
                 VALUES (?1, 'src/core.ts', 9, 'hot', 1.5)",
                args![project_id],
            )
            .await
            .unwrap();
        compute_risk_alerts(&store, project_id).await.unwrap();

        // Dismissed long ago: purged on next sweep, and a fresh alert lands
        store
            .run(
                "UPDATE risk_alerts SET dismissed = 1, updated_at = datetime('now', '-40 days')",
                args![],
            )
            .await
            .unwrap();
        assert_eq!(compute_risk_alerts(&store, project_id).await.unwrap(), 1);

        let dismissed: i64 = store
            .get("SELECT COUNT(*) FROM risk_alerts WHERE dismissed = 1", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(dismissed, 0, "old dismissed alert purged");
    }

    #[tokio::test]
    async fn test_critical_backlog_threshold() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = crate::db::get_or_create_project(&store, "/p", None).await.unwrap().id;
        for i in 0..3 {
            store
                .run(
                    "INSERT INTO issues (project_id, title, severity, status)
                     VALUES (?1, ?2, 9, 'open')",
                    args![project_id, format!("issue {i}")],
                )
                .await
                .unwrap();
        }
        compute_risk_alerts(&store, project_id).await.unwrap();
        let exists = store
            .get(
                "SELECT 1 FROM risk_alerts WHERE alert_type = 'critical_backlog'",
                args![],
            )
            .await
            .unwrap();
        assert!(exists.is_some());
    }
}
