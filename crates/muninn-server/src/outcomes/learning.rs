// crates/muninn-server/src/outcomes/learning.rs
// Learning reinforcement. Injected learnings gain or lose confidence
// based on the session signal, with diminishing returns as times_applied
// grows. A decay pass erodes learnings nobody has reinforced in 30 days.

use crate::args;
use crate::store::Store;
use anyhow::Result;

/// Confidence bounds for learnings.
const MIN_CONFIDENCE: f64 = 0.5;
const MAX_CONFIDENCE: f64 = 10.0;

/// Reinforcement bases per signal.
const BASE_POSITIVE: f64 = 0.3;
const BASE_NEGATIVE: f64 = -0.4;

/// Decay parameters.
const DECAY_BASE: f64 = -0.1;
const DECAY_IDLE_DAYS: i64 = 30;
const DECAY_BATCH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Positive,
    Negative,
    Neutral,
}

impl Signal {
    /// Derive the signal: explicit relevance marker wins, else the
    /// session outcome (2 -> positive, 0 -> negative, 1 -> neutral).
    pub fn derive(relevance_signal: Option<&str>, session_success: Option<i64>) -> Signal {
        match relevance_signal {
            Some("positive") => return Signal::Positive,
            Some("negative") => return Signal::Negative,
            Some(_) => return Signal::Neutral,
            None => {}
        }
        match session_success {
            Some(2) => Signal::Positive,
            Some(0) => Signal::Negative,
            _ => Signal::Neutral,
        }
    }

    fn base(&self) -> f64 {
        match self {
            Signal::Positive => BASE_POSITIVE,
            Signal::Negative => BASE_NEGATIVE,
            Signal::Neutral => 0.0,
        }
    }
}

/// Confidence delta: base scaled by 1/sqrt(times_applied + 1).
pub fn reinforcement_delta(signal: Signal, times_applied: i64) -> f64 {
    signal.base() / ((times_applied + 1) as f64).sqrt()
}

/// Reinforce every learning injected into a just-ended session.
/// Returns how many learnings were touched.
pub async fn reinforce_session_learnings(store: &Store, session_id: i64) -> Result<usize> {
    let Some(session) = store
        .get(
            "SELECT project_id, success FROM sessions WHERE id = ?1",
            args![session_id],
        )
        .await?
    else {
        return Ok(0);
    };
    let success: Option<i64> = session.get(1)?;

    let injections = store
        .all(
            "SELECT ci.source_id, ci.relevance_signal, l.times_applied
             FROM context_injections ci
             JOIN learnings l ON l.id = ci.source_id
             WHERE ci.session_id = ?1 AND ci.source_type = 'learning'
               AND l.archived_at IS NULL",
            args![session_id],
        )
        .await?;

    let mut touched = 0;
    for row in injections {
        let learning_id: i64 = row.get(0)?;
        let relevance: Option<String> = row.get(1)?;
        let times_applied: i64 = row.get(2)?;

        let signal = Signal::derive(relevance.as_deref(), success);
        let delta = reinforcement_delta(signal, times_applied);

        store
            .run(
                "UPDATE learnings SET
                    confidence = MIN(?2, MAX(?3, confidence + ?4)),
                    times_applied = times_applied + 1,
                    auto_reinforcement_count = auto_reinforcement_count + 1,
                    last_reinforced_at = CURRENT_TIMESTAMP,
                    updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1",
                args![learning_id, MAX_CONFIDENCE, MIN_CONFIDENCE, delta],
            )
            .await?;
        touched += 1;
    }
    Ok(touched)
}

/// Decay pass: learnings unreinforced for 30+ days lose a small amount of
/// confidence, at most 20 learnings per call.
pub async fn decay_stale_learnings(store: &Store, project_id: i64) -> Result<usize> {
    let stale = store
        .all(
            "SELECT id, times_applied FROM learnings
             WHERE project_id = ?1 AND archived_at IS NULL
               AND COALESCE(last_reinforced_at, created_at) < datetime('now', ?2)
             ORDER BY COALESCE(last_reinforced_at, created_at)
             LIMIT ?3",
            args![project_id, format!("-{DECAY_IDLE_DAYS} days"), DECAY_BATCH],
        )
        .await?;

    let mut decayed = 0;
    for row in stale {
        let id: i64 = row.get(0)?;
        let times_applied: i64 = row.get(1)?;
        let delta = DECAY_BASE / ((times_applied + 1) as f64).sqrt();
        store
            .run(
                "UPDATE learnings SET
                    confidence = MIN(?2, MAX(?3, confidence + ?4)),
                    last_reinforced_at = CURRENT_TIMESTAMP,
                    updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1",
                args![id, MAX_CONFIDENCE, MIN_CONFIDENCE, delta],
            )
            .await?;
        decayed += 1;
    }
    Ok(decayed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_derivation() {
        assert_eq!(Signal::derive(Some("positive"), Some(0)), Signal::Positive);
        assert_eq!(Signal::derive(Some("negative"), Some(2)), Signal::Negative);
        assert_eq!(Signal::derive(None, Some(2)), Signal::Positive);
        assert_eq!(Signal::derive(None, Some(0)), Signal::Negative);
        assert_eq!(Signal::derive(None, Some(1)), Signal::Neutral);
        assert_eq!(Signal::derive(None, None), Signal::Neutral);
    }

    #[test]
    fn test_delta_diminishes_with_application() {
        let fresh = reinforcement_delta(Signal::Positive, 0);
        let seasoned = reinforcement_delta(Signal::Positive, 8);
        assert!((fresh - 0.3).abs() < 1e-9);
        assert!((seasoned - 0.1).abs() < 1e-9, "0.3 / sqrt(9) = 0.1");
    }

    #[test]
    fn test_opposite_signals_nearly_cancel() {
        // reinforce(positive) then reinforce(negative) with equal bases
        // stabilizes: net |delta| shrinks as times_applied grows
        let mut confidence: f64 = 5.0;
        let mut applied = 50;
        let before = confidence;
        confidence += reinforcement_delta(Signal::Positive, applied);
        applied += 1;
        confidence += reinforcement_delta(Signal::Negative, applied);
        assert!((confidence - before).abs() < 0.02);
    }

    async fn seed_learning_injection(store: &Store, relevance: Option<&str>, success: i64) -> i64 {
        let project = crate::db::get_or_create_project(store, "/p", None).await.unwrap();
        let session = crate::db::open_session(store, project.id, "g").await.unwrap();
        let learning_id = store
            .run(
                "INSERT INTO learnings (project_id, title, content, confidence, times_applied)
                 VALUES (?1, 'tip', 'use the pool', 5.0, 0)",
                args![project.id],
            )
            .await
            .unwrap()
            .last_insert_id;
        store
            .run(
                "INSERT INTO context_injections (project_id, session_id, source_type, source_id, relevance_signal)
                 VALUES (?1, ?2, 'learning', ?3, ?4)",
                args![project.id, session.id, learning_id, relevance],
            )
            .await
            .unwrap();
        crate::db::close_session(store, session.id, "done", success).await.unwrap();
        session.id
    }

    #[tokio::test]
    async fn test_positive_session_reinforces() {
        let store = Store::open_in_memory().await.unwrap();
        let session_id = seed_learning_injection(&store, None, 2).await;

        assert_eq!(reinforce_session_learnings(&store, session_id).await.unwrap(), 1);

        let row = store
            .get("SELECT confidence, times_applied FROM learnings", args![])
            .await
            .unwrap()
            .unwrap();
        assert!((row.get::<f64>(0).unwrap() - 5.3).abs() < 1e-9);
        assert_eq!(row.get::<i64>(1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_explicit_negative_signal_overrides_success() {
        let store = Store::open_in_memory().await.unwrap();
        let session_id = seed_learning_injection(&store, Some("negative"), 2).await;
        reinforce_session_learnings(&store, session_id).await.unwrap();

        let confidence: f64 = store
            .get("SELECT confidence FROM learnings", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert!((confidence - 4.6).abs() < 1e-9, "5.0 - 0.4");
    }

    #[tokio::test]
    async fn test_confidence_clamped_to_floor() {
        let store = Store::open_in_memory().await.unwrap();
        let session_id = seed_learning_injection(&store, Some("negative"), 0).await;
        store
            .run("UPDATE learnings SET confidence = 0.6", args![])
            .await
            .unwrap();
        reinforce_session_learnings(&store, session_id).await.unwrap();

        let confidence: f64 = store
            .get("SELECT confidence FROM learnings", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert!((confidence - MIN_CONFIDENCE).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_decay_touches_only_stale() {
        let store = Store::open_in_memory().await.unwrap();
        let project = crate::db::get_or_create_project(&store, "/p", None).await.unwrap();
        store
            .run(
                "INSERT INTO learnings (project_id, title, content, confidence, created_at)
                 VALUES (?1, 'old', 'c', 5.0, datetime('now', '-60 days'))",
                args![project.id],
            )
            .await
            .unwrap();
        store
            .run(
                "INSERT INTO learnings (project_id, title, content, confidence)
                 VALUES (?1, 'fresh', 'c', 5.0)",
                args![project.id],
            )
            .await
            .unwrap();

        assert_eq!(decay_stale_learnings(&store, project.id).await.unwrap(), 1);

        let old: f64 = store
            .get("SELECT confidence FROM learnings WHERE title = 'old'", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert!(old < 5.0);

        let fresh: f64 = store
            .get("SELECT confidence FROM learnings WHERE title = 'fresh'", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert!((fresh - 5.0).abs() < 1e-9);
    }
}
