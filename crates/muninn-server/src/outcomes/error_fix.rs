// crates/muninn-server/src/outcomes/error_fix.rs
// Error-fix pair mapping. At session end, each error event is matched to
// the earliest commit within 30 minutes after it that touches the error's
// source file (any file when the source is unknown). Pairs upsert on
// (project, error_signature) and gain confidence with repetition.

use crate::args;
use crate::db::{from_json_array, to_json_array};
use crate::store::Store;
use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

/// Match window after an error.
const FIX_WINDOW_MINUTES: i64 = 30;

/// Confidence floor for lookup_fix results.
const LOOKUP_MIN_CONFIDENCE: f64 = 0.4;

/// Confidence cap.
const MAX_CONFIDENCE: f64 = 0.95;

#[allow(clippy::expect_used)]
static RE_FIX_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfix\b").expect("valid regex"));

/// A recallable fix for a known error signature.
#[derive(Debug, Clone)]
pub struct KnownFix {
    pub error_signature: String,
    pub fix_description: String,
    pub fix_files: Vec<String>,
    pub confidence: f64,
    pub times_fixed: i64,
}

/// Map the errors of an ended session to fixing commits.
/// Returns how many pairs were recorded or reinforced.
pub async fn process_session_errors(store: &Store, session_id: i64) -> Result<usize> {
    let Some(session_row) = store
        .get(
            "SELECT project_id FROM sessions WHERE id = ?1",
            args![session_id],
        )
        .await?
    else {
        return Ok(0);
    };
    let project_id: i64 = session_row.get(0)?;

    let errors = store
        .all(
            "SELECT id, error_type, error_message, error_signature, source_file, created_at
             FROM error_events WHERE session_id = ?1 ORDER BY created_at",
            args![session_id],
        )
        .await?;
    if errors.is_empty() {
        return Ok(0);
    }

    // Commits in or shortly after the session window
    let commits = store
        .all(
            "SELECT commit_hash, message, files_changed, created_at
             FROM git_commits
             WHERE project_id = ?1
               AND (session_id = ?2
                    OR created_at >= (SELECT started_at FROM sessions WHERE id = ?2))
             ORDER BY created_at",
            args![project_id, session_id],
        )
        .await?;

    let mut recorded = 0;
    for error in &errors {
        let error_type: String = error.get(1)?;
        let error_message: String = error.get(2)?;
        let signature: String = error.get(3)?;
        let source_file: Option<String> = error.get(4)?;
        let error_at: String = error.get(5)?;

        let mut matched: Option<(String, String, Vec<String>, f64)> = None;
        for commit in &commits {
            let hash: String = commit.get(0)?;
            let message: String = commit.get::<Option<String>>(1)?.unwrap_or_default();
            let files = from_json_array(commit.get::<Option<String>>(2)?.as_deref());
            let commit_at: String = commit.get(3)?;

            let Some(delta_min) = minutes_between(store, &error_at, &commit_at).await? else {
                continue;
            };
            if delta_min < 0 || delta_min > FIX_WINDOW_MINUTES {
                continue;
            }
            let touches_source = match &source_file {
                Some(src) => files.iter().any(|f| f.ends_with(src) || src.ends_with(f)),
                None => !files.is_empty(),
            };
            if !touches_source {
                continue;
            }

            let confidence = fix_confidence(
                delta_min,
                RE_FIX_WORD.is_match(&message),
                source_file
                    .as_ref()
                    .map(|src| files.iter().any(|f| f.ends_with(src) || src.ends_with(f)))
                    .unwrap_or(false),
            );
            matched = Some((hash, message, files, confidence));
            break; // earliest qualifying commit wins
        }

        let Some((hash, message, files, confidence)) = matched else {
            continue;
        };

        store
            .run(
                "INSERT INTO error_fix_pairs
                    (project_id, error_signature, error_type, error_example, fix_commit_hash,
                     fix_description, fix_files, session_id, confidence, times_seen, times_fixed,
                     last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, 1, CURRENT_TIMESTAMP)
                 ON CONFLICT(project_id, error_signature) DO UPDATE SET
                    times_seen = times_seen + 1,
                    times_fixed = times_fixed + 1,
                    fix_commit_hash = ?5,
                    fix_description = ?6,
                    fix_files = ?7,
                    confidence = MIN(confidence + 0.1, 0.95),
                    last_seen_at = CURRENT_TIMESTAMP",
                args![
                    project_id,
                    signature.clone(),
                    error_type,
                    crate::utils::truncate(&error_message, 500),
                    hash,
                    message,
                    to_json_array(&files),
                    session_id,
                    confidence
                ],
            )
            .await?;
        recorded += 1;
    }
    Ok(recorded)
}

/// Confidence model: 0.5 base, Δt bonus (0.2 under 5 min, 0.1 under 15),
/// +0.15 for a \bfix\b message, +0.15 for source-file overlap, cap 0.95.
pub fn fix_confidence(delta_minutes: i64, message_says_fix: bool, touches_source: bool) -> f64 {
    let mut confidence: f64 = 0.5;
    if delta_minutes < 5 {
        confidence += 0.2;
    } else if delta_minutes < 15 {
        confidence += 0.1;
    }
    if message_says_fix {
        confidence += 0.15;
    }
    if touches_source {
        confidence += 0.15;
    }
    confidence.min(MAX_CONFIDENCE)
}

/// Highest-confidence known fix for a signature, at or above 0.4.
pub async fn lookup_fix(
    store: &Store,
    project_id: i64,
    signature: &str,
) -> Result<Option<KnownFix>> {
    let row = store
        .get(
            "SELECT error_signature, fix_description, fix_files, confidence, times_fixed
             FROM error_fix_pairs
             WHERE project_id = ?1 AND error_signature = ?2 AND confidence >= ?3
             ORDER BY confidence DESC LIMIT 1",
            args![project_id, signature, LOOKUP_MIN_CONFIDENCE],
        )
        .await?;
    row.map(|r| {
        Ok(KnownFix {
            error_signature: r.get(0)?,
            fix_description: r.get::<Option<String>>(1)?.unwrap_or_default(),
            fix_files: from_json_array(r.get::<Option<String>>(2)?.as_deref()),
            confidence: r.get(3)?,
            times_fixed: r.get(4)?,
        })
    })
    .transpose()
}

/// Minutes from `earlier` to `later` via SQLite date math (handles both
/// ISO-8601 and SQLite timestamp formats already in the store).
async fn minutes_between(store: &Store, earlier: &str, later: &str) -> Result<Option<i64>> {
    let row = store
        .get(
            "SELECT CAST(ROUND((julianday(?2) - julianday(?1)) * 1440) AS INTEGER)",
            args![earlier, later],
        )
        .await?;
    Ok(row.and_then(|r| r.get::<Option<i64>>(0).ok().flatten()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_model_matches_scenario() {
        // Error at t=0, fix commit at +7 min touching the offending file
        // with message "fix: coerce id": 0.5 + 0.1 + 0.15 + 0.15 = 0.9
        let confidence = fix_confidence(7, true, true);
        assert!((confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_caps_at_095() {
        assert!((fix_confidence(1, true, true) - MAX_CONFIDENCE).abs() < 1e-9);
    }

    async fn seed_session(store: &Store) -> (i64, i64) {
        let project = crate::db::get_or_create_project(store, "/p", None).await.unwrap();
        let session = crate::db::open_session(store, project.id, "g").await.unwrap();
        (project.id, session.id)
    }

    async fn insert_error(store: &Store, project_id: i64, session_id: i64, minutes_ago: i64) {
        store
            .run(
                "INSERT INTO error_events
                    (project_id, session_id, error_type, error_message, error_signature,
                     source_file, created_at)
                 VALUES (?1, ?2, 'type_error', 'TS2345 mismatch', 'sig-ts*', 'src/a.ts',
                         datetime('now', ?3))",
                args![project_id, session_id, format!("-{minutes_ago} minutes")],
            )
            .await
            .unwrap();
    }

    async fn insert_commit(
        store: &Store,
        project_id: i64,
        session_id: i64,
        hash: &str,
        message: &str,
        minutes_ago: i64,
    ) {
        store
            .run(
                "INSERT INTO git_commits
                    (project_id, session_id, commit_hash, message, files_changed, created_at, analyzed)
                 VALUES (?1, ?2, ?3, ?4, '[\"src/a.ts\"]', datetime('now', ?5), 0)",
                args![project_id, session_id, hash, message, format!("-{minutes_ago} minutes")],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_error_maps_to_fix_commit() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, session_id) = seed_session(&store).await;
        insert_error(&store, project_id, session_id, 10).await;
        insert_commit(&store, project_id, session_id, "hfix", "fix: coerce id", 3).await;

        assert_eq!(process_session_errors(&store, session_id).await.unwrap(), 1);

        let pair = store
            .get(
                "SELECT confidence, times_fixed, fix_commit_hash FROM error_fix_pairs",
                args![],
            )
            .await
            .unwrap()
            .unwrap();
        // Δt = 7 min, fix word, source overlap: 0.9
        assert!((pair.get::<f64>(0).unwrap() - 0.9).abs() < 0.01);
        assert_eq!(pair.get::<i64>(1).unwrap(), 1);
        assert_eq!(pair.get::<String>(2).unwrap(), "hfix");
    }

    #[tokio::test]
    async fn test_repeat_observation_is_monotone() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, session_id) = seed_session(&store).await;
        insert_error(&store, project_id, session_id, 10).await;
        insert_commit(&store, project_id, session_id, "hfix", "fix: coerce id", 3).await;

        process_session_errors(&store, session_id).await.unwrap();
        let before = lookup_fix(&store, project_id, "sig-ts*").await.unwrap().unwrap();

        // Same pair observed again: confidence rises by 0.1, capped
        process_session_errors(&store, session_id).await.unwrap();
        let after = lookup_fix(&store, project_id, "sig-ts*").await.unwrap().unwrap();
        assert!(after.confidence >= before.confidence);
        assert!(after.confidence <= MAX_CONFIDENCE);
        assert_eq!(after.times_fixed, 2);
    }

    #[tokio::test]
    async fn test_commit_outside_window_not_matched() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, session_id) = seed_session(&store).await;
        insert_error(&store, project_id, session_id, 90).await;
        insert_commit(&store, project_id, session_id, "hlate", "fix: late", 10).await;

        assert_eq!(process_session_errors(&store, session_id).await.unwrap(), 0);
        assert!(lookup_fix(&store, project_id, "sig-ts*").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_honors_confidence_floor() {
        let store = Store::open_in_memory().await.unwrap();
        let (project_id, _) = seed_session(&store).await;
        store
            .run(
                "INSERT INTO error_fix_pairs (project_id, error_signature, confidence)
                 VALUES (?1, 'weak-sig', 0.3)",
                args![project_id],
            )
            .await
            .unwrap();
        assert!(lookup_fix(&store, project_id, "weak-sig").await.unwrap().is_none());
    }
}
