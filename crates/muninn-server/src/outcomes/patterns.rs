// crates/muninn-server/src/outcomes/patterns.rs
// Pattern detection over accumulated sessions, run every ~5 sessions:
// file read->write sequences, recurring unfixed errors, exploration-heavy
// sessions, and tool preferences. Findings persist as insights; tool
// preferences also update the developer profile.

use crate::args;
use crate::db::from_json_array;
use crate::store::Store;
use anyhow::Result;
use std::collections::HashMap;

/// file_sequence: A read then B written in at least this many sessions.
const SEQUENCE_MIN_SESSIONS: i64 = 5;

/// error_recurrence: signature seen at least this often without a fix.
const RECURRENCE_MIN: i64 = 3;

/// error_recurrence: auto-create an issue at this occurrence count.
const RECURRENCE_ISSUE_AT: i64 = 5;

/// exploration_waste: sessions with read_count > 10 and write_count <= 1.
const WASTE_MIN_SESSIONS: i64 = 3;

/// tool_preference: tools at or above this share of calls.
const PREFERENCE_SHARE: f64 = 0.30;

/// Tools counted as reads / writes for the waste detector.
const READ_TOOLS: &[&str] = &["Read", "Grep", "Glob"];
const WRITE_TOOLS: &[&str] = &["Edit", "Write"];

/// Run all detectors. Returns the number of insights written.
pub async fn detect_patterns(store: &Store, project_id: i64) -> Result<usize> {
    let mut found = 0;
    found += detect_file_sequences(store, project_id).await?;
    found += detect_error_recurrence(store, project_id).await?;
    found += detect_exploration_waste(store, project_id).await?;
    found += detect_tool_preferences(store, project_id).await?;
    Ok(found)
}

async fn upsert_insight(
    store: &Store,
    project_id: i64,
    insight_type: &str,
    title: &str,
    details: &str,
    evidence_count: i64,
) -> Result<()> {
    // Confidence grows with evidence, saturating below 1.0
    let confidence = 1.0 - 1.0 / (1.0 + evidence_count as f64 / 5.0);
    store
        .run(
            "INSERT INTO insights (project_id, insight_type, title, details, evidence_count, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(project_id, insight_type, title) DO UPDATE SET
                details = ?4, evidence_count = ?5, confidence = ?6",
            args![project_id, insight_type, title, details, evidence_count, confidence],
        )
        .await?;
    Ok(())
}

/// (a) file_sequence: file A read then file B written within the same
/// session, in >= 5 distinct sessions. Same-directory pairs are noise
/// (ordinary edit locality) and are skipped.
async fn detect_file_sequences(store: &Store, project_id: i64) -> Result<usize> {
    let rows = store
        .all(
            "SELECT session_id, tool_name, files_involved, id FROM tool_calls
             WHERE project_id = ?1 AND session_id IS NOT NULL
             ORDER BY session_id, id",
            args![project_id],
        )
        .await?;

    // (read_file, written_file) -> distinct sessions
    let mut pair_sessions: HashMap<(String, String), std::collections::HashSet<i64>> =
        HashMap::new();
    let mut session_reads: HashMap<i64, Vec<String>> = HashMap::new();

    for row in &rows {
        let session_id: i64 = row.get(0)?;
        let tool: String = row.get(1)?;
        let files = from_json_array(row.get::<Option<String>>(2)?.as_deref());

        if READ_TOOLS.contains(&tool.as_str()) {
            session_reads.entry(session_id).or_default().extend(files);
        } else if WRITE_TOOLS.contains(&tool.as_str()) {
            let reads = session_reads.get(&session_id).cloned().unwrap_or_default();
            for written in &files {
                for read in &reads {
                    if read == written || same_directory(read, written) {
                        continue;
                    }
                    pair_sessions
                        .entry((read.clone(), written.clone()))
                        .or_default()
                        .insert(session_id);
                }
            }
        }
    }

    let mut found = 0;
    for ((read, written), sessions) in pair_sessions {
        let count = sessions.len() as i64;
        if count < SEQUENCE_MIN_SESSIONS {
            continue;
        }
        upsert_insight(
            store,
            project_id,
            "file_sequence",
            &format!("{read} -> {written}"),
            &format!("Reading {read} precedes writing {written} in {count} sessions"),
            count,
        )
        .await?;
        found += 1;
    }
    Ok(found)
}

fn same_directory(a: &str, b: &str) -> bool {
    std::path::Path::new(a).parent() == std::path::Path::new(b).parent()
}

/// (b) error_recurrence: signatures seen >= 3 times without a known fix;
/// auto-creates an issue at >= 5 occurrences with severity min(8, 5+n/3).
async fn detect_error_recurrence(store: &Store, project_id: i64) -> Result<usize> {
    let rows = store
        .all(
            "SELECT e.error_signature, e.error_type, COUNT(*) as n, MAX(e.error_message)
             FROM error_events e
             LEFT JOIN error_fix_pairs p
               ON p.project_id = e.project_id AND p.error_signature = e.error_signature
                  AND p.confidence >= 0.4
             WHERE e.project_id = ?1 AND p.id IS NULL
             GROUP BY e.error_signature, e.error_type
             HAVING n >= ?2",
            args![project_id, RECURRENCE_MIN],
        )
        .await?;

    let mut found = 0;
    for row in rows {
        let signature: String = row.get(0)?;
        let error_type: String = row.get(1)?;
        let count: i64 = row.get(2)?;
        let example: String = row.get(3)?;

        upsert_insight(
            store,
            project_id,
            "error_recurrence",
            &signature,
            &format!("{error_type} recurred {count} times with no known fix"),
            count,
        )
        .await?;
        found += 1;

        if count >= RECURRENCE_ISSUE_AT {
            let severity = std::cmp::min(8, 5 + count / 3);
            let title = format!("Recurring {error_type}: {}", crate::utils::truncate(&signature, 80));
            store
                .run(
                    "INSERT INTO issues (project_id, title, description, issue_type, severity, status)
                     SELECT ?1, ?2, ?3, 'recurring_error', ?4, 'open'
                     WHERE NOT EXISTS (
                         SELECT 1 FROM issues WHERE project_id = ?1 AND title = ?2 AND status = 'open'
                     )",
                    args![project_id, title, example, severity],
                )
                .await?;
        }
    }
    Ok(found)
}

/// (c) exploration_waste: >= 3 recent sessions with read_count > 10 and
/// write_count <= 1.
async fn detect_exploration_waste(store: &Store, project_id: i64) -> Result<usize> {
    let row = store
        .get(
            "SELECT COUNT(*) FROM (
                SELECT session_id,
                       SUM(CASE WHEN tool_name IN ('Read','Grep','Glob') THEN 1 ELSE 0 END) AS reads,
                       SUM(CASE WHEN tool_name IN ('Edit','Write') THEN 1 ELSE 0 END) AS writes
                FROM tool_calls
                WHERE project_id = ?1 AND session_id IN (
                    SELECT id FROM sessions WHERE project_id = ?1
                    ORDER BY started_at DESC LIMIT 20
                )
                GROUP BY session_id
                HAVING reads > 10 AND writes <= 1
             )",
            args![project_id],
        )
        .await?;
    let wasteful: i64 = row.map(|r| r.get(0)).transpose()?.unwrap_or(0);
    if wasteful < WASTE_MIN_SESSIONS {
        return Ok(0);
    }
    upsert_insight(
        store,
        project_id,
        "exploration_waste",
        "high-read low-write sessions",
        &format!("{wasteful} recent sessions read heavily but wrote little"),
        wasteful,
    )
    .await?;
    Ok(1)
}

/// (d) tool_preference: tools taking >= 30% of the project's calls.
/// Also updates developer_profile (unique on project_id + key).
async fn detect_tool_preferences(store: &Store, project_id: i64) -> Result<usize> {
    let total: i64 = store
        .get(
            "SELECT COUNT(*) FROM tool_calls WHERE project_id = ?1",
            args![project_id],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);
    if total == 0 {
        return Ok(0);
    }

    let rows = store
        .all(
            "SELECT tool_name, COUNT(*) as n FROM tool_calls
             WHERE project_id = ?1 GROUP BY tool_name ORDER BY n DESC",
            args![project_id],
        )
        .await?;

    let mut found = 0;
    for row in rows {
        let tool: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        let share = count as f64 / total as f64;
        if share < PREFERENCE_SHARE {
            continue;
        }
        upsert_insight(
            store,
            project_id,
            "tool_preference",
            &tool,
            &format!("{tool} accounts for {:.0}% of tool calls", share * 100.0),
            count,
        )
        .await?;
        store
            .run(
                "INSERT INTO developer_profile (project_id, key, value)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(project_id, key) DO UPDATE SET
                    value = ?3, updated_at = CURRENT_TIMESTAMP",
                args![
                    project_id,
                    format!("preferred_tool:{tool}"),
                    format!("{:.2}", share)
                ],
            )
            .await?;
        found += 1;
    }
    Ok(found)
}
