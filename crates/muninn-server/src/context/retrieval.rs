// crates/muninn-server/src/context/retrieval.rs
// Candidate retrieval: vector KNN over vec_memories when an embedding is
// available, FTS ranking on the same filtered set otherwise. Callers are
// never stalled on the embedder - a null embedding falls through to FTS.

use crate::args;
use crate::store::{Store, Value};
use anyhow::Result;

/// A memory row considered for inclusion before scoring/packing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: i64,
    pub source_type: &'static str,
    pub subtype: Option<String>,
    pub title: String,
    pub content: String,
    /// Normalized to [0, 1] across source types.
    pub confidence: f64,
    pub created_at: String,
    pub similarity: f64,
}

/// Candidate pool size: min(max_tokens * 5, 200).
pub fn pool_size(max_tokens: usize) -> usize {
    (max_tokens * 5).min(200)
}

/// Retrieve candidates for a query. `embedding` comes from the embedder
/// (None on failure or no provider).
pub async fn retrieve(
    store: &Store,
    project_id: i64,
    query: &str,
    embedding: Option<&[f32]>,
    pool: usize,
) -> Result<Vec<Candidate>> {
    match embedding {
        Some(vector) => retrieve_vector(store, project_id, vector, pool).await,
        None => retrieve_fts(store, project_id, query, pool).await,
    }
}

/// Vector path: KNN by cosine distance, hydrated per source type with the
/// archived/superseded filters applied during hydration.
async fn retrieve_vector(
    store: &Store,
    project_id: i64,
    vector: &[f32],
    pool: usize,
) -> Result<Vec<Candidate>> {
    let rows = store
        .all(
            "SELECT source_type, source_id, vec_distance_cosine(embedding, ?1) AS distance
             FROM vec_memories
             WHERE project_id = ?2
             ORDER BY distance
             LIMIT ?3",
            vec![
                Value::vector(vector),
                Value::Integer(project_id),
                Value::Integer(pool as i64),
            ],
        )
        .await?;

    let mut candidates = Vec::new();
    for row in rows {
        let source_type: String = row.get(0)?;
        let source_id: i64 = row.get(1)?;
        let distance: f64 = row.get(2)?;
        let similarity = (1.0 - distance / 2.0).clamp(0.0, 1.0);
        if let Some(candidate) =
            hydrate(store, project_id, &source_type, source_id, similarity).await?
        {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

/// FTS path: query each mirror, rank by position, merge.
async fn retrieve_fts(
    store: &Store,
    project_id: i64,
    query: &str,
    pool: usize,
) -> Result<Vec<Candidate>> {
    let match_expr = fts_query(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }
    let per_table = pool.div_ceil(4);
    let mut candidates = Vec::new();

    for (fts_table, source_type) in [
        ("fts_decisions", "decision"),
        ("fts_learnings", "learning"),
        ("fts_issues", "issue"),
        ("fts_files", "file"),
    ] {
        let rows = store
            .all(
                &format!(
                    "SELECT rowid FROM {fts_table} WHERE {fts_table} MATCH ?1
                     ORDER BY rank LIMIT ?2"
                ),
                args![match_expr.clone(), per_table],
            )
            .await
            .unwrap_or_default();
        for (position, row) in rows.iter().enumerate() {
            let source_id: i64 = row.get(0)?;
            // Rank position decays toward 0; FTS has no cosine scale
            let similarity = 1.0 / (1.0 + position as f64 * 0.25);
            if let Some(candidate) =
                hydrate(store, project_id, source_type, source_id, similarity).await?
            {
                candidates.push(candidate);
            }
        }
    }

    candidates.truncate(pool);
    Ok(candidates)
}

/// Sanitize free text into an FTS5 MATCH expression: quoted tokens
/// OR-joined, so user punctuation can't break the query grammar.
pub fn fts_query(query: &str) -> String {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 2)
        .take(12)
        .map(|t| format!("\"{t}\""))
        .collect();
    tokens.join(" OR ")
}

/// Hydrate a candidate from its source table. Archived, superseded, and
/// foreign-project rows hydrate to None and drop out of the pool.
async fn hydrate(
    store: &Store,
    project_id: i64,
    source_type: &str,
    source_id: i64,
    similarity: f64,
) -> Result<Option<Candidate>> {
    let candidate = match source_type {
        "decision" => store
            .get(
                "SELECT id, title, COALESCE(decision, ''), created_at, outcome_status
                 FROM decisions
                 WHERE id = ?1 AND project_id = ?2 AND archived_at IS NULL
                   AND status != 'superseded'",
                args![source_id, project_id],
            )
            .await?
            .map(|row| {
                Ok::<_, anyhow::Error>(Candidate {
                    id: row.get(0)?,
                    source_type: "decision",
                    subtype: row.get::<Option<String>>(4)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    confidence: 0.5,
                    created_at: row.get(3)?,
                    similarity,
                })
            })
            .transpose()?,
        "learning" => store
            .get(
                "SELECT id, title, content, created_at, category, confidence
                 FROM learnings
                 WHERE id = ?1 AND (project_id = ?2 OR project_id IS NULL)
                   AND archived_at IS NULL",
                args![source_id, project_id],
            )
            .await?
            .map(|row| {
                Ok::<_, anyhow::Error>(Candidate {
                    id: row.get(0)?,
                    source_type: "learning",
                    subtype: row.get::<Option<String>>(4)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    confidence: (row.get::<f64>(5)? / 10.0).clamp(0.0, 1.0),
                    created_at: row.get(3)?,
                    similarity,
                })
            })
            .transpose()?,
        "issue" => store
            .get(
                "SELECT id, title, COALESCE(description, ''), created_at, issue_type, severity
                 FROM issues
                 WHERE id = ?1 AND project_id = ?2 AND status = 'open'",
                args![source_id, project_id],
            )
            .await?
            .map(|row| {
                Ok::<_, anyhow::Error>(Candidate {
                    id: row.get(0)?,
                    source_type: "issue",
                    subtype: row.get::<Option<String>>(4)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    confidence: (row.get::<i64>(5)? as f64 / 10.0).clamp(0.0, 1.0),
                    created_at: row.get(3)?,
                    similarity,
                })
            })
            .transpose()?,
        "file" => store
            .get(
                "SELECT id, path, COALESCE(purpose, ''), created_at, file_type
                 FROM files
                 WHERE id = ?1 AND project_id = ?2 AND archived_at IS NULL",
                args![source_id, project_id],
            )
            .await?
            .map(|row| {
                Ok::<_, anyhow::Error>(Candidate {
                    id: row.get(0)?,
                    source_type: "file",
                    subtype: row.get::<Option<String>>(4)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    confidence: 0.5,
                    created_at: row.get(3)?,
                    similarity,
                })
            })
            .transpose()?,
        _ => None,
    };
    Ok(candidate)
}

/// Store an embedding for a memory row (used by reindex paths).
pub async fn store_embedding(
    store: &Store,
    project_id: i64,
    source_type: &str,
    source_id: i64,
    vector: &[f32],
) -> Result<()> {
    store
        .run(
            "DELETE FROM vec_memories WHERE source_type = ?1 AND source_id = ?2 AND project_id = ?3",
            args![source_type, source_id, project_id],
        )
        .await?;
    store
        .run(
            "INSERT INTO vec_memories (embedding, source_type, source_id, project_id)
             VALUES (?1, ?2, ?3, ?4)",
            vec![
                Value::vector(vector),
                Value::Text(source_type.to_string()),
                Value::Integer(source_id),
                Value::Integer(project_id),
            ],
        )
        .await?;
    Ok(())
}
