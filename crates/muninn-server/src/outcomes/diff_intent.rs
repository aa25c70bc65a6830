// crates/muninn-server/src/outcomes/diff_intent.rs
// Diff/intent classification for unanalyzed commits. A small remote LLM
// produces {summary, category} when a key is configured; any failure
// falls back to the rule-based classifier. Up to 5 commits per batch.

use crate::args;
use crate::config::get_api_key;
use crate::db::from_json_array;
use crate::store::Store;
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Commits classified per batch.
const BATCH_SIZE: usize = 5;

/// Files listed in the LLM prompt.
const PROMPT_FILE_CAP: usize = 15;

/// LLM call timeout.
const LLM_TIMEOUT: Duration = Duration::from_secs(10);

const LLM_URL: &str = "https://api.openai.com/v1/chat/completions";
const LLM_MODEL: &str = "gpt-4o-mini";

/// Conventional-commit prefixes and their categories.
const CONVENTIONAL: &[(&str, &str)] = &[
    ("feat", "feature"),
    ("fix", "bugfix"),
    ("refactor", "refactor"),
    ("perf", "performance"),
    ("test", "testing"),
    ("docs", "documentation"),
    ("chore", "maintenance"),
    ("build", "maintenance"),
    ("ci", "maintenance"),
    ("style", "style"),
    ("revert", "revert"),
];

/// Keyword fallbacks per category, scanned in order.
const KEYWORDS: &[(&str, &[&str])] = &[
    ("bugfix", &["fix", "bug", "crash", "broken", "repair", "patch"]),
    ("feature", &["add", "new", "implement", "introduce", "support"]),
    ("refactor", &["refactor", "rename", "restructure", "extract", "move", "cleanup", "clean up"]),
    ("performance", &["perf", "speed", "optimize", "faster", "cache"]),
    ("testing", &["test", "spec", "coverage"]),
    ("documentation", &["doc", "readme", "comment"]),
    ("maintenance", &["bump", "upgrade", "deps", "dependency", "version"]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub summary: String,
    pub category: String,
    pub analyzed_by: &'static str,
}

#[derive(Deserialize)]
struct LlmIntent {
    summary: String,
    category: String,
}

/// Classify pending commits for a project. Returns how many were analyzed.
pub async fn analyze_pending_commits(store: &Store, project_id: i64) -> Result<usize> {
    let rows = store
        .all(
            "SELECT id, commit_hash, message, files_changed, insertions, deletions
             FROM git_commits
             WHERE project_id = ?1 AND analyzed = 0
             ORDER BY id LIMIT ?2",
            args![project_id, BATCH_SIZE],
        )
        .await?;

    let mut analyzed = 0;
    for row in rows {
        let commit_id: i64 = row.get(0)?;
        let hash: String = row.get(1)?;
        let message: String = row.get::<Option<String>>(2)?.unwrap_or_default();
        let files = from_json_array(row.get::<Option<String>>(3)?.as_deref());
        let insertions: i64 = row.get(4)?;
        let deletions: i64 = row.get(5)?;

        let intent = classify(&message, &files, insertions, deletions).await;

        // Changed functions: symbols living in the commit's files
        let changed_functions = changed_functions_for(store, project_id, &files).await?;

        store
            .run(
                "INSERT INTO diff_analyses
                    (project_id, commit_hash, intent_summary, intent_category,
                     changed_functions, analyzed_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(project_id, commit_hash) DO UPDATE SET
                    intent_summary = ?3, intent_category = ?4,
                    changed_functions = ?5, analyzed_by = ?6",
                args![
                    project_id,
                    hash,
                    intent.summary.clone(),
                    intent.category.clone(),
                    crate::db::to_json_array(&changed_functions),
                    intent.analyzed_by
                ],
            )
            .await?;
        store
            .run(
                "UPDATE git_commits SET analyzed = 1 WHERE id = ?1",
                args![commit_id],
            )
            .await?;
        analyzed += 1;
    }
    Ok(analyzed)
}

async fn changed_functions_for(
    store: &Store,
    project_id: i64,
    files: &[String],
) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for file in files.iter().take(PROMPT_FILE_CAP) {
        let rows = store
            .all(
                "SELECT s.name FROM symbols s JOIN files f ON s.file_id = f.id
                 WHERE f.project_id = ?1 AND f.path = ?2
                   AND s.kind IN ('function', 'method')
                 LIMIT 10",
                args![project_id, file.clone()],
            )
            .await?;
        for row in rows {
            names.push(row.get::<String>(0)?);
        }
    }
    Ok(names)
}

/// LLM classification with heuristic fallback.
async fn classify(message: &str, files: &[String], insertions: i64, deletions: i64) -> Intent {
    let key = get_api_key("remote");
    if key.ok {
        if let Some(value) = key.value {
            if let Some(intent) = classify_llm(&value, message, files, insertions, deletions).await
            {
                return intent;
            }
        }
    }
    classify_heuristic(message)
}

async fn classify_llm(
    api_key: &str,
    message: &str,
    files: &[String],
    insertions: i64,
    deletions: i64,
) -> Option<Intent> {
    let client = reqwest::Client::builder().timeout(LLM_TIMEOUT).build().ok()?;

    let file_list = files
        .iter()
        .take(PROMPT_FILE_CAP)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "Classify this commit. Reply with strict JSON {{\"summary\": \"...\", \"category\": \"...\"}} \
         where category is one of: feature, bugfix, refactor, performance, testing, documentation, \
         maintenance, style, revert, other.\n\nSubject: {message}\nFiles:\n{file_list}\n+{insertions} -{deletions}"
    );

    let response = client
        .post(LLM_URL)
        .bearer_auth(api_key)
        .json(&serde_json::json!({
            "model": LLM_MODEL,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
        }))
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body: serde_json::Value = response.json().await.ok()?;
    let content = body["choices"][0]["message"]["content"].as_str()?;
    let parsed: LlmIntent = serde_json::from_str(content.trim()).ok()?;
    Some(Intent {
        summary: parsed.summary,
        category: parsed.category,
        analyzed_by: "llm",
    })
}

/// Rule-based classifier: conventional-commit prefix first, then keyword
/// scan per category.
pub fn classify_heuristic(message: &str) -> Intent {
    let subject = message.lines().next().unwrap_or("").trim();
    let lower = subject.to_lowercase();

    // feat(scope)!: subject
    if let Some(idx) = lower.find(':') {
        let prefix = lower[..idx]
            .trim_end_matches('!')
            .split('(')
            .next()
            .unwrap_or("")
            .trim();
        for (conventional, category) in CONVENTIONAL {
            if prefix == *conventional {
                return Intent {
                    summary: subject.to_string(),
                    category: category.to_string(),
                    analyzed_by: "heuristic",
                };
            }
        }
    }

    for (category, keywords) in KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return Intent {
                summary: subject.to_string(),
                category: category.to_string(),
                analyzed_by: "heuristic",
            };
        }
    }

    Intent {
        summary: subject.to_string(),
        category: "other".to_string(),
        analyzed_by: "heuristic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conventional_prefix_wins() {
        assert_eq!(classify_heuristic("feat: add session recap").category, "feature");
        assert_eq!(classify_heuristic("fix(auth): token refresh").category, "bugfix");
        assert_eq!(classify_heuristic("refactor!: split store").category, "refactor");
    }

    #[test]
    fn test_keyword_fallback() {
        assert_eq!(classify_heuristic("Repair broken pagination").category, "bugfix");
        assert_eq!(classify_heuristic("Introduce worker pool").category, "feature");
        assert_eq!(classify_heuristic("Bump deps to latest").category, "maintenance");
    }

    #[test]
    fn test_unclassifiable_is_other() {
        assert_eq!(classify_heuristic("wip").category, "other");
    }

    #[test]
    fn test_summary_is_subject_line() {
        let intent = classify_heuristic("fix: one thing\n\nLong body here");
        assert_eq!(intent.summary, "fix: one thing");
    }

    #[tokio::test]
    async fn test_analyze_marks_commits_and_is_idempotent() {
        // No API key in tests: heuristic path
        let store = Store::open_in_memory().await.unwrap();
        let project = crate::db::get_or_create_project(&store, "/p", None).await.unwrap();
        store
            .run(
                "INSERT INTO git_commits (project_id, commit_hash, message, files_changed, analyzed)
                 VALUES (?1, 'h1', 'fix: coerce id', '[\"src/a.ts\"]', 0)",
                args![project.id],
            )
            .await
            .unwrap();

        assert_eq!(analyze_pending_commits(&store, project.id).await.unwrap(), 1);
        assert_eq!(analyze_pending_commits(&store, project.id).await.unwrap(), 0);

        let row = store
            .get(
                "SELECT intent_category, analyzed_by FROM diff_analyses WHERE commit_hash = 'h1'",
                args![],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "bugfix");
        assert_eq!(row.get::<String>(1).unwrap(), "heuristic");
    }

    #[tokio::test]
    async fn test_batch_cap_is_five() {
        let store = Store::open_in_memory().await.unwrap();
        let project = crate::db::get_or_create_project(&store, "/p", None).await.unwrap();
        for i in 0..7 {
            store
                .run(
                    "INSERT INTO git_commits (project_id, commit_hash, message, analyzed)
                     VALUES (?1, ?2, 'chore: bump', 0)",
                    args![project.id, format!("h{i}")],
                )
                .await
                .unwrap();
        }
        assert_eq!(analyze_pending_commits(&store, project.id).await.unwrap(), 5);
        assert_eq!(analyze_pending_commits(&store, project.id).await.unwrap(), 2);
    }
}
