// crates/muninn-server/src/ingest/errors.rs
// Error detection over raw tool output. Each line is scanned against an
// ordered pattern list (most-specific first); matches are normalized into
// signatures for dedup and recall.

use crate::args;
use crate::store::Store;
use crate::utils::truncate;
use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

/// Signature length cap.
const SIGNATURE_MAX: usize = 200;

/// Max stack-trace lines captured after a match.
const STACK_LINES: usize = 5;

/// Suppression window for repeated (project, signature) pairs.
const DEDUP_WINDOW_MINUTES: i64 = 60;

/// A detected error, pre-persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedError {
    pub error_type: &'static str,
    pub message: String,
    pub signature: String,
    pub source_file: Option<String>,
    pub stack_trace: Option<String>,
}

#[allow(clippy::expect_used)]
static RE_TS_DIAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<file>[^\s(]+)\(\d+,\d+\):\s*)?error TS\d+:\s*(?P<msg>.+)$")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_TEST_FAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:FAIL|✕|✗|AssertionError[:\s]|Expected .+ but received)(?P<msg>.*)$")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_RUNTIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<kind>TypeError|RangeError|ReferenceError|EvalError|URIError):\s*(?P<msg>.+)$")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_MODULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Cannot find module '(?P<module>[^']+)'|Module not found:?\s*(?P<msg>.+)?")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_SYNTAX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*SyntaxError:\s*(?P<msg>.+)$").expect("valid regex"));
#[allow(clippy::expect_used)]
static RE_EXIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:exited with code|exit code|exit status)\s+(?P<code>[1-9]\d*)")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static RE_SIG_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(['"])[^'"]*\1"#).expect("valid regex"));
#[allow(clippy::expect_used)]
static RE_SIG_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[A-Za-z]:)?(?:/[\w.@-]+)+").expect("valid regex"));
#[allow(clippy::expect_used)]
static RE_SIG_NUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
#[allow(clippy::expect_used)]
static RE_SOURCE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<file>[\w./-]+\.(?:ts|tsx|js|jsx|mjs|cjs|rs|py|go))(?::\d+)?")
        .expect("valid regex")
});

/// Normalize an error message into its signature: quoted strings → "*",
/// paths → /*, numbers → *, truncated to 200 chars.
pub fn error_signature(message: &str) -> String {
    let sig = RE_SIG_QUOTED.replace_all(message, "\"*\"");
    let sig = RE_SIG_PATH.replace_all(&sig, "/*");
    let sig = RE_SIG_NUM.replace_all(&sig, "*");
    let sig = sig.trim();
    let mut end = sig.len().min(SIGNATURE_MAX);
    while !sig.is_char_boundary(end) {
        end -= 1;
    }
    sig[..end].to_string()
}

/// Scan raw tool output for errors. Deduplicates by signature within the
/// output; stack trace = the next up-to-five `at ` lines.
pub fn detect_errors(output: &str) -> Vec<DetectedError> {
    let lines: Vec<&str> = output.lines().collect();
    let mut seen = std::collections::HashSet::new();
    let mut found = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some((error_type, message)) = classify_line(line) else {
            continue;
        };
        let signature = error_signature(&message);
        if signature.is_empty() || !seen.insert(signature.clone()) {
            continue;
        }

        let stack: Vec<&str> = lines[idx + 1..]
            .iter()
            .take_while(|l| l.trim_start().starts_with("at "))
            .take(STACK_LINES)
            .copied()
            .collect();

        found.push(DetectedError {
            error_type,
            source_file: RE_SOURCE_FILE
                .captures(line)
                .and_then(|c| c.name("file"))
                .map(|m| m.as_str().to_string()),
            stack_trace: if stack.is_empty() {
                None
            } else {
                Some(stack.join("\n"))
            },
            message,
            signature,
        });
    }
    found
}

/// Ordered classification, most-specific first.
fn classify_line(line: &str) -> Option<(&'static str, String)> {
    if let Some(caps) = RE_TS_DIAG.captures(line) {
        return Some(("type_error", caps["msg"].to_string()));
    }
    if RE_TEST_FAIL.is_match(line) {
        return Some(("test_failure", line.trim().to_string()));
    }
    if let Some(caps) = RE_RUNTIME.captures(line) {
        return Some(("runtime_error", format!("{}: {}", &caps["kind"], &caps["msg"])));
    }
    if RE_MODULE.is_match(line)
        && (line.contains("Cannot find module") || line.contains("Module not found"))
    {
        return Some(("import_error", line.trim().to_string()));
    }
    if RE_SYNTAX.is_match(line) {
        return Some(("syntax_error", line.trim().to_string()));
    }
    if let Some(caps) = RE_EXIT.captures(line) {
        return Some(("exit_code", format!("exit code {}", &caps["code"])));
    }
    None
}

/// Persist detected errors, skipping any (project, signature) already seen
/// within the last hour. Returns the number of rows inserted.
pub async fn record_errors(
    store: &Store,
    project_id: i64,
    session_id: Option<i64>,
    tool_call_id: Option<i64>,
    errors: &[DetectedError],
) -> Result<usize> {
    let mut inserted = 0;
    for error in errors {
        let recent = store
            .get(
                "SELECT 1 FROM error_events
                 WHERE project_id = ?1 AND error_signature = ?2
                   AND created_at > datetime('now', ?3)",
                args![
                    project_id,
                    error.signature.clone(),
                    format!("-{DEDUP_WINDOW_MINUTES} minutes")
                ],
            )
            .await?;
        if recent.is_some() {
            continue;
        }

        store
            .run(
                "INSERT INTO error_events
                    (project_id, session_id, error_type, error_message, error_signature,
                     source_file, stack_trace, tool_call_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                args![
                    project_id,
                    session_id,
                    error.error_type,
                    truncate(&error.message, 1000),
                    error.signature.clone(),
                    error.source_file.clone(),
                    error.stack_trace.clone(),
                    tool_call_id
                ],
            )
            .await?;
        inserted += 1;
    }
    Ok(inserted)
}
