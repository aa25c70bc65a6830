// crates/muninn-server/src/outcomes/test_runner.rs
// Post-commit test runner. Discovers the command from the package
// manifest, rate-limits to one run per 5 minutes per project, executes as
// argv (no shell) with CI=true and a 2-minute wall clock, and parses the
// output through a recognizer chain.

use crate::args;
use crate::store::Store;
use crate::utils::tail;
use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

/// Minimum spacing between runs per project.
const RATE_LIMIT_MINUTES: i64 = 5;

/// Wall-clock cap; the child is killed on expiry.
const RUN_TIMEOUT: Duration = Duration::from_secs(120);

/// Output tail persisted with the result.
const OUTPUT_TAIL: usize = 500;

/// npm's scaffold placeholder, never worth running.
const PLACEHOLDER: &str = "no test specified";

/// Manifest scripts probed in preference order.
const SCRIPT_KEYS: &[&str] = &["test", "test:unit", "test:ci"];

#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub status: &'static str, // passed|failed|error|skipped|unknown
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
}

#[allow(clippy::expect_used)]
static RE_COUNTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<pass>\d+)\s+pass(?:ed|ing)?\b.*?(?P<fail>\d+)\s+fail(?:ed|ing)?\b(?:.*?(?P<skip>\d+)\s+skip(?:ped)?\b)?")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_JEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests:\s+(?:(?P<fail>\d+)\s+failed,\s*)?(?:(?P<skip>\d+)\s+skipped,\s*)?(?P<pass>\d+)\s+passed,\s+(?P<total>\d+)\s+total")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_GENERIC_PASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*PASS\b").expect("valid regex"));
#[allow(clippy::expect_used)]
static RE_GENERIC_FAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*FAIL\b").expect("valid regex"));

/// Discover the test command from package.json. None when no runnable
/// script exists (missing manifest, placeholder, or empty).
pub fn discover_test_command(project_path: &Path) -> Option<Vec<String>> {
    let manifest = std::fs::read_to_string(project_path.join("package.json")).ok()?;
    let parsed: serde_json::Value = serde_json::from_str(&manifest).ok()?;
    let scripts = parsed.get("scripts")?.as_object()?;

    for key in SCRIPT_KEYS {
        if let Some(script) = scripts.get(*key).and_then(|v| v.as_str()) {
            if script.trim().is_empty() || script.contains(PLACEHOLDER) {
                continue;
            }
            return Some(vec![
                "npm".to_string(),
                "run".to_string(),
                "--silent".to_string(),
                key.to_string(),
            ]);
        }
    }
    None
}

/// Parse test output through the recognizer chain: explicit counts,
/// Jest/Vitest totals, then generic PASS/FAIL markers.
pub fn parse_test_output(output: &str) -> TestOutcome {
    if let Some(caps) = RE_JEST.captures(output) {
        let pass = num(&caps, "pass");
        let fail = num(&caps, "fail");
        let skip = num(&caps, "skip");
        let total = caps
            .name("total")
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(pass + fail + skip);
        return TestOutcome {
            status: if fail > 0 { "failed" } else { "passed" },
            total,
            passed: pass,
            failed: fail,
            skipped: skip,
        };
    }

    if let Some(caps) = RE_COUNTS.captures(output) {
        let pass = num(&caps, "pass");
        let fail = num(&caps, "fail");
        let skip = num(&caps, "skip");
        return TestOutcome {
            status: if fail > 0 { "failed" } else { "passed" },
            total: pass + fail + skip,
            passed: pass,
            failed: fail,
            skipped: skip,
        };
    }

    let passes = RE_GENERIC_PASS.find_iter(output).count() as i64;
    let fails = RE_GENERIC_FAIL.find_iter(output).count() as i64;
    if passes + fails > 0 {
        return TestOutcome {
            status: if fails > 0 { "failed" } else { "passed" },
            total: passes + fails,
            passed: passes,
            failed: fails,
            skipped: 0,
        };
    }

    TestOutcome {
        status: "unknown",
        total: 0,
        passed: 0,
        failed: 0,
        skipped: 0,
    }
}

fn num(caps: &regex::Captures<'_>, name: &str) -> i64 {
    caps.name(name)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// True when a run within the rate-limit window already exists.
pub async fn is_rate_limited(store: &Store, project_id: i64) -> Result<bool> {
    let recent = store
        .get(
            "SELECT 1 FROM test_results
             WHERE project_id = ?1 AND created_at > datetime('now', ?2)",
            args![project_id, format!("-{RATE_LIMIT_MINUTES} minutes")],
        )
        .await?;
    Ok(recent.is_some())
}

/// Run the project's tests after a commit. Skips (recording nothing) when
/// rate-limited or no test script exists; records status 'error' when the
/// child cannot run or times out.
pub async fn run_tests_after_commit(
    store: &Store,
    project_id: i64,
    project_path: &Path,
    session_id: Option<i64>,
) -> Result<Option<TestOutcome>> {
    if is_rate_limited(store, project_id).await? {
        return Ok(None);
    }
    let Some(command) = discover_test_command(project_path) else {
        return Ok(None);
    };

    let started = std::time::Instant::now();
    let (outcome, output) = execute(&command, project_path).await;
    let duration_ms = started.elapsed().as_millis() as i64;

    store
        .run(
            "INSERT INTO test_results
                (project_id, session_id, status, total, passed, failed, skipped,
                 duration_ms, output_summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            args![
                project_id,
                session_id,
                outcome.status,
                outcome.total,
                outcome.passed,
                outcome.failed,
                outcome.skipped,
                duration_ms,
                tail(&output, OUTPUT_TAIL).to_string()
            ],
        )
        .await?;

    Ok(Some(outcome))
}

/// Execute argv with CI=true and the wall-clock cap.
async fn execute(command: &[String], project_path: &Path) -> (TestOutcome, String) {
    let error_outcome = TestOutcome {
        status: "error",
        total: 0,
        passed: 0,
        failed: 0,
        skipped: 0,
    };

    let child = match tokio::process::Command::new(&command[0])
        .args(&command[1..])
        .current_dir(project_path)
        .env("CI", "true")
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return (error_outcome, format!("spawn failed: {e}")),
    };

    // kill_on_drop reaps the child when the timeout drops the future
    match tokio::time::timeout(RUN_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            (parse_test_output(&combined), combined)
        }
        Ok(Err(e)) => (error_outcome, format!("wait failed: {e}")),
        Err(_) => (error_outcome, "test run timed out after 120s".to_string()),
    }
}
