// crates/muninn-server/src/git.rs
// Centralized git operations: argv subprocess calls, no shell
// interpretation. The engine never mutates the working tree.

use std::path::Path;
use std::process::Command;

/// A commit with per-file numstat entries.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub committed_at: String,
    pub subject: String,
    /// (insertions, deletions, path); binary files report 0/0
    pub files: Vec<(i64, i64, String)>,
}

/// Validate that a git ref doesn't look like a CLI flag (defense-in-depth)
pub fn validate_ref(r: &str) -> Result<(), String> {
    if r.starts_with('-') {
        return Err(format!("Invalid git ref: '{}'", r));
    }
    if r.contains('\0') || r.contains('\n') || r.contains('\r') {
        return Err("Invalid git ref: contains forbidden characters".to_string());
    }
    Ok(())
}

/// Run a git command and return trimmed stdout, or an error.
pub fn git_cmd(project_path: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(project_path)
        .output()
        .map_err(|e| format!("Failed to run git {}: {}", args.first().unwrap_or(&""), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a git command, returning Some(stdout) on success or None on failure.
pub fn git_cmd_opt(project_path: &Path, args: &[&str]) -> Option<String> {
    git_cmd(project_path, args).ok()
}

/// Read the latest commit with its numstat file list.
pub fn latest_commit(project_path: &Path) -> Result<CommitInfo, String> {
    let header = git_cmd(
        project_path,
        &["log", "-1", "--format=%H%x1f%an%x1f%aI%x1f%s"],
    )?;
    let numstat = git_cmd(project_path, &["log", "-1", "--format=", "--numstat"])?;
    parse_commit(&header, &numstat)
}

/// Resolve a hash prefix to a full commit hash.
pub fn resolve_hash(project_path: &Path, prefix: &str) -> Option<String> {
    validate_ref(prefix).ok()?;
    git_cmd_opt(project_path, &["rev-parse", prefix])
}

/// Recent commit subjects as (hash, subject), newest first.
pub fn recent_subjects(project_path: &Path, limit: usize) -> Vec<(String, String)> {
    let limit_arg = format!("-{limit}");
    let Some(output) = git_cmd_opt(project_path, &["log", &limit_arg, "--format=%H%x1f%s"]) else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let (hash, subject) = line.split_once('\u{1f}')?;
            Some((hash.to_string(), subject.to_string()))
        })
        .collect()
}

fn parse_commit(header: &str, numstat: &str) -> Result<CommitInfo, String> {
    let parts: Vec<&str> = header.splitn(4, '\u{1f}').collect();
    if parts.len() != 4 {
        return Err(format!("unexpected git log header: {header}"));
    }

    let files = numstat
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let mut cols = line.split('\t');
            let ins = cols.next()?.trim();
            let del = cols.next()?.trim();
            let path = cols.next()?.trim();
            // Binary files show "-" for both counts
            Some((
                ins.parse::<i64>().unwrap_or(0),
                del.parse::<i64>().unwrap_or(0),
                path.to_string(),
            ))
        })
        .collect();

    Ok(CommitInfo {
        hash: parts[0].to_string(),
        author: parts[1].to_string(),
        committed_at: parts[2].to_string(),
        subject: parts[3].to_string(),
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ref_rejects_flags() {
        assert!(validate_ref("--upload-pack=evil").is_err());
        assert!(validate_ref("main\n").is_err());
        assert!(validate_ref("abc1234").is_ok());
    }

    #[test]
    fn test_parse_commit() {
        let header = "abc123\u{1f}Jane Doe\u{1f}2026-07-01T10:00:00+00:00\u{1f}fix: coerce id";
        let numstat = "10\t2\tsrc/a.ts\n3\t0\tsrc/b.ts\n-\t-\tassets/logo.png\n";
        let commit = parse_commit(header, numstat).unwrap();
        assert_eq!(commit.hash, "abc123");
        assert_eq!(commit.author, "Jane Doe");
        assert_eq!(commit.subject, "fix: coerce id");
        assert_eq!(commit.files.len(), 3);
        assert_eq!(commit.files[0], (10, 2, "src/a.ts".to_string()));
        assert_eq!(commit.files[2].0, 0, "binary counts parse as 0");
    }

    #[test]
    fn test_parse_commit_bad_header() {
        assert!(parse_commit("nope", "").is_err());
    }
}
