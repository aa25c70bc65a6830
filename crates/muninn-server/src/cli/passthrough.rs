// crates/muninn-server/src/cli/passthrough.rs
// Allow-listed read-only command passthrough. The command line is parsed
// with quote awareness but never handed to a shell, so no expansion,
// substitution, or chaining can occur.

use crate::error::{MuninnError, Result};

/// Read-only command prefixes the passthrough will run. `git branch` is
/// deliberately absent: its bare prefix also covers branch creation,
/// deletion, and renames.
const ALLOWED: &[&[&str]] = &[
    &["git", "log"],
    &["git", "show"],
    &["git", "status"],
    &["git", "diff"],
    &["git", "blame"],
];

/// Split a command line into argv, honoring single and double quotes and
/// backslash escapes. No variable expansion, no globbing.
pub fn split_command(line: &str) -> Result<Vec<String>> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    let mut in_single = false;
    let mut in_double = false;
    let mut has_token = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            '\\' if !in_single => {
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(MuninnError::InvalidInput(
                            "trailing backslash".to_string(),
                        ));
                    }
                }
                has_token = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    argv.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            _ => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_single || in_double {
        return Err(MuninnError::InvalidInput("unterminated quote".to_string()));
    }
    if has_token {
        argv.push(current);
    }
    Ok(argv)
}

/// True when argv starts with an allowed prefix.
pub fn is_allowed(argv: &[String]) -> bool {
    ALLOWED.iter().any(|prefix| {
        argv.len() >= prefix.len() && prefix.iter().zip(argv).all(|(want, got)| want == got)
    })
}

/// Run an allow-listed command, printing its stdout. Returns the
/// command's output for the caller.
pub async fn run_passthrough(command: &str) -> Result<String> {
    let argv = split_command(command)?;
    if argv.is_empty() {
        return Err(MuninnError::InvalidInput("empty command".to_string()));
    }
    if !is_allowed(&argv) {
        return Err(MuninnError::InvalidInput(format!(
            "command not in allow-list: {}",
            argv.join(" ")
        )));
    }

    let output = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .await?;

    if !output.status.success() {
        return Err(MuninnError::Other(format!(
            "{} exited with {}: {}",
            argv[0],
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
