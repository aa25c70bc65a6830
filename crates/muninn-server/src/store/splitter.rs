// crates/muninn-server/src/store/splitter.rs
// Multi-statement DDL splitter
//
// The schema bundle is one text blob containing comments, string literals,
// and trigger bodies. Statements are split on `;` only at top level:
// semicolons inside 'single'/"double" quoted strings, `--` line comments,
// `/* */` block comments, and BEGIN…END blocks (trigger bodies) do not
// terminate a statement. CASE…END also nests, since its END would otherwise
// close an enclosing trigger body early.

/// Split a DDL bundle into individual statements. Comment-only fragments
/// and empty statements are dropped.
pub fn split_statements(ddl: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    let mut chars = ddl.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut depth: u32 = 0;
    // Pending identifier token, used to recognize BEGIN/CASE/END keywords.
    let mut word = String::new();

    while let Some(c) = chars.next() {
        if in_line_comment {
            current.push(c);
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }
        if in_block_comment {
            current.push(c);
            if c == '*' && chars.peek() == Some(&'/') {
                current.push(chars.next().unwrap_or('/'));
                in_block_comment = false;
            }
            continue;
        }
        if in_single {
            current.push(c);
            if c == '\'' {
                // '' is an escaped quote inside the literal
                if chars.peek() == Some(&'\'') {
                    current.push(chars.next().unwrap_or('\''));
                } else {
                    in_single = false;
                }
            }
            continue;
        }
        if in_double {
            current.push(c);
            if c == '"' {
                in_double = false;
            }
            continue;
        }

        // Keyword boundary tracking
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
        } else {
            flush_word(&mut word, &mut depth);
        }

        match c {
            '\'' => {
                in_single = true;
                current.push(c);
            }
            '"' => {
                in_double = true;
                current.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                in_line_comment = true;
                current.push(c);
                current.push(chars.next().unwrap_or('-'));
            }
            '/' if chars.peek() == Some(&'*') => {
                in_block_comment = true;
                current.push(c);
                current.push(chars.next().unwrap_or('*'));
            }
            ';' if depth == 0 => {
                push_statement(&mut statements, &mut current);
            }
            _ => current.push(c),
        }
    }
    flush_word(&mut word, &mut depth);
    push_statement(&mut statements, &mut current);

    statements
}

/// True when a statement is a PRAGMA (skipped on remote backends).
pub fn is_pragma(statement: &str) -> bool {
    statement
        .trim_start()
        .get(..6)
        .is_some_and(|s| s.eq_ignore_ascii_case("pragma"))
}

fn flush_word(word: &mut String, depth: &mut u32) {
    if word.is_empty() {
        return;
    }
    if word.eq_ignore_ascii_case("begin") || word.eq_ignore_ascii_case("case") {
        *depth += 1;
    } else if word.eq_ignore_ascii_case("end") {
        *depth = depth.saturating_sub(1);
    }
    word.clear();
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let text = current.trim();
    if !text.is_empty() && !is_comment_only(text) {
        statements.push(text.to_string());
    }
    current.clear();
}

/// A fragment consisting solely of comments and whitespace.
fn is_comment_only(text: &str) -> bool {
    let mut rest = text.trim_start();
    loop {
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(idx) => after[idx + 1..].trim_start(),
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(idx) => after[idx + 2..].trim_start(),
                None => "",
            };
        } else {
            return false;
        }
    }
}
