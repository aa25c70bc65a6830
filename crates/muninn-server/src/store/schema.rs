// crates/muninn-server/src/store/schema.rs
// Database schema and the additive migration registry
//
// The base bundle is idempotent (CREATE ... IF NOT EXISTS everywhere) and
// is followed by the ordered migration registry. Each applied migration
// records its version in schema_version, so later analyses can declare a
// minimum version and no-op below it instead of probing columns at runtime.

/// Schema version produced by a fresh init (base bundle + all migrations).
pub const CURRENT_SCHEMA_VERSION: u32 = MIGRATIONS[MIGRATIONS.len() - 1].version;

/// An additive migration. `sql` may contain multiple statements.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Ordered migration registry. Version 1 is the base bundle itself.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        name: "developer_profile_unique_key",
        sql: "CREATE UNIQUE INDEX IF NOT EXISTS idx_profile_project_key
              ON developer_profile(project_id, key);",
    },
    Migration {
        version: 3,
        name: "error_events_signature_index",
        sql: "CREATE INDEX IF NOT EXISTS idx_errors_sig
              ON error_events(project_id, error_signature, created_at);",
    },
    Migration {
        version: 4,
        name: "git_commits_analyzed_flag",
        sql: "ALTER TABLE git_commits ADD COLUMN analyzed INTEGER DEFAULT 0;",
    },
    Migration {
        version: 5,
        name: "learnings_promotion_tracking",
        sql: "ALTER TABLE learnings ADD COLUMN promotion_status TEXT DEFAULT 'not_ready';
              ALTER TABLE learnings ADD COLUMN promoted_to_section TEXT;",
    },
    Migration {
        version: 6,
        name: "sessions_task_type",
        sql: "ALTER TABLE sessions ADD COLUMN task_type TEXT;",
    },
];

/// Build the base DDL bundle for the given embedding dimension.
pub fn schema_sql(dimensions: usize) -> String {
    SCHEMA.replace("{DIMS}", &dimensions.to_string())
}

/// Base database schema SQL
const SCHEMA: &str = r#"
-- =======================================
-- CORE: Projects
-- =======================================
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY,
    path TEXT UNIQUE NOT NULL,
    name TEXT,
    project_type TEXT,
    stack TEXT,
    status TEXT DEFAULT 'active',
    mode TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- KNOWLEDGE: Files, Decisions, Issues, Learnings
-- =======================================
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    path TEXT NOT NULL,
    purpose TEXT,
    file_type TEXT,
    fragility REAL DEFAULT 0,
    fragility_reason TEXT,
    temperature TEXT DEFAULT 'warm',
    change_count INTEGER DEFAULT 0,
    velocity_score REAL DEFAULT 0,
    first_changed_at TEXT,
    content_hash TEXT,
    has_embedding INTEGER DEFAULT 0,
    archived_at TEXT,
    last_referenced_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, path)
);
CREATE INDEX IF NOT EXISTS idx_files_project ON files(project_id);
CREATE INDEX IF NOT EXISTS idx_files_temperature ON files(project_id, temperature);

CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    title TEXT NOT NULL,
    decision TEXT,
    reasoning TEXT,
    alternatives TEXT,
    consequences TEXT,
    affects TEXT,              -- JSON array of file paths
    status TEXT DEFAULT 'active',
    outcome_status TEXT DEFAULT 'pending',
    outcome_notes TEXT,
    superseded_by INTEGER REFERENCES decisions(id),
    temperature TEXT DEFAULT 'warm',
    archived_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_decisions_project ON decisions(project_id, status);

CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    title TEXT NOT NULL,
    description TEXT,
    issue_type TEXT DEFAULT 'bug',
    severity INTEGER DEFAULT 5,
    status TEXT DEFAULT 'open',
    affected_files TEXT,       -- JSON array
    workaround TEXT,
    resolution TEXT,
    resolved_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id, status);

CREATE TABLE IF NOT EXISTS learnings (
    id INTEGER PRIMARY KEY,
    project_id INTEGER REFERENCES projects(id),   -- NULL = global learning
    category TEXT DEFAULT 'general',
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    context TEXT,
    confidence REAL DEFAULT 1.0,
    times_applied INTEGER DEFAULT 0,
    auto_reinforcement_count INTEGER DEFAULT 0,
    last_reinforced_at TEXT,
    foundational INTEGER DEFAULT 0,
    archived_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_learnings_project ON learnings(project_id);

-- =======================================
-- CODE INTELLIGENCE
-- =======================================
CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY,
    file_id INTEGER NOT NULL REFERENCES files(id),
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    signature TEXT,
    purpose TEXT,
    parameters TEXT,
    returns TEXT,
    parent_class TEXT,
    line_start INTEGER,
    line_end INTEGER,
    is_exported INTEGER DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);

CREATE TABLE IF NOT EXISTS call_edges (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    caller_file TEXT NOT NULL,
    caller_symbol TEXT NOT NULL,
    callee_file TEXT NOT NULL,
    callee_symbol TEXT NOT NULL,
    call_type TEXT NOT NULL,
    confidence REAL DEFAULT 0.5
);
CREATE INDEX IF NOT EXISTS idx_calls_caller ON call_edges(project_id, caller_file);
CREATE INDEX IF NOT EXISTS idx_calls_callee ON call_edges(project_id, callee_symbol);

CREATE TABLE IF NOT EXISTS file_ownership (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    file_path TEXT NOT NULL,
    author TEXT NOT NULL,
    commit_count INTEGER DEFAULT 1,
    UNIQUE(project_id, file_path, author)
);

CREATE TABLE IF NOT EXISTS blast_radius (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    file_path TEXT NOT NULL,
    impacted_path TEXT NOT NULL,
    depth INTEGER DEFAULT 1,
    UNIQUE(project_id, file_path, impacted_path)
);

CREATE TABLE IF NOT EXISTS blast_summary (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    file_path TEXT NOT NULL,
    impacted_count INTEGER DEFAULT 0,
    max_depth INTEGER DEFAULT 0,
    computed_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, file_path)
);

-- =======================================
-- SESSIONS & EVENTS
-- =======================================
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_number INTEGER NOT NULL,
    started_at TEXT DEFAULT CURRENT_TIMESTAMP,
    ended_at TEXT,
    goal TEXT,
    outcome TEXT,
    files_touched TEXT,        -- JSON array
    decisions_made INTEGER DEFAULT 0,
    issues_found INTEGER DEFAULT 0,
    issues_resolved INTEGER DEFAULT 0,
    learnings INTEGER DEFAULT 0,
    next_steps TEXT,
    success INTEGER            -- 0 failed, 1 partial, 2 success
);
CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_sessions_open ON sessions(project_id) WHERE ended_at IS NULL;

CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER REFERENCES sessions(id),
    tool_name TEXT NOT NULL,
    input_summary TEXT,
    files_involved TEXT,       -- JSON array
    success INTEGER DEFAULT 1,
    duration_ms INTEGER,
    error_message TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_tool_calls_session ON tool_calls(session_id);
CREATE INDEX IF NOT EXISTS idx_tool_calls_project ON tool_calls(project_id, created_at DESC);

CREATE TABLE IF NOT EXISTS git_commits (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    commit_hash TEXT NOT NULL,
    author TEXT,
    message TEXT,
    files_changed TEXT,        -- JSON array
    insertions INTEGER DEFAULT 0,
    deletions INTEGER DEFAULT 0,
    committed_at TEXT,
    session_id INTEGER REFERENCES sessions(id),
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, commit_hash)
);
CREATE INDEX IF NOT EXISTS idx_commits_project ON git_commits(project_id, committed_at DESC);

CREATE TABLE IF NOT EXISTS error_events (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER REFERENCES sessions(id),
    error_type TEXT NOT NULL,
    error_message TEXT NOT NULL,
    error_signature TEXT NOT NULL,
    source_file TEXT,
    stack_trace TEXT,
    tool_call_id INTEGER REFERENCES tool_calls(id),
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS error_fix_pairs (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    error_signature TEXT NOT NULL,
    error_type TEXT,
    error_example TEXT,
    fix_commit_hash TEXT,
    fix_description TEXT,
    fix_files TEXT,            -- JSON array
    session_id INTEGER REFERENCES sessions(id),
    confidence REAL DEFAULT 0.5,
    times_seen INTEGER DEFAULT 1,
    times_fixed INTEGER DEFAULT 0,
    last_seen_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, error_signature)
);

-- =======================================
-- WORK QUEUE
-- =======================================
CREATE TABLE IF NOT EXISTS work_queue (
    id INTEGER PRIMARY KEY,
    job_type TEXT NOT NULL,
    payload TEXT,              -- opaque JSON
    status TEXT DEFAULT 'pending',
    attempts INTEGER DEFAULT 0,
    max_attempts INTEGER DEFAULT 3,
    error_message TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_queue_status ON work_queue(status, created_at);

-- =======================================
-- RELATIONSHIPS (adjacency, traversal is query-driven)
-- =======================================
CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    source_type TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    target_type TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    relationship TEXT NOT NULL,
    strength REAL DEFAULT 5,
    notes TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, source_type, source_id, target_type, target_id, relationship)
);
CREATE INDEX IF NOT EXISTS idx_rel_source ON relationships(project_id, source_type, source_id);
CREATE INDEX IF NOT EXISTS idx_rel_target ON relationships(project_id, target_type, target_id);

-- =======================================
-- DERIVED TABLES
-- =======================================
CREATE TABLE IF NOT EXISTS file_correlations (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    file_a TEXT NOT NULL,
    file_b TEXT NOT NULL,
    cochange_count INTEGER DEFAULT 1,
    UNIQUE(project_id, file_a, file_b)
);

CREATE TABLE IF NOT EXISTS strategy_catalog (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    name TEXT NOT NULL,
    trigger_pattern TEXT,
    steps TEXT,                -- JSON array
    source_sessions TEXT,      -- JSON array of session ids
    success_rate REAL DEFAULT 0,
    times_used INTEGER DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, name)
);

CREATE TABLE IF NOT EXISTS workflow_predictions (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    trigger_sequence TEXT NOT NULL,   -- "Read,Grep,Read"
    predicted_tool TEXT NOT NULL,
    times_correct INTEGER DEFAULT 0,
    times_total INTEGER DEFAULT 0,
    confidence REAL DEFAULT 0,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, trigger_sequence, predicted_tool)
);

CREATE TABLE IF NOT EXISTS context_injections (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER REFERENCES sessions(id),
    source_type TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    relevance_signal TEXT,     -- 'positive' | 'negative' | NULL
    injected_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_injections_session ON context_injections(session_id);

CREATE TABLE IF NOT EXISTS diff_analyses (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    commit_hash TEXT NOT NULL,
    intent_summary TEXT,
    intent_category TEXT,
    changed_functions TEXT,    -- JSON array
    analyzed_by TEXT,          -- 'llm' | 'heuristic'
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, commit_hash)
);

CREATE TABLE IF NOT EXISTS revert_events (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    revert_commit_hash TEXT NOT NULL,
    original_commit_hash TEXT,
    reverted_files TEXT,       -- JSON array
    processed INTEGER DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, revert_commit_hash)
);

CREATE TABLE IF NOT EXISTS test_results (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER REFERENCES sessions(id),
    status TEXT NOT NULL,      -- passed|failed|error|skipped|unknown
    total INTEGER DEFAULT 0,
    passed INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    skipped INTEGER DEFAULT 0,
    duration_ms INTEGER,
    output_summary TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_tests_project ON test_results(project_id, created_at DESC);

CREATE TABLE IF NOT EXISTS risk_alerts (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    alert_type TEXT NOT NULL,
    severity TEXT NOT NULL,    -- critical|warning|info
    title TEXT NOT NULL,
    details TEXT,
    source_file TEXT,
    dismissed INTEGER DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS value_metrics (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    month TEXT NOT NULL,       -- YYYY-MM
    contradictions_caught INTEGER DEFAULT 0,
    injections_total INTEGER DEFAULT 0,
    injection_hits INTEGER DEFAULT 0,
    decisions_recalled INTEGER DEFAULT 0,
    learnings_recalled INTEGER DEFAULT 0,
    sessions_count INTEGER DEFAULT 0,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, month)
);

CREATE TABLE IF NOT EXISTS insights (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    insight_type TEXT NOT NULL,
    title TEXT NOT NULL,
    details TEXT,
    evidence_count INTEGER DEFAULT 0,
    confidence REAL DEFAULT 0.5,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, insight_type, title)
);

CREATE TABLE IF NOT EXISTS developer_profile (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    key TEXT NOT NULL,
    value TEXT,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS contradiction_alerts (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER REFERENCES sessions(id),
    description TEXT,
    source_type TEXT,
    source_id INTEGER,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- MULTI-AGENT INTENTS
-- =======================================
CREATE TABLE IF NOT EXISTS agent_intents (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    agent_id TEXT NOT NULL,
    intent_type TEXT NOT NULL,
    description TEXT,
    target_files TEXT,         -- JSON array
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    expires_at TEXT NOT NULL,
    released INTEGER DEFAULT 0
);

-- =======================================
-- CONTEXT LOG (prompt hashes only, never raw prompts)
-- =======================================
CREATE TABLE IF NOT EXISTS context_log (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    app_id TEXT,
    prompt_hash TEXT NOT NULL,
    memory_ids TEXT,           -- JSON array
    total_candidates INTEGER DEFAULT 0,
    token_count INTEGER DEFAULT 0,
    latency_ms INTEGER DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- SCHEMA VERSION
-- =======================================
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    name TEXT,
    applied_at TEXT DEFAULT CURRENT_TIMESTAMP
);
INSERT OR IGNORE INTO schema_version (version, name) VALUES (1, 'base');

-- =======================================
-- VECTOR TABLE (sqlite-vec)
-- =======================================
CREATE VIRTUAL TABLE IF NOT EXISTS vec_memories USING vec0(
    embedding float[{DIMS}],
    +source_type TEXT,
    +source_id INTEGER,
    +project_id INTEGER
);

-- =======================================
-- FULL-TEXT SEARCH (FTS5) + sync triggers
-- =======================================
CREATE VIRTUAL TABLE IF NOT EXISTS fts_files USING fts5(
    path, purpose,
    tokenize='porter unicode61 remove_diacritics 1'
);
CREATE TRIGGER IF NOT EXISTS trg_fts_files_insert AFTER INSERT ON files BEGIN
    INSERT INTO fts_files(rowid, path, purpose)
    VALUES (new.id, new.path, COALESCE(new.purpose, ''));
END;

CREATE VIRTUAL TABLE IF NOT EXISTS fts_decisions USING fts5(
    title, decision, reasoning,
    tokenize='porter unicode61 remove_diacritics 1'
);
CREATE TRIGGER IF NOT EXISTS trg_fts_decisions_insert AFTER INSERT ON decisions BEGIN
    INSERT INTO fts_decisions(rowid, title, decision, reasoning)
    VALUES (new.id, new.title, COALESCE(new.decision, ''), COALESCE(new.reasoning, ''));
END;

CREATE VIRTUAL TABLE IF NOT EXISTS fts_issues USING fts5(
    title, description,
    tokenize='porter unicode61 remove_diacritics 1'
);
CREATE TRIGGER IF NOT EXISTS trg_fts_issues_insert AFTER INSERT ON issues BEGIN
    INSERT INTO fts_issues(rowid, title, description)
    VALUES (new.id, new.title, COALESCE(new.description, ''));
END;

CREATE VIRTUAL TABLE IF NOT EXISTS fts_learnings USING fts5(
    title, content,
    tokenize='porter unicode61 remove_diacritics 1'
);
CREATE TRIGGER IF NOT EXISTS trg_fts_learnings_insert AFTER INSERT ON learnings BEGIN
    INSERT INTO fts_learnings(rowid, title, content)
    VALUES (new.id, new.title, new.content);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS fts_patterns USING fts5(
    title, details,
    tokenize='porter unicode61 remove_diacritics 1'
);
CREATE TRIGGER IF NOT EXISTS trg_fts_patterns_insert AFTER INSERT ON insights BEGIN
    INSERT INTO fts_patterns(rowid, title, details)
    VALUES (new.id, new.title, COALESCE(new.details, ''));
END;

CREATE VIRTUAL TABLE IF NOT EXISTS fts_global_learnings USING fts5(
    title, content,
    tokenize='porter unicode61 remove_diacritics 1'
);
CREATE TRIGGER IF NOT EXISTS trg_fts_global_learnings_insert AFTER INSERT ON learnings
WHEN new.project_id IS NULL BEGIN
    INSERT INTO fts_global_learnings(rowid, title, content)
    VALUES (new.id, new.title, new.content);
END;
"#;
