// crates/muninn-server/src/store/mod.rs
// Unified store layer: one primitive contract over two backends.
//
// The engine restricts itself to one writer process per project; every
// mutation goes through these primitives. Backend choice happens once at
// construction. Best-effort callers (logging, derived writes) must catch
// and swallow errors from this layer rather than propagate them.

mod local;
mod remote;
pub mod schema;
pub mod splitter;
mod types;

pub use local::LocalStore;
pub use remote::RemoteStore;
pub use schema::{CURRENT_SCHEMA_VERSION, MIGRATIONS};
pub use types::{FromValue, Row, RunResult, Value};

use crate::config::EnvConfig;
use anyhow::Result;
use splitter::{is_pragma, split_statements};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

enum Backend {
    Local(LocalStore),
    Remote(RemoteStore),
}

/// The shared store. Cheap to share behind an `Arc`.
pub struct Store {
    backend: Backend,
    healthy: AtomicBool,
    initialized: AtomicBool,
    schema_version: AtomicU32,
    dimensions: usize,
}

impl Store {
    /// Open the backend selected by configuration: remote when
    /// `MUNINN_STORE_URL` is set, embedded otherwise.
    pub async fn open(config: &EnvConfig, db_path: &Path) -> Result<Self> {
        let backend = match &config.store_url {
            Some(url) => Backend::Remote(RemoteStore::new(url, config.store_token.clone())?),
            None => Backend::Local(LocalStore::open(db_path).await?),
        };
        Ok(Self::from_backend(backend, config.embeddings.dimensions))
    }

    /// In-memory embedded store (for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let backend = Backend::Local(LocalStore::open_in_memory().await?);
        let store = Self::from_backend(backend, 768);
        store.init().await?;
        Ok(store)
    }

    fn from_backend(backend: Backend, dimensions: usize) -> Self {
        Self {
            backend,
            healthy: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
            schema_version: AtomicU32::new(0),
            dimensions,
        }
    }

    /// Whether the most recent call succeeded.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Vector dimension the schema was initialized with.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Schema version after init (0 before init).
    pub fn schema_version(&self) -> u32 {
        self.schema_version.load(Ordering::Relaxed)
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        self.healthy.store(result.is_ok(), Ordering::Relaxed);
        result
    }

    pub async fn get(&self, sql: &str, args: Vec<Value>) -> Result<Option<Row>> {
        let result = match &self.backend {
            Backend::Local(b) => b.get(sql, args).await,
            Backend::Remote(b) => b.get(sql, args).await,
        };
        self.observe(result)
    }

    pub async fn all(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Row>> {
        let result = match &self.backend {
            Backend::Local(b) => b.all(sql, args).await,
            Backend::Remote(b) => b.all(sql, args).await,
        };
        self.observe(result)
    }

    pub async fn run(&self, sql: &str, args: Vec<Value>) -> Result<RunResult> {
        let result = match &self.backend {
            Backend::Local(b) => b.run(sql, args).await,
            Backend::Remote(b) => b.run(sql, args).await,
        };
        self.observe(result)
    }

    /// Execute a multi-statement DDL blob. Statements are split with the
    /// quote/comment/BEGIN..END-aware splitter; PRAGMAs are silently
    /// skipped on remote backends.
    pub async fn exec(&self, ddl: &str) -> Result<()> {
        let statements = split_statements(ddl);
        let result = match &self.backend {
            Backend::Local(b) => b.exec(statements).await,
            Backend::Remote(b) => {
                let filtered = statements.into_iter().filter(|s| !is_pragma(s)).collect();
                b.exec(filtered).await
            }
        };
        self.observe(result)
    }

    /// Execute statements in a single transaction (all-or-nothing).
    pub async fn batch(&self, stmts: Vec<(String, Vec<Value>)>) -> Result<()> {
        let result = match &self.backend {
            Backend::Local(b) => b.batch(stmts).await,
            Backend::Remote(b) => b.batch(stmts).await,
        };
        self.observe(result)
    }

    /// Probe the sentinel table to see whether the schema has been created.
    pub async fn check_schema_exists(&self) -> bool {
        self.get(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='projects'",
            vec![],
        )
        .await
        .map(|row| row.is_some())
        .unwrap_or(false)
    }

    /// Initialize the schema: run the idempotent base bundle, then apply
    /// any migrations past the recorded version. Runs at most once per
    /// process; later calls are no-ops.
    pub async fn init(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.migrate_vec_dimensions().await?;
        self.exec(&schema::schema_sql(self.dimensions)).await?;

        let recorded: u32 = self
            .get("SELECT MAX(version) FROM schema_version", vec![])
            .await?
            .and_then(|row| row.get::<Option<i64>>(0).ok().flatten())
            .unwrap_or(1) as u32;

        for migration in MIGRATIONS {
            if migration.version <= recorded {
                continue;
            }
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying schema migration"
            );
            self.exec(migration.sql).await?;
            self.run(
                "INSERT OR IGNORE INTO schema_version (version, name) VALUES (?1, ?2)",
                vec![
                    Value::Integer(migration.version as i64),
                    Value::Text(migration.name.to_string()),
                ],
            )
            .await?;
        }

        self.schema_version
            .store(CURRENT_SCHEMA_VERSION, Ordering::Relaxed);
        Ok(())
    }

    /// Drop the vector table when its dimension no longer matches the
    /// configured embedder. Providers with different dimensions never
    /// co-mingle; stale vectors are rebuilt by the next reindex.
    async fn migrate_vec_dimensions(&self) -> Result<()> {
        let exists = self
            .get(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name='vec_memories_info'",
                vec![],
            )
            .await
            .unwrap_or(None);
        if exists.is_none() {
            return Ok(());
        }

        let current: Option<i64> = self
            .get(
                "SELECT vector_column_size FROM vec_memories_info
                 WHERE vector_column_name = 'embedding'",
                vec![],
            )
            .await
            .unwrap_or(None)
            .and_then(|row| row.get::<Option<i64>>(0).ok().flatten());

        if let Some(current) = current {
            if current != self.dimensions as i64 {
                tracing::info!(
                    from = current,
                    to = self.dimensions,
                    "Embedding dimensions changed, dropping vec_memories (reindex required)"
                );
                self.exec("DROP TABLE IF EXISTS vec_memories;").await?;
            }
        }
        Ok(())
    }

    /// Close the store. The pool drains on drop; this is an explicit
    /// lifecycle hook for symmetry with init.
    pub async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    #[tokio::test]
    async fn test_init_creates_full_schema() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.check_schema_exists().await);
        assert_eq!(store.schema_version(), CURRENT_SCHEMA_VERSION);

        // Migration-added columns are present on a fresh database
        store
            .run(
                "INSERT INTO projects (path, name) VALUES (?1, ?2)",
                args!["/p", "p"],
            )
            .await
            .unwrap();
        store
            .run(
                "INSERT INTO git_commits (project_id, commit_hash, analyzed) VALUES (1, 'abc', 0)",
                args![],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        // Second init must be a no-op, not a failure
        store.init().await.unwrap();
        assert!(store.is_healthy());
    }

    #[tokio::test]
    async fn test_fts_trigger_mirrors_inserts() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .run("INSERT INTO projects (path) VALUES ('/p')", args![])
            .await
            .unwrap();
        store
            .run(
                "INSERT INTO decisions (project_id, title, decision) VALUES (1, ?1, ?2)",
                args!["Use SQLite", "embedded store keeps deploys simple"],
            )
            .await
            .unwrap();

        let hits = store
            .all(
                "SELECT rowid FROM fts_decisions WHERE fts_decisions MATCH ?1",
                args!["sqlite"],
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_global_learning_trigger_scope() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .run("INSERT INTO projects (path) VALUES ('/p')", args![])
            .await
            .unwrap();
        // Project-scoped learning: only in fts_learnings
        store
            .run(
                "INSERT INTO learnings (project_id, title, content) VALUES (1, 'local tip', 'x')",
                args![],
            )
            .await
            .unwrap();
        // Global learning: mirrored into both
        store
            .run(
                "INSERT INTO learnings (project_id, title, content) VALUES (NULL, 'global tip', 'y')",
                args![],
            )
            .await
            .unwrap();

        let global = store
            .all(
                "SELECT rowid FROM fts_global_learnings WHERE fts_global_learnings MATCH 'tip'",
                args![],
            )
            .await
            .unwrap();
        assert_eq!(global.len(), 1);
    }
}
