// crates/muninn-server/src/store/local.rs
// In-process embedded backend: rusqlite behind a deadpool-sqlite pool,
// with sqlite-vec registered once per process.

use super::types::{Row, RunResult, Value};
use crate::utils::path_to_string;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Registers sqlite-vec extension globally (once per process).
/// Must be called before any SQLite connections are opened.
static SQLITE_VEC_INIT: Once = Once::new();

#[allow(clippy::missing_transmute_annotations)]
pub(crate) fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init has the signature expected by
        // sqlite3_auto_extension; the pointer refers to a statically-linked
        // symbol and remains valid for the process lifetime.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered globally");
    });
}

/// Embedded store backend over a connection pool.
pub struct LocalStore {
    pool: Pool,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a pooled database at the given path, creating parents with
    /// restricted permissions.
    pub async fn open(path: &Path) -> Result<Self> {
        ensure_sqlite_vec_registered();
        ensure_parent_directory(path)?;

        let conn_str = path_to_string(path);
        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(make_file_post_create_hook(path.to_path_buf()))
            .build()
            .context("Failed to build connection pool")?;

        Ok(Self {
            pool,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a pooled in-memory database with a shared-cache URI so all
    /// connections see the same state (for tests).
    pub async fn open_in_memory() -> Result<Self> {
        ensure_sqlite_vec_registered();

        let uri = format!("file:memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let cfg = Config::new(&uri);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(make_memory_post_create_hook())
            .build()
            .context("Failed to build connection pool")?;

        Ok(Self { pool, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a pooled connection on the blocking thread pool.
    async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;
        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    pub async fn get(&self, sql: &str, args: Vec<Value>) -> Result<Option<Row>> {
        let sql = sql.to_string();
        self.interact(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
            match rows.next()? {
                Some(row) => Ok(Some(read_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn all(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        self.interact(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn run(&self, sql: &str, args: Vec<Value>) -> Result<RunResult> {
        let sql = sql.to_string();
        self.interact(move |conn| {
            let changes = conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
            Ok(RunResult {
                last_insert_id: conn.last_insert_rowid(),
                changes,
            })
        })
        .await
    }

    /// Execute pre-split DDL statements one by one.
    pub async fn exec(&self, statements: Vec<String>) -> Result<()> {
        self.interact(move |conn| {
            for stmt in &statements {
                conn.execute_batch(stmt)
                    .with_context(|| format!("DDL failed: {}", crate::utils::truncate(stmt, 120)))?;
            }
            Ok(())
        })
        .await
    }

    /// Execute statements inside a single transaction (all-or-nothing).
    pub async fn batch(&self, stmts: Vec<(String, Vec<Value>)>) -> Result<()> {
        self.interact(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for (sql, args) in &stmts {
                tx.execute(sql, rusqlite::params_from_iter(args.iter()))?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

/// Convert a rusqlite row into the backend-neutral Row.
fn read_row(row: &rusqlite::Row<'_>) -> Result<Row> {
    let count = row.as_ref().column_count();
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let value = match row.get_ref(i)? {
            rusqlite::types::ValueRef::Null => Value::Null,
            rusqlite::types::ValueRef::Integer(v) => Value::Integer(v),
            rusqlite::types::ValueRef::Real(v) => Value::Real(v),
            rusqlite::types::ValueRef::Text(t) => {
                Value::Text(String::from_utf8_lossy(t).into_owned())
            }
            rusqlite::types::ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

/// Ensure parent directory exists with secure permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

/// Post-create hook for file-based databases: PRAGMAs + 0o600 file perms.
fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Post-create hook for in-memory databases (WAL is not applicable).
fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA journal_size_limit=32768;",
    )?;
    Ok(())
}
