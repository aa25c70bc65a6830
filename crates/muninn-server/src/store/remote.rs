// crates/muninn-server/src/store/remote.rs
// HTTP-framed remote backend speaking the same primitive contract as the
// embedded store. Frames are JSON: {sql, args} -> {rows, last_insert_id,
// changes}. PRAGMA statements are skipped by the caller (exec path).

use super::types::{Row, RunResult, Value};
use anyhow::{Context, Result};
use serde::Deserialize;

/// Remote store backend.
pub struct RemoteStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    last_insert_id: i64,
    #[serde(default)]
    changes: usize,
}

impl RemoteStore {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client for remote store")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<QueryResponse> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.context("remote store request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("remote store returned {}", response.status());
        }
        response
            .json::<QueryResponse>()
            .await
            .context("remote store returned malformed frame")
    }

    fn frame(sql: &str, args: &[Value]) -> serde_json::Value {
        serde_json::json!({
            "sql": sql,
            "args": args.iter().map(Value::to_json).collect::<Vec<_>>(),
        })
    }

    pub async fn get(&self, sql: &str, args: Vec<Value>) -> Result<Option<Row>> {
        let response = self.post("/v1/query", Self::frame(sql, &args)).await?;
        Ok(response.rows.first().map(decode_row))
    }

    pub async fn all(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Row>> {
        let response = self.post("/v1/query", Self::frame(sql, &args)).await?;
        Ok(response.rows.iter().map(decode_row).collect())
    }

    pub async fn run(&self, sql: &str, args: Vec<Value>) -> Result<RunResult> {
        let response = self.post("/v1/execute", Self::frame(sql, &args)).await?;
        Ok(RunResult {
            last_insert_id: response.last_insert_id,
            changes: response.changes,
        })
    }

    /// Execute pre-split DDL statements. The caller has already filtered
    /// PRAGMAs, which have no meaning on a remote backend.
    pub async fn exec(&self, statements: Vec<String>) -> Result<()> {
        for stmt in statements {
            self.post("/v1/execute", Self::frame(&stmt, &[])).await?;
        }
        Ok(())
    }

    pub async fn batch(&self, stmts: Vec<(String, Vec<Value>)>) -> Result<()> {
        let frames: Vec<serde_json::Value> = stmts
            .iter()
            .map(|(sql, args)| Self::frame(sql, args))
            .collect();
        self.post("/v1/batch", serde_json::json!({ "stmts": frames }))
            .await?;
        Ok(())
    }
}

fn decode_row(raw: &Vec<serde_json::Value>) -> Row {
    Row::new(raw.iter().map(Value::from_json).collect())
}
