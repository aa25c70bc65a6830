// crates/muninn-server/src/queue/mod.rs
// Durable, at-least-once work queue over the work_queue table.
//
// Jobs are idempotent or self-deduplicating; per-job failures never block
// queue progress. The dispatcher claims a batch of pending rows, runs each
// registered handler, and returns rows to pending (or failed at the
// attempt cap). Unknown job types fail immediately.

use crate::args;
use crate::embedder::EmbedderClient;
use crate::store::Store;
use crate::utils::truncate;
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use strum::{Display, EnumString};

/// Claim batch size per dispatcher pass.
const BATCH_SIZE: usize = 20;

/// The closed set of job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    ReindexSymbols,
    BuildCallGraph,
    AnalyzeDiffs,
    RunTests,
    DetectReverts,
    RefreshOwnership,
    MapErrorFixes,
    DetectPatterns,
    TrackDecisionOutcomes,
    CalibrateConfidence,
    ProcessContextFeedback,
    ReinforceLearnings,
    DistillStrategies,
    BuildWorkflowModel,
    RegenerateDna,
    ComputeRiskAlerts,
    RefreshValueMetrics,
}

/// Shared context handed to every job handler.
pub struct JobContext {
    pub store: Arc<Store>,
    pub embedder: Option<Arc<EmbedderClient>>,
}

/// A claimed queue row.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub attempts: i64,
    pub max_attempts: i64,
}

pub type Handler =
    Box<dyn Fn(Arc<JobContext>, serde_json::Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Enqueue a job. Payload is opaque to the queue.
pub async fn enqueue(store: &Store, job_type: JobType, payload: serde_json::Value) -> Result<i64> {
    let result = store
        .run(
            "INSERT INTO work_queue (job_type, payload) VALUES (?1, ?2)",
            args![job_type.to_string(), payload.to_string()],
        )
        .await?;
    Ok(result.last_insert_id)
}

/// Count of pending jobs (queue depth, the only backpressure signal).
pub async fn pending_count(store: &Store) -> Result<i64> {
    Ok(store
        .get(
            "SELECT COUNT(*) FROM work_queue WHERE status = 'pending'",
            args![],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0))
}

/// Job dispatcher: handler registry plus the claim/run/settle loop.
pub struct Dispatcher {
    ctx: Arc<JobContext>,
    handlers: HashMap<JobType, Handler>,
    /// Handlers registered with a schema floor run as no-ops below it.
    min_schema: HashMap<JobType, u32>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self {
            ctx,
            handlers: HashMap::new(),
            min_schema: HashMap::new(),
        }
    }

    pub fn register(&mut self, job_type: JobType, handler: Handler) {
        self.handlers.insert(job_type, handler);
    }

    pub fn register_with_min_schema(&mut self, job_type: JobType, min: u32, handler: Handler) {
        self.min_schema.insert(job_type, min);
        self.handlers.insert(job_type, handler);
    }

    /// Claim up to BATCH_SIZE pending jobs (oldest first), optionally
    /// filtered by job type, and run them. Returns the number processed.
    pub async fn process_batch(&self, filter: Option<JobType>) -> Result<usize> {
        let jobs = self.claim_batch(filter).await?;
        let count = jobs.len();
        for job in jobs {
            self.dispatch(job).await;
        }
        Ok(count)
    }

    /// Drain the queue until no pending jobs remain ("once" worker mode).
    pub async fn drain(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let processed = self.process_batch(None).await?;
            total += processed;
            if processed == 0 {
                return Ok(total);
            }
        }
    }

    async fn claim_batch(&self, filter: Option<JobType>) -> Result<Vec<Job>> {
        let rows = match filter {
            Some(job_type) => {
                self.ctx
                    .store
                    .all(
                        "SELECT id, job_type, payload, attempts, max_attempts FROM work_queue
                         WHERE status = 'pending' AND job_type = ?1
                         ORDER BY created_at, id LIMIT ?2",
                        args![job_type.to_string(), BATCH_SIZE],
                    )
                    .await?
            }
            None => {
                self.ctx
                    .store
                    .all(
                        "SELECT id, job_type, payload, attempts, max_attempts FROM work_queue
                         WHERE status = 'pending'
                         ORDER BY created_at, id LIMIT ?1",
                        args![BATCH_SIZE],
                    )
                    .await?
            }
        };

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get(0)?;
            let claimed = self
                .ctx
                .store
                .run(
                    "UPDATE work_queue SET status = 'processing', attempts = attempts + 1,
                            started_at = CURRENT_TIMESTAMP
                     WHERE id = ?1 AND status = 'pending'",
                    args![id],
                )
                .await?;
            if claimed.changes == 0 {
                continue;
            }
            let payload_text: Option<String> = row.get(2)?;
            jobs.push(Job {
                id,
                job_type: row.get(1)?,
                payload: payload_text
                    .and_then(|t| serde_json::from_str(&t).ok())
                    .unwrap_or(serde_json::Value::Null),
                attempts: row.get::<i64>(3)? + 1,
                max_attempts: row.get(4)?,
            });
        }
        Ok(jobs)
    }

    async fn dispatch(&self, job: Job) {
        let parsed: Option<JobType> = job.job_type.parse().ok();
        let handler = parsed.and_then(|t| self.handlers.get(&t));

        let (Some(job_type), Some(handler)) = (parsed, handler) else {
            tracing::warn!(job_type = %job.job_type, "Unknown job type, failing immediately");
            self.settle_failed(&job, "unknown job type").await;
            return;
        };

        if let Some(min) = self.min_schema.get(&job_type) {
            if self.ctx.store.schema_version() < *min {
                tracing::debug!(job_type = %job.job_type, "Schema below job minimum, skipping");
                self.settle_completed(&job).await;
                return;
            }
        }

        match handler(self.ctx.clone(), job.payload.clone()).await {
            Ok(()) => self.settle_completed(&job).await,
            Err(e) => {
                tracing::warn!(job = job.id, job_type = %job.job_type, "Job failed: {}", e);
                if job.attempts >= job.max_attempts {
                    self.settle_failed(&job, &e.to_string()).await;
                } else {
                    self.settle_retry(&job).await;
                }
            }
        }
    }

    async fn settle_completed(&self, job: &Job) {
        let _ = self
            .ctx
            .store
            .run(
                "UPDATE work_queue SET status = 'completed', completed_at = CURRENT_TIMESTAMP
                 WHERE id = ?1",
                args![job.id],
            )
            .await;
    }

    async fn settle_retry(&self, job: &Job) {
        let _ = self
            .ctx
            .store
            .run(
                "UPDATE work_queue SET status = 'pending' WHERE id = ?1",
                args![job.id],
            )
            .await;
    }

    async fn settle_failed(&self, job: &Job, error: &str) {
        let _ = self
            .ctx
            .store
            .run(
                "UPDATE work_queue SET status = 'failed', error_message = ?2,
                        completed_at = CURRENT_TIMESTAMP
                 WHERE id = ?1",
                args![job.id, truncate(error, 500)],
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn test_ctx() -> Arc<JobContext> {
        Arc::new(JobContext {
            store: Arc::new(Store::open_in_memory().await.unwrap()),
            embedder: None,
        })
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
        Box::new(move |_ctx, _payload| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn failing_handler() -> Handler {
        Box::new(|_ctx, _payload| Box::pin(async { anyhow::bail!("handler exploded") }))
    }

    #[tokio::test]
    async fn test_job_runs_and_completes() {
        let ctx = test_ctx().await;
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new(ctx.clone());
        dispatcher.register(JobType::DetectPatterns, counting_handler(counter.clone()));

        enqueue(&ctx.store, JobType::DetectPatterns, serde_json::json!({"project_id": 1}))
            .await
            .unwrap();
        let processed = dispatcher.process_batch(None).await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let status: String = ctx
            .store
            .get("SELECT status FROM work_queue WHERE id = 1", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(status, "completed");
    }

    #[tokio::test]
    async fn test_failed_job_retries_then_fails_terminally() {
        let ctx = test_ctx().await;
        let mut dispatcher = Dispatcher::new(ctx.clone());
        dispatcher.register(JobType::RunTests, failing_handler());

        enqueue(&ctx.store, JobType::RunTests, serde_json::Value::Null).await.unwrap();

        // Three passes: pending -> pending -> pending -> failed (max_attempts 3)
        for _ in 0..3 {
            dispatcher.process_batch(None).await.unwrap();
        }

        let row = ctx
            .store
            .get("SELECT status, attempts, error_message FROM work_queue WHERE id = 1", args![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "failed");
        assert_eq!(row.get::<i64>(1).unwrap(), 3);
        assert!(row.get::<String>(2).unwrap().contains("exploded"));

        // Terminal: nothing left to process
        assert_eq!(dispatcher.process_batch(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_type_fails_immediately() {
        let ctx = test_ctx().await;
        let dispatcher = Dispatcher::new(ctx.clone());
        ctx.store
            .run(
                "INSERT INTO work_queue (job_type, payload) VALUES ('no_such_job', '{}')",
                args![],
            )
            .await
            .unwrap();

        dispatcher.process_batch(None).await.unwrap();
        let status: String = ctx
            .store
            .get("SELECT status FROM work_queue WHERE id = 1", args![])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(status, "failed");
    }

    #[tokio::test]
    async fn test_type_filter_claims_only_matching() {
        let ctx = test_ctx().await;
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new(ctx.clone());
        dispatcher.register(JobType::RunTests, counting_handler(counter.clone()));
        dispatcher.register(JobType::DetectPatterns, counting_handler(counter.clone()));

        enqueue(&ctx.store, JobType::RunTests, serde_json::Value::Null).await.unwrap();
        enqueue(&ctx.store, JobType::DetectPatterns, serde_json::Value::Null).await.unwrap();

        dispatcher.process_batch(Some(JobType::RunTests)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(pending_count(&ctx.store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_empties_queue() {
        let ctx = test_ctx().await;
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new(ctx.clone());
        dispatcher.register(JobType::DetectPatterns, counting_handler(counter.clone()));

        for _ in 0..25 {
            enqueue(&ctx.store, JobType::DetectPatterns, serde_json::Value::Null)
                .await
                .unwrap();
        }
        let total = dispatcher.drain().await.unwrap();
        assert_eq!(total, 25);
        assert_eq!(pending_count(&ctx.store).await.unwrap(), 0);
    }

    #[test]
    fn test_job_type_string_round_trip() {
        assert_eq!(JobType::ReindexSymbols.to_string(), "reindex_symbols");
        assert_eq!("build_call_graph".parse::<JobType>().unwrap(), JobType::BuildCallGraph);
        assert!("bogus".parse::<JobType>().is_err());
    }
}
