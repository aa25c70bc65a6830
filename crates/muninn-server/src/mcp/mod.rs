// crates/muninn-server/src/mcp/mod.rs
// MCP server implementation: tool router, call lifecycle (session
// auto-start, fire-and-forget logging, error detection), and the
// pull-only resource surface.

mod requests;
mod resources;

use crate::context::{self, ContextRequest, Format, Strategy, StuckLoopClassifier};
use crate::db::ProjectInfo;
use crate::embedder::EmbedderClient;
use crate::ingest;
use crate::query;
use crate::state::EngineState;
use crate::store::Store;
use requests::*;

use rmcp::{
    ErrorData, ServerHandler,
    handler::server::{
        router::tool::ToolRouter,
        tool::ToolCallContext,
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParams, CallToolResult, Content, ListToolsResult, PaginatedRequestParams,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// MCP server state
#[derive(Clone)]
pub struct MuninnServer {
    pub store: Arc<Store>,
    pub embedder: Option<Arc<EmbedderClient>>,
    pub state: Arc<EngineState>,
    pub project: Arc<RwLock<Option<ProjectInfo>>>,
    pub session_id: Arc<RwLock<Option<i64>>>,
    /// Sliding window of unexpected errors; tripping it is the only
    /// condition that terminates the server.
    pub errors: Arc<std::sync::Mutex<crate::error::ErrorWindow>>,
    /// Signalled when the systemic-error threshold is crossed.
    pub fatal: Arc<tokio::sync::Notify>,
    tool_router: ToolRouter<Self>,
}

impl MuninnServer {
    pub fn new(store: Arc<Store>, embedder: Option<Arc<EmbedderClient>>) -> Self {
        Self {
            store,
            embedder,
            state: Arc::new(EngineState::new()),
            project: Arc::new(RwLock::new(None)),
            session_id: Arc::new(RwLock::new(None)),
            errors: Arc::new(std::sync::Mutex::new(crate::error::ErrorWindow::new())),
            fatal: Arc::new(tokio::sync::Notify::new()),
            tool_router: Self::tool_router(),
        }
    }

    /// Record an unexpected failure; signals shutdown past the threshold.
    pub fn record_unexpected(&self, err: &crate::error::MuninnError) {
        let tripped = self
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(err);
        if tripped {
            tracing::error!("systemic error threshold crossed, shutting down");
            self.fatal.notify_one();
        }
    }

    /// Resolve the active project, creating it from the CWD on first use.
    pub async fn current_project(&self) -> Result<ProjectInfo, String> {
        if let Some(project) = self.project.read().await.as_ref() {
            return Ok(project.clone());
        }
        let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
        let project =
            crate::db::get_or_create_project(&self.store, &cwd.to_string_lossy(), None)
                .await
                .map_err(|e| e.to_string())?;
        *self.project.write().await = Some(project.clone());
        Ok(project)
    }

    /// Auto-start a session on the first tool call of a period of activity.
    pub async fn ensure_session(&self, project_id: i64) -> Option<i64> {
        if let Some(id) = *self.session_id.read().await {
            return Some(id);
        }
        match crate::session::auto_start_session(&self.store, project_id).await {
            Ok(session) => {
                *self.session_id.write().await = Some(session.id);
                Some(session.id)
            }
            Err(e) => {
                tracing::debug!("session auto-start failed: {}", e);
                None
            }
        }
    }

    fn embedder_ref(&self) -> Option<&EmbedderClient> {
        self.embedder.as_deref()
    }
}

fn text_result(text: String) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult {
        content: vec![Content::text(text)],
        structured_content: None,
        is_error: Some(false),
        meta: None,
    })
}

fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, ErrorData> {
    match serde_json::to_string_pretty(value) {
        Ok(text) => text_result(text),
        Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
    }
}

fn error_result(message: String) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::error(vec![Content::text(message)]))
}

#[tool_router]
impl MuninnServer {
    #[tool(
        description = "Search project memory (decisions, learnings, issues, files) by meaning or keywords. Modes: auto, fts, vector, smart."
    )]
    async fn query(
        &self,
        Parameters(req): Parameters<QueryRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let project = match self.current_project().await {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        let mode = query::QueryMode::parse(req.mode.as_deref().unwrap_or("auto"));
        match query::query(
            &self.store,
            self.embedder_ref(),
            project.id,
            &req.text,
            mode,
            req.limit.unwrap_or(10),
        )
        .await
        {
            Ok(snippets) => json_result(&snippets),
            Err(e) => error_result(e.to_string()),
        }
    }

    #[tool(
        description = "Pre-edit safety check for a set of files: fragility, open critical issues, stale knowledge, superseded decisions."
    )]
    async fn check(
        &self,
        Parameters(req): Parameters<CheckRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let project = match self.current_project().await {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        match query::check(&self.store, project.id, &req.files).await {
            Ok(warnings) => json_result(&warnings),
            Err(e) => error_result(e.to_string()),
        }
    }

    #[tool(description = "Suggest files and symbols relevant to a task, ranked by hybrid similarity.")]
    async fn suggest(
        &self,
        Parameters(req): Parameters<SuggestRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let project = match self.current_project().await {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        match query::suggest(
            &self.store,
            self.embedder_ref(),
            project.id,
            &req.task,
            req.limit.unwrap_or(10),
            req.include_symbols.unwrap_or(false),
        )
        .await
        {
            Ok(suggestions) => json_result(&suggestions),
            Err(e) => error_result(e.to_string()),
        }
    }

    #[tool(
        description = "Predict around upcoming work: related files, co-changers, decisions, issues, learnings, covering tests, and the likely next tool."
    )]
    async fn predict(
        &self,
        Parameters(req): Parameters<PredictRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let project = match self.current_project().await {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        match query::predict(
            &self.store,
            self.embedder_ref(),
            &self.state,
            project.id,
            req.task.as_deref(),
            &req.files.unwrap_or_default(),
        )
        .await
        {
            Ok(bundle) => json_result(&bundle),
            Err(e) => error_result(e.to_string()),
        }
    }

    #[tool(description = "Enrich a specific upcoming tool invocation with warnings and known fixes.")]
    async fn enrich(
        &self,
        Parameters(req): Parameters<EnrichRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let project = match self.current_project().await {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        match query::enrich(&self.store, project.id, &req.tool, &req.input).await {
            Ok(fragments) => text_result(fragments.join("\n")),
            Err(e) => error_result(e.to_string()),
        }
    }

    #[tool(
        description = "Assemble a token-budgeted context block from project memory. Formats: xml, markdown, native, json."
    )]
    async fn context(
        &self,
        Parameters(req): Parameters<ContextRequestArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let project = match self.current_project().await {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        let session_id = self.ensure_session(project.id).await;
        let request = ContextRequest {
            intent: context::Intent::parse(req.intent.as_deref().unwrap_or("read")),
            files: req.files.unwrap_or_default(),
            query: req.query,
            task: req.task,
            task_type: None,
            format: Format::parse(req.format.as_deref().unwrap_or("xml")),
            max_tokens: req.max_tokens,
            strategy: Strategy::parse(req.strategy.as_deref().unwrap_or("balanced")),
            app: "muninn".to_string(),
            scope: None,
        };
        match context::build_context(
            &self.store,
            self.embedder_ref(),
            &self.state,
            &StuckLoopClassifier,
            project.id,
            session_id,
            &request,
        )
        .await
        {
            Ok(assembled) => {
                let mut text = assembled.block;
                if !assembled.advisories.is_empty() {
                    text.push('\n');
                    text.push_str(&assembled.advisories.join("\n"));
                }
                text_result(text)
            }
            Err(e) => error_result(e.to_string()),
        }
    }

    #[tool(
        description = "Multi-agent coordination: declare an intent over files (reports conflicts), query active intents, or release."
    )]
    async fn intent(
        &self,
        Parameters(req): Parameters<IntentRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let project = match self.current_project().await {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        match req.action.as_str() {
            "declare" => {
                let files = req.files.unwrap_or_default();
                match context::declare_intent(
                    &self.store,
                    project.id,
                    &req.agent_id,
                    req.intent_type.as_deref().unwrap_or("edit"),
                    req.description.as_deref().unwrap_or(""),
                    &files,
                )
                .await
                {
                    Ok((id, conflicts)) => {
                        let conflict_lines: Vec<String> = conflicts
                            .iter()
                            .map(|c| format!("{} already intends {} here", c.agent_id, c.intent_type))
                            .collect();
                        text_result(format!(
                            "intent {id} declared{}",
                            if conflict_lines.is_empty() {
                                String::new()
                            } else {
                                format!("; conflicts: {}", conflict_lines.join("; "))
                            }
                        ))
                    }
                    Err(e) => error_result(e.to_string()),
                }
            }
            "query" => match context::query_intents(&self.store, project.id, None).await {
                Ok(intents) => text_result(
                    intents
                        .iter()
                        .map(|i| format!("[{}] {} {}", i.id, i.agent_id, i.intent_type))
                        .collect::<Vec<_>>()
                        .join("\n"),
                ),
                Err(e) => error_result(e.to_string()),
            },
            "release" => {
                match context::release_intent(&self.store, project.id, &req.agent_id, req.intent_id)
                    .await
                {
                    Ok(released) => text_result(format!("released {released} intents")),
                    Err(e) => error_result(e.to_string()),
                }
            }
            other => error_result(format!("unknown intent action: {other}")),
        }
    }
}

impl ServerHandler for MuninnServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: rmcp::model::Implementation {
                name: "muninn".into(),
                title: Some("Muninn - persistent memory for coding assistants".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Muninn records what the assistant does in a project and surfaces relevant context on demand.".into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: None,
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let tool_name = request.name.to_string();
            let start = std::time::Instant::now();

            let project_id = match self.current_project().await {
                Ok(p) => Some(p.id),
                Err(_) => None,
            };
            let session_id = match project_id {
                Some(pid) => self.ensure_session(pid).await,
                None => None,
            };

            let input = request
                .arguments
                .clone()
                .map(serde_json::Value::Object)
                .unwrap_or(serde_json::Value::Null);

            let ctx = ToolCallContext::new(self, request, context);
            let result = self.tool_router.call(ctx).await;
            let duration_ms = start.elapsed().as_millis() as i64;

            let (success, result_text) = match &result {
                Ok(r) => {
                    let text = r
                        .content
                        .first()
                        .and_then(|c| c.as_text())
                        .map(|t| t.text.to_string())
                        .unwrap_or_default();
                    (r.is_error != Some(true), text)
                }
                Err(e) => {
                    // Validation failures are expected; anything else
                    // counts toward the systemic window
                    if e.code == rmcp::model::ErrorCode::INTERNAL_ERROR {
                        self.record_unexpected(&crate::error::MuninnError::Other(
                            e.message.to_string(),
                        ));
                    }
                    (false, e.message.to_string())
                }
            };

            // Logging and error detection are fire-and-forget: a failure
            // here must never fail the tool.
            if let Some(project_id) = project_id {
                let store = self.store.clone();
                let record = ingest::ToolCallRecord {
                    project_id,
                    session_id,
                    tool_name,
                    input,
                    success,
                    duration_ms,
                    error_message: if success { None } else { Some(result_text.clone()) },
                };
                let output_for_errors = result_text;
                tokio::spawn(async move {
                    let tool_call_id = match ingest::log_tool_call(&store, &record).await {
                        Ok(id) => Some(id),
                        Err(e) => {
                            tracing::debug!("tool call log failed: {}", e);
                            None
                        }
                    };
                    let detected = ingest::detect_errors(&output_for_errors);
                    if !detected.is_empty() {
                        if let Err(e) = ingest::record_errors(
                            &store,
                            record.project_id,
                            record.session_id,
                            tool_call_id,
                            &detected,
                        )
                        .await
                        {
                            tracing::debug!("error ingestion failed: {}", e);
                        }
                    }
                });
            }

            result
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<
        Output = Result<rmcp::model::ListResourcesResult, ErrorData>,
    > + Send + '_ {
        self.handle_list_resources(_request, context)
    }

    fn read_resource(
        &self,
        request: rmcp::model::ReadResourceRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<
        Output = Result<rmcp::model::ReadResourceResult, ErrorData>,
    > + Send + '_ {
        self.handle_read_resource(request, context)
    }
}
