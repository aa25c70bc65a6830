// crates/muninn-server/src/mcp/resources.rs
// MCP Resource handlers - pull-only URIs recomputed on every read.

use super::MuninnServer;
use crate::query;
use rmcp::{
    model::{
        AnnotateAble, Annotated, ListResourcesResult, PaginatedRequestParams, RawResource,
        ReadResourceRequestParams, ReadResourceResult, ResourceContents,
    },
    service::{RequestContext, RoleServer},
};

/// Helper to wrap a raw resource without annotations.
fn no_ann(raw: RawResource) -> Annotated<RawResource> {
    Annotated::new(raw, None)
}

fn resource(uri: &str, name: &str, description: &str) -> Annotated<RawResource> {
    no_ann(RawResource {
        uri: uri.into(),
        name: name.into(),
        title: Some(name.into()),
        description: Some(description.into()),
        mime_type: Some("text/plain".into()),
        size: None,
        icons: None,
        meta: None,
    })
}

impl MuninnServer {
    fn resource_list() -> Vec<Annotated<RawResource>> {
        vec![
            resource(
                "muninn://context/current",
                "context-current",
                "Standing context block for the active project",
            ),
            resource(
                "muninn://context/errors",
                "context-errors",
                "Recent errors with any known fixes",
            ),
            resource(
                "muninn://warnings/active",
                "warnings-active",
                "Undismissed risk alerts",
            ),
            resource(
                "muninn://context/shared",
                "context-shared",
                "Active multi-agent intents",
            ),
            resource(
                "muninn://briefing",
                "briefing",
                "Project health, recent sessions, and open work",
            ),
        ]
    }

    pub(super) async fn handle_list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, rmcp::ErrorData> {
        Ok(ListResourcesResult {
            resources: Self::resource_list(),
            next_cursor: None,
            meta: None,
        })
    }

    pub(super) async fn handle_read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, rmcp::ErrorData> {
        let project = self
            .current_project()
            .await
            .map_err(|e| rmcp::ErrorData::internal_error(e, None))?;

        let text = match request.uri.as_str() {
            "muninn://context/current" => query::resource_context_current(
                &self.store,
                self.embedder.as_deref(),
                &self.state,
                project.id,
            )
            .await,
            "muninn://context/errors" => {
                query::resource_context_errors(&self.store, project.id).await
            }
            "muninn://warnings/active" => {
                query::resource_warnings_active(&self.store, project.id).await
            }
            "muninn://context/shared" => {
                query::resource_context_shared(&self.store, project.id).await
            }
            "muninn://briefing" => query::resource_briefing(&self.store, project.id).await,
            other => {
                return Err(rmcp::ErrorData::invalid_params(
                    format!("Unknown resource URI: {other}"),
                    None,
                ));
            }
        }
        .map_err(|e| rmcp::ErrorData::internal_error(e.to_string(), None))?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: request.uri,
                mime_type: Some("text/plain".into()),
                text,
                meta: None,
            }],
        })
    }
}
