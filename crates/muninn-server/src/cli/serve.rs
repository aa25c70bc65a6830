// crates/muninn-server/src/cli/serve.rs
// MCP server initialization and main loop. The server never exits on a
// recoverable error; it exits 0 on SIGTERM/SIGINT after flushing a
// session end. Only a sustained burst of unexpected errors terminates it.

use crate::config::{EnvConfig, db_path};
use crate::embedder::EmbedderClient;
use crate::mcp::MuninnServer;
use crate::store::Store;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Open the store, build the embedder, and initialize the schema.
pub async fn init_engine() -> Result<(Arc<Store>, Option<Arc<EmbedderClient>>)> {
    let mut config = EnvConfig::load();

    // The provider's advertised dimension drives the vector schema;
    // providers with different dimensions never co-mingle.
    let embedder =
        EmbedderClient::from_config(&config.api_keys, &config.embeddings).map(Arc::new);
    match &embedder {
        Some(client) => {
            config.embeddings.dimensions = client.dimensions();
            info!(provider = client.provider_id(), "Semantic retrieval enabled");
        }
        None => info!("Semantic retrieval disabled - FTS only"),
    }

    let cwd = std::env::current_dir().ok();
    let path = db_path(cwd.as_deref());
    let store = Arc::new(Store::open(&config, &path).await?);
    store.init().await?;

    Ok((store, embedder))
}

/// Run the stdio MCP server until shutdown.
pub async fn run_server() -> Result<()> {
    let (store, embedder) = init_engine().await?;
    let server = MuninnServer::new(store.clone(), embedder);
    let state = server.state.clone();
    let project = server.project.clone();
    let fatal = server.fatal.clone();

    info!("Muninn MCP server starting on stdio");

    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(server, transport).await?;

    // Exit 0 on SIGTERM/SIGINT after flushing the session end; transport
    // close (client gone) flushes the same way. Only the systemic-error
    // window terminates with a failure code.
    let mut systemic = false;
    tokio::select! {
        result = service.waiting() => {
            if let Err(e) = result {
                warn!("transport closed: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
        _ = fatal.notified() => {
            systemic = true;
        }
    }

    let project_id = project.read().await.as_ref().map(|p| p.id);
    if let Some(project_id) = project_id {
        crate::session::auto_end_session(&store, &state, project_id).await;
    }
    store.close().await;

    if systemic {
        anyhow::bail!("terminated after sustained unexpected errors");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
