// crates/muninn-server/src/main.rs
// Muninn - persistent memory engine for coding assistants

use anyhow::Result;
use clap::Parser;
use muninn::cli::{Cli, Commands, IngestSource, parse_entity};
use muninn::error::MuninnError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    // Load .env from ~/.muninn/.env only (never from CWD - a hostile repo
    // could override provider keys)
    if let Some(home) = dirs::home_dir()
        && let Err(e) = dotenvy::from_path(home.join(".muninn/.env"))
    {
        tracing::debug!("Failed to load global .env file: {}", e);
    }

    let cli = Cli::parse();

    let log_level = match &cli.command {
        None | Some(Commands::Serve) => Level::WARN, // Quiet for MCP stdio
        Some(Commands::Reindex { .. }) | Some(Commands::Worker { .. }) => Level::INFO,
        _ => Level::WARN,
    };
    let level = std::env::var("MUNINN_LOG")
        .ok()
        .and_then(|raw| raw.parse::<Level>().ok())
        .unwrap_or(log_level);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("muninn: {}", muninn::config::redact_api_keys(&e.to_string()));
            let code = match e.downcast_ref::<MuninnError>() {
                Some(MuninnError::InvalidInput(_))
                | Some(MuninnError::NotFound(_))
                | Some(MuninnError::ProjectNotSet) => 1,
                _ => 2,
            };
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        None | Some(Commands::Serve) => muninn::cli::run_server().await,
        Some(Commands::Ingest {
            source: IngestSource::Commit { path },
        }) => {
            let root = resolve_path(path)?;
            let (store, _) = muninn::cli::serve::init_engine().await?;
            match muninn::ingest::ingest_commit(&store, &root).await? {
                Some(hash) => println!("ingested {hash}"),
                None => println!("commit already ingested"),
            }
            Ok(())
        }
        Some(Commands::Reindex { path }) => {
            let root = resolve_path(path)?;
            let (store, _) = muninn::cli::serve::init_engine().await?;
            let project =
                muninn::db::get_or_create_project(&store, &root.to_string_lossy(), None).await?;

            let files = muninn::indexer::collect_source_files(&root);
            let stats =
                muninn::indexer::parse_and_persist(&store, project.id, &root, &files).await?;
            let edges = muninn::indexer::build_call_graph(&store, project.id, &root, &files).await?;
            muninn::indexer::map_tests_to_sources(&store, project.id, &files).await?;
            muninn::indexer::refresh_blast_radius(&store, project.id, &files).await?;
            println!(
                "reindexed {} files ({} skipped), {} symbols, {} call edges",
                stats.parsed, stats.skipped, stats.symbols, edges
            );
            Ok(())
        }
        Some(Commands::Worker { once: _ }) => {
            let (store, embedder) = muninn::cli::serve::init_engine().await?;
            let ctx = std::sync::Arc::new(muninn::queue::JobContext { store, embedder });
            let processed = muninn::worker::run_once(ctx).await?;
            println!("processed {processed} jobs");
            Ok(())
        }
        Some(Commands::Promote { args }) => {
            let root = std::env::current_dir()?;
            let (store, _) = muninn::cli::serve::init_engine().await?;
            let project =
                muninn::db::get_or_create_project(&store, &root.to_string_lossy(), None).await?;
            let output = muninn::cli::run_promote(&store, project.id, &root, &args).await?;
            println!("{output}");
            Ok(())
        }
        Some(Commands::Relate {
            source,
            relationship,
            target,
            strength,
            note,
        }) => {
            let (source_type, source_id) =
                parse_entity(&source).map_err(MuninnError::InvalidInput)?;
            let (target_type, target_id) =
                parse_entity(&target).map_err(MuninnError::InvalidInput)?;
            let root = std::env::current_dir()?;
            let (store, _) = muninn::cli::serve::init_engine().await?;
            let project =
                muninn::db::get_or_create_project(&store, &root.to_string_lossy(), None).await?;
            muninn::db::relate(
                &store,
                project.id,
                (&source_type, source_id),
                (&target_type, target_id),
                &relationship,
                strength,
                note.as_deref(),
            )
            .await?;
            println!("related {source} -[{relationship}]-> {target}");
            Ok(())
        }
        Some(Commands::Relations { entity }) => {
            let (entity_type, entity_id) =
                parse_entity(&entity).map_err(MuninnError::InvalidInput)?;
            let root = std::env::current_dir()?;
            let (store, _) = muninn::cli::serve::init_engine().await?;
            let project =
                muninn::db::get_or_create_project(&store, &root.to_string_lossy(), None).await?;
            let relations =
                muninn::db::relations_for(&store, project.id, (&entity_type, entity_id)).await?;
            if relations.is_empty() {
                println!("no relationships");
            }
            for rel in relations {
                println!(
                    "[{}] {}:{} -[{}]-> {}:{} (strength {:.0})",
                    rel.id,
                    rel.source_type,
                    rel.source_id,
                    rel.relationship,
                    rel.target_type,
                    rel.target_id,
                    rel.strength
                );
            }
            Ok(())
        }
        Some(Commands::Unrelate { id }) => {
            let root = std::env::current_dir()?;
            let (store, _) = muninn::cli::serve::init_engine().await?;
            let project =
                muninn::db::get_or_create_project(&store, &root.to_string_lossy(), None).await?;
            if muninn::db::unrelate(&store, project.id, id).await? {
                println!("relationship {id} removed");
                Ok(())
            } else {
                Err(MuninnError::NotFound(format!("relationship {id}")).into())
            }
        }
        Some(Commands::Tool { command }) => {
            let output = muninn::cli::run_passthrough(&command).await?;
            print!("{output}");
            Ok(())
        }
    }
}

fn resolve_path(path: Option<std::path::PathBuf>) -> Result<std::path::PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?),
    }
}
