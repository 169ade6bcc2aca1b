use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_concept_scaffolding::{
    cli::{self, Cli, Command},
    config::{Config, LogFormat},
    llm::generator_from_config,
    server::{AppState, McpServer},
    storage::SqliteStorage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = Cli::parse().command();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    if !command.needs_storage() {
        finish(cli::execute_analysis(&command));
    }

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    if command != Command::Serve {
        finish(cli::execute_records(&command, &storage).await);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Configuration loaded"
    );

    let reference = match &config.expert_map_path {
        Some(path) => match cli::load_expert_map(path) {
            Ok(reference) => {
                info!(
                    path = %path.display(),
                    concepts = reference.map().concept_count(),
                    relationships = reference.map().relationship_count(),
                    "Reference map loaded"
                );
                Some(reference)
            }
            Err(e) => {
                error!(error = %e, "Failed to load reference map");
                return Err(e.into());
            }
        },
        None => {
            info!("No reference map configured, coverage is reported per session only");
            None
        }
    };

    let generator = generator_from_config(&config.llm, config.request.clone());

    // Create application state
    let state = Arc::new(AppState::new(config, Arc::new(storage), generator, reference));

    // Start MCP server
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Print a command result and exit with its code.
fn finish(result: cli::CliResult) -> ! {
    if result.exit_code == 0 {
        println!("{}", result.message);
    } else {
        eprintln!("{}", result.message);
    }
    std::process::exit(result.exit_code)
}

/// Initialize tracing/logging. Output goes to stderr; stdout carries the protocol.
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
