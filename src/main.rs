use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use beaconmind_assessment::{
    cli::{execute_command, Commands},
    config::{Config, LogFormat},
    langbase::LangbaseClient,
    oracle::PipeTable,
    server::{AppState, McpServer},
    storage::SqliteStorage,
};

/// Conversational assessment server.
#[derive(Parser, Debug)]
#[command(name = "beaconmind-assessment", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "BeaconMind assessment server starting..."
    );

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

    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    if command != Commands::Serve {
        let state = AppState::new(config, Arc::new(storage), Arc::new(langbase))?;
        let result = execute_command(command, &state).await;
        if result.exit_code == 0 {
            println!("{}", result.message);
        } else {
            eprintln!("{}", result.message);
        }
        std::process::exit(result.exit_code);
    }

    // Ensure required pipes exist (create if needed)
    info!("Ensuring assessment pipes exist...");
    let pipes = PipeTable::from_config(&config.pipes)?;
    for definition in pipes.definitions(&config.pipes.model) {
        let name = definition.name.clone();
        if let Err(e) = langbase.ensure_pipe(definition).await {
            error!(error = %e, pipe = %name, "Failed to ensure pipe exists");
            return Err(e.into());
        }
    }

    let state = Arc::new(AppState::new(config, Arc::new(storage), Arc::new(langbase))?);
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
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
