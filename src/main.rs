use anyhow::{Context, Result};
use clap::Parser;
use orderflow::api::{create_router, AppState};
use orderflow::cli::{self, Cli, Commands};
use orderflow::config::AppConfig;
use orderflow::coordinator::{persistence_from_config, OrderSystem};
use orderflow::error::OrderflowError;
use orderflow::services::WorkflowService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple, shutdown_signal};

fn load_config(dir: &str) -> Result<AppConfig> {
    let config = AppConfig::load_from(dir)
        .with_context(|| format!("failed to load configuration from {}", dir))?;
    config
        .validate()
        .map_err(|errors| OrderflowError::Validation(errors.join("; ")))
        .context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config_dir)?;

    match cli.command {
        Some(Commands::Serve { port }) => {
            let _guard = init_logging(&config.logging);
            run_server(config, port).await?;
        }
        Some(Commands::Demo {
            user,
            symbol,
            side,
            quantity,
            price,
            order_id,
        }) => {
            init_logging_simple();
            cli::run_demo(&config, &user, &symbol, &side, quantity, price, order_id)
                .await
                .context("demo workflow failed")?;
        }
        Some(Commands::Events {
            entity_type,
            entity_id,
            correlated,
        }) => {
            init_logging_simple();
            cli::show_events(&config, &entity_type, &entity_id, correlated)
                .await
                .context("failed to read events")?;
        }
        Some(Commands::Migrate) => {
            let _guard = init_logging(&config.logging);
            cli::run_migrations(&config)
                .await
                .context("migration failed")?;
        }
        None => {
            let _guard = init_logging(&config.logging);
            run_server(config, None).await?;
        }
    }

    Ok(())
}

async fn run_server(config: AppConfig, port: Option<u16>) -> Result<()> {
    let persistence = persistence_from_config(&config)
        .await
        .context("failed to open the event journal")?;
    let system = Arc::new(OrderSystem::start(&config, persistence)?);
    let service = WorkflowService::new(system.clone(), config.runtime.ask_timeout());
    let state = AppState::new(
        service,
        Duration::from_millis(config.api.result_timeout_ms),
    );
    let app = create_router(state);

    let addr = format!("{}:{}", config.api.bind, port.unwrap_or(config.api.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Order API listening on {}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        warn!("Server exited with error: {}", e);
    }

    info!("Shutting down...");
    system.shutdown();
    Ok(())
}
