use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::coordinator::{persistence_from_config, OrderSystem, SagaCoordinator, WorkflowReply};
use crate::domain::{OrderOutcome, OrderRequest, OrderSide};
use crate::error::{OrderflowError, Result};
use crate::persistence::{postgres, EventJournal, PostgresJournal, StoredEvent};
use crate::runtime::Entity;
use crate::services::WorkflowService;

#[derive(Parser)]
#[command(name = "orderflow")]
#[command(version)]
#[command(about = "Order workflow orchestration: wallet transfers, exchange placement and fill tracking", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "ORDERFLOW_CONFIG_DIR")]
    pub config_dir: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API against the configured journal and simulators
    Serve {
        /// Override api.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one order workflow against the simulators and print what happened
    Demo {
        #[arg(long, default_value = "demo-user")]
        user: String,
        #[arg(long, default_value = "KXBTC-25DEC31-T100000")]
        symbol: String,
        #[arg(long, default_value = "buy", value_parser = ["buy", "sell"])]
        side: String,
        #[arg(long, default_value = "10")]
        quantity: Decimal,
        /// Limit price; market order when omitted
        #[arg(long)]
        price: Option<Decimal>,
        /// Order id (random when omitted)
        #[arg(long)]
        order_id: Option<String>,
    },
    /// Dump the journal of one entity (PostgreSQL journal only)
    Events {
        /// Entity type, e.g. OrderWorkflow, Order, PositionLedger
        entity_type: String,
        entity_id: String,
        /// Print every event correlated with ENTITY_ID instead
        #[arg(long)]
        correlated: bool,
    },
    /// Apply database migrations
    Migrate,
}

fn parse_side(side: &str) -> OrderSide {
    if side.eq_ignore_ascii_case("sell") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

fn print_event(event: &StoredEvent) {
    println!(
        "{:>4}  {}  {:<26} {}",
        event.sequence_nr,
        event.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
        event.event_type,
        event.payload
    );
}

fn print_reply(reply: &WorkflowReply) {
    match reply {
        WorkflowReply::WorkflowStarted { order_id } => {
            println!("  started     {}", order_id);
        }
        WorkflowReply::WorkflowFailed { order_id, reason } => {
            println!("  failed      {}  {}", order_id, reason);
        }
        WorkflowReply::OrderResult(result) => {
            println!(
                "  result      {}  {}  filled={}{}{}",
                result.order_id,
                result.outcome,
                result.filled_qty,
                if result.is_timeout { "  (timeout)" } else { "" },
                result
                    .reason
                    .as_deref()
                    .map(|r| format!("  {}", r))
                    .unwrap_or_default()
            );
        }
    }
}

fn is_final(reply: &WorkflowReply) -> bool {
    match reply {
        WorkflowReply::WorkflowStarted { .. } => false,
        WorkflowReply::WorkflowFailed { .. } => true,
        WorkflowReply::OrderResult(result) => result.outcome.is_final(),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_demo(
    config: &AppConfig,
    user: &str,
    symbol: &str,
    side: &str,
    quantity: Decimal,
    price: Option<Decimal>,
    order_id: Option<String>,
) -> Result<()> {
    let persistence = persistence_from_config(config).await?;
    let system = Arc::new(OrderSystem::start(config, persistence.clone())?);
    let service = WorkflowService::new(system.clone(), config.runtime.ask_timeout());

    let order_id = order_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let side = parse_side(side);
    let request = match price {
        Some(price) => OrderRequest::limit(&order_id, user, symbol, side, quantity, price),
        None => OrderRequest::market(&order_id, user, symbol, side, quantity),
    };

    println!(
        "Order {}: {} {} {} for {}",
        order_id, side, quantity, symbol, user
    );
    let mut subscription = service.start_workflow(request).await?;
    print_reply(&subscription.first);

    if subscription.started() {
        // Wait past the fill timeout so a timeout result is seen too
        let window = config.runtime.fill_timeout() + Duration::from_secs(2);
        while let Some(update) = subscription.next_update(window).await {
            print_reply(&update);
            if is_final(&update) {
                break;
            }
        }
    }

    // A rejected order is still being compensated when its result arrives
    let mut status = service.get_status(&order_id).await?;
    for _ in 0..20 {
        if status.outcome != OrderOutcome::Compensating {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        status = service.get_status(&order_id).await?;
    }
    println!("\nStatus: {} (filled {})", status.outcome, status.filled_qty);
    for (symbol, net) in service.positions(user).await? {
        println!("Position {}: {}", symbol, net);
    }

    println!("\nWorkflow journal:");
    for event in persistence
        .journal
        .load(SagaCoordinator::ENTITY_TYPE, &order_id, 0)
        .await?
    {
        print_event(&event);
    }

    system.shutdown();
    Ok(())
}

pub async fn show_events(
    config: &AppConfig,
    entity_type: &str,
    entity_id: &str,
    correlated: bool,
) -> Result<()> {
    let url = config.journal.url.as_deref().ok_or_else(|| {
        OrderflowError::Validation("journal.url must be set to read events".to_string())
    })?;
    let pool = postgres::connect(url, 1).await?;
    let journal = PostgresJournal::new(pool);

    let events = if correlated {
        journal.correlated_events(entity_id).await?
    } else {
        journal.load(entity_type, entity_id, 0).await?
    };

    if events.is_empty() {
        println!("No events for {}/{}", entity_type, entity_id);
        return Ok(());
    }
    for event in &events {
        if correlated {
            print!("{}/{}  ", event.entity_type, event.entity_id);
        }
        print_event(event);
    }
    println!("{} event(s)", events.len());
    Ok(())
}

pub async fn run_migrations(config: &AppConfig) -> Result<()> {
    let url = config.journal.url.as_deref().ok_or_else(|| {
        OrderflowError::Validation("journal.url must be set to run migrations".to_string())
    })?;
    let pool = postgres::connect(url, 1).await?;
    postgres::migrate(&pool).await?;
    println!("Migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderResult;

    #[test]
    fn test_parse_demo_args() {
        let cli = Cli::try_parse_from([
            "orderflow", "demo", "--side", "sell", "--quantity", "2.5", "--price", "0.4",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Demo {
                side,
                quantity,
                price,
                ..
            }) => {
                assert_eq!(parse_side(&side), OrderSide::Sell);
                assert_eq!(quantity, Decimal::new(25, 1));
                assert_eq!(price, Some(Decimal::new(4, 1)));
            }
            _ => panic!("expected demo"),
        }
        assert!(Cli::try_parse_from(["orderflow", "demo", "--side", "hold"]).is_err());
    }

    #[test]
    fn test_final_replies() {
        let partial = OrderResult::new("o-1", OrderOutcome::PartiallyFilled, Decimal::ONE);
        assert!(!is_final(&WorkflowReply::OrderResult(partial.clone().timed_out())));
        assert!(is_final(&WorkflowReply::OrderResult(OrderResult::new(
            "o-1",
            OrderOutcome::Filled,
            Decimal::ONE
        ))));
        assert!(!is_final(&WorkflowReply::WorkflowStarted {
            order_id: "o-1".to_string()
        }));
    }
}
