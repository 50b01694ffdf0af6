//! System bootstrap: wires persistence, entity registries and collaborators
//!
//! Registries are created first and receive their factories afterwards, since
//! orders report to workflows and workflows place orders.

use std::sync::Arc;
use tracing::info;

use super::coordinator::SagaCoordinator;
use crate::adapters::{FailRule, SimulatedGateway, SimulatedWallet};
use crate::config::{AppConfig, JournalBackend, RuntimeConfig};
use crate::contracts::{GatewayCommand, WalletCommand};
use crate::error::{OrderflowError, Result};
use crate::order::{OrderCommand, OrderEntity};
use crate::persistence::{
    postgres, Persistence, PostgresJournal, PostgresSnapshotStore, SnapshotPolicy,
};
use crate::position::PositionLedger;
use crate::runtime::{EntityRef, EntityRegistry, EntityResolver};

/// Build the journal and snapshot store selected by configuration
pub async fn persistence_from_config(config: &AppConfig) -> Result<Persistence> {
    let policy = SnapshotPolicy {
        every: config.runtime.snapshot_every,
    };

    match config.journal.backend {
        JournalBackend::Memory => {
            info!(snapshot_every = policy.every, "Using in-memory journal");
            Ok(Persistence::in_memory(policy))
        }
        JournalBackend::Postgres => {
            let url = config.journal.url.as_deref().ok_or_else(|| {
                OrderflowError::Validation("journal.url is required for the postgres backend".into())
            })?;
            let pool = postgres::connect(url, config.journal.max_connections).await?;
            if config.journal.run_migrations {
                postgres::migrate(&pool).await?;
            }
            info!(
                max_connections = config.journal.max_connections,
                snapshot_every = policy.every,
                "Using PostgreSQL journal"
            );
            Ok(Persistence::new(
                Arc::new(PostgresJournal::new(pool.clone())),
                Arc::new(PostgresSnapshotStore::new(pool)),
                policy,
            ))
        }
    }
}

/// Running order system: the three entity registries and their collaborators
pub struct OrderSystem {
    pub persistence: Persistence,
    pub workflows: Arc<EntityRegistry<SagaCoordinator>>,
    pub orders: Arc<EntityRegistry<OrderEntity>>,
    pub positions: Arc<EntityRegistry<PositionLedger>>,
    pub gateway: EntityRef<GatewayCommand>,
    pub source_wallet: EntityRef<WalletCommand>,
    pub exchange_wallet: EntityRef<WalletCommand>,
}

impl OrderSystem {
    /// Start with the simulated wallets and gateway described by `config`
    pub fn start(config: &AppConfig, persistence: Persistence) -> Result<Self> {
        let sim = &config.simulator;
        let wallet_latency = std::time::Duration::from_millis(sim.wallet_latency_ms);

        let source_wallet = SimulatedWallet::new("source")
            .with_latency(wallet_latency)
            .fail_debits(FailRule::users(sim.failing_source_users.iter().cloned()))
            .spawn();
        let exchange_wallet = SimulatedWallet::new("exchange")
            .with_latency(wallet_latency)
            .fail_credits(FailRule::users(sim.failing_exchange_users.iter().cloned()))
            .spawn();

        Self::start_with(
            &config.runtime,
            persistence,
            source_wallet,
            exchange_wallet,
            |orders| SimulatedGateway::from_config(orders, sim).spawn(),
        )
    }

    /// Start with caller-supplied collaborators. The gateway is built from the
    /// order resolver so it can push fills.
    pub fn start_with<G>(
        runtime: &RuntimeConfig,
        persistence: Persistence,
        source_wallet: EntityRef<WalletCommand>,
        exchange_wallet: EntityRef<WalletCommand>,
        gateway: G,
    ) -> Result<Self>
    where
        G: FnOnce(Arc<dyn EntityResolver<OrderCommand>>) -> EntityRef<GatewayCommand>,
    {
        let workflows = EntityRegistry::<SagaCoordinator>::new(persistence.clone());
        let orders = EntityRegistry::<OrderEntity>::new(persistence.clone());
        let positions = EntityRegistry::<PositionLedger>::new(persistence.clone());

        let order_resolver: Arc<dyn EntityResolver<OrderCommand>> = orders.clone();
        let gateway = gateway(order_resolver);

        positions.init(Arc::new(|_: &str| PositionLedger::new()))?;

        {
            let gateway = gateway.clone();
            let positions = positions.clone();
            let workflows = workflows.clone();
            let fill_timeout = runtime.fill_timeout();
            orders.init(Arc::new(move |_: &str| {
                OrderEntity::new(
                    gateway.clone(),
                    positions.clone(),
                    workflows.clone(),
                    fill_timeout,
                )
            }))?;
        }

        {
            let source_wallet = source_wallet.clone();
            let exchange_wallet = exchange_wallet.clone();
            let orders = orders.clone();
            let positions = positions.clone();
            workflows.init(Arc::new(move |_: &str| {
                SagaCoordinator::new(
                    source_wallet.clone(),
                    exchange_wallet.clone(),
                    orders.clone(),
                    positions.clone(),
                )
            }))?;
        }

        info!(
            fill_timeout_ms = runtime.fill_timeout_ms,
            snapshot_every = persistence.policy.every,
            "Order system started"
        );

        Ok(Self {
            persistence,
            workflows,
            orders,
            positions,
            gateway,
            source_wallet,
            exchange_wallet,
        })
    }

    /// Stop every live entity. State stays in the journal.
    pub fn shutdown(&self) {
        self.workflows.passivate_all();
        self.orders.passivate_all();
        self.positions.passivate_all();
        info!("Order system stopped");
    }
}
