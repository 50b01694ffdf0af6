use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use orderflow::config::{AppConfig, FillMode};
use orderflow::contracts::{GatewayCommand, WalletCommand};
use orderflow::coordinator::{OrderSystem, SagaCoordinator, WorkflowReply};
use orderflow::domain::{OrderOutcome, OrderRequest, OrderSide, SagaStep};
use orderflow::error::{OrderflowError, Result};
use orderflow::persistence::{
    EventJournal, EventMetadata, InMemoryJournal, InMemorySnapshotStore, Persistence,
    SnapshotPolicy, SnapshotStore, StoredEvent,
};
use orderflow::position::PositionCommand;
use orderflow::runtime::{Entity, EntityResolver, TestProbe};
use orderflow::services::WorkflowService;

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.runtime.fill_timeout_ms = 500;
    config.simulator.gateway_latency_ms = 0;
    config.simulator.wallet_latency_ms = 0;
    config
}

async fn fill_order(service: &WorkflowService, order_id: &str, user: &str) {
    let request = OrderRequest::market(order_id, user, "KXBTC", OrderSide::Buy, dec!(6));
    let mut sub = service.start_workflow(request).await.unwrap();
    match sub.next_update(Duration::from_secs(2)).await {
        Some(WorkflowReply::OrderResult(result)) => {
            assert_eq!(result.outcome, OrderOutcome::Filled)
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn passivated_entities_recover_from_the_journal() {
    let persistence = Persistence::in_memory(SnapshotPolicy::disabled());
    let system = Arc::new(OrderSystem::start(&config(), persistence).unwrap());
    let service = WorkflowService::new(system.clone(), Duration::from_secs(2));

    fill_order(&service, "rec-1", "alice").await;
    let before = service.workflow_state("rec-1").await.unwrap();

    system.shutdown();
    assert_eq!(system.workflows.live_count(), 0);
    assert_eq!(system.orders.live_count(), 0);
    assert_eq!(system.positions.live_count(), 0);

    let after = service.workflow_state("rec-1").await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.step, SagaStep::Completed);

    let status = service.get_status("rec-1").await.unwrap();
    assert_eq!(status.outcome, OrderOutcome::Filled);
    assert_eq!(status.filled_qty, dec!(6));
    assert_eq!(service.order_state("rec-1").await.unwrap().filled_qty, dec!(6));
    assert_eq!(service.position("alice", "KXBTC").await.unwrap(), dec!(6));
}

#[tokio::test]
async fn recovery_uses_snapshot_plus_tail() {
    let journal = Arc::new(InMemoryJournal::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let persistence = Persistence::new(
        journal.clone(),
        snapshots.clone(),
        SnapshotPolicy { every: 2 },
    );
    let system = Arc::new(OrderSystem::start(&config(), persistence).unwrap());
    let service = WorkflowService::new(system.clone(), Duration::from_secs(2));

    fill_order(&service, "rec-2", "bob").await;
    let before = service.workflow_state("rec-2").await.unwrap();

    let snapshot = snapshots
        .latest(SagaCoordinator::ENTITY_TYPE, "rec-2")
        .await
        .unwrap()
        .expect("saga snapshot");
    let total = journal
        .latest_sequence(SagaCoordinator::ENTITY_TYPE, "rec-2")
        .await
        .unwrap();
    assert!(snapshot.sequence_nr > 0 && snapshot.sequence_nr <= total);

    system.shutdown();
    assert_eq!(service.workflow_state("rec-2").await.unwrap(), before);
    assert_eq!(service.position("bob", "KXBTC").await.unwrap(), dec!(6));
}

#[tokio::test]
async fn second_fill_after_recovery_continues_the_stream() {
    let persistence = Persistence::in_memory(SnapshotPolicy::disabled());
    let system = Arc::new(OrderSystem::start(&config(), persistence).unwrap());
    let service = WorkflowService::new(system.clone(), Duration::from_secs(2));

    fill_order(&service, "rec-3", "carol").await;
    system.shutdown();
    fill_order(&service, "rec-4", "carol").await;

    // The ledger stream was recovered, not restarted
    assert_eq!(service.position("carol", "KXBTC").await.unwrap(), dec!(12));
}

/// Journal that refuses writes to workflow streams
struct ReadOnlyWorkflows {
    inner: InMemoryJournal,
}

#[async_trait]
impl EventJournal for ReadOnlyWorkflows {
    async fn append(
        &self,
        entity_type: &str,
        entity_id: &str,
        expected_sequence: i64,
        event_type: &str,
        payload: serde_json::Value,
        metadata: Option<EventMetadata>,
    ) -> Result<i64> {
        if entity_type == SagaCoordinator::ENTITY_TYPE {
            return Err(OrderflowError::Internal("journal unavailable".to_string()));
        }
        self.inner
            .append(
                entity_type,
                entity_id,
                expected_sequence,
                event_type,
                payload,
                metadata,
            )
            .await
    }

    async fn load(
        &self,
        entity_type: &str,
        entity_id: &str,
        after_sequence: i64,
    ) -> Result<Vec<StoredEvent>> {
        self.inner.load(entity_type, entity_id, after_sequence).await
    }

    async fn latest_sequence(&self, entity_type: &str, entity_id: &str) -> Result<i64> {
        self.inner.latest_sequence(entity_type, entity_id).await
    }
}

#[tokio::test]
async fn failed_journal_write_has_no_side_effects() {
    let persistence = Persistence::new(
        Arc::new(ReadOnlyWorkflows {
            inner: InMemoryJournal::new(),
        }),
        Arc::new(InMemorySnapshotStore::new()),
        SnapshotPolicy::disabled(),
    );
    let mut source = TestProbe::<WalletCommand>::new("source");
    let mut exchange = TestProbe::<WalletCommand>::new("exchange");
    let mut gateway = TestProbe::<GatewayCommand>::new("gateway");
    let gateway_ref = gateway.entity_ref();

    let system = Arc::new(
        OrderSystem::start_with(
            &config().runtime,
            persistence,
            source.entity_ref(),
            exchange.entity_ref(),
            move |_| gateway_ref,
        )
        .unwrap(),
    );
    let service = WorkflowService::new(system, Duration::from_millis(200));

    let request = OrderRequest::market("rec-5", "dave", "KXBTC", OrderSide::Buy, dec!(1));
    assert!(matches!(
        service.start_workflow(request).await,
        Err(OrderflowError::AskTimeout { .. }) | Err(OrderflowError::EntityUnavailable(_))
    ));

    source.expect_no_message(Duration::from_millis(100)).await;
    exchange.expect_no_message(Duration::from_millis(10)).await;
    gateway.expect_no_message(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn unfilled_order_survives_restart_and_can_be_cancelled() {
    let mut config = config();
    config.simulator.fill_mode = FillMode::None;
    config.runtime.fill_timeout_ms = 100;
    let persistence = Persistence::in_memory(SnapshotPolicy::disabled());
    let system = Arc::new(OrderSystem::start(&config, persistence).unwrap());
    let service = WorkflowService::new(system.clone(), Duration::from_secs(2));

    let request = OrderRequest::market("rec-6", "erin", "KXBTC", OrderSide::Buy, dec!(3));
    let mut sub = service.start_workflow(request).await.unwrap();
    match sub.next_update(Duration::from_secs(2)).await {
        Some(WorkflowReply::OrderResult(result)) => assert!(result.is_timeout),
        other => panic!("unexpected {:?}", other),
    }

    system.shutdown();
    service.cancel_order("rec-6", Some("user request".to_string())).await.unwrap();

    let mut outcome = OrderOutcome::NotFilled;
    for _ in 0..40 {
        outcome = service.get_status("rec-6").await.unwrap().outcome;
        if outcome == OrderOutcome::Cancelled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(outcome, OrderOutcome::Cancelled);
}

fn buy_one() -> PositionCommand {
    PositionCommand::UpdatePosition {
        symbol: "KXBTC".to_string(),
        quantity: dec!(1),
        side: OrderSide::Buy,
        reply_to: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn updates_queued_before_passivation_are_not_lost() {
    let persistence = Persistence::in_memory(SnapshotPolicy { every: 100 });
    let system = Arc::new(OrderSystem::start(&config(), persistence).unwrap());
    let service = WorkflowService::new(system.clone(), Duration::from_secs(5));

    let ledger = system.positions.resolve("frank").unwrap();
    for _ in 0..500 {
        ledger.tell(buy_one());
    }
    system.positions.passivate("frank");

    let successor = system.positions.resolve("frank").unwrap();
    for _ in 0..20 {
        successor.tell(buy_one());
    }
    assert_eq!(service.position("frank", "KXBTC").await.unwrap(), dec!(520));
}
