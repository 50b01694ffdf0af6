//! Event-sourced entities
//!
//! An entity is a single tokio task that owns one identity's state. It first
//! recovers from the journal, then drains its mailbox one command at a time.
//! Transient fields (timers, captured reply handles) live on the entity value
//! itself and are lost when the task stops; durable state lives in the
//! [`EventLog`].

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, Instrument};

use super::mailbox::{EntityRef, Envelope, Mailbox};
use crate::error::Result;
use crate::persistence::{EventLog, EventSourced, Persistence};

/// Handle to the running entity, passed to every command handler
pub struct EntityContext<C> {
    myself: EntityRef<C>,
}

impl<C: Send + 'static> EntityContext<C> {
    pub fn myself(&self) -> &EntityRef<C> {
        &self.myself
    }

    pub fn entity_id(&self) -> &str {
        self.myself.entity_id()
    }
}

#[async_trait]
pub trait Entity: Send + 'static {
    const ENTITY_TYPE: &'static str;

    type Command: Send + 'static;
    type State: EventSourced;

    /// Handle one command. An error means the command was dropped; state is
    /// unchanged unless an event was persisted before the error.
    async fn handle(
        &mut self,
        ctx: &EntityContext<Self::Command>,
        log: &mut EventLog<Self::State>,
        cmd: Self::Command,
    ) -> Result<()>;
}

/// Start an entity task. Commands sent before recovery completes are queued.
pub fn spawn_entity<E: Entity>(
    entity_id: &str,
    entity: E,
    persistence: Persistence,
) -> EntityRef<E::Command> {
    spawn_entity_after(entity_id, entity, persistence, None).0
}

/// Start an entity task that waits for `predecessor` (the previous instance of
/// the same identity) to finish before recovering. The returned handle
/// completes when this instance stops.
pub(crate) fn spawn_entity_after<E: Entity>(
    entity_id: &str,
    entity: E,
    persistence: Persistence,
    predecessor: Option<JoinHandle<()>>,
) -> (EntityRef<E::Command>, JoinHandle<()>) {
    let (myself, mailbox) = EntityRef::channel(E::ENTITY_TYPE, entity_id);
    let ctx = EntityContext {
        myself: myself.clone(),
    };
    let span = info_span!("entity", entity_type = E::ENTITY_TYPE, entity_id = %entity_id);

    let task = tokio::spawn(
        async move {
            if let Some(predecessor) = predecessor {
                debug!("Waiting for previous instance to drain");
                if let Err(e) = predecessor.await {
                    error!("Previous instance ended abnormally: {}", e);
                }
            }
            run_entity(entity, ctx, mailbox, persistence).await
        }
        .instrument(span),
    );
    (myself, task)
}

async fn run_entity<E: Entity>(
    mut entity: E,
    ctx: EntityContext<E::Command>,
    mut mailbox: Mailbox<E::Command>,
    persistence: Persistence,
) {
    let mut log =
        match EventLog::<E::State>::recover(E::ENTITY_TYPE, ctx.entity_id(), persistence).await {
            Ok(log) => log,
            Err(e) => {
                error!("Recovery failed, entity stays down: {}", e);
                return;
            }
        };

    while let Some(envelope) = mailbox.recv_envelope().await {
        match envelope {
            Envelope::Command(cmd) => {
                if let Err(e) = entity.handle(&ctx, &mut log, cmd).await {
                    error!("Command dropped: {}", e);
                }
            }
            Envelope::Stop => break,
        }
    }

    debug!("Stopped at seq {}", log.sequence_nr());
}
