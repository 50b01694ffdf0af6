//! Identity → live entity routing

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::entity::{spawn_entity_after, Entity};
use super::mailbox::EntityRef;
use crate::error::{OrderflowError, Result};
use crate::persistence::Persistence;

/// Resolves an identity to a handle that accepts commands of type `C`
pub trait EntityResolver<C>: Send + Sync {
    fn resolve(&self, entity_id: &str) -> Result<EntityRef<C>>;
}

/// Builds a fresh entity value for an identity
pub type EntityFactory<E> = Arc<dyn Fn(&str) -> E + Send + Sync>;

struct LiveEntity<C> {
    entity: EntityRef<C>,
    task: Option<JoinHandle<()>>,
}

/// Keeps at most one running instance per identity, starting (and recovering)
/// instances on first use. A passivated instance finishes its queued commands
/// before its successor recovers.
pub struct EntityRegistry<E: Entity> {
    live: DashMap<String, LiveEntity<E::Command>>,
    /// Tasks of passivated instances that a successor has not yet waited on
    stopping: DashMap<String, JoinHandle<()>>,
    factory: OnceLock<EntityFactory<E>>,
    persistence: Persistence,
}

impl<E: Entity> EntityRegistry<E> {
    pub fn new(persistence: Persistence) -> Arc<Self> {
        Arc::new(Self {
            live: DashMap::new(),
            stopping: DashMap::new(),
            factory: OnceLock::new(),
            persistence,
        })
    }

    /// Install the factory. Done after construction so that registries whose
    /// entities reference each other can be wired in either order.
    pub fn init(&self, factory: EntityFactory<E>) -> Result<()> {
        self.factory.set(factory).map_err(|_| {
            OrderflowError::Internal(format!("{} registry already initialised", E::ENTITY_TYPE))
        })
    }

    fn start(&self, factory: &EntityFactory<E>, entity_id: &str) -> LiveEntity<E::Command> {
        debug!("Starting {}/{}", E::ENTITY_TYPE, entity_id);
        let predecessor = self.stopping.remove(entity_id).map(|(_, task)| task);
        let (entity, task) = spawn_entity_after(
            entity_id,
            factory(entity_id),
            self.persistence.clone(),
            predecessor,
        );
        LiveEntity {
            entity,
            task: Some(task),
        }
    }

    /// Stop the live instance (if any). Commands already queued are still
    /// handled; the next `resolve` recovers from the journal once they are.
    /// Transient state such as timers and reply handles is lost.
    pub fn passivate(&self, entity_id: &str) -> bool {
        self.stopping.retain(|_, task| !task.is_finished());
        match self.live.entry(entity_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                info!("Passivating {}/{}", E::ENTITY_TYPE, entity_id);
                occupied.get().entity.stop();
                // Recorded under the entry lock so a concurrent resolve waits on it
                if let Some(task) = occupied.get_mut().task.take() {
                    self.stopping.insert(entity_id.to_string(), task);
                }
                occupied.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Stop every live instance
    pub fn passivate_all(&self) {
        let ids: Vec<String> = self.live.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.passivate(&id);
        }
    }

    pub fn live_count(&self) -> usize {
        self.live
            .iter()
            .filter(|e| e.value().entity.is_alive())
            .count()
    }
}

impl<E: Entity> EntityResolver<E::Command> for EntityRegistry<E> {
    fn resolve(&self, entity_id: &str) -> Result<EntityRef<E::Command>> {
        if let Some(live) = self.live.get(entity_id) {
            if live.entity.is_alive() {
                return Ok(live.entity.clone());
            }
        }

        let factory = self.factory.get().ok_or_else(|| {
            OrderflowError::EntityUnavailable(format!(
                "{} registry not initialised",
                E::ENTITY_TYPE
            ))
        })?;

        let entity = match self.live.entry(entity_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().entity.is_alive() {
                    if let Some(task) = occupied.get_mut().task.take() {
                        self.stopping.insert(entity_id.to_string(), task);
                    }
                    occupied.insert(self.start(factory, entity_id));
                }
                occupied.get().entity.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(self.start(factory, entity_id))
                .entity
                .clone(),
        };
        Ok(entity)
    }
}

/// Resolves every identity to the same handle
pub struct FixedResolver<C> {
    target: EntityRef<C>,
}

impl<C> FixedResolver<C> {
    pub fn new(target: EntityRef<C>) -> Arc<Self> {
        Arc::new(Self { target })
    }
}

impl<C: Send + 'static> EntityResolver<C> for FixedResolver<C> {
    fn resolve(&self, _entity_id: &str) -> Result<EntityRef<C>> {
        Ok(self.target.clone())
    }
}
