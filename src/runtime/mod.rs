//! Entity runtime
//!
//! Per-identity serial processing on top of tokio:
//! - `mailbox`: typed handles (`EntityRef`) and reply targets (`Recipient`)
//! - `entity`: the `Entity` trait and the task that drives one instance
//! - `registry`: identity → live instance, with passivation
//! - `timer`: a single cancellable timer per entity
//! - `probe`: mailbox stand-in for tests

pub mod entity;
pub mod mailbox;
pub mod probe;
pub mod registry;
pub mod timer;

pub use entity::{spawn_entity, Entity, EntityContext};
pub use mailbox::{EntityRef, Mailbox, Recipient};
pub use probe::TestProbe;
pub use registry::{EntityFactory, EntityRegistry, EntityResolver, FixedResolver};
pub use timer::TimerSlot;
