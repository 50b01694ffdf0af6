//! Typed handles and reply targets
//!
//! Every entity and collaborator is reached through an [`EntityRef`], a cheap
//! clonable sender into its mailbox. Replies travel through [`Recipient`]s, which
//! may translate a reply into the receiving entity's own command vocabulary.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{OrderflowError, Result};

pub(crate) enum Envelope<C> {
    Command(C),
    Stop,
}

/// Handle to a mailbox accepting commands of type `C`
pub struct EntityRef<C> {
    entity_type: &'static str,
    entity_id: Arc<str>,
    tx: mpsc::UnboundedSender<Envelope<C>>,
}

impl<C> Clone for EntityRef<C> {
    fn clone(&self) -> Self {
        Self {
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<C> fmt::Debug for EntityRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({}/{})", self.entity_type, self.entity_id)
    }
}

/// Receiving side of a plain mailbox, for collaborators that are not entities
pub struct Mailbox<C> {
    rx: mpsc::UnboundedReceiver<Envelope<C>>,
}

impl<C> Mailbox<C> {
    /// Next command, or `None` once stopped or every handle is gone
    pub async fn recv(&mut self) -> Option<C> {
        match self.rx.recv().await {
            Some(Envelope::Command(cmd)) => Some(cmd),
            Some(Envelope::Stop) | None => None,
        }
    }

    pub(crate) fn try_recv(&mut self) -> Option<C> {
        match self.rx.try_recv() {
            Ok(Envelope::Command(cmd)) => Some(cmd),
            _ => None,
        }
    }

    pub(crate) async fn recv_envelope(&mut self) -> Option<Envelope<C>> {
        self.rx.recv().await
    }
}

impl<C: Send + 'static> EntityRef<C> {
    /// Create a mailbox and its first handle
    pub fn channel(entity_type: &'static str, entity_id: &str) -> (Self, Mailbox<C>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                entity_type,
                entity_id: Arc::from(entity_id),
                tx,
            },
            Mailbox { rx },
        )
    }

    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Whether the mailbox is still being drained
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Fire-and-forget. Returns false if the target has stopped.
    pub fn tell(&self, cmd: C) -> bool {
        let delivered = self.tx.send(Envelope::Command(cmd)).is_ok();
        if !delivered {
            debug!(
                "Dropped command for stopped {}/{}",
                self.entity_type, self.entity_id
            );
        }
        delivered
    }

    /// Request/response round trip bounded by `timeout`
    pub async fn ask<R, F>(&self, make: F, timeout: Duration) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(Recipient<R>) -> C,
    {
        let (tx, rx) = oneshot::channel();
        if !self.tell(make(Recipient::from_oneshot(tx))) {
            return Err(OrderflowError::EntityUnavailable(format!(
                "{}/{}",
                self.entity_type, self.entity_id
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(OrderflowError::EntityUnavailable(format!(
                "{}/{} dropped the reply",
                self.entity_type, self.entity_id
            ))),
            Err(_) => Err(OrderflowError::AskTimeout {
                target: format!("{}/{}", self.entity_type, self.entity_id),
                elapsed_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// A reply target that feeds messages of another vocabulary into this mailbox.
    /// Messages the translation maps to `None` are dropped.
    pub fn adapter<M, F>(&self, translate: F) -> Recipient<M>
    where
        M: Send + 'static,
        F: Fn(M) -> Option<C> + Send + Sync + 'static,
    {
        let target = self.clone();
        Recipient::new(move |msg| match translate(msg) {
            Some(cmd) => target.tell(cmd),
            None => true,
        })
    }

    pub fn recipient(&self) -> Recipient<C> {
        let target = self.clone();
        Recipient::new(move |cmd| target.tell(cmd))
    }

    pub(crate) fn stop(&self) {
        let _ = self.tx.send(Envelope::Stop);
    }
}

/// Type-erased, process-local reply handle. Never persisted.
pub struct Recipient<M> {
    deliver: Arc<dyn Fn(M) -> bool + Send + Sync>,
}

impl<M> Clone for Recipient<M> {
    fn clone(&self) -> Self {
        Self {
            deliver: self.deliver.clone(),
        }
    }
}

impl<M> fmt::Debug for Recipient<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Recipient")
    }
}

impl<M: Send + 'static> Recipient<M> {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(M) -> bool + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn from_channel(tx: mpsc::UnboundedSender<M>) -> Self {
        Self::new(move |msg| tx.send(msg).is_ok())
    }

    /// Single-use recipient; anything after the first message is dropped
    pub fn from_oneshot(tx: oneshot::Sender<M>) -> Self {
        let slot = Mutex::new(Some(tx));
        Self::new(move |msg| {
            let sender = match slot.lock() {
                Ok(mut guard) => guard.take(),
                Err(_) => None,
            };
            match sender {
                Some(tx) => tx.send(msg).is_ok(),
                None => false,
            }
        })
    }

    /// Deliver a message. Returns false if nobody is listening any more.
    pub fn tell(&self, msg: M) -> bool {
        (self.deliver)(msg)
    }
}
