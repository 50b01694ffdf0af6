use std::fmt::Debug;
use std::time::Duration;

use super::mailbox::{EntityRef, Mailbox};

/// Stand-in mailbox for asserting what a component sends to a collaborator.
///
/// Intended for tests; the expectation helpers panic on mismatch.
pub struct TestProbe<C> {
    target: EntityRef<C>,
    mailbox: Mailbox<C>,
}

impl<C: Send + Debug + 'static> TestProbe<C> {
    pub fn new(name: &'static str) -> Self {
        let (target, mailbox) = EntityRef::channel(name, name);
        Self { target, mailbox }
    }

    /// Handle that delivers into this probe
    pub fn entity_ref(&self) -> EntityRef<C> {
        self.target.clone()
    }

    pub async fn expect_message(&mut self, within: Duration) -> C {
        match tokio::time::timeout(within, self.mailbox.recv()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => panic!("{}: mailbox closed", self.target.entity_id()),
            Err(_) => panic!(
                "{}: no message within {:?}",
                self.target.entity_id(),
                within
            ),
        }
    }

    pub async fn expect_no_message(&mut self, within: Duration) {
        if let Ok(Some(msg)) = tokio::time::timeout(within, self.mailbox.recv()).await {
            panic!("{}: unexpected message {:?}", self.target.entity_id(), msg);
        }
    }

    pub fn try_next(&mut self) -> Option<C> {
        self.mailbox.try_recv()
    }
}
