use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::mailbox::EntityRef;

struct ArmedTimer {
    id: u64,
    handle: JoinHandle<()>,
}

/// A single cancellable timer that delivers a command to its owner.
///
/// Arming replaces any outstanding timer. Each arming gets a fresh id which the
/// delivered command carries, so a firing that raced with a cancellation can be
/// recognised and discarded with [`TimerSlot::take_if_current`].
#[derive(Default)]
pub struct TimerSlot {
    current: Option<ArmedTimer>,
    next_id: u64,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<C, F>(&mut self, owner: &EntityRef<C>, after: Duration, make: F) -> u64
    where
        C: Send + 'static,
        F: FnOnce(u64) -> C + Send + 'static,
    {
        self.cancel();
        self.next_id += 1;
        let id = self.next_id;
        let owner = owner.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            owner.tell(make(id));
        });
        self.current = Some(ArmedTimer { id, handle });
        debug!("Timer {} armed for {:?}", id, after);
        id
    }

    /// Cancel the outstanding timer. Returns false if none was armed.
    pub fn cancel(&mut self) -> bool {
        match self.current.take() {
            Some(timer) => {
                timer.handle.abort();
                debug!("Timer {} cancelled", timer.id);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current.is_some()
    }

    /// Consume a firing. True only if `id` is the outstanding timer.
    pub fn take_if_current(&mut self, id: u64) -> bool {
        match &self.current {
            Some(timer) if timer.id == id => {
                self.current = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fires_once_with_its_id() {
        let (owner, mut mailbox) = EntityRef::<u64>::channel("Test", "t-1");
        let mut slot = TimerSlot::new();

        let id = slot.arm(&owner, Duration::from_millis(10), |id| id);
        assert!(slot.is_armed());

        let fired = mailbox.recv().await.unwrap();
        assert_eq!(fired, id);
        assert!(slot.take_if_current(fired));
        assert!(!slot.is_armed());
        assert!(!slot.take_if_current(fired));
    }

    #[tokio::test]
    async fn test_rearm_supersedes_previous_timer() {
        let (owner, mut mailbox) = EntityRef::<u64>::channel("Test", "t-1");
        let mut slot = TimerSlot::new();

        let first = slot.arm(&owner, Duration::from_millis(20), |id| id);
        let second = slot.arm(&owner, Duration::from_millis(20), |id| id);
        assert_ne!(first, second);

        let fired = mailbox.recv().await.unwrap();
        assert_eq!(fired, second);
        assert!(!slot.take_if_current(first));
    }

    #[tokio::test]
    async fn test_cancel_prevents_delivery() {
        let (owner, mut mailbox) = EntityRef::<u64>::channel("Test", "t-1");
        let mut slot = TimerSlot::new();

        slot.arm(&owner, Duration::from_millis(10), |id| id);
        assert!(slot.cancel());
        assert!(!slot.cancel());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(mailbox.try_recv().is_none());
    }
}
