//! Bounded work queue between the watcher and the worker pool.
//!
//! The queue holds items the registry already recorded as Queued. It also
//! tracks which identities are currently in flight (queued or being worked
//! on) so that reconciliation never pushes the same item twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::domain::{ItemIdentity, WorkItem};

/// Errors that can occur with the work queue
#[derive(Debug, Error)]
pub enum WorkQueueError {
    #[error("Work queue is closed")]
    Closed,
}

/// Shared FIFO of work items.
///
/// Cloning is cheap; all clones refer to the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    tracked: Arc<StdMutex<HashSet<ItemIdentity>>>,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` waiting items
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            tracked: Arc::new(StdMutex::new(HashSet::new())),
            capacity,
        }
    }

    /// Push an item, waiting while the queue is full.
    ///
    /// Returns `Ok(false)` without pushing when the identity is already in
    /// flight.
    pub async fn push(&self, item: WorkItem) -> Result<bool, WorkQueueError> {
        let identity = item.identity.clone();
        if self.is_tracked(&identity) {
            return Ok(false);
        }

        if self.tx.capacity() == 0 {
            tracing::info!(
                identity = %identity,
                capacity = self.capacity,
                "Work queue full, pausing discovery"
            );
        }

        // Track only once a slot is held, so a cancelled push leaves nothing behind
        let permit = self.tx.reserve().await.map_err(|_| WorkQueueError::Closed)?;
        if !self.track(&identity) {
            return Ok(false);
        }
        permit.send(item);

        tracing::debug!(identity = %identity, pending = self.pending(), "Item queued");
        Ok(true)
    }

    /// Wait for the next item. Workers share one receiver.
    pub async fn pop(&self) -> Option<WorkItem> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Release an identity once its pipeline run ended
    pub fn finish(&self, identity: &ItemIdentity) {
        if let Ok(mut tracked) = self.tracked.lock() {
            tracked.remove(identity);
        }
    }

    /// Whether an identity is queued or being processed
    pub fn is_tracked(&self, identity: &ItemIdentity) -> bool {
        self.tracked
            .lock()
            .map(|tracked| tracked.contains(identity))
            .unwrap_or(false)
    }

    /// Items waiting in the channel
    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Identities queued or being processed
    pub fn in_flight(&self) -> usize {
        self.tracked.lock().map(|tracked| tracked.len()).unwrap_or(0)
    }

    fn track(&self, identity: &ItemIdentity) -> bool {
        match self.tracked.lock() {
            Ok(mut tracked) => tracked.insert(identity.clone()),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BackendKind, Fingerprint, StorageLocation};
    use std::time::Duration;

    fn item(id: &str) -> WorkItem {
        WorkItem::discovered(
            ItemIdentity::new(id),
            Fingerprint::sha256(id),
            StorageLocation::new(BackendKind::Local, format!("/in/{}.mp4", id)),
            format!("{}.mp4", id),
            1,
        )
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new(4);
        queue.push(item("a")).await.unwrap();
        queue.push(item("b")).await.unwrap();

        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.pop().await.unwrap().identity.as_str(), "a");
        assert_eq!(queue.pop().await.unwrap().identity.as_str(), "b");
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_tracked_identity_is_not_pushed_twice() {
        let queue = WorkQueue::new(4);

        assert!(queue.push(item("a")).await.unwrap());
        assert!(!queue.push(item("a")).await.unwrap());
        assert_eq!(queue.pending(), 1);

        let popped = queue.pop().await.unwrap();
        // Still tracked while a worker holds it
        assert!(queue.is_tracked(&popped.identity));
        assert!(!queue.push(item("a")).await.unwrap());

        queue.finish(&popped.identity);
        assert!(queue.push(item("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer() {
        let queue = WorkQueue::new(1);
        queue.push(item("a")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), queue.push(item("b"))).await;
        assert!(blocked.is_err(), "push should wait while the queue is full");

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(item("c")).await })
        };
        assert_eq!(queue.pop().await.unwrap().identity.as_str(), "a");
        assert!(producer.await.unwrap().unwrap());
        assert_eq!(queue.pop().await.unwrap().identity.as_str(), "c");
    }
}
