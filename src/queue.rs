//! Deduplicating work queue with per-key exponential backoff.
//!
//! Items travel over an unbounded channel whose receiver the workers take turns on. An item is
//! held by at most one worker at a time. Adding it while it is being processed marks it dirty, and
//! it is sent again once the worker calls [`WorkQueue::done`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::resources::ObjectKey;

/// Per-key delay doubling with every consecutive failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    /// Delay before the retry following `failures` earlier failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

#[derive(Debug)]
struct QueueState<T> {
    /// Dropped on shutdown, which closes the channel.
    sender: Option<mpsc::UnboundedSender<T>>,
    /// Items sent or waiting for their worker to finish.
    dirty: BTreeSet<T>,
    processing: BTreeSet<T>,
    failures: BTreeMap<T, u32>,
}

#[derive(Debug)]
struct WorkQueueInner<T> {
    state: StdMutex<QueueState<T>>,
    receiver: Mutex<mpsc::UnboundedReceiver<T>>,
    backoff: Backoff,
}

#[derive(Debug)]
pub struct WorkQueue<T = ObjectKey> {
    inner: Arc<WorkQueueInner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Ord + Send + 'static> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

impl<T: Clone + Ord + Send + 'static> WorkQueue<T> {
    pub fn new(backoff: Backoff) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(WorkQueueInner {
                state: StdMutex::new(QueueState {
                    sender: Some(sender),
                    dirty: BTreeSet::new(),
                    processing: BTreeSet::new(),
                    failures: BTreeMap::new(),
                }),
                receiver: Mutex::new(receiver),
                backoff,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, item: T) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let sender = match &state.sender {
            Some(sender) => sender,
            None => return,
        };
        if !state.dirty.insert(item.clone()) || state.processing.contains(&item) {
            return;
        }
        // the receiver lives as long as the queue
        let _ = sender.send(item);
    }

    /// Enqueue the item once its backoff has passed, and count the failure.
    pub fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut state = self.lock();
            if state.sender.is_none() {
                return;
            }
            let failures = state.failures.entry(item.clone()).or_default();
            let delay = self.inner.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(item);
        });
    }

    /// Reset the failure count of the item.
    pub fn forget(&self, item: &T) {
        self.lock().failures.remove(item);
    }

    pub fn failures(&self, item: &T) -> u32 {
        self.lock().failures.get(item).copied().unwrap_or_default()
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<T> {
        let item = {
            let mut receiver = self.inner.receiver.lock().await;
            receiver.recv().await?
        };
        let mut state = self.lock();
        if state.sender.is_none() {
            return None;
        }
        state.dirty.remove(&item);
        state.processing.insert(item.clone());
        Some(item)
    }

    /// Release an item handed out by [`WorkQueue::next`].
    pub fn done(&self, item: &T) {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.processing.remove(item);
        if !state.dirty.contains(item) {
            return;
        }
        if let Some(sender) = &state.sender {
            let _ = sender.send(item.clone());
        }
    }

    /// Stop handing out items and wake every waiting worker.
    pub fn shut_down(&self) {
        self.lock().sender = None;
    }

    /// Number of items waiting to be handed out.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state
            .dirty
            .iter()
            .filter(|item| !state.processing.contains(*item))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(5));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(4), Duration::from_millis(80));
        assert_eq!(backoff.delay(30), Duration::from_secs(300));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn keys_are_deduplicated() {
        let queue = WorkQueue::default();
        queue.enqueue(key("a"));
        queue.enqueue(key("a"));
        queue.enqueue(key("b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next().await, Some(key("a")));
        assert_eq!(queue.next().await, Some(key("b")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn key_added_while_processing_comes_back_after_done() {
        let queue = WorkQueue::default();
        queue.enqueue(key("a"));
        let k = queue.next().await.unwrap();
        queue.enqueue(key("a"));
        // not handed out twice concurrently
        assert!(queue.is_empty());
        queue.done(&k);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some(key("a")));
        queue.done(&k);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn rate_limited_keys_count_failures_until_forgotten() {
        let queue = WorkQueue::new(Backoff {
            base: Duration::from_millis(1),
            max: Duration::from_millis(10),
        });
        queue.add_rate_limited(key("a"));
        assert_eq!(queue.failures(&key("a")), 1);
        let k = tokio::time::timeout(Duration::from_secs(5), queue.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(k, key("a"));
        queue.add_rate_limited(key("a"));
        assert_eq!(queue.failures(&key("a")), 2);
        queue.forget(&key("a"));
        assert_eq!(queue.failures(&key("a")), 0);
    }

    #[tokio::test]
    async fn items_are_handed_out_in_order() {
        let queue = WorkQueue::<u32>::default();
        for item in [3, 1, 2] {
            queue.enqueue(item);
        }
        assert_eq!(queue.next().await, Some(3));
        assert_eq!(queue.next().await, Some(1));
        assert_eq!(queue.next().await, Some(2));
    }

    #[tokio::test]
    async fn workers_never_hold_the_same_key_at_once() {
        let queue = WorkQueue::default();
        queue.enqueue(key("a"));
        queue.enqueue(key("b"));
        let first = queue.next().await.unwrap();
        queue.enqueue(first.clone());
        let second = tokio::time::timeout(Duration::from_secs(5), queue.next())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first, second);
        // the re-added key waits for its worker
        assert!(tokio::time::timeout(Duration::from_millis(20), queue.next())
            .await
            .is_err());
        queue.done(&first);
        assert_eq!(queue.next().await, Some(first));
    }

    #[tokio::test]
    async fn shut_down_wakes_waiting_workers() {
        let queue = WorkQueue::default();
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(worker.await.unwrap(), None);
        queue.enqueue(key("a"));
        assert!(queue.is_empty());
    }
}
