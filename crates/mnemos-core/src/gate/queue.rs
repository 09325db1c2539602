//! Per-conversation FIFO task queues.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};

use crate::error::MnemosResult;

/// A unit of queued work.
pub type QueuedTask = BoxFuture<'static, MnemosResult<()>>;

type Pending = HashMap<String, VecDeque<QueuedTask>>;

/// Runs tasks one at a time per key, in submission order. Different keys
/// drain concurrently on their own worker task.
///
/// A key is present in the map exactly while its worker is running.
#[derive(Clone, Default)]
pub struct ConversationQueue {
    pending: Arc<Mutex<Pending>>,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    // A poisoned map still holds valid queues; tasks never run under the lock.
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConversationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `task` to `key`'s queue, starting a worker if none is running.
    pub fn enqueue(&self, key: &str, task: QueuedTask) {
        let mut pending = lock(&self.pending);
        if let Some(queue) = pending.get_mut(key) {
            queue.push_back(task);
            return;
        }
        pending.insert(key.to_string(), VecDeque::from([task]));
        drop(pending);

        let pending = self.pending.clone();
        let key = key.to_string();
        tokio::spawn(async move { drain(pending, key).await });
    }

    /// Keys with a running worker.
    pub fn active_keys(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Queued tasks for `key` not yet started.
    pub fn queued(&self, key: &str) -> usize {
        lock(&self.pending).get(key).map(VecDeque::len).unwrap_or(0)
    }
}

async fn drain(pending: Arc<Mutex<Pending>>, key: String) {
    loop {
        let task = {
            let mut map = lock(&pending);
            match map.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(task) => task,
                None => {
                    map.remove(&key);
                    debug!(conversation_id = %key, "Queue drained");
                    return;
                }
            }
        };

        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(conversation_id = %key, error = %e, "Queued task failed"),
            Err(_) => error!(conversation_id = %key, "Queued task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MnemosError;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_in_order_without_overlap() {
        let queue = ConversationQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..5u64 {
            let tx = tx.clone();
            queue.enqueue(
                "c1",
                Box::pin(async move {
                    tx.send(format!("start {}", i)).unwrap();
                    tokio::time::sleep(Duration::from_millis(50 - i * 10)).await;
                    tx.send(format!("end {}", i)).unwrap();
                    Ok(())
                }),
            );
        }
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let expected: Vec<String> = (0..5)
            .flat_map(|i| [format!("start {}", i), format!("end {}", i)])
            .collect();
        assert_eq!(events, expected);
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_run_concurrently() {
        let queue = ConversationQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let slow = tx.clone();
        queue.enqueue(
            "slow",
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                slow.send("slow").unwrap();
                Ok(())
            }),
        );
        let fast = tx.clone();
        queue.enqueue(
            "fast",
            Box::pin(async move {
                fast.send("fast").unwrap();
                Ok(())
            }),
        );
        drop(tx);

        assert_eq!(rx.recv().await, Some("fast"));
        assert_eq!(rx.recv().await, Some("slow"));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_queue() {
        let queue = ConversationQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        queue.enqueue("c1", Box::pin(async { Err(MnemosError::llm("boom")) }));
        queue.enqueue("c1", Box::pin(async { panic!("handler bug") }));
        let done = tx.clone();
        queue.enqueue(
            "c1",
            Box::pin(async move {
                done.send(()).unwrap();
                Ok(())
            }),
        );
        drop(tx);

        assert_eq!(rx.recv().await, Some(()));
    }
}
