//! Single-flight render queue.
//!
//! Captures mutate the shared render target (content repair, geometry lock),
//! so they must not overlap. [`RenderQueue`] is an explicit two-state
//! machine: while `Busy`, new submissions wait in a FIFO list; when a job
//! finishes (success, failure or cancellation) its slot is handed straight
//! to the oldest waiter, or the queue goes back to `Idle`.
//!
//! A submission takes its place in line when [`RenderQueue::submit`] is
//! *called*, not when the returned future is first polled, so the start
//! order is exactly the call order.
//!
//! # Example
//!
//! ```rust
//! use share_image::queue::RenderQueue;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = RenderQueue::new(1);
//! let first = queue.submit(|| async { 1 });
//! let second = queue.submit(|| async { 2 });
//! assert_eq!(futures::join!(first, second), (1, 2));
//! # }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;

/// Observable queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
    Idle,
    Busy,
}

#[derive(Debug, Default)]
struct QueueState {
    running: usize,
    waiters: VecDeque<oneshot::Sender<Permit>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    max_concurrent: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A running slot. Dropping it passes the slot on.
#[derive(Debug)]
struct Permit {
    shared: Arc<Shared>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let next = {
            let mut state = self.shared.lock();
            match state.waiters.pop_front() {
                Some(tx) => tx,
                None => {
                    state.running -= 1;
                    debug!("Render queue idle");
                    return;
                }
            }
        };
        // The slot moves to the waiter without `running` changing. If the
        // waiter is gone, the returned permit is dropped here and the slot
        // moves on to the next one.
        let _ = next.send(Permit {
            shared: Arc::clone(&self.shared),
        });
    }
}

enum Ticket {
    Ready(Permit),
    Waiting(oneshot::Receiver<Permit>),
}

/// FIFO, bounded-concurrency executor for capture jobs.
///
/// Cheap to clone; clones share the same line.
#[derive(Debug, Clone)]
pub struct RenderQueue {
    shared: Arc<Shared>,
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RenderQueue {
    /// A queue admitting `max_concurrent` jobs at once (at least 1).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                max_concurrent: max_concurrent.max(1),
            }),
        }
    }

    pub fn phase(&self) -> QueuePhase {
        if self.shared.lock().running == 0 {
            QueuePhase::Idle
        } else {
            QueuePhase::Busy
        }
    }

    /// Submissions waiting for a slot.
    pub fn pending(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    fn enqueue(&self) -> Ticket {
        let mut state = self.shared.lock();
        if state.running < self.shared.max_concurrent && state.waiters.is_empty() {
            state.running += 1;
            debug!("Render queue admitted job immediately");
            Ticket::Ready(Permit {
                shared: Arc::clone(&self.shared),
            })
        } else {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!("Render queue busy, job waiting ({} in line)", state.waiters.len());
            Ticket::Waiting(rx)
        }
    }

    async fn wait(&self, mut ticket: Ticket) -> Permit {
        loop {
            match ticket {
                Ticket::Ready(permit) => return permit,
                Ticket::Waiting(rx) => match rx.await {
                    Ok(permit) => return permit,
                    // Sender vanished without handing over; take a new place.
                    Err(_) => ticket = self.enqueue(),
                },
            }
        }
    }

    /// Run `job` once every earlier submission has started and a slot is
    /// free. The returned future resolves with `job`'s own output only.
    ///
    /// Dropping the returned future before it runs gives up its place;
    /// dropping it mid-run frees its slot.
    pub fn submit<'a, F, Fut, T>(&self, job: F) -> impl Future<Output = T> + Send + 'a
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = T> + Send + 'a,
        T: Send + 'a,
    {
        let ticket = self.enqueue();
        let queue = self.clone();
        async move {
            let _permit = queue.wait(ticket).await;
            job().await
        }
    }
}
