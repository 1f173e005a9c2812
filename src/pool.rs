//! Bounded pool of tokio tasks for running lookup queries.
//!
//! Submitted tasks queue without limit and run at most [`WorkerPool::capacity`]
//! at a time. Capacity starts at the core size and grows by one slot per
//! submission while queued tasks outnumber free slots, up to the configured
//! maximum. When a task finishes with nothing left queued, its slot is handed
//! back at once and one slot above the core size is retired after
//! [`IDLE_GRACE`], provided the pool is still idle by then. A burst that
//! follows shortly after reuses the grown capacity instead of regrowing it.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;

/// How long a grown slot stays available after the backlog drains.
pub const IDLE_GRACE: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct WorkerPool {
    tasks: JoinSet<()>,
    permits: Arc<Semaphore>,
    core: usize,
    max: usize,
    capacity: Arc<AtomicUsize>,
    /// Submitted tasks still waiting for a slot.
    backlog: Arc<AtomicUsize>,
    idle_grace: Duration,
}

impl WorkerPool {
    /// Create a pool running `core` tasks at once, growable to `max`.
    pub fn new(core: usize, max: usize) -> Self {
        let core = core.max(1);
        let max = max.max(core);
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(core)),
            core,
            max,
            capacity: Arc::new(AtomicUsize::new(core)),
            backlog: Arc::new(AtomicUsize::new(0)),
            idle_grace: IDLE_GRACE,
        }
    }

    /// Override how long grown slots outlive the backlog.
    pub fn with_idle_grace(mut self, idle_grace: Duration) -> Self {
        self.idle_grace = idle_grace;
        self
    }

    /// Queue a task. It starts as soon as a slot is free.
    pub fn submit<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        while self.tasks.try_join_next().is_some() {}

        let queued = self.backlog.fetch_add(1, Ordering::AcqRel) + 1;
        if queued > self.permits.available_permits() {
            self.grow();
        }

        let permits = self.permits.clone();
        let backlog = self.backlog.clone();
        let capacity = self.capacity.clone();
        let core = self.core;
        let idle_grace = self.idle_grace;
        self.tasks.spawn(async move {
            let acquired = permits.clone().acquire_owned().await;
            backlog.fetch_sub(1, Ordering::AcqRel);
            let Ok(permit) = acquired else {
                return;
            };

            task.await;
            drop(permit);

            if backlog.load(Ordering::Acquire) > 0 || capacity.load(Ordering::Acquire) <= core {
                return;
            }
            time::sleep(idle_grace).await;
            if backlog.load(Ordering::Acquire) > 0 {
                return;
            }
            // Only a free slot is retired; running tasks keep theirs.
            let Ok(idle) = permits.try_acquire_owned() else {
                return;
            };
            if capacity
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |slots| {
                    (slots > core).then(|| slots - 1)
                })
                .is_ok()
            {
                idle.forget();
            }
        });
    }

    fn grow(&self) {
        let max = self.max;
        let grown = self
            .capacity
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |slots| {
                (slots < max).then(|| slots + 1)
            })
            .is_ok();
        if grown {
            self.permits.add_permits(1);
        }
    }

    /// Number of tasks allowed to run at once right now.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Number of tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity().saturating_sub(self.permits.available_permits())
    }

    /// Number of submitted tasks still waiting for a slot.
    pub fn queued(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    pub fn max_capacity(&self) -> usize {
        self.max
    }

    /// Wait for every submitted task to finish, idle grace periods included.
    pub async fn join_all(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// Abort every queued and running task.
    ///
    /// Aborted tasks are dropped at their next suspension point; anything they
    /// would have produced is discarded.
    pub fn shutdown_now(&mut self) {
        self.tasks.abort_all();
    }
}
