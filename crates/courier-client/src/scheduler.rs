//! Deferred work on the client's single thread.
//!
//! Coalesced event flushes, retry timers and network completions all run as
//! `spawn_local` tasks, so a [`Client`](crate::Client) must be driven from
//! inside a [`tokio::task::LocalSet`]. Tasks are tracked by [`TaskHandle`] so
//! timers can be cancelled.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

#[derive(Default)]
struct SchedulerInner {
    next: Cell<u64>,
    tasks: RefCell<HashMap<TaskHandle, JoinHandle<()>>>,
}

impl SchedulerInner {
    fn finish(weak: &Weak<SchedulerInner>, handle: TaskHandle) {
        if let Some(inner) = weak.upgrade() {
            inner.tasks.borrow_mut().remove(&handle);
        }
    }
}

#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` on a later turn of the event loop.
    pub fn defer(&self, task: impl FnOnce() + 'static) -> TaskHandle {
        self.spawn(async move { task() })
    }

    /// Run `task` once `delay` has elapsed.
    pub fn after(&self, delay: Duration, task: impl FnOnce() + 'static) -> TaskHandle {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            task()
        })
    }

    /// Run `task` every `period` until it returns `false` or is cancelled.
    pub fn every(&self, period: Duration, task: impl Fn() -> bool + 'static) -> TaskHandle {
        self.spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if !task() {
                    break;
                }
            }
        })
    }

    /// Drive a future to completion on the local task set.
    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) -> TaskHandle {
        let handle = TaskHandle(self.inner.next.get());
        self.inner.next.set(handle.0 + 1);

        let weak = Rc::downgrade(&self.inner);
        let join = tokio::task::spawn_local(async move {
            fut.await;
            SchedulerInner::finish(&weak, handle);
        });
        self.inner.tasks.borrow_mut().insert(handle, join);
        handle
    }

    /// Cancel a task that has not completed yet.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        match self.inner.tasks.borrow_mut().remove(&handle) {
            Some(join) => {
                join.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.inner.tasks.borrow().contains_key(&handle)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_defer_runs_later() {
        LocalSet::new()
            .run_until(async {
                let scheduler = Scheduler::new();
                let hits = Rc::new(Cell::new(0));
                let h = hits.clone();
                scheduler.defer(move || h.set(h.get() + 1));
                assert_eq!(hits.get(), 0);

                tokio::time::sleep(Duration::from_millis(1)).await;
                assert_eq!(hits.get(), 1);
                assert_eq!(scheduler.pending_count(), 0);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_cancel_timer() {
        LocalSet::new()
            .run_until(async {
                let scheduler = Scheduler::new();
                let hits = Rc::new(Cell::new(0));
                let h = hits.clone();
                let handle = scheduler.after(Duration::from_secs(1), move || h.set(1));
                assert!(scheduler.is_pending(handle));
                assert!(scheduler.cancel(handle));

                tokio::time::sleep(Duration::from_secs(2)).await;
                assert_eq!(hits.get(), 0);
                assert!(!scheduler.cancel(handle));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_every_stops_when_task_returns_false() {
        LocalSet::new()
            .run_until(async {
                let scheduler = Scheduler::new();
                let hits = Rc::new(Cell::new(0));
                let h = hits.clone();
                scheduler.every(Duration::from_millis(10), move || {
                    h.set(h.get() + 1);
                    h.get() < 3
                });

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(hits.get(), 3);
                assert_eq!(scheduler.pending_count(), 0);
            })
            .await;
    }
}
