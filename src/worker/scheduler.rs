//! Cooperative scheduler.
//!
//! One thread per worker runs two loops that interleave only at explicit
//! yield points:
//!
//! - **poll step**: pick up finished offloads, then receive at most one
//!   frame from the transport, decode it and dispatch it. A bad frame is
//!   logged and dropped.
//! - **work step**: reap finished suspendable items, then pop the most
//!   recently submitted work item (LIFO) and run it. Synchronous items run
//!   inline with panics caught; suspendable items are spawned onto the
//!   worker's `LocalSet` and raced against its cancellation token. Outside
//!   [`Worker::start`] there is no `LocalSet`, so a suspendable item popped
//!   by a manual [`Worker::step`] is set aside and requeued when the worker
//!   is next started.
//!
//! Each step ends with a yield (or a short sleep when it was idle and the
//! worker has an idle backoff configured). The poll loop ends once the
//! worker is stopped; the work loop ends once it is stopped and the work
//! stack is empty. Frames still in flight at that point are not awaited.

use std::cell::Cell;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

use tokio::task::LocalSet;

use super::Worker;
use crate::error::{Result, TaskloafError};
use crate::protocol::Envelope;
use crate::task::WorkBody;

impl Worker {
    /// Run `entry` alongside the scheduler until the worker stops.
    ///
    /// Returns the entry's value once it has finished and the worker has
    /// shut down. If the worker stops first, the entry is dropped and
    /// [`TaskloafError::Cancelled`] is returned. If the entry fails, the
    /// scheduler is cancelled and the entry's error is returned.
    ///
    /// Must be awaited on a current-thread runtime. A worker is meant to be
    /// started once: shutdown cancels its token for good.
    pub async fn start<F, Fut, T>(&self, entry: F) -> Result<T>
    where
        F: FnOnce(Worker) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let local = LocalSet::new();
        let result = local.run_until(self.drive(entry)).await;
        self.finish();
        // Dropping the set drops aborted suspendable items and their handles.
        drop(local);
        result
    }

    /// Build a current-thread runtime, [`start`](Self::start) on it and
    /// shut the worker down as soon as `entry` resolves.
    ///
    /// Work still queued at that point is drained before `run` returns.
    /// The runtime's blocking pool is sized by
    /// [`WorkerConfig::max_blocking_threads`](super::WorkerConfig).
    pub fn run<F, Fut, T>(&self, entry: F) -> Result<T>
    where
        F: FnOnce(Worker) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(self.inner.config.max_blocking_threads.max(1))
            .build()?;
        runtime.block_on(self.start(|worker| async move {
            let result = entry(worker.clone()).await;
            worker.shutdown();
            result
        }))
    }

    /// Run one poll step and one work step without yielding.
    ///
    /// Returns whether either step did anything. Useful for driving several
    /// workers by hand from one thread.
    ///
    /// Suspendable work needs the `LocalSet` that [`start`](Self::start)
    /// provides. When stepped by hand it is logged and set aside, and runs
    /// once the worker is started.
    pub fn step(&self) -> bool {
        let polled = self.poll_step();
        let worked = self.work_step();
        polled || worked
    }

    async fn drive<F, Fut, T>(&self, entry: F) -> Result<T>
    where
        F: FnOnce(Worker) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        tracing::debug!(address = self.address(), "scheduler starting");
        let _driving = Driving::enter(&self.inner.driving);
        let deferred = mem::take(&mut *self.inner.deferred.borrow_mut());
        if !deferred.is_empty() {
            tracing::debug!(
                address = self.address(),
                count = deferred.len(),
                "requeueing deferred suspendable work"
            );
            self.inner.pending.borrow_mut().extend(deferred.into_iter().rev());
        }

        let entry = entry(self.clone());
        tokio::pin!(entry);
        let loops = async {
            tokio::join!(self.poll_loop(), self.work_loop());
        };
        tokio::pin!(loops);

        let mut finished: Option<T> = None;
        let result = loop {
            tokio::select! {
                biased;

                outcome = &mut entry, if finished.is_none() => match outcome {
                    Ok(value) => finished = Some(value),
                    Err(e) => {
                        tracing::error!(address = self.address(), error = %e, "entry failed");
                        break Err(e);
                    }
                },
                _ = &mut loops => break finished.take().ok_or(TaskloafError::Cancelled),
            }
        };

        tracing::debug!(address = self.address(), ok = result.is_ok(), "scheduler stopped");
        result
    }

    async fn poll_loop(&self) {
        while !self.is_stopped() {
            let busy = self.poll_step();
            self.pause(busy).await;
        }
    }

    async fn work_loop(&self) {
        while !(self.is_stopped() && self.pending_len() == 0) {
            let busy = self.work_step();
            self.pause(busy).await;
        }
    }

    async fn pause(&self, busy: bool) {
        let backoff = self.inner.config.idle_backoff;
        if busy || backoff.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(backoff).await;
        }
    }

    fn poll_step(&self) -> bool {
        let ready = self.inner.offload.drain();
        let offloaded = !ready.is_empty();
        for work in ready {
            self.submit(work);
        }

        let frame = self.inner.transport.borrow_mut().recv();
        let Some(frame) = frame else {
            return offloaded;
        };

        let protocol = &self.inner.protocol;
        let outcome = Envelope::decode(frame, protocol.max_payload_size())
            .and_then(|envelope| protocol.dispatch(self, &envelope));
        if let Err(e) = outcome {
            tracing::warn!(address = self.address(), error = %e, "dropping frame");
        }
        true
    }

    fn work_step(&self) -> bool {
        self.reap_spawned();

        let next = self.inner.pending.borrow_mut().pop();
        let Some(work) = next else {
            return false;
        };
        if work.is_suspendable() && !self.inner.driving.get() {
            tracing::warn!(
                address = self.address(),
                task = work.label(),
                "suspendable work needs a started worker; deferring"
            );
            self.inner.deferred.borrow_mut().push(work);
            return true;
        }
        let (label, body) = work.into_parts();

        match body {
            WorkBody::Sync(f) => {
                tracing::debug!(address = self.address(), task = %label, "running work");
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)))
                    .unwrap_or_else(|payload| Err(TaskloafError::from_panic(payload)));
                if let Err(e) = outcome {
                    tracing::error!(
                        address = self.address(),
                        task = %label,
                        error = %e,
                        "work item failed; discarding"
                    );
                }
            }
            WorkBody::Suspendable(f) => {
                tracing::debug!(address = self.address(), task = %label, "spawning work");
                let address = self.address();
                let token = self.inner.cancel.clone();
                let future = f(self.clone());
                self.inner.spawned.borrow_mut().spawn_local(async move {
                    tokio::select! {
                        outcome = future => {
                            if let Err(e) = outcome {
                                tracing::error!(address, task = %label, error = %e, "suspendable work failed");
                            }
                        }
                        () = token.cancelled() => {
                            tracing::debug!(address, task = %label, "suspendable work cancelled");
                        }
                    }
                });
            }
        }
        true
    }

    fn reap_spawned(&self) {
        loop {
            let next = {
                let mut spawned = self.inner.spawned.borrow_mut();
                if spawned.is_empty() {
                    return;
                }
                spawned.try_join_next()
            };
            match next {
                Some(Ok(())) => {}
                Some(Err(e)) if e.is_panic() => tracing::error!(
                    address = self.address(),
                    error = %TaskloafError::from_panic(e.into_panic()),
                    "suspendable work panicked"
                ),
                Some(Err(e)) => {
                    tracing::debug!(address = self.address(), error = %e, "suspendable work aborted")
                }
                None => return,
            }
        }
    }

    /// Cancel suspendable work and discard whatever is still queued.
    fn finish(&self) {
        self.inner.cancel.cancel();

        let mut spawned = mem::take(&mut *self.inner.spawned.borrow_mut());
        spawned.abort_all();
        drop(spawned);

        let discarded = mem::take(&mut *self.inner.pending.borrow_mut());
        if !discarded.is_empty() {
            tracing::debug!(
                address = self.address(),
                count = discarded.len(),
                "discarding pending work"
            );
        }
        drop(discarded);
    }
}

/// Marks a worker as driven by `start` while alive.
struct Driving<'a>(&'a Cell<bool>);

impl<'a> Driving<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for Driving<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;
    use crate::task::{RemoteTask, Shutdown, Work};
    use crate::transport::NullTransport;

    fn worker() -> Worker {
        Worker::builder(NullTransport::new()).build()
    }

    #[test]
    fn test_step_runs_lifo() {
        let worker = worker();
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            worker.submit(Work::sync(format!("item-{}", i), move |_| {
                order.borrow_mut().push(i);
                Ok(())
            }));
        }
        while worker.step() {}

        assert_eq!(*order.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn test_failing_item_is_isolated() {
        let worker = worker();
        let ran = Rc::new(RefCell::new(false));

        let ran_clone = ran.clone();
        worker.submit(Work::sync("after", move |_| {
            *ran_clone.borrow_mut() = true;
            Ok(())
        }));
        worker.submit(Work::sync("fails", |_| Err(TaskloafError::task("nope"))));
        worker.submit(Work::sync("panics", |_| panic!("boom")));

        while worker.step() {}
        assert!(*ran.borrow());
        assert_eq!(worker.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_start_returns_after_shutdown() {
        let worker = worker();
        let value = worker
            .start(|w| async move {
                w.submit_work(w.address(), Shutdown)?;
                Ok::<_, TaskloafError>(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(worker.is_stopped());
        assert_eq!(worker.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_entry_error_propagates() {
        let worker = worker();
        let token = worker.cancellation();
        let started = Rc::new(Cell::new(false));
        let completed = Rc::new(Cell::new(false));

        let (s, c) = (started.clone(), completed.clone());
        let result: Result<()> = worker
            .start(move |w| async move {
                let (s_inner, c_inner) = (s.clone(), c);
                w.submit(Work::suspendable("slow", move |_| async move {
                    s_inner.set(true);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    c_inner.set(true);
                    Ok(())
                }));
                while !s.get() {
                    tokio::task::yield_now().await;
                }
                Err(TaskloafError::task("entry broke"))
            })
            .await;

        assert!(matches!(result, Err(TaskloafError::Task(ref m)) if m == "entry broke"));
        assert!(token.is_cancelled());
        assert!(started.get());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!completed.get());
    }

    #[tokio::test]
    async fn test_stop_cancels_unfinished_entry() {
        let worker = worker();
        worker.submit(Shutdown.into_work());
        let result: Result<()> = worker
            .start(|_| async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TaskloafError::Cancelled)));
    }

    #[tokio::test]
    async fn test_suspendable_work_yields() {
        let worker = worker();
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_clone = log.clone();
        let result = worker
            .start(move |w| async move {
                let log = log_clone.clone();
                w.submit(Work::suspendable("sleeper", move |w| async move {
                    log.borrow_mut().push("sleeping");
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.borrow_mut().push("woke");
                    w.shutdown();
                    Ok(())
                }));
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(*log.borrow(), vec!["sleeping", "woke"]);
    }

    #[tokio::test]
    async fn test_suspendable_failure_is_isolated() {
        let worker = worker();
        let result = worker
            .start(|w| async move {
                w.submit(Work::sync("stop", |w| {
                    w.shutdown();
                    Ok(())
                }));
                w.submit(Work::suspendable("fails", |_| async {
                    Err(TaskloafError::task("async failure"))
                }));
                Ok("done")
            })
            .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_stuck_task() {
        let worker = worker();
        let token = worker.cancellation();
        let result = worker
            .start(|w| async move {
                w.submit(Work::sync("stop", |w| {
                    w.shutdown();
                    Ok(())
                }));
                w.submit(Work::suspendable("stuck", |_| async {
                    std::future::pending::<()>().await;
                    Ok(())
                }));
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_run_builds_runtime() {
        let worker = worker();
        let value = worker
            .run(|w| async move {
                w.shutdown();
                Ok(7u8)
            })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_run_stops_when_entry_returns() {
        let worker = worker();
        let value = worker.run(|_| async { Ok(1u8) }).unwrap();
        assert_eq!(value, 1);
        assert!(worker.is_stopped());
    }

    #[test]
    fn test_run_drains_work_queued_by_entry() {
        let worker = worker();
        let ran = Rc::new(Cell::new(0));

        let ran_clone = ran.clone();
        worker
            .run(move |w| async move {
                for _ in 0..3 {
                    let ran = ran_clone.clone();
                    w.submit(Work::sync("count", move |_| {
                        ran.set(ran.get() + 1);
                        Ok(())
                    }));
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(ran.get(), 3);
        assert_eq!(worker.pending_len(), 0);
    }

    #[test]
    fn test_step_defers_suspendable_work() {
        let worker = worker();
        let ran = Rc::new(Cell::new(false));

        let ran_clone = ran.clone();
        worker.submit(Work::suspendable("later", move |_| async move {
            ran_clone.set(true);
            Ok(())
        }));

        assert!(worker.step());
        assert!(!worker.step());
        assert_eq!(worker.pending_len(), 0);
        assert_eq!(worker.deferred_len(), 1);
        assert!(!ran.get());

        let ran_clone = ran.clone();
        worker
            .run(move |_| async move {
                while !ran_clone.get() {
                    tokio::task::yield_now().await;
                }
                Ok(())
            })
            .unwrap();

        assert!(ran.get());
        assert_eq!(worker.deferred_len(), 0);
    }

    #[test]
    fn test_idle_backoff_still_stops() {
        let worker = Worker::builder(NullTransport::new())
            .idle_backoff(Duration::from_millis(1))
            .build();
        let result = worker.run(|w| async move {
            tokio::time::sleep(Duration::from_millis(3)).await;
            w.shutdown();
            Ok(())
        });
        assert!(result.is_ok());
    }
}
