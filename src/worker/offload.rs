//! Blocking work moved off the scheduler thread.
//!
//! The blocking function runs on tokio's blocking pool and only ever sends
//! its result back over a channel. The poll step drains that channel and
//! turns each result into an ordinary work item by way of the continuation
//! registered with it, so nothing outside the scheduler thread touches
//! worker state.

use std::any::Any;
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc;

use super::Worker;
use crate::error::{Result, TaskloafError};
use crate::task::Work;

type Outcome = Result<Box<dyn Any + Send>>;
type Completion = (u64, Outcome);
type Continuation = Box<dyn FnOnce(Outcome) -> Work>;

/// Continuations waiting on the blocking pool.
pub(crate) struct OffloadQueue {
    tx: mpsc::UnboundedSender<Completion>,
    rx: RefCell<mpsc::UnboundedReceiver<Completion>>,
    next_ticket: Cell<u64>,
    waiting: RefCell<HashMap<u64, Continuation>>,
}

impl OffloadQueue {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Completion>,
        rx: mpsc::UnboundedReceiver<Completion>,
    ) -> Self {
        Self {
            tx,
            rx: RefCell::new(rx),
            next_ticket: Cell::new(0),
            waiting: RefCell::new(HashMap::new()),
        }
    }

    fn reserve(&self, continuation: Continuation) -> u64 {
        let ticket = self.next_ticket.get();
        self.next_ticket.set(ticket + 1);
        self.waiting.borrow_mut().insert(ticket, continuation);
        ticket
    }

    /// Work items for every offload that has finished since the last call.
    pub(crate) fn drain(&self) -> Vec<Work> {
        let mut ready = Vec::new();
        loop {
            let next = self.rx.borrow_mut().try_recv();
            let Ok((ticket, outcome)) = next else {
                break;
            };
            let continuation = self.waiting.borrow_mut().remove(&ticket);
            match continuation {
                Some(continuation) => ready.push(continuation(outcome)),
                None => tracing::warn!(ticket, "offload finished with no continuation"),
            }
        }
        ready
    }

    /// Offloads still running.
    pub(crate) fn in_flight(&self) -> usize {
        self.waiting.borrow().len()
    }
}

impl Worker {
    /// Run `f` on the blocking pool and schedule `then` with its result.
    ///
    /// `then` runs on this worker as a normal work item; a panic in `f`
    /// reaches it as [`TaskloafError::Panic`]. Results that arrive after the
    /// worker stopped polling are discarded.
    ///
    /// # Errors
    ///
    /// [`TaskloafError::NoRuntime`] outside a tokio runtime.
    pub fn offload<F, R, C>(&self, label: impl Into<Cow<'static, str>>, f: F, then: C) -> Result<()>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
        C: FnOnce(&Worker, Result<R>) -> Result<()> + 'static,
    {
        let label = label.into();
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| TaskloafError::NoRuntime(label.to_string()))?;

        tracing::debug!(address = self.address(), task = %label, "offloading blocking work");
        let ticket = self.inner.offload.reserve(Box::new(move |outcome: Outcome| {
            Work::sync(label, move |worker| {
                let result = outcome.and_then(|value| {
                    value
                        .downcast::<R>()
                        .map(|value| *value)
                        .map_err(|_| TaskloafError::task("offloaded result has an unexpected type"))
                });
                then(worker, result)
            })
        }));

        let tx = self.inner.offload.tx.clone();
        handle.spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f))
                .map(|value| Box::new(value) as Box<dyn Any + Send>)
                .map_err(TaskloafError::from_panic);
            // The worker may already be gone; its result goes with it.
            let _ = tx.send((ticket, outcome));
        });
        Ok(())
    }

    /// Offloads whose results have not been picked up yet.
    pub fn offloads_in_flight(&self) -> usize {
        self.inner.offload.in_flight()
    }
}
