//! Worker context for decoding distributed references.
//!
//! A reference carries a handle to the worker it lives on so that its drop
//! can report back to the creator. Serde gives `Deserialize` no side channel,
//! so the receiving worker is published in a thread-local stack for the
//! duration of one decode call.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::worker::{WeakWorker, Worker};

thread_local! {
    static DECODE_CONTEXT: RefCell<Vec<WeakWorker>> = const { RefCell::new(Vec::new()) };
}

/// Guard that makes a worker the decode target until it is dropped.
///
/// Scopes nest; the innermost one wins.
pub(crate) struct DecodeScope {
    // Pinned to the thread whose stack it pushed onto.
    _not_send: PhantomData<*const ()>,
}

impl DecodeScope {
    pub(crate) fn enter(worker: &Worker) -> Self {
        DECODE_CONTEXT.with(|ctx| ctx.borrow_mut().push(worker.downgrade()));
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for DecodeScope {
    fn drop(&mut self) {
        DECODE_CONTEXT.with(|ctx| {
            ctx.borrow_mut().pop();
        });
    }
}

/// The worker of the innermost active [`DecodeScope`], if any.
pub(crate) fn current_worker() -> Option<Worker> {
    DECODE_CONTEXT.with(|ctx| ctx.borrow().last().and_then(WeakWorker::upgrade))
}
