//! Worker state and task submission.
//!
//! A [`Worker`] owns everything one participant of a cluster needs: its
//! address, the id generator for the objects it creates, the pending-work
//! stack, the transport, the closed protocol, the memory manager and the
//! service registry. Nothing is global, so several workers can share a
//! process (and a thread) without cross-talk.
//!
//! `Worker` is a cheap handle (`Rc`) and deliberately `!Send`: all of its
//! state is touched from one cooperative thread only. Scheduling lives in
//! [`scheduler`](self) (`start`, `run`, `step`).

mod builder;
mod offload;
mod scheduler;
mod services;

pub use builder::{WorkerBuilder, WorkerConfig, DEFAULT_IDLE_BACKOFF, DEFAULT_MAX_BLOCKING_THREADS};
pub use services::ServiceRegistry;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dref::{Decrement, DecrementOutcome, MemoryManager, ShmemRange};
use crate::error::Result;
use crate::handler::Protocol;
use crate::protocol::{DECREMENT_TYPE_CODE, WORK_TYPE_CODE};
use crate::task::{RemoteTask, TaskRegistry, Work, WorkPayload};
use crate::transport::Transport;
use crate::Address;

use offload::OffloadQueue;

pub(crate) struct WorkerInner {
    address: Address,
    config: WorkerConfig,
    next_id: Cell<u64>,
    /// Pending work; the scheduler pops from the end.
    pending: RefCell<Vec<Work>>,
    stop: Cell<bool>,
    transport: RefCell<Box<dyn Transport>>,
    protocol: Protocol,
    tasks: TaskRegistry,
    memory: RefCell<MemoryManager>,
    services: ServiceRegistry,
    offload: OffloadQueue,
    /// Suspendable work popped by a manual step, waiting for `start`.
    deferred: RefCell<Vec<Work>>,
    /// Set while `start` drives the scheduler inside its `LocalSet`.
    driving: Cell<bool>,
    /// Suspendable work items currently running.
    spawned: RefCell<JoinSet<()>>,
    cancel: CancellationToken,
}

/// Handle to a worker.
#[derive(Clone)]
pub struct Worker {
    inner: Rc<WorkerInner>,
}

/// Non-owning worker handle, held by distributed references.
#[derive(Clone)]
pub struct WeakWorker(Weak<WorkerInner>);

impl WeakWorker {
    /// The worker, if it still exists.
    pub fn upgrade(&self) -> Option<Worker> {
        self.0.upgrade().map(|inner| Worker { inner })
    }
}

impl Worker {
    /// Start building a worker on `transport`.
    pub fn builder(transport: impl Transport + 'static) -> WorkerBuilder {
        WorkerBuilder::new(transport)
    }

    /// This worker's address.
    #[inline]
    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Configuration the worker was built with.
    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Allocate a fresh object id. Ids are never reused.
    pub fn new_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    /// Ask the scheduler to stop once pending work is drained.
    pub fn shutdown(&self) {
        if !self.inner.stop.replace(true) {
            tracing::debug!(address = self.address(), "shutdown requested");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.get()
    }

    /// Number of queued work items.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Number of suspendable items set aside by manual stepping.
    pub fn deferred_len(&self) -> usize {
        self.inner.deferred.borrow().len()
    }

    /// Submit a task to the worker at `to`.
    ///
    /// Work for this worker is queued directly without touching the
    /// transport. Anything else is encoded into a WORK envelope and sent;
    /// a send failure is returned as-is and never retried.
    pub fn submit_work<T: RemoteTask>(&self, to: Address, task: T) -> Result<()> {
        if to == self.address() {
            self.submit(task.into_work());
            return Ok(());
        }

        let payload = WorkPayload::encode(&task)?;
        let frame = self.inner.protocol.encode(WORK_TYPE_CODE, &payload)?;
        tracing::debug!(
            address = self.address(),
            to,
            task = T::NAME,
            bytes = frame.len(),
            "sending work"
        );
        self.inner.transport.borrow().send(to, frame)
    }

    /// Queue a local work item.
    pub fn submit(&self, work: Work) {
        tracing::trace!(address = self.address(), task = work.label(), "work queued");
        self.inner.pending.borrow_mut().push(work);
    }

    /// Send a custom message kind to `to`.
    ///
    /// Always goes through the transport, also when `to` is this worker.
    pub fn send<T: Serialize + ?Sized>(&self, to: Address, type_code: u16, args: &T) -> Result<()> {
        let frame = self.inner.protocol.encode(type_code, args)?;
        self.inner.transport.borrow().send(to, frame)
    }

    /// The closed protocol this worker speaks.
    pub fn protocol(&self) -> &Protocol {
        &self.inner.protocol
    }

    /// Named singletons owned by this worker.
    pub fn services(&self) -> &ServiceRegistry {
        &self.inner.services
    }

    /// Token cancelled when the scheduler shuts down.
    ///
    /// Suspendable work is already raced against it; long-running loops
    /// inside such work can check it to stop early.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Whether an object created here is still alive.
    pub fn is_alive(&self, id: u64) -> bool {
        self.inner.memory.borrow().is_alive(id)
    }

    /// Objects created here that have not been reclaimed.
    pub fn live_objects(&self) -> usize {
        self.inner.memory.borrow().live_objects()
    }

    /// Objects created here that have been reclaimed.
    pub fn reclaimed_objects(&self) -> u64 {
        self.inner.memory.borrow().reclaimed()
    }

    /// Non-zero outstanding decrements as `(generation, count)` for an
    /// object created here.
    pub fn outstanding(&self, id: u64) -> Option<Vec<(u32, i64)>> {
        self.inner.memory.borrow().outstanding(id)
    }

    pub(crate) fn downgrade(&self) -> WeakWorker {
        WeakWorker(Rc::downgrade(&self.inner))
    }

    /// Built-in WORK handler: rebuild the task and queue it.
    pub(crate) fn accept_work(&self, payload: WorkPayload) -> Result<()> {
        let work = self.inner.tasks.decode(self, &payload)?;
        tracing::debug!(address = self.address(), task = %payload.task, "work received");
        self.submit(work);
        Ok(())
    }

    /// Built-in DECREMENT handler, also used for local releases.
    pub(crate) fn apply_decrement(&self, decrement: Decrement) -> DecrementOutcome {
        let outcome = self.inner.memory.borrow_mut().on_decrement(&decrement);
        tracing::trace!(
            address = self.address(),
            id = decrement.id,
            generation = decrement.generation,
            n_children = decrement.n_children,
            ?outcome,
            "decrement applied"
        );
        outcome
    }

    /// Route a released instance's decrement to its creator.
    ///
    /// Called from `Drop`, so failures are logged rather than returned.
    pub(crate) fn report_decrement(&self, decrement: Decrement) {
        if decrement.creator == self.address() {
            self.apply_decrement(decrement);
            return;
        }

        let sent = self
            .inner
            .protocol
            .encode(DECREMENT_TYPE_CODE, &decrement)
            .and_then(|frame| self.inner.transport.borrow().send(decrement.creator, frame));
        if let Err(e) = sent {
            tracing::warn!(
                address = self.address(),
                creator = decrement.creator,
                id = decrement.id,
                generation = decrement.generation,
                error = %e,
                "failed to report decrement; object will leak"
            );
        }
    }

    pub(crate) fn track_object(&self, id: u64, shmem: ShmemRange) {
        self.inner.memory.borrow_mut().track(id, shmem);
    }

    pub(crate) fn store_shmem(&self, data: &[u8]) -> ShmemRange {
        self.inner.memory.borrow_mut().store(data)
    }

    pub(crate) fn read_shmem(&self, range: ShmemRange) -> Option<Bytes> {
        self.inner
            .memory
            .borrow()
            .read(range)
            .map(Bytes::copy_from_slice)
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("address", &self.address())
            .field("pending", &self.pending_len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::dref::DistributedRef;
    use crate::error::TaskloafError;
    use crate::transport::{local_cluster, NullTransport};

    #[derive(Serialize, Deserialize)]
    struct Noop;

    impl RemoteTask for Noop {
        const NAME: &'static str = "noop";

        fn into_work(self) -> Work {
            Work::sync(Self::NAME, |_| Ok(()))
        }
    }

    #[test]
    fn test_new_id_monotonic() {
        let worker = Worker::builder(NullTransport::new()).build();
        let ids: Vec<u64> = (0..4).map(|_| worker.new_id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_local_submit_skips_transport() {
        let worker = Worker::builder(NullTransport::new()).build();
        worker.submit_work(0, Noop).unwrap();
        assert_eq!(worker.pending_len(), 1);
    }

    #[test]
    fn test_remote_submit_uses_transport() {
        let worker = Worker::builder(NullTransport::new()).build();
        let result = worker.submit_work(5, Noop);
        assert!(matches!(result, Err(TaskloafError::Unreachable(5))));
        assert_eq!(worker.pending_len(), 0);
    }

    #[test]
    fn test_shutdown_sets_stop() {
        let worker = Worker::builder(NullTransport::new()).build();
        assert!(!worker.is_stopped());
        worker.shutdown();
        worker.shutdown();
        assert!(worker.is_stopped());
    }

    #[test]
    fn test_workers_do_not_share_state() {
        let a = Worker::builder(NullTransport::new()).build();
        let b = Worker::builder(NullTransport::new()).build();

        a.submit(Work::sync("a", |_| Ok(())));
        a.new_id();
        a.shutdown();

        assert_eq!(b.pending_len(), 0);
        assert_eq!(b.new_id(), 0);
        assert!(!b.is_stopped());
    }

    #[test]
    fn test_weak_handle_dies_with_worker() {
        let worker = Worker::builder(NullTransport::new()).build();
        let weak = worker.downgrade();
        assert!(weak.upgrade().is_some());
        drop(worker);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_remote_decrement_goes_over_transport() {
        let mut cluster = local_cluster(2);
        let b_transport = cluster.pop().unwrap();
        let a_transport = cluster.pop().unwrap();
        let a = Worker::builder(a_transport).build();
        let b = Worker::builder(b_transport).build();

        let r = DistributedRef::new(&a);
        let bytes = crate::codec::MsgPackCodec::encode(&r).unwrap();
        let on_b: DistributedRef = crate::codec::MsgPackCodec::decode_in(&b, &bytes).unwrap();

        on_b.release();
        assert!(a.is_alive(r.id()));
        r.release();
        assert!(a.is_alive(0));

        // Decrement from b is still in a's inbox.
        a.step();
        assert!(!a.is_alive(0));
    }

    #[test]
    fn test_custom_message_round_trip() {
        let mut cluster = local_cluster(1);
        let seen = Rc::new(Cell::new(0u32));

        let seen_clone = seen.clone();
        let (builder, code) = Worker::builder(cluster.pop().unwrap())
            .add_handler("add", move |_, n: u32| {
                seen_clone.set(seen_clone.get() + n);
                Ok(())
            })
            .unwrap();
        let worker = builder.build();

        worker.send(0, code, &7u32).unwrap();
        assert_eq!(seen.get(), 0);
        worker.step();
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn test_services_per_worker() {
        let worker = Worker::builder(NullTransport::new()).build();
        worker.services().register("greeting", String::from("hello"));
        assert_eq!(
            worker.services().get::<String>("greeting").as_deref(),
            Some(&String::from("hello"))
        );
    }
}
