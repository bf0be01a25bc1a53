//! Worker configuration and builder.
//!
//! Everything that shapes the wire protocol (handlers, task types, payload
//! ceiling) is set here. [`WorkerBuilder::build`] moves the protocol into
//! the worker, after which it can no longer change.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::offload::OffloadQueue;
use super::services::ServiceRegistry;
use super::{Worker, WorkerInner};
use crate::dref::MemoryManager;
use crate::error::Result;
use crate::handler::{HandlerResult, Protocol};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::task::{RemoteTask, TaskRegistry};
use crate::transport::Transport;

/// Default pause when a scheduler step found nothing to do (pure yield).
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::ZERO;

/// Default size of the blocking pool used by [`Worker::run`].
pub const DEFAULT_MAX_BLOCKING_THREADS: usize = 16;

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Largest envelope payload accepted from the transport.
    pub max_payload_size: u32,
    /// Sleep after an idle step; zero only yields.
    pub idle_backoff: Duration,
    /// Blocking pool size for runtimes built by [`Worker::run`].
    pub max_blocking_threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
        }
    }
}

/// Builder for configuring and creating a [`Worker`].
pub struct WorkerBuilder {
    transport: Box<dyn Transport>,
    protocol: Protocol,
    tasks: TaskRegistry,
    config: WorkerConfig,
}

impl WorkerBuilder {
    /// Start a builder for a worker on `transport`.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            protocol: Protocol::new(),
            tasks: TaskRegistry::new(),
            config: WorkerConfig::default(),
        }
    }

    /// Register a custom message kind, handing back the builder and the
    /// kind's type code.
    ///
    /// Every worker in a cluster must register the same kinds in the same
    /// order so that codes agree.
    pub fn add_handler<F, T>(mut self, name: &str, handler: F) -> Result<(Self, u16)>
    where
        F: Fn(&Worker, T) -> HandlerResult + 'static,
        T: DeserializeOwned + 'static,
    {
        let code = self.protocol.add_handler(name, handler)?;
        Ok((self, code))
    }

    /// Accept task type `T` in WORK envelopes.
    pub fn task<T: RemoteTask>(mut self) -> Self {
        self.tasks.register::<T>();
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the largest accepted envelope payload.
    ///
    /// Default: 1 GiB
    pub fn max_payload_size(mut self, max_payload_size: u32) -> Self {
        self.config.max_payload_size = max_payload_size;
        self
    }

    /// Set the sleep taken after an idle scheduler step.
    ///
    /// Default: zero (yield only)
    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.config.idle_backoff = backoff;
        self
    }

    /// Set the blocking pool size used by [`Worker::run`].
    ///
    /// Default: 16
    pub fn max_blocking_threads(mut self, threads: usize) -> Self {
        self.config.max_blocking_threads = threads;
        self
    }

    /// Build the worker.
    pub fn build(self) -> Worker {
        let Self {
            transport,
            mut protocol,
            tasks,
            config,
        } = self;
        protocol.set_max_payload_size(config.max_payload_size);

        let address = transport.address();
        let (offload_tx, offload_rx) = mpsc::unbounded_channel();
        tracing::debug!(
            address,
            kinds = protocol.len(),
            "worker built"
        );

        Worker {
            inner: Rc::new(WorkerInner {
                address,
                config,
                next_id: Cell::new(0),
                pending: RefCell::new(Vec::new()),
                stop: Cell::new(false),
                transport: RefCell::new(transport),
                protocol,
                tasks,
                memory: RefCell::new(MemoryManager::new(address)),
                services: ServiceRegistry::new(),
                offload: OffloadQueue::new(offload_tx, offload_rx),
                deferred: RefCell::new(Vec::new()),
                driving: Cell::new(false),
                spawned: RefCell::new(JoinSet::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }
}
