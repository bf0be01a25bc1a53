//! # taskloaf
//!
//! Cooperative task runtime for a cluster of worker processes, with
//! distributed reference counting.
//!
//! Each worker runs a single cooperative thread that interleaves two steps:
//! polling its transport for envelopes and running queued work. Work can be
//! submitted to any address; local work skips the transport entirely.
//!
//! A [`DistributedRef`](dref::DistributedRef) names memory belonging to the
//! worker that created it. Clones (explicit, or made implicitly whenever a
//! reference is serialized into a message) carry generation bookkeeping,
//! and every instance reports one decrement to the creator when it is
//! dropped. The creator reclaims the object once the whole clone lineage
//! has reported, with no coordination between the other workers.
//!
//! ## Architecture
//!
//! - [`protocol`]: 6-byte envelope header and built-in message kinds
//! - [`handler`]: closed registry from type codes to handlers
//! - [`task`]: work items and remotely-submittable tasks
//! - [`worker`]: worker state, builder and the cooperative scheduler
//! - [`dref`]: distributed references and the memory manager
//! - [`transport`]: the transport contract and in-process transports
//!
//! ## Example
//!
//! ```
//! use taskloaf::transport::NullTransport;
//! use taskloaf::{Work, Worker};
//!
//! let worker = Worker::builder(NullTransport::new()).build();
//! let answer = worker.run(|w| async move {
//!     w.submit(Work::sync("greet", |w| {
//!         tracing::info!(address = w.address(), "hello");
//!         Ok(())
//!     }));
//!     Ok(42)
//! })?;
//! assert_eq!(answer, 42);
//! assert!(worker.is_stopped());
//! # Ok::<(), taskloaf::TaskloafError>(())
//! ```

pub mod codec;
pub mod dref;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod task;
pub mod transport;
pub mod worker;

/// Integer identity of a worker within its cluster.
pub type Address = u32;

pub use dref::DistributedRef;
pub use error::{Result, TaskloafError};
pub use task::{RemoteTask, Shutdown, Work};
pub use worker::{Worker, WorkerBuilder, WorkerConfig};
