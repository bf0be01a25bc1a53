//! Distributed references and the creator-side memory manager.
//!
//! - [`DistributedRef`] - handle whose clones and releases are accounted for
//! - [`MemoryManager`] - per-worker lineage table of objects it created
//! - [`ShmemRange`] / [`ShmemArena`] - owner-local byte storage
//!
//! All bookkeeping for an object lives with its creator, so reclaiming it
//! takes no agreement between workers: decrement traffic is one message
//! per released instance, addressed to the creator.
//!
//! # Example
//!
//! ```
//! use taskloaf::dref::DistributedRef;
//! use taskloaf::transport::NullTransport;
//! use taskloaf::Worker;
//!
//! let worker = Worker::builder(NullTransport::new()).build();
//! let original = DistributedRef::new(&worker);
//! let copy = original.clone();
//! assert_eq!(copy.generation(), 1);
//!
//! original.release();
//! assert!(worker.is_alive(copy.id()));
//! copy.release();
//! assert_eq!(worker.reclaimed_objects(), 1);
//! ```

mod manager;
mod reference;
mod shmem;

pub use manager::{Decrement, DecrementOutcome, MemoryManager};
pub use reference::DistributedRef;
pub use shmem::{ShmemArena, ShmemRange};
