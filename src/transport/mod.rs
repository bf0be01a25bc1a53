//! Transport module - the contract a worker needs from its message fabric.
//!
//! Provides:
//! - [`Transport`] - address, non-blocking receive, send-to-address
//! - [`LocalTransport`] - in-process cluster over channels
//! - [`NullTransport`] - a lone worker that never receives
//!
//! Delivery is assumed FIFO and at-most-once per sender/receiver pair;
//! nothing here retries, reorders or deduplicates.

mod local;

pub use local::{local_cluster, LocalTransport, NullTransport};

use bytes::Bytes;

use crate::error::Result;
use crate::Address;

/// Message fabric connecting one worker to the rest of the cluster.
pub trait Transport {
    /// Address of the worker this transport belongs to.
    fn address(&self) -> Address;

    /// Send one encoded envelope to `to`.
    fn send(&self, to: Address, frame: Bytes) -> Result<()>;

    /// Next available frame, or `None` without blocking.
    fn recv(&mut self) -> Option<Bytes>;
}
