//! In-process transports.
//!
//! - [`LocalTransport`]: one endpoint of a cluster whose workers live in the
//!   same process (separate threads, or one thread stepping them by hand).
//! - [`NullTransport`]: a single worker with nobody to talk to.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use taskloaf::transport::{local_cluster, Transport};
//!
//! let mut cluster = local_cluster(2);
//! let mut b = cluster.pop().unwrap();
//! let a = cluster.pop().unwrap();
//!
//! a.send(1, Bytes::from_static(b"hi")).unwrap();
//! assert_eq!(b.recv().unwrap(), Bytes::from_static(b"hi"));
//! assert!(b.recv().is_none());
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::Transport;
use crate::error::{Result, TaskloafError};
use crate::Address;

/// Create the endpoints of an `n`-worker in-process cluster.
///
/// Endpoint `i` has address `i`. Every endpoint can send to every address,
/// including its own.
pub fn local_cluster(n: usize) -> Vec<LocalTransport> {
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..n).map(|_| mpsc::unbounded_channel::<Bytes>()).unzip();
    let peers = Arc::new(senders);

    receivers
        .into_iter()
        .enumerate()
        .map(|(i, inbox)| LocalTransport {
            address: i as Address,
            peers: peers.clone(),
            inbox,
        })
        .collect()
}

/// Channel-backed endpoint of a [`local_cluster`].
///
/// `Send`, so each endpoint can be moved to the thread hosting its worker.
pub struct LocalTransport {
    address: Address,
    peers: Arc<Vec<mpsc::UnboundedSender<Bytes>>>,
    inbox: mpsc::UnboundedReceiver<Bytes>,
}

impl LocalTransport {
    /// Number of endpoints in the cluster.
    pub fn cluster_size(&self) -> usize {
        self.peers.len()
    }
}

impl Transport for LocalTransport {
    fn address(&self) -> Address {
        self.address
    }

    fn send(&self, to: Address, frame: Bytes) -> Result<()> {
        let peer = self
            .peers
            .get(to as usize)
            .ok_or(TaskloafError::Unreachable(to))?;
        peer.send(frame)
            .map_err(|_| TaskloafError::Transport(format!("worker {} has gone away", to)))
    }

    fn recv(&mut self) -> Option<Bytes> {
        self.inbox.try_recv().ok()
    }
}

/// Transport for a worker running alone.
///
/// Receives nothing; sending anywhere is an [`Unreachable`] error, which
/// keeps work local.
///
/// [`Unreachable`]: TaskloafError::Unreachable
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport {
    address: Address,
}

impl NullTransport {
    /// Lone worker at address 0.
    pub fn new() -> Self {
        Self::with_address(0)
    }

    /// Lone worker at a chosen address.
    pub fn with_address(address: Address) -> Self {
        Self { address }
    }
}

impl Transport for NullTransport {
    fn address(&self) -> Address {
        self.address
    }

    fn send(&self, to: Address, _frame: Bytes) -> Result<()> {
        Err(TaskloafError::Unreachable(to))
    }

    fn recv(&mut self) -> Option<Bytes> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_addresses() {
        let cluster = local_cluster(3);
        let addresses: Vec<Address> = cluster.iter().map(|t| t.address()).collect();
        assert_eq!(addresses, vec![0, 1, 2]);
        assert!(cluster.iter().all(|t| t.cluster_size() == 3));
    }

    #[test]
    fn test_fifo_per_pair() {
        let mut cluster = local_cluster(2);
        let mut b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        for i in 0u8..5 {
            a.send(1, Bytes::from(vec![i])).unwrap();
        }
        for i in 0u8..5 {
            assert_eq!(b.recv().unwrap()[0], i);
        }
        assert!(b.recv().is_none());
    }

    #[test]
    fn test_send_to_self() {
        let mut cluster = local_cluster(1);
        let mut a = cluster.pop().unwrap();
        a.send(0, Bytes::from_static(b"loop")).unwrap();
        assert_eq!(a.recv().unwrap(), Bytes::from_static(b"loop"));
    }

    #[test]
    fn test_unknown_address() {
        let cluster = local_cluster(2);
        let result = cluster[0].send(7, Bytes::new());
        assert!(matches!(result, Err(TaskloafError::Unreachable(7))));
    }

    #[test]
    fn test_send_to_departed_peer() {
        let mut cluster = local_cluster(2);
        drop(cluster.pop());
        let result = cluster[0].send(1, Bytes::new());
        assert!(matches!(result, Err(TaskloafError::Transport(_))));
    }

    #[test]
    fn test_null_transport() {
        let mut null = NullTransport::with_address(3);
        assert_eq!(null.address(), 3);
        assert!(null.recv().is_none());
        assert!(matches!(
            null.send(0, Bytes::new()),
            Err(TaskloafError::Unreachable(0))
        ));
    }
}
