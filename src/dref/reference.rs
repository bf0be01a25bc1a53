//! Handle to memory that logically belongs to a creator worker.
//!
//! A [`DistributedRef`] is move-only in spirit: every instance reports
//! exactly one [`Decrement`] to its creator, from `Drop`. Duplicating a
//! handle (`Clone`, or serializing it into a message) spawns a child one
//! generation deeper and bumps the parent's child count, which the parent
//! carries into its own decrement.
//!
//! A clone that is serialized but never decoded on the other side never
//! reports, and its object is never reclaimed. There is no lease or timeout
//! to recover it; the same holds for instances lost with a crashed worker.

use std::cell::Cell;
use std::fmt;

use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::manager::Decrement;
use super::shmem::ShmemRange;
use crate::codec::current_worker;
use crate::error::{Result, TaskloafError};
use crate::worker::{WeakWorker, Worker};
use crate::Address;

/// Handle to an object identified by `(creator, id)`.
pub struct DistributedRef {
    worker: WeakWorker,
    creator: Address,
    id: u64,
    owner: Address,
    generation: u32,
    n_children: Cell<u32>,
    shmem: ShmemRange,
}

/// Serialized form: always describes a freshly spawned child.
#[derive(Serialize, Deserialize)]
struct RefWire {
    creator: Address,
    id: u64,
    owner: Address,
    generation: u32,
    shmem: ShmemRange,
}

impl DistributedRef {
    /// Create a new object on `worker`, owned by it.
    pub fn new(worker: &Worker) -> Self {
        Self::with_owner(worker, worker.address())
    }

    /// Create a new object on `worker`, recording `owner` as its holder.
    pub fn with_owner(worker: &Worker, owner: Address) -> Self {
        Self::create(worker, owner, ShmemRange::NULL)
    }

    /// Create a new object whose bytes live in `worker`'s arena.
    pub fn alloc(worker: &Worker, data: &[u8]) -> Self {
        let shmem = worker.store_shmem(data);
        Self::create(worker, worker.address(), shmem)
    }

    fn create(worker: &Worker, owner: Address, shmem: ShmemRange) -> Self {
        let id = worker.new_id();
        worker.track_object(id, shmem);
        Self {
            worker: worker.downgrade(),
            creator: worker.address(),
            id,
            owner,
            generation: 0,
            n_children: Cell::new(0),
            shmem,
        }
    }

    /// Worker that created the object and keeps its lineage table.
    #[inline]
    pub fn creator(&self) -> Address {
        self.creator
    }

    /// Creator-local object id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Globally unique `(creator, id)` key.
    #[inline]
    pub fn index(&self) -> (Address, u64) {
        (self.creator, self.id)
    }

    /// Worker treated as the authoritative holder of the bytes.
    #[inline]
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Depth of this instance in the clone lineage.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Clones spawned from this instance so far.
    #[inline]
    pub fn n_children(&self) -> u32 {
        self.n_children.get()
    }

    /// Owner-local byte range, possibly null.
    #[inline]
    pub fn shmem_range(&self) -> ShmemRange {
        self.shmem
    }

    /// Address of the worker holding this instance, if it is still running.
    pub fn holder(&self) -> Option<Address> {
        self.worker.upgrade().map(|w| w.address())
    }

    /// Whether the bytes can be read here without a fetch.
    pub fn is_local(&self) -> bool {
        !self.shmem.is_null() && self.holder() == Some(self.owner)
    }

    /// Read the bytes from the local arena.
    ///
    /// # Errors
    ///
    /// [`TaskloafError::NotLocal`] off the owner, or when the reference has
    /// no byte range.
    pub fn read_local(&self) -> Result<Bytes> {
        let worker = self
            .worker
            .upgrade()
            .ok_or(TaskloafError::NoWorkerContext)?;
        let not_local = || TaskloafError::NotLocal {
            creator: self.creator,
            id: self.id,
            address: worker.address(),
        };
        if self.shmem.is_null() || worker.address() != self.owner {
            return Err(not_local());
        }
        worker.read_shmem(self.shmem).ok_or_else(not_local)
    }

    /// Release this instance now rather than at scope exit.
    pub fn release(self) {
        drop(self);
    }

    fn spawn_child(&self) -> RefWire {
        self.n_children.set(self.n_children.get() + 1);
        RefWire {
            creator: self.creator,
            id: self.id,
            owner: self.owner,
            generation: self.generation + 1,
            shmem: self.shmem,
        }
    }

    fn decrement(&self) -> Decrement {
        Decrement {
            creator: self.creator,
            id: self.id,
            generation: self.generation,
            n_children: self.n_children.get(),
            owner: self.owner,
        }
    }

    fn from_wire(worker: WeakWorker, wire: RefWire) -> Self {
        Self {
            worker,
            creator: wire.creator,
            id: wire.id,
            owner: wire.owner,
            generation: wire.generation,
            n_children: Cell::new(0),
            shmem: wire.shmem,
        }
    }
}

impl Clone for DistributedRef {
    fn clone(&self) -> Self {
        let wire = self.spawn_child();
        Self::from_wire(self.worker.clone(), wire)
    }
}

impl Drop for DistributedRef {
    fn drop(&mut self) {
        let decrement = self.decrement();
        match self.worker.upgrade() {
            Some(worker) => worker.report_decrement(decrement),
            None => tracing::warn!(
                creator = self.creator,
                id = self.id,
                generation = self.generation,
                "holding worker is gone; decrement lost"
            ),
        }
    }
}

impl Serialize for DistributedRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.spawn_child().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DistributedRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = RefWire::deserialize(deserializer)?;
        let worker = current_worker().ok_or_else(|| D::Error::custom(TaskloafError::NoWorkerContext))?;
        Ok(Self::from_wire(worker.downgrade(), wire))
    }
}

impl fmt::Debug for DistributedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedRef")
            .field("creator", &self.creator)
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("generation", &self.generation)
            .field("n_children", &self.n_children.get())
            .field("shmem", &self.shmem)
            .finish()
    }
}
