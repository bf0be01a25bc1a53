//! Creator-side bookkeeping for distributed references.
//!
//! Each object a worker creates gets a lineage entry holding one signed
//! counter per generation: how many instances of that generation are still
//! owed a closing decrement. Only non-zero counters are stored, so the cost
//! of an entry does not depend on how deep a generation number a decrement
//! names. The entry starts as `{0: 1}` (the original instance). A decrement `(g, k)` closes one instance of generation `g` and
//! announces the `k` children it spawned at generation `g + 1`. When every
//! counter is zero the whole lineage has reported and the object is
//! reclaimed.
//!
//! Counters may dip below zero when a child's decrement overtakes its
//! parent's; the arithmetic is order independent, so that is harmless.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::shmem::{ShmemArena, ShmemRange};
use crate::Address;

/// Closing report of one reference instance, addressed to its creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decrement {
    /// Worker holding the lineage table.
    pub creator: Address,
    /// Creator-local object id.
    pub id: u64,
    /// Generation of the closing instance.
    pub generation: u32,
    /// Clones the instance spawned.
    pub n_children: u32,
    /// Owner recorded on the instance.
    pub owner: Address,
}

/// What a decrement did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Recorded; the object still has outstanding instances.
    Alive,
    /// The last outstanding instance reported; the object is gone.
    Reclaimed,
    /// Inconsistent report (unknown object, wrong creator, repeated
    /// generation-0 close, generation with no successor); logged and
    /// dropped.
    Ignored,
}

#[derive(Debug)]
struct Lineage {
    /// Non-zero counts keyed by generation.
    outstanding: BTreeMap<u32, i64>,
    shmem: ShmemRange,
}

/// Per-worker table of objects this worker created.
#[derive(Debug)]
pub struct MemoryManager {
    address: Address,
    objects: HashMap<u64, Lineage>,
    arena: ShmemArena,
    reclaimed: u64,
}

impl MemoryManager {
    /// Create an empty table for the worker at `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            objects: HashMap::new(),
            arena: ShmemArena::new(),
            reclaimed: 0,
        }
    }

    /// Start tracking a freshly created object.
    pub fn track(&mut self, id: u64, shmem: ShmemRange) {
        let previous = self.objects.insert(
            id,
            Lineage {
                outstanding: BTreeMap::from([(0, 1)]),
                shmem,
            },
        );
        debug_assert!(previous.is_none(), "object id {} reused", id);
    }

    /// Copy bytes into the local arena.
    pub fn store(&mut self, data: &[u8]) -> ShmemRange {
        self.arena.alloc(data)
    }

    /// Bytes behind a live local range.
    pub fn read(&self, range: ShmemRange) -> Option<&[u8]> {
        self.arena.get(range)
    }

    /// Record one decrement.
    pub fn on_decrement(&mut self, decrement: &Decrement) -> DecrementOutcome {
        if decrement.creator != self.address {
            tracing::warn!(
                address = self.address,
                creator = decrement.creator,
                id = decrement.id,
                "decrement routed to the wrong creator; ignoring"
            );
            return DecrementOutcome::Ignored;
        }

        let Some(lineage) = self.objects.get_mut(&decrement.id) else {
            tracing::warn!(
                address = self.address,
                id = decrement.id,
                generation = decrement.generation,
                "decrement for unknown object (double release or stale message); ignoring"
            );
            return DecrementOutcome::Ignored;
        };

        let generation = decrement.generation;
        let Some(child_generation) = generation.checked_add(1) else {
            tracing::warn!(
                address = self.address,
                id = decrement.id,
                generation,
                "decrement generation out of range; ignoring"
            );
            return DecrementOutcome::Ignored;
        };

        if generation == 0 && lineage.outstanding.get(&0).copied().unwrap_or(0) <= 0 {
            tracing::warn!(
                address = self.address,
                id = decrement.id,
                "repeated decrement for generation 0; ignoring"
            );
            return DecrementOutcome::Ignored;
        }

        adjust(&mut lineage.outstanding, generation, -1);
        adjust(
            &mut lineage.outstanding,
            child_generation,
            i64::from(decrement.n_children),
        );

        if !lineage.outstanding.is_empty() {
            return DecrementOutcome::Alive;
        }

        let shmem = lineage.shmem;
        self.objects.remove(&decrement.id);
        if !shmem.is_null() {
            self.arena.free(shmem);
        }
        self.reclaimed += 1;
        tracing::debug!(
            address = self.address,
            id = decrement.id,
            owner = decrement.owner,
            "object reclaimed"
        );
        DecrementOutcome::Reclaimed
    }

    /// Whether the object is still tracked.
    pub fn is_alive(&self, id: u64) -> bool {
        self.objects.contains_key(&id)
    }

    /// Non-zero outstanding counts as `(generation, count)`, lowest
    /// generation first.
    pub fn outstanding(&self, id: u64) -> Option<Vec<(u32, i64)>> {
        self.objects
            .get(&id)
            .map(|lineage| lineage.outstanding.iter().map(|(&g, &n)| (g, n)).collect())
    }

    /// Number of objects still tracked.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// Number of objects reclaimed so far.
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed
    }

    /// Live ranges in the local arena.
    pub fn live_ranges(&self) -> usize {
        self.arena.live_ranges()
    }
}

fn adjust(counts: &mut BTreeMap<u32, i64>, generation: u32, delta: i64) {
    if delta == 0 {
        return;
    }
    let count = counts.entry(generation).or_insert(0);
    *count += delta;
    if *count == 0 {
        counts.remove(&generation);
    }
}
