//! Per-block replica state (§3 Memory block, §4.4).

use std::collections::HashMap;

use crate::access::AccessRef;
use crate::arena::ChunkId;
use crate::device::{DeviceId, DeviceMask};

/// Each device replica stores at most this many distinct backing
/// allocations for the same block (§4.4 "Allocation replica cap"); ported
/// verbatim from the reference's `MEMORY_REPLICATE_ALLOCATION_VIEWS_MAX`.
pub const ALLOC_VIEWS_MAX: usize = 8;

/// A device-side sub-region within one device allocation: `(chunk_id,
/// base_addr, ld)` (GLOSSARY).
#[derive(Debug, Clone, Copy)]
pub struct AllocView {
    pub chunk: ChunkId,
    pub base_addr: usize,
    pub ld: i64,
}

/// A D2D copy piggybacked onto the completion of another device's
/// in-flight fetch (§4.4 Fetch step 2.d, GLOSSARY "Forward").
#[derive(Debug, Clone)]
pub struct Forward {
    pub waiter: AccessRef,
    pub dst_device: DeviceId,
    pub dst_view: AllocView,
}

/// One device's replica of a block (§3): which allocation views back it,
/// and per-view coherency/fetching bits.
#[derive(Debug, Default)]
pub struct Replica {
    pub allocations: Vec<AllocView>,
    /// Bit `i` set iff `allocations[i]` holds valid bytes.
    pub coherency: u8,
    /// Bit `i` set iff `allocations[i]` is currently being filled.
    pub fetching: u8,
    awaiting_accesses: Vec<Vec<AccessRef>>,
    awaiting_forwards: Vec<Vec<Forward>>,
}

impl Replica {
    pub fn push_allocation(&mut self, view: AllocView) -> Result<usize, crate::error::CoherencyError> {
        if self.allocations.len() >= ALLOC_VIEWS_MAX {
            return Err(crate::error::CoherencyError::TooManyAllocationViews(ALLOC_VIEWS_MAX));
        }
        self.allocations.push(view);
        self.awaiting_accesses.push(Vec::new());
        self.awaiting_forwards.push(Vec::new());
        Ok(self.allocations.len() - 1)
    }

    pub fn is_coherent(&self, alloc: usize) -> bool {
        self.coherency & (1 << alloc) != 0
    }

    pub fn is_fetching(&self, alloc: usize) -> bool {
        self.fetching & (1 << alloc) != 0
    }

    pub fn mark_fetching(&mut self, alloc: usize) {
        self.fetching |= 1 << alloc;
    }

    pub fn mark_coherent(&mut self, alloc: usize) {
        self.coherency |= 1 << alloc;
        self.fetching &= !(1 << alloc);
    }

    pub fn invalidate_all(&mut self) {
        self.coherency = 0;
    }

    pub fn push_waiter(&mut self, alloc: usize, waiter: AccessRef) {
        self.awaiting_accesses[alloc].push(waiter);
    }

    pub fn push_forward(&mut self, alloc: usize, forward: Forward) {
        self.awaiting_forwards[alloc].push(forward);
    }

    pub fn take_waiters(&mut self, alloc: usize) -> (Vec<AccessRef>, Vec<Forward>) {
        (std::mem::take(&mut self.awaiting_accesses[alloc]), std::mem::take(&mut self.awaiting_forwards[alloc]))
    }

    /// A replica with at least one coherent allocation not currently
    /// fetching is a candidate source (§4.4 "prefer another device
    /// already coherent").
    pub fn first_coherent_not_fetching(&self) -> Option<usize> {
        (0..self.allocations.len()).find(|&i| self.is_coherent(i) && !self.is_fetching(i))
    }

    pub fn allocation_bytes(&self, alloc: usize, sizeof_elem: i64) -> i64 {
        // The view itself does not carry an extent; callers combine this
        // with the block's own rect, which is authoritative for size.
        let _ = (alloc, sizeof_elem);
        0
    }
}

/// One leaf region of the coherency tree (§3, GLOSSARY "Block"): which
/// devices hold a valid replica, which are fetching, and the per-device
/// replica detail. `coherency == DeviceMask::NONE` means the host holds
/// the sole authoritative copy.
#[derive(Debug, Default)]
pub struct MemoryBlock {
    pub replicas: HashMap<DeviceId, Replica>,
    pub coherency: DeviceMask,
    pub fetching: DeviceMask,
}

impl MemoryBlock {
    pub fn replica_mut(&mut self, device: DeviceId) -> &mut Replica {
        self.replicas.entry(device).or_default()
    }

    pub fn replica(&self, device: DeviceId) -> Option<&Replica> {
        self.replicas.get(&device)
    }

    pub fn mark_device_fetching(&mut self, device: DeviceId) {
        self.fetching = self.fetching | DeviceMask::single(device);
    }

    pub fn mark_device_coherent(&mut self, device: DeviceId) {
        self.coherency = self.coherency | DeviceMask::single(device);
        self.fetching = DeviceMask::from_bits_truncate(self.fetching.bits() & !DeviceMask::single(device).bits());
    }

    pub fn invalidate_everywhere(&mut self) {
        self.coherency = DeviceMask::NONE;
        for replica in self.replicas.values_mut() {
            replica.invalidate_all();
        }
    }

    /// Payload migration when a block is split on one axis (§4.2 split):
    /// every replica's existing allocation views are duplicated with a
    /// base address offset by the Manhattan distance (in row/col units,
    /// scaled by `elem_size`) between the old block's origin and the new
    /// sub-block's origin — the same computation the reference's
    /// `memory_block_init` performs. Coherency/fetching bitfields are
    /// inherited unchanged, preserving the "`coherency==0` ⇒ host
    /// authoritative" invariant across a split.
    pub fn split_child(&self, elem_size: i64, row_offset: i64, col_offset: i64) -> MemoryBlock {
        let mut replicas = HashMap::new();
        for (&device, replica) in &self.replicas {
            let mut child = Replica {
                coherency: replica.coherency,
                fetching: replica.fetching,
                ..Replica::default()
            };
            for view in &replica.allocations {
                child.allocations.push(AllocView {
                    chunk: view.chunk,
                    base_addr: (view.base_addr as i64 + row_offset * elem_size + col_offset * view.ld * elem_size) as usize,
                    ld: view.ld,
                });
                child.awaiting_accesses.push(Vec::new());
                child.awaiting_forwards.push(Vec::new());
            }
            replicas.insert(device, child);
        }
        MemoryBlock {
            replicas,
            coherency: self.coherency,
            fetching: self.fetching,
        }
    }
}
