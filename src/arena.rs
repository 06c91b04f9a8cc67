//! Per-device memory arena (§4.5): a best-fit free-list allocator over one
//! physical memory region (an "Area"), with split-on-alloc, coalesce-on-free
//! and an eviction hook the coherency engine drives on OOM.
//!
//! Chunks live in a growable arena indexed by `ChunkId` rather than behind
//! `Rc`/raw pointers, per §9 "Cycles and back references": allocation
//! views elsewhere in the coherency tree hold a `ChunkId` plus a
//! use-counter bump, never a direct reference to the chunk, so the arena
//! alone decides when a chunk's backing bytes are actually freed.

use crate::error::{ArenaError, Result};

const ALIGN: usize = 8;

fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

pub type ChunkId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Free,
    Used,
}

#[derive(Debug)]
struct Chunk {
    offset: usize,
    size: usize,
    state: ChunkState,
    /// Number of `AllocView`s referencing this chunk (§9). The arena frees
    /// the chunk's backing bytes only once this reaches zero.
    use_counter: u32,
}

/// One physical memory region on a device, carved into best-fit chunks.
pub struct Area {
    device: crate::device::DeviceId,
    capacity: usize,
    chunks: Vec<Chunk>,
    /// Free-list as indices into `chunks`, kept unsorted; best-fit scans
    /// it linearly. Fine at the scale a single device's chunk count
    /// reaches in practice; a size-sorted structure would trade this
    /// module's simplicity for scan speed if that ever becomes hot.
    free_list: Vec<ChunkId>,
}

impl Area {
    pub fn new(device: crate::device::DeviceId, capacity: usize) -> Area {
        let mut chunks = Vec::new();
        chunks.push(Chunk {
            offset: 0,
            size: capacity,
            state: ChunkState::Free,
            use_counter: 0,
        });
        Area {
            device,
            capacity,
            chunks,
            free_list: vec![0],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes_in_use(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Used)
            .map(|c| c.size)
            .sum()
    }

    /// Best-fit over the free list; splits the match if the remainder is
    /// at least half the request (§4.5).
    pub fn allocate(&mut self, size: usize) -> std::result::Result<ChunkId, ArenaError> {
        if size == 0 {
            return Err(ArenaError::ZeroSizedRequest(self.device));
        }
        let size = align_up(size);

        let mut best: Option<(usize, usize)> = None; // (free_list index, waste)
        for (pos, &id) in self.free_list.iter().enumerate() {
            let chunk = &self.chunks[id];
            if chunk.size < size {
                continue;
            }
            let waste = chunk.size - size;
            if best.map_or(true, |(_, best_waste)| waste < best_waste) {
                best = Some((pos, waste));
            }
        }

        let (pos, waste) = best.ok_or(ArenaError::OutOfMemory(self.device, 0, size))?;
        let id = self.free_list.remove(pos);

        if waste >= size / 2 && waste > 0 {
            let remainder_offset = self.chunks[id].offset + size;
            self.chunks[id].size = size;
            let remainder_id = self.chunks.len();
            self.chunks.push(Chunk {
                offset: remainder_offset,
                size: waste,
                state: ChunkState::Free,
                use_counter: 0,
            });
            self.free_list.push(remainder_id);
        }

        self.chunks[id].state = ChunkState::Used;
        Ok(id)
    }

    /// Releases a chunk back to the free list and coalesces it with both
    /// neighbours (by adjacency in byte offset), per §4.5.
    pub fn deallocate(&mut self, id: ChunkId) {
        self.chunks[id].state = ChunkState::Free;
        self.free_list.push(id);
        self.coalesce(id);
    }

    fn coalesce(&mut self, mut id: ChunkId) {
        loop {
            let (offset, size) = (self.chunks[id].offset, self.chunks[id].size);
            let next = self
                .free_list
                .iter()
                .copied()
                .find(|&other| other != id && self.chunks[other].state == ChunkState::Free && self.chunks[other].offset == offset + size);
            let prev = self.free_list.iter().copied().find(|&other| {
                other != id && self.chunks[other].state == ChunkState::Free && self.chunks[other].offset + self.chunks[other].size == offset
            });

            if let Some(next_id) = next {
                self.merge_into(id, next_id);
                continue;
            }
            if let Some(prev_id) = prev {
                self.merge_into(prev_id, id);
                id = prev_id;
                continue;
            }
            break;
        }
    }

    /// Merges `b` into `a` (`a` must be the lower-offset chunk) and drops
    /// `b` from the free list.
    fn merge_into(&mut self, a: ChunkId, b: ChunkId) {
        self.chunks[a].size += self.chunks[b].size;
        self.chunks[b].size = 0;
        self.free_list.retain(|&x| x != b);
    }

    /// Increments a chunk's view use-counter (§9: "a counter updated on
    /// view creation/destruction").
    pub fn retain_chunk(&mut self, id: ChunkId) {
        self.chunks[id].use_counter += 1;
    }

    /// Decrements the use-counter; frees the chunk only when it reaches
    /// zero (§4.5 "Chunk reference counting").
    pub fn release_chunk(&mut self, id: ChunkId) {
        debug_assert!(self.chunks[id].use_counter > 0);
        self.chunks[id].use_counter -= 1;
        if self.chunks[id].use_counter == 0 {
            self.deallocate(id);
        }
    }

    pub fn chunk_offset(&self, id: ChunkId) -> usize {
        self.chunks[id].offset
    }

    pub fn chunk_size(&self, id: ChunkId) -> usize {
        self.chunks[id].size
    }

    /// One eviction pass (§4.5 OOM policy): the caller (the coherency
    /// engine) identifies chunks it can safely evict — replicas not
    /// currently fetching, either stale or redundantly coherent elsewhere
    /// — and calls `release_chunk` on each before retrying `allocate`.
    /// This module only provides the mechanism; eviction candidate
    /// selection lives in `crate::coherency` since it requires the
    /// coherency tree, not the arena, to answer "is this evictable".
    pub fn allocate_with_eviction(
        &mut self,
        size: usize,
        max_passes: u32,
        mut try_evict_one_pass: impl FnMut(&mut Area) -> bool,
    ) -> Result<ChunkId> {
        match self.allocate(size) {
            Ok(id) => return Ok(id),
            Err(ArenaError::ZeroSizedRequest(d)) => return Err(ArenaError::ZeroSizedRequest(d).into()),
            Err(_) => {}
        }
        for pass in 0..max_passes {
            if !try_evict_one_pass(self) {
                break;
            }
            match self.allocate(size) {
                Ok(id) => return Ok(id),
                Err(_) => {
                    log::debug!(target: "xkrt::arena", "eviction pass {} insufficient, retrying", pass);
                    continue;
                }
            }
        }
        Err(ArenaError::OutOfMemory(self.device, max_passes, size).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_roundtrip() {
        let mut area = Area::new(crate::device::DeviceId(1), 1024);
        let a = area.allocate(100).unwrap();
        assert_eq!(area.bytes_in_use(), 104); // aligned to 8
        area.deallocate(a);
        assert_eq!(area.bytes_in_use(), 0);
    }

    #[test]
    fn best_fit_prefers_tighter_remainder() {
        let mut area = Area::new(crate::device::DeviceId(1), 1024);
        let a = area.allocate(64).unwrap();
        let _b = area.allocate(900).unwrap();
        area.deallocate(a);
        let c = area.allocate(32).unwrap();
        assert_eq!(area.chunk_offset(c), 0);
    }

    #[test]
    fn coalesce_merges_adjacent_free_chunks() {
        let mut area = Area::new(crate::device::DeviceId(1), 1024);
        let a = area.allocate(100).unwrap();
        let b = area.allocate(100).unwrap();
        area.deallocate(a);
        area.deallocate(b);
        let big = area.allocate(1024 - 8).unwrap();
        assert_eq!(area.chunk_size(big), 1024 - 8);
    }

    #[test]
    fn oom_after_exhausting_eviction_passes() {
        let mut area = Area::new(crate::device::DeviceId(1), 64);
        let _a = area.allocate(64).unwrap();
        let err = area.allocate_with_eviction(64, 3, |_| false);
        assert!(err.is_err());
    }

    #[test]
    fn eviction_pass_frees_enough_to_satisfy_the_retry() {
        let mut area = Area::new(crate::device::DeviceId(1), 64);
        let a = area.allocate(64).unwrap();
        area.retain_chunk(a);
        let mut evicted = false;
        let id = area
            .allocate_with_eviction(64, 3, |area| {
                if evicted {
                    return false;
                }
                evicted = true;
                area.release_chunk(a);
                true
            })
            .unwrap();
        assert_eq!(area.chunk_offset(id), 0);
        assert_eq!(area.bytes_in_use(), 64);
    }

    #[test]
    fn chunk_refcount_frees_only_at_zero() {
        let mut area = Area::new(crate::device::DeviceId(1), 1024);
        let a = area.allocate(100).unwrap();
        area.retain_chunk(a);
        area.retain_chunk(a);
        area.release_chunk(a);
        assert_eq!(area.bytes_in_use(), 104);
        area.release_chunk(a);
        assert_eq!(area.bytes_in_use(), 0);
    }
}
