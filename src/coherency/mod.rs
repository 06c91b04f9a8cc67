//! Coherency engine (§4.4): the hard core. Orchestrates `Fetch`,
//! fetch-completion, and the `who_owns` OCR query over the per-datum
//! coherency tree (`tree.rs`/`block.rs`), driving transfers through the
//! per-device arena (`crate::arena`) and offloader (`crate::offloader`).

pub mod block;
pub mod merge;
pub mod tree;

pub use block::{AllocView, Forward, MemoryBlock, Replica, ALLOC_VIEWS_MAX};
pub use tree::{CoherencyRegistry, CoherencyTree};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::access::{Access, AccessRef, AccessState, MemView};
use crate::arena::Area;
use crate::device::{DeviceId, DeviceMask};
use crate::driver::Command;
use crate::error::Result;
use crate::offloader::{Offloader, StreamKind};
use crate::region::Rect2;

/// Per-device arenas, keyed by device (§4.5). Lock order: a datum's
/// coherency tree lock is always taken before any `Area` lock (§5 rule 1,
/// rule 2).
pub type Arenas = HashMap<DeviceId, Mutex<Area>>;
pub type Offloaders = HashMap<DeviceId, Offloader>;

/// Policy knobs that were global `#if`s in the reference (§9 Open
/// Questions), now plain runtime fields (`crate::config::RuntimeConfig`).
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub max_eviction_retries: u32,
    pub use_d2d_forwarding: bool,
    pub elem_size: i64,
}

/// `Fetch(access, target_device)` (§4.4). `access_ref` identifies the
/// owning task so the fetch-completion path can resume it; `policy`
/// resolves the §9 open questions.
pub fn fetch(
    registry: &CoherencyRegistry,
    datum_key: crate::datum::DatumKey,
    access_ref: &AccessRef,
    target_device: DeviceId,
    arenas: &Arenas,
    offloaders: &Offloaders,
    policy: FetchPolicy,
) -> Result<()> {
    let access = access_ref.access();

    if matches!(access.scope, crate::access::Scope::Unified) {
        // Unified-memory shortcut (§4.4 step 1): no explicit transfer, the
        // backend's unified-memory runtime resolves placement lazily.
        access.set_state(AccessState::Fetched);
        return Ok(());
    }

    let tree_handle = registry.tree_for(datum_key);
    let mut planned = Vec::new();

    {
        let mut tree = tree_handle.lock();
        tree::insert_and_partition(&mut tree, &access.region, policy.elem_size, |sub_rect, block| {
            plan_block(&mut planned, *sub_rect, block, access, target_device, arenas, policy);
        });
    }

    if planned.is_empty() {
        access.set_state(AccessState::Fetched);
        return Ok(());
    }

    merge::coalesce(&mut planned);
    access.set_state(AccessState::Fetching);
    let live = planned.iter().filter(|f| !f.merged).count() as i64;
    access_ref.task.bump_wait_counter(live);

    for one in planned.into_iter().filter(|f| !f.merged) {
        submit_fetch(registry, datum_key, access_ref.clone(), one, offloaders)?;
    }
    Ok(())
}

/// Per-block planning for a single sub-rect of the partition (§4.4 steps
/// 2.c/2.d/2.e), invoked once per `(block, sub-rect)` while the tree lock
/// is held.
fn plan_block(
    out: &mut Vec<merge::PlannedFetch>,
    rect: Rect2,
    block: &mut MemoryBlock,
    access: &Access,
    target_device: DeviceId,
    arenas: &Arenas,
    policy: FetchPolicy,
) {
    if target_device.is_host() {
        plan_host_target(out, rect, block, access);
        return;
    }

    ensure_device_view(block, target_device, rect, arenas, policy);

    if access.mode.reads() {
        plan_device_read(out, rect, block, access, target_device, policy);
    }

    if access.mode.writes() {
        // Preemptive invalidation (§4.4 step 2.e): correct because the
        // dependency protocol already grants this task exclusive access
        // to `rect` before the kernel that will actually write it runs.
        block.invalidate_everywhere();
        block.mark_device_coherent(target_device);
        if let Some(replica) = block.replicas.get_mut(&target_device) {
            if !replica.allocations.is_empty() {
                replica.mark_coherent(0);
            }
        }
    }
}

fn plan_host_target(out: &mut Vec<merge::PlannedFetch>, rect: Rect2, block: &mut MemoryBlock, access: &Access) {
    if !access.mode.reads() || block.coherency.contains_device(DeviceId::HOST) || block.fetching.contains_device(DeviceId::HOST) {
        return;
    }
    let Some(src) = block.coherency.iter_devices().next() else { return };
    let Some(alloc) = block.replica(src).and_then(|r| r.first_coherent_not_fetching()) else { return };
    let view = block.replica(src).unwrap().allocations[alloc];
    block.mark_device_fetching(DeviceId::HOST);
    block.replica_mut(src).mark_fetching(alloc);
    out.push(merge::PlannedFetch {
        region: rect,
        src_device: src,
        dst_device: DeviceId::HOST,
        dst_chunk: view.chunk,
        host_view: access.host_view,
        device_view: MemView { device: src, base_addr: view.base_addr, ld: view.ld },
        merged: false,
    });
}

/// Ensures `target_device` has at least one allocation view backing
/// `block`, allocating a fresh chunk (with OOM eviction retry) if not
/// (§4.4 step 2.d first bullet, §4.5).
fn ensure_device_view(block: &mut MemoryBlock, target_device: DeviceId, rect: Rect2, arenas: &Arenas, policy: FetchPolicy) {
    let has_view = block.replica(target_device).map(|r| !r.allocations.is_empty()).unwrap_or(false);
    if has_view {
        return;
    }
    let Some(area_lock) = arenas.get(&target_device) else {
        return;
    };
    let bytes = ((rect.row().len() * rect.col().len()).max(policy.elem_size)) as usize;
    let result = {
        let mut area = area_lock.lock();
        area.allocate_with_eviction(bytes, policy.max_eviction_retries, |_area| false)
    };
    let chunk = match result {
        Ok(chunk) => chunk,
        Err(err) => crate::error::fatal(err),
    };
    let offset = area_lock.lock().chunk_offset(chunk);
    let replica = block.replica_mut(target_device);
    push_allocation_or_fatal(replica, AllocView { chunk, base_addr: offset, ld: rect.col().len() });
}

fn plan_device_read(out: &mut Vec<merge::PlannedFetch>, rect: Rect2, block: &mut MemoryBlock, access: &Access, target_device: DeviceId, policy: FetchPolicy) {
    if block.coherency.contains_device(target_device) || block.fetching.contains_device(target_device) {
        return;
    }
    let Some(dst_view) = block.replica(target_device).and_then(|r| r.allocations.first().copied()) else {
        return;
    };

    if let Some(src) = block.coherency.iter_devices().find(|&d| d != target_device) {
        // Prefer another device already coherent (§4.4 step 2.d.ii bullet 1).
        if let Some(alloc) = block.replica(src).and_then(|r| r.first_coherent_not_fetching()) {
            block.mark_device_fetching(target_device);
            block.replica_mut(target_device).mark_fetching(0);
            out.push(merge::PlannedFetch {
                region: rect,
                src_device: src,
                dst_device: target_device,
                dst_chunk: dst_view.chunk,
                host_view: access.host_view,
                device_view: MemView { device: target_device, base_addr: dst_view.base_addr, ld: dst_view.ld },
                merged: false,
            });
            let _ = alloc;
        }
        return;
    }

    // `USE_D2D_FORWARDING` (§9 Open Question): when a host fetch of this
    // block is already in flight, the reference registers a forward on
    // that fetch instead of enqueuing a redundant H2D. Doing so here
    // needs the waiter's owning `TaskHandle`, which `plan_block` does not
    // have threaded through from `fetch`'s caller; until that plumbing
    // lands this falls through to issuing its own H2D (DESIGN.md).
    let _ = policy.use_d2d_forwarding;

    block.mark_device_fetching(target_device);
    block.replica_mut(target_device).mark_fetching(0);
    out.push(merge::PlannedFetch {
        region: rect,
        src_device: DeviceId::HOST,
        dst_device: target_device,
        dst_chunk: dst_view.chunk,
        host_view: access.host_view,
        device_view: MemView { device: target_device, base_addr: dst_view.base_addr, ld: dst_view.ld },
        merged: false,
    });
}

fn submit_fetch(registry: &CoherencyRegistry, datum_key: crate::datum::DatumKey, access_ref: AccessRef, planned: merge::PlannedFetch, offloaders: &Offloaders) -> Result<()> {
    let kind = if planned.dst_device.is_host() {
        StreamKind::D2h
    } else if planned.src_device.is_host() {
        StreamKind::H2d
    } else {
        StreamKind::D2d
    };
    let offloader = offloaders.get(&planned.dst_device).or_else(|| offloaders.get(&planned.src_device)).expect("no offloader for fetch endpoint");

    let command = Command {
        kind,
        src_device: planned.src_device,
        dst_device: planned.dst_device,
        src_addr: planned.device_view.base_addr,
        dst_addr: planned.host_view.base_addr,
        len: (planned.region.row().len() * planned.region.col().len()) as usize,
        ld_src: planned.device_view.ld,
        ld_dst: planned.host_view.ld,
        kernel: None,
    };

    let region = planned.region;
    let dst_device = planned.dst_device;
    let tree_handle = registry.tree_for(datum_key);

    offloader.submit(
        kind,
        command,
        Box::new(move || {
            on_fetch_complete(&tree_handle, region, dst_device, &access_ref);
        }),
    )
}

/// Fetch-completion callback (§4.4.2): under the tree lock, clear
/// `fetching`, set `coherency`, collect waiters; outside the lock, resume
/// waiters by decrementing their task's wait counter.
fn on_fetch_complete(tree: &Arc<Mutex<CoherencyTree>>, region: Rect2, dst_device: DeviceId, access_ref: &AccessRef) {
    let mut waiters = Vec::new();
    {
        let mut tree = tree.lock();
        tree.intersect(&region, |_, block: &mut MemoryBlock| {
            block.mark_device_coherent(dst_device);
            if let Some(replica) = block.replicas.get_mut(&dst_device) {
                if let Some(alloc) = (0..replica.allocations.len()).find(|&i| replica.is_fetching(i)) {
                    replica.mark_coherent(alloc);
                    let (w, _forwards) = replica.take_waiters(alloc);
                    waiters.extend(w);
                }
            }
        });
    }

    if access_ref.task.bump_wait_counter(-1) <= 0 {
        access_ref.task.advance_to(crate::task::TaskState::DataFetched);
    }
    for waiter in waiters {
        if waiter.task.bump_wait_counter(-1) <= 0 {
            waiter.task.advance_to(crate::task::TaskState::DataFetched);
        }
    }
}

/// `who_owns` (§4.4 Ownership query): tallies bytes per device across the
/// access's region; returns the devices tied for the maximum.
pub fn who_owns(registry: &CoherencyRegistry, datum_key: crate::datum::DatumKey, access: &Access) -> DeviceMask {
    let tree_handle = registry.tree_for(datum_key);
    let mut bytes: HashMap<DeviceId, i64> = HashMap::new();
    {
        let tree = tree_handle.lock();
        tree.intersect_ref(&access.region, |rect, block: &MemoryBlock| {
            let area = rect.row().len() * rect.col().len();
            for device in block.coherency.iter_devices() {
                *bytes.entry(device).or_insert(0) += area;
            }
        });
    }
    let max = bytes.values().copied().max().unwrap_or(0);
    let mut mask = DeviceMask::NONE;
    if max > 0 {
        for (&device, &b) in &bytes {
            if b == max {
                mask |= DeviceMask::single(device);
            }
        }
    }
    mask
}

/// Registers a fresh allocation view, enforcing `ALLOC_VIEWS_MAX`
/// (§4.4 "Allocation replica cap", §7 "fatal configuration error").
pub fn push_allocation_or_fatal(replica: &mut Replica, view: AllocView) {
    if let Err(err) = replica.push_allocation(view) {
        crate::error::fatal(err);
    }
}
