//! Fetch-list merge/reduce optimisation (§4.4 "Merge/reduce optimisation"):
//! coalesce adjacent fetches bound for the same (src, dst, chunk, ld) into
//! one wider 2-D copy.

use crate::access::MemView;
use crate::device::DeviceId;
use crate::region::Rect2;

/// One planned transfer, prior to merge coalescing. `host_view`/`device_view`
/// mirror the access's views restricted to `region`.
#[derive(Debug, Clone)]
pub struct PlannedFetch {
    pub region: Rect2,
    pub src_device: DeviceId,
    pub dst_device: DeviceId,
    pub dst_chunk: crate::arena::ChunkId,
    pub host_view: MemView,
    pub device_view: MemView,
    pub merged: bool,
}

fn horizontally_adjacent(a: &PlannedFetch, b: &PlannedFetch) -> bool {
    a.host_view.ld == b.host_view.ld && a.region.col() == b.region.col() && a.region.row().b == b.region.row().a
}

fn vertically_adjacent(a: &PlannedFetch, b: &PlannedFetch) -> bool {
    a.host_view.ld == b.host_view.ld && a.region.row() == b.region.row() && a.region.col().b == b.region.col().a
}

fn same_route(a: &PlannedFetch, b: &PlannedFetch) -> bool {
    a.src_device == b.src_device && a.dst_device == b.dst_device && a.dst_chunk == b.dst_chunk
}

fn union_adjacent(a: &PlannedFetch, b: &PlannedFetch) -> PlannedFetch {
    let row = crate::region::Interval::new(a.region.row().a.min(b.region.row().a), a.region.row().b.max(b.region.row().b));
    let col = crate::region::Interval::new(a.region.col().a.min(b.region.col().a), a.region.col().b.max(b.region.col().b));
    let mut merged = a.clone();
    merged.region = Rect2::new2(row, col);
    merged
}

/// Sorts `fetches` by start address and coalesces contiguous, same-route
/// entries (§4.4). Suppressed entries are left in place with `merged =
/// true` rather than removed, so callers can still index by the original
/// position while skipping them at launch.
pub fn coalesce(fetches: &mut Vec<PlannedFetch>) {
    fetches.sort_by_key(|f| (f.host_view.base_addr, f.region.row().a, f.region.col().a));

    let mut i = 0;
    while i < fetches.len() {
        let mut j = i + 1;
        while j < fetches.len() {
            if fetches[j].merged || fetches[i].merged {
                j += 1;
                continue;
            }
            if !same_route(&fetches[i], &fetches[j]) {
                j += 1;
                continue;
            }
            if horizontally_adjacent(&fetches[i], &fetches[j]) || vertically_adjacent(&fetches[i], &fetches[j]) {
                let merged = union_adjacent(&fetches[i], &fetches[j]);
                fetches[i] = merged;
                fetches[j].merged = true;
            }
            j += 1;
        }
        i += 1;
    }
}
