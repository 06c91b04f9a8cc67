//! Moldable task splitting (§4.7, §8 scenario 4).

use std::sync::Arc;

use crate::access::{Access, AccessRef};

use super::layout::DepInfo;
use super::state::TaskState;
use super::{Task, TaskHandle};

/// `split_condition(task, accesses) -> bool`, checked by the device
/// worker immediately before executing a moldable task.
///
/// `Arc` rather than `Box` so a split's children can carry the same
/// condition forward: the device worker rechecks it again before
/// executing *each* child (§8 scenario 4 expects a 4096-byte task with
/// `len > 1024` to keep halving until every leaf is exactly 1024 bytes,
/// not just one level of halving).
pub type SplitCondition = Arc<dyn Fn(&Task) -> bool + Send + Sync>;

pub struct MolInfo {
    pub split_condition: SplitCondition,
}

/// Duplicates `task` into two children, each covering one half of every
/// access's region (§4.7: "duplicates the task ... splits each access
/// into two halves ... adjusts successor edges"). Children keep the same
/// `split_condition` as the parent, so the device worker can keep
/// halving a still-too-large child rather than stopping after one level
/// (§8 scenario 4). The parent's child count is bumped by one (the
/// clone); the original task slot is not reused — callers replace it
/// with both returned handles.
pub fn split(task: &TaskHandle) -> (TaskHandle, TaskHandle) {
    let mut lo_accesses = Vec::with_capacity(task.accesses.len());
    let mut hi_accesses = Vec::with_capacity(task.accesses.len());
    let mut redistribute: Vec<(usize, Vec<AccessRef>)> = Vec::with_capacity(task.accesses.len());

    for (i, access) in task.accesses.iter().enumerate() {
        let (lo, hi) = access.split_halves();
        redistribute.push((i, access.successors()));
        lo_accesses.push(lo);
        hi_accesses.push(hi);
    }

    let dep_info = task.dep_info.as_ref().map(|d| DepInfo::new(d.access_count));
    let lo = Arc::new(Task {
        parent: task.parent.clone(),
        children_count: std::sync::atomic::AtomicI64::new(0),
        state: parking_lot::Mutex::new(TaskState::Allocated),
        format_id: task.format_id,
        flags: task.flags,
        dep_info,
        det_info: None,
        dev_info: task.dev_info.as_ref().map(|_| super::layout::DevInfo::new()),
        mol_info: task.mol_info.as_ref().map(|m| MolInfo { split_condition: m.split_condition.clone() }),
        accesses: lo_accesses,
        body: task.body.clone(),
    });
    let dep_info = task.dep_info.as_ref().map(|d| DepInfo::new(d.access_count));
    let hi = Arc::new(Task {
        parent: task.parent.clone(),
        children_count: std::sync::atomic::AtomicI64::new(0),
        state: parking_lot::Mutex::new(TaskState::Allocated),
        format_id: task.format_id,
        flags: task.flags,
        dep_info,
        det_info: None,
        dev_info: task.dev_info.as_ref().map(|_| super::layout::DevInfo::new()),
        mol_info: task.mol_info.as_ref().map(|m| MolInfo { split_condition: m.split_condition.clone() }),
        accesses: hi_accesses,
        body: task.body.clone(),
    });

    // Each successor keeps an edge to whichever half still conflicts with
    // it; an edge to a half it no longer overlaps is dropped.
    for (i, succs) in redistribute {
        for succ in succs {
            let succ_region = succ.access().region;
            if succ_region.intersects(&lo.accesses[i].region) {
                lo.accesses[i].push_successor(succ.clone());
            }
            if succ_region.intersects(&hi.accesses[i].region) {
                hi.accesses[i].push_successor(succ);
            }
        }
    }

    if let Some(parent) = &task.parent {
        parent.children_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    (lo, hi)
}
