//! Dependency domain (§4.3): per-user-datum last-writer/last-readers
//! tracking that turns overlapping accesses into precedence edges.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::access::{Access, AccessRef};
use crate::datum::DatumKey;
use crate::khp::KhpTree;
use crate::region::Rect2;
use crate::task::TaskState;

/// `(last_writer, last_readers, nwrites_in_subtree)` (§4.3). The subtree
/// write-count is carried per the reference payload shape but is not
/// threaded through `KhpTree::intersect`'s traversal, which already prunes
/// geometrically via each node's `includes` bounding box; re-deriving a
/// true subtree aggregate would need bottom-up maintenance hooks the
/// generic tree does not expose today. Correctness of `Resolve` does not
/// depend on it — only the read-only fast path's extra pruning would.
#[derive(Debug, Default, Clone)]
pub struct DomainPayload {
    pub last_writer: Option<AccessRef>,
    pub last_readers: Vec<AccessRef>,
    pub nwrites_in_subtree: u32,
}

pub type DomainTree = KhpTree<2, DomainPayload>;

/// One domain exists per user datum (§4.3), keyed by `DatumKey`.
#[derive(Default)]
pub struct DomainRegistry {
    domains: Mutex<HashMap<DatumKey, Arc<Mutex<DomainTree>>>>,
}

impl DomainRegistry {
    pub fn new() -> DomainRegistry {
        DomainRegistry::default()
    }

    pub fn domain_for(&self, key: DatumKey) -> Arc<Mutex<DomainTree>> {
        self.domains.lock().entry(key).or_insert_with(|| Arc::new(Mutex::new(DomainTree::new()))).clone()
    }
}

fn make_payload() -> DomainPayload {
    DomainPayload::default()
}

fn on_split(parent: &DomainPayload, _axis: usize, _old: crate::region::Interval, _new: crate::region::Interval) -> DomainPayload {
    parent.clone()
}

/// Establishes `pred → succ`: takes `pred`'s owning task's state lock and,
/// if that task has not yet reached `Completed`, bumps `succ`'s task wait
/// counter and appends the edge (§4.3 "Precedence edge"). Redundant edges
/// (same predecessor task already last in `pred`'s successor list) are
/// coalesced by `Access::push_successor`.
fn add_precedence_edge(pred: &AccessRef, succ: &AccessRef) {
    let state = pred.task.state.lock();
    if state.is_before_completed() {
        if pred.access().push_successor(succ.clone()) {
            succ.task.bump_wait_counter(1);
        }
    }
    drop(state);
}

/// `Resolve(access)` (§4.3): for each rect of `access`, intersects the
/// domain tree, wiring precedence edges against the stored last
/// writer/readers and updating them to reflect this access.
pub fn resolve(domain: &Arc<Mutex<DomainTree>>, access_ref: &AccessRef) {
    let access = access_ref.access();
    if access.mode.is_virtual() && access.region.is_empty() {
        return;
    }
    let mut tree = domain.lock();
    for rect in decompose(access) {
        resolve_rect(&mut tree, &rect, access, access_ref);
    }
}

fn resolve_rect(tree: &mut DomainTree, rect: &Rect2, access: &Access, access_ref: &AccessRef) {
    let is_write = access.mode.writes();
    tree.insert(
        *rect,
        make_payload,
        |_, _, _, _| {},
        on_split,
        |payload, _| {
            if is_write {
                for reader in payload.last_readers.drain(..) {
                    add_precedence_edge(&reader, access_ref);
                }
                if let Some(writer) = payload.last_writer.take() {
                    add_precedence_edge(&writer, access_ref);
                }
                payload.last_writer = Some(access_ref.clone());
                payload.nwrites_in_subtree += 1;
            } else {
                if let Some(writer) = &payload.last_writer {
                    add_precedence_edge(writer, access_ref);
                }
                payload.last_readers.push(access_ref.clone());
            }
        },
    );
}

/// `Put(access)`: seeds the domain without intersecting — used to
/// initialize a region's ownership without creating edges (e.g. the
/// initial distribution phase, §6.1 `distribute_async`).
pub fn put(domain: &Arc<Mutex<DomainTree>>, access_ref: &AccessRef) {
    let access = access_ref.access();
    let mut tree = domain.lock();
    for rect in decompose(access) {
        let is_write = access.mode.writes();
        tree.insert(rect, make_payload, |_, _, _, _| {}, on_split, |payload, _| {
            if is_write {
                payload.last_readers.clear();
                payload.last_writer = Some(access_ref.clone());
                payload.nwrites_in_subtree += 1;
            } else {
                payload.last_readers.push(access_ref.clone());
            }
        });
    }
}

/// `Conflicting(access, out)`: same traversal as `Resolve` but reports
/// the conflicting predecessor accesses instead of adding edges.
pub fn conflicting(domain: &Arc<Mutex<DomainTree>>, access_ref: &AccessRef, out: &mut Vec<AccessRef>) {
    let access = access_ref.access();
    let mut tree = domain.lock();
    for rect in decompose(access) {
        tree.intersect(&rect, |_, payload| {
            if access.mode.writes() {
                out.extend(payload.last_readers.iter().cloned());
                out.extend(payload.last_writer.iter().cloned());
            } else if let Some(writer) = &payload.last_writer {
                out.push(writer.clone());
            }
        });
    }
}

fn decompose(access: &Access) -> Vec<Rect2> {
    vec![access.region]
}
