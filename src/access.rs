//! Access data model (§3 Access): the declarative read/write specification
//! a task attaches to a user datum, and the bookkeeping the dependency
//! resolver and coherency engine hang off it.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::device::DeviceId;
use crate::region::{Hyperrect, Rect2};
use crate::task::TaskHandle;

/// Read/write intent. `V` (virtual) moves no memory but still
/// participates in dependency resolution (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    R,
    W,
    RW,
    V,
}

impl AccessMode {
    pub fn reads(self) -> bool {
        matches!(self, AccessMode::R | AccessMode::RW)
    }

    pub fn writes(self) -> bool {
        matches!(self, AccessMode::W | AccessMode::RW)
    }

    pub fn is_virtual(self) -> bool {
        matches!(self, AccessMode::V)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Sequential,
    /// Declared but, per §9, only ever exercised behind asserts upstream;
    /// accepted at construction and resolved exactly like `Sequential`
    /// until a coalesced-write implementation lands (§9 open question).
    Commutative,
    Concurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Unified,
    NonUnified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Point,
    Interval,
    Matrix,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AccessState {
    Init = 0,
    Fetching = 1,
    Fetched = 2,
}

impl AccessState {
    fn from_u8(v: u8) -> AccessState {
        match v {
            0 => AccessState::Init,
            1 => AccessState::Fetching,
            _ => AccessState::Fetched,
        }
    }
}

#[derive(Debug)]
pub struct AtomicAccessState(AtomicU8);

impl AtomicAccessState {
    pub fn new(state: AccessState) -> Self {
        AtomicAccessState(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> AccessState {
        AccessState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: AccessState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Addressing for an access's bytes on one side of a fetch: a base
/// address plus leading dimension, sufficient to reach any sub-rect of
/// `region` without consulting the coherency tree again.
#[derive(Debug, Clone, Copy)]
pub struct MemView {
    pub device: DeviceId,
    pub base_addr: usize,
    pub ld: i64,
}

impl MemView {
    pub fn host(base_addr: usize, ld: i64) -> MemView {
        MemView {
            device: DeviceId::HOST,
            base_addr,
            ld,
        }
    }
}

/// A reference to one access owned by a task, used as the edge endpoint
/// in both the dependency domain's successor lists and the coherency
/// tree's pending-fetch waiter lists. Cheap to clone: it is an `Arc`
/// bump plus an index (§4.3: "access nodes are owned by the task").
#[derive(Clone)]
pub struct AccessRef {
    pub task: TaskHandle,
    pub index: usize,
}

impl AccessRef {
    pub fn new(task: TaskHandle, index: usize) -> AccessRef {
        AccessRef { task, index }
    }

    pub fn same_task(&self, other: &AccessRef) -> bool {
        std::sync::Arc::ptr_eq(&self.task, &other.task)
    }

    pub fn access(&self) -> &Access {
        &self.task.accesses[self.index]
    }
}

impl std::fmt::Debug for AccessRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessRef(task={:p}, index={})", std::sync::Arc::as_ptr(&self.task), self.index)
    }
}

/// Attached to a task (§3). An access is owned by exactly one task;
/// `successors` is append-only and is mutated under the dependency
/// domain's precedence-edge protocol (§4.3), never directly.
pub struct Access {
    pub mode: AccessMode,
    pub detached: bool,
    pub concurrency: Concurrency,
    pub scope: Scope,
    pub ty: AccessType,
    pub region: Rect2,
    pub host_view: MemView,
    pub device_view: Mutex<Option<MemView>>,
    state: AtomicAccessState,
    successors: Mutex<Vec<AccessRef>>,
}

impl Access {
    pub fn new(mode: AccessMode, ty: AccessType, region: Rect2, host_view: MemView) -> Access {
        Access {
            mode,
            detached: false,
            concurrency: Concurrency::Sequential,
            scope: Scope::NonUnified,
            ty,
            region,
            host_view,
            device_view: Mutex::new(None),
            state: AtomicAccessState::new(AccessState::Init),
            successors: Mutex::new(Vec::new()),
        }
    }

    pub fn virt(region: Rect2, host_view: MemView) -> Access {
        Access::new(AccessMode::V, AccessType::Null, region, host_view)
    }

    pub fn with_detached(mut self, detached: bool) -> Access {
        self.detached = detached;
        self
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Access {
        self.concurrency = concurrency;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Access {
        self.scope = scope;
        self
    }

    pub fn state(&self) -> AccessState {
        self.state.load()
    }

    pub fn set_state(&self, state: AccessState) {
        self.state.store(state);
    }

    /// Appends `succ` to this access's successor list unless it would be
    /// a redundant edge (§4.3: "same predecessor task already the last of
    /// `pred.successors`"). Returns whether an edge was actually added.
    pub fn push_successor(&self, succ: AccessRef) -> bool {
        let mut successors = self.successors.lock();
        if let Some(last) = successors.last() {
            if last.same_task(&succ) {
                return false;
            }
        }
        successors.push(succ);
        true
    }

    pub fn successors(&self) -> Vec<AccessRef> {
        self.successors.lock().clone()
    }

    pub fn clear_successors(&self) {
        self.successors.lock().clear();
    }

    /// Splits this access's region into two halves along its longer axis
    /// (§4.7 moldable tasks: `access::split(mode=halves)`). Both halves
    /// are freshly constructed accesses (`Init` state, empty successor
    /// list); the caller is responsible for redistributing the original
    /// access's successor edges between them.
    pub fn split_halves(&self) -> (Access, Access) {
        let axis = if self.region.row().len() >= self.region.col().len() { 0 } else { 1 };
        let (lo, hi) = self.region.axes[axis].split_half();
        let mut lo_axes = self.region.axes;
        lo_axes[axis] = lo;
        let mut hi_axes = self.region.axes;
        hi_axes[axis] = hi;

        let build = |region: Rect2| {
            Access::new(self.mode, self.ty, region, self.host_view)
                .with_detached(self.detached)
                .with_concurrency(self.concurrency)
                .with_scope(self.scope)
        };
        (build(Hyperrect::new(lo_axes)), build(Hyperrect::new(hi_axes)))
    }
}
