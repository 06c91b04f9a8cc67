//! Task core (§3 Task, §4.7).

mod layout;
mod moldable;
mod state;

pub use layout::{DepInfo, DetInfo, DevInfo, TaskFlags};
pub use moldable::{split, MolInfo, SplitCondition};
pub use state::TaskState;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::access::Access;

/// The body a device worker invokes once a task reaches `DataFetched`
/// (or `Ready`, for a task with no dependent accesses). Driving an actual
/// kernel-language DSL is out of scope (§1 Non-goals); this is the seam a
/// higher layer or test harness plugs a closure/driver kernel into.
///
/// `Arc<dyn Fn>` rather than `Box<dyn FnOnce>` because moldable splitting
/// (§4.7 "duplicates the task, preserving format and args") hands the
/// same body to both halves; the body reads the region(s) it should act
/// on from `task.accesses` at call time rather than baking them in, so
/// sharing one closure between parent and children is exactly "same
/// format and args, different access regions".
pub type TaskBody = Arc<dyn Fn(&Task) + Send + Sync>;

/// Tasks are reference-counted: successor edges (`AccessRef`), the parent
/// pointer, and the scheduler's ready queues all hold a `TaskHandle`
/// rather than a unique owner, since a task must outlive every dependency
/// edge pointing at one of its accesses (§4.3 invariant).
pub type TaskHandle = Arc<Task>;

pub struct Task {
    pub parent: Option<TaskHandle>,
    pub children_count: AtomicI64,
    pub state: Mutex<TaskState>,
    pub format_id: u32,
    pub flags: TaskFlags,
    pub dep_info: Option<DepInfo>,
    pub det_info: Option<DetInfo>,
    pub dev_info: Option<DevInfo>,
    pub mol_info: Option<MolInfo>,
    pub accesses: Vec<Access>,
    pub body: Option<TaskBody>,
}

impl Task {
    pub fn new(format_id: u32, accesses: Vec<Access>, body: Option<TaskBody>) -> TaskHandle {
        let flags = if accesses.is_empty() {
            TaskFlags::empty()
        } else {
            TaskFlags::DEPENDENT
        };
        Arc::new(Task {
            parent: None,
            children_count: AtomicI64::new(0),
            state: Mutex::new(TaskState::Allocated),
            format_id,
            flags,
            dep_info: if flags.contains(TaskFlags::DEPENDENT) {
                Some(DepInfo::new(accesses.len()))
            } else {
                Some(DepInfo::new(0))
            },
            det_info: None,
            dev_info: None,
            mol_info: None,
            accesses,
            body,
        })
    }

    /// Builder methods below mutate in place and must be called before
    /// the handle is shared (i.e. directly off `Task::new`, strong count
    /// 1); they panic otherwise.
    fn unshare(self: TaskHandle) -> Task {
        Arc::try_unwrap(self).unwrap_or_else(|_| panic!("task builder methods require an unshared handle"))
    }

    pub fn with_detachable(self: TaskHandle) -> TaskHandle {
        let mut task = self.unshare();
        task.flags |= TaskFlags::DETACHABLE;
        task.det_info = Some(DetInfo::new());
        Arc::new(task)
    }

    pub fn with_target_device(self: TaskHandle, dev: crate::device::DeviceId) -> TaskHandle {
        let mut task = self.unshare();
        task.flags |= TaskFlags::DEVICE;
        let dev_info = DevInfo::new();
        *dev_info.target_device.lock() = Some(dev);
        task.dev_info = Some(dev_info);
        Arc::new(task)
    }

    /// Marks `access_index` as the access whose current owner (§4.4
    /// `who_owns`) decides device election (§4.8 rule 1), instead of an
    /// explicit target device or plain round-robin.
    pub fn with_ocr_access_index(self: TaskHandle, access_index: usize) -> TaskHandle {
        let mut task = self.unshare();
        task.flags |= TaskFlags::DEVICE;
        let dev_info = task.dev_info.take().unwrap_or_else(DevInfo::new);
        *dev_info.ocr_access_index.lock() = Some(access_index);
        task.dev_info = Some(dev_info);
        Arc::new(task)
    }

    pub fn with_moldable(self: TaskHandle, split_condition: SplitCondition) -> TaskHandle {
        let mut task = self.unshare();
        task.flags |= TaskFlags::MOLDABLE;
        task.mol_info = Some(MolInfo { split_condition });
        Arc::new(task)
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Decrements the task's initial wait counter (seeded at 1). Returns
    /// `true` the instant it reaches zero, i.e. the task is now `Ready`
    /// and the caller (the committing thread) is responsible for routing
    /// it per §4.8.
    pub fn commit(&self) -> bool {
        let Some(dep) = &self.dep_info else {
            self.advance_to(TaskState::Ready);
            return true;
        };
        let prev = dep.wait_counter.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.advance_to(TaskState::Ready);
            true
        } else {
            false
        }
    }

    /// Called once per established precedence edge and once per launched
    /// fetch (§4.3, §4.7 "fetching counter"). `n` may be negative for the
    /// in-flight ticket's own decrement.
    pub fn bump_wait_counter(&self, n: i64) -> i64 {
        let dep = self.dep_info.as_ref().expect("bump_wait_counter on a task without dep_info");
        dep.wait_counter.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Transitions forward, asserting the monotonic-advance invariant
    /// (§3). The task `state` lock is the leaf lock in the canonical
    /// order (§5) — callers must not hold any other lock while calling.
    pub fn advance_to(&self, next: TaskState) {
        let mut state = self.state.lock();
        debug_assert!(*state <= next, "task state must advance monotonically");
        *state = next;
    }

    pub fn is_detachable(&self) -> bool {
        self.flags.contains(TaskFlags::DETACHABLE)
    }

    pub fn is_moldable(&self) -> bool {
        self.flags.contains(TaskFlags::MOLDABLE)
    }

    pub fn target_device(&self) -> Option<crate::device::DeviceId> {
        self.dev_info.as_ref().and_then(|d| *d.target_device.lock())
    }

    pub fn ocr_access_index(&self) -> Option<usize> {
        self.dev_info.as_ref().and_then(|d| *d.ocr_access_index.lock())
    }

    pub fn elected_device(&self) -> Option<crate::device::DeviceId> {
        self.dev_info.as_ref().and_then(|d| *d.elected_device.lock())
    }

    pub fn set_elected_device(&self, dev: crate::device::DeviceId) {
        if let Some(info) = &self.dev_info {
            *info.elected_device.lock() = Some(dev);
        }
    }

    /// `detach_incr`: called from within a detachable task's own body to
    /// register an external completion blocker (§3, §8 scenario 5).
    pub fn detach_incr(&self) {
        let det = self.det_info.as_ref().expect("detach_incr on a non-detachable task");
        det.detach_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// `detach_decr`: called by an external thread once its work is done.
    /// Returns `true` iff this call is the one that unblocks completion
    /// (counter reaches zero and the kernel callback already fired).
    pub fn detach_decr(&self) -> bool {
        let det = self.det_info.as_ref().expect("detach_decr on a non-detachable task");
        let remaining = det.detach_counter.fetch_sub(1, Ordering::SeqCst) - 1;
        remaining == 0 && *det.kernel_done.lock()
    }

    /// Runs the task body, if any, then advances to `Completed` unless
    /// this is a detachable task still awaiting `detach_decr` (§3, §8
    /// scenario 5: "the task transitions to `Completed` only after the
    /// external decrement, not at kernel-callback time").
    pub fn run_and_maybe_complete(self: &TaskHandle) -> bool {
        if let Some(body) = &self.body {
            body(self);
        }
        if let Some(det) = &self.det_info {
            *det.kernel_done.lock() = true;
            if det.detach_counter.load(Ordering::SeqCst) != 0 {
                return false;
            }
        }
        self.advance_to(TaskState::Completed);
        true
    }
}
