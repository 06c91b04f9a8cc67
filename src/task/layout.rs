//! Flag-driven optional sub-structs (§3 Task, §9 "Task variable layout").
//!
//! The reference packs these as in-place extensions at compile-time
//! offsets behind a flags word. Rust has no equivalent layout control
//! without resorting to raw pointer arithmetic that buys nothing here, so
//! each sub-struct is instead an `Option` field on `Task` directly — the
//! flag word (`TaskFlags`) still exists and is kept consistent with which
//! `Option`s are populated, since the scheduler and offloader branch on
//! flags rather than re-deriving them from `Option::is_some` at every call
//! site (matching the reference's "check the flag, not the pointer").

use std::sync::atomic::AtomicI64;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::device::DeviceId;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// Has `dep_info`: participates in dependency resolution and thus
        /// the `DataFetching`/`DataFetched` states.
        const DEPENDENT   = 1 << 0;
        /// Has `det_info`: completes only after an explicit `detach_decr`.
        const DETACHABLE  = 1 << 1;
        /// Has `dev_info`: device-task routed via §4.8 election.
        const DEVICE      = 1 << 2;
        /// Has `mol_info`: may be split before dispatch (§4.7 Moldable).
        const MOLDABLE    = 1 << 3;
        /// Submitted through a team (`team_task_spawn`) rather than
        /// directly.
        const TEAM        = 1 << 4;
    }
}

/// Wait-counter bookkeeping for the dependency resolver (§4.3, §4.7).
/// `wc` is seeded at 1 on creation (the creator's own "not yet committed"
/// ticket); every precedence edge and every in-flight fetch adds one more.
#[derive(Debug)]
pub struct DepInfo {
    pub wait_counter: AtomicI64,
    pub access_count: usize,
}

impl DepInfo {
    pub fn new(access_count: usize) -> DepInfo {
        DepInfo {
            wait_counter: AtomicI64::new(1),
            access_count,
        }
    }
}

/// Detachable-completion bookkeeping (§3, §8 scenario 5): the task
/// completes only once both its kernel callback and an external
/// `detach_decr` have fired. `kernel_done` records the former; the
/// latter is observed by `detach_counter` returning to zero.
#[derive(Debug)]
pub struct DetInfo {
    pub detach_counter: AtomicI64,
    pub kernel_done: Mutex<bool>,
}

impl DetInfo {
    pub fn new() -> DetInfo {
        DetInfo {
            detach_counter: AtomicI64::new(0),
            kernel_done: Mutex::new(false),
        }
    }
}

impl Default for DetInfo {
    fn default() -> Self {
        DetInfo::new()
    }
}

/// Device-routing bookkeeping (§4.8).
#[derive(Debug)]
pub struct DevInfo {
    pub target_device: Mutex<Option<DeviceId>>,
    pub ocr_access_index: Mutex<Option<usize>>,
    pub elected_device: Mutex<Option<DeviceId>>,
}

impl DevInfo {
    pub fn new() -> DevInfo {
        DevInfo {
            target_device: Mutex::new(None),
            ocr_access_index: Mutex::new(None),
            elected_device: Mutex::new(None),
        }
    }
}

impl Default for DevInfo {
    fn default() -> Self {
        DevInfo::new()
    }
}
