//! Driver-backend interface (§6.2): a dynamic-dispatch hook table. Never
//! monomorphise a caller over a concrete driver type (§9 "Dynamic dispatch
//! across driver backends") — every call site above this module goes
//! through `dyn Driver`.

use crate::device::{Affinity, DeviceId, DriverType};
use crate::error::{DriverError, Result};
use crate::offloader::StreamKind;

/// A single asynchronous transfer or kernel command handed to a driver's
/// stream hooks. The driver owns interpretation of `launcher`/`args`; the
/// offloader only ever treats a command as an opaque unit of work with a
/// completion callback (§4.6).
pub struct Command {
    pub kind: StreamKind,
    pub src_device: DeviceId,
    pub dst_device: DeviceId,
    pub src_addr: usize,
    pub dst_addr: usize,
    pub len: usize,
    pub ld_src: i64,
    pub ld_dst: i64,
    pub kernel: Option<Box<dyn FnOnce() + Send>>,
}

/// Outcome of a single `launch`/`progress` poll (§6.2, §4.6 worker loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPoll {
    /// The command was accepted and is now in flight.
    InProgress,
    /// The command has finished.
    Complete,
}

/// The per-backend hook table (§6.2). A `Driver` is shared across every
/// device it owns; `device_id` distinguishes which physical device a call
/// targets. Implementations are expected to be internally synchronized —
/// the offloader calls these hooks from multiple worker threads
/// concurrently, one per device, never two threads for the same device.
pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;

    fn driver_type(&self) -> DriverType;

    /// Number of physical devices this backend can ever expose, independent
    /// of how many are actually selected at `init` (§6.2 `get_ndevices_max`).
    fn ndevices_max(&self) -> usize;

    fn device_affinity(&self, device: DeviceId) -> Affinity;

    fn device_create(&self, device: DeviceId) -> Result<()>;
    fn device_init(&self, device: DeviceId) -> Result<()>;
    fn device_commit(&self, device: DeviceId) -> Result<()>;
    fn device_destroy(&self, device: DeviceId) -> Result<()>;

    /// Total addressable bytes on the device's primary memory region
    /// (§6.2 `memory_device_info`).
    fn memory_device_capacity(&self, device: DeviceId) -> usize;

    /// Registers a host pointer range for pinned/direct DMA use
    /// (§6.1 `register_memory`); a no-op for backends with no notion of
    /// page pinning.
    fn memory_host_register(&self, addr: usize, size: usize) -> Result<()>;
    fn memory_host_unregister(&self, addr: usize, size: usize) -> Result<()>;

    /// Submits `cmd` to `stream`. Returns `InProgress` immediately; actual
    /// completion is observed through `progress`.
    fn stream_launch(&self, device: DeviceId, kind: StreamKind, cmd: &Command) -> Result<DriverPoll>;

    /// Polls in-flight commands on `stream`; returns the number that
    /// completed, in submission order (§5 "within a single stream,
    /// commands complete in submission order").
    fn stream_progress(&self, device: DeviceId, kind: StreamKind) -> Result<usize>;

    /// Blocks the calling thread until at least one in-flight command on
    /// `stream` completes (§4.6 backpressure wait hook).
    fn stream_wait(&self, device: DeviceId, kind: StreamKind) -> Result<()>;
}

/// Validates a `DRIVERS=name1,count1;name2,count2;...` style combination
/// against the registered backends before `runtime_init` proceeds
/// (§6.4, §7 "invalid driver combination is fatal at init").
pub fn validate_combination(requested: &[(DriverType, u32)], available: &[DriverType]) -> Result<()> {
    for (ty, count) in requested {
        if !available.contains(ty) {
            return Err(DriverError::InvalidCombination(format!("no backend registered for {:?}", ty)).into());
        }
        if *count == 0 {
            return Err(DriverError::InvalidCombination(format!("{:?} requested with 0 devices", ty)).into());
        }
    }
    Ok(())
}
