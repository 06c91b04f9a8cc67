//! Device identity, lifecycle state, and inter-device affinity (§3 Device).

use std::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;

/// Stable, process-wide device identifier. `HOST` is always device 0; real
/// accelerators are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const HOST: DeviceId = DeviceId(0);

    pub fn is_host(&self) -> bool {
        *self == DeviceId::HOST
    }
}

/// Which vendor backend owns a device (§6.2); the hook table itself lives
/// behind the `Driver` trait in `crate::driver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverType {
    Host,
    Cuda,
    Hip,
    LevelZero,
    OpenCl,
    Sycl,
}

/// Device lifecycle state (§3). Stored as an atomic `u8` so the scheduler
/// and offloader can both check "are we still between `Commit` and `Stop`"
/// without a lock (§5: "a device only accepts commands between Commit and
/// Stop").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    Deallocated = 0,
    Create = 1,
    Init = 2,
    Commit = 3,
    Stop = 4,
    Stopped = 5,
    Destroyed = 6,
}

impl DeviceState {
    fn from_u8(v: u8) -> DeviceState {
        match v {
            0 => DeviceState::Deallocated,
            1 => DeviceState::Create,
            2 => DeviceState::Init,
            3 => DeviceState::Commit,
            4 => DeviceState::Stop,
            5 => DeviceState::Stopped,
            _ => DeviceState::Destroyed,
        }
    }
}

pub struct AtomicDeviceState(AtomicU8);

impl AtomicDeviceState {
    pub fn new(state: DeviceState) -> Self {
        AtomicDeviceState(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> DeviceState {
        DeviceState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: DeviceState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// A device only accepts new commands between `Commit` and `Stop`.
    pub fn accepts_commands(&self) -> bool {
        matches!(self.load(), DeviceState::Commit)
    }
}

bitflags! {
    /// One bit per device in `affinity[d][rank]`: the set of devices
    /// reachable from `d` at a given `PerfRank` (§6.2). Widened past 128
    /// devices would need a `Vec<u64>`; this core targets the realistic
    /// small-N multi-GPU case.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceMask: u128 {
        const NONE = 0;
    }
}

impl DeviceMask {
    pub fn single(id: DeviceId) -> DeviceMask {
        DeviceMask::from_bits_retain(1u128 << id.0)
    }

    pub fn contains_device(&self, id: DeviceId) -> bool {
        self.contains(DeviceMask::single(id))
    }

    pub fn iter_devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        (0..128u32).filter(move |&bit| self.bits() & (1u128 << bit) != 0).map(DeviceId)
    }

    pub fn count(&self) -> u32 {
        self.bits().count_ones()
    }
}

/// Number of distinct relative-cost tiers reported by a driver's affinity
/// matrix (same-device, NVLink/xGMI, PCIe switch, PCIe root, ...).
pub const PERF_RANKS: usize = 4;

/// `affinity[d][rank]` is the set of devices reachable from `d` with
/// relative cost `rank` (rank 0 = same device).
#[derive(Debug, Clone)]
pub struct Affinity {
    pub ranks: [DeviceMask; PERF_RANKS],
}

impl Affinity {
    pub fn same_device_only(id: DeviceId) -> Affinity {
        let mut ranks = [DeviceMask::NONE; PERF_RANKS];
        ranks[0] = DeviceMask::single(id);
        Affinity { ranks }
    }

    /// The cheapest rank at which `self` can reach `other`, if any.
    pub fn rank_to(&self, other: DeviceId) -> Option<usize> {
        self.ranks.iter().position(|mask| mask.contains_device(other))
    }
}

/// A device as tracked by the runtime: identity, lifecycle, and the
/// per-memory-region arenas and per-stream-type offloader state that hang
/// off it (§3). `memories`/`streams` are owned by `crate::arena` and
/// `crate::offloader` respectively and threaded through `Device` at
/// runtime-init time rather than stored here, to keep this module free of
/// a dependency cycle with the allocator and offloader.
pub struct Device {
    pub id: DeviceId,
    pub driver_type: DriverType,
    pub driver_id: u32,
    pub state: AtomicDeviceState,
    pub affinity: Affinity,
    pub n_threads: usize,
}

impl Device {
    pub fn host() -> Device {
        Device {
            id: DeviceId::HOST,
            driver_type: DriverType::Host,
            driver_id: 0,
            state: AtomicDeviceState::new(DeviceState::Commit),
            affinity: Affinity::same_device_only(DeviceId::HOST),
            n_threads: 1,
        }
    }

    pub fn new(id: DeviceId, driver_type: DriverType, driver_id: u32, n_threads: usize) -> Device {
        Device {
            id,
            driver_type,
            driver_id,
            state: AtomicDeviceState::new(DeviceState::Create),
            affinity: Affinity::same_device_only(id),
            n_threads,
        }
    }
}
