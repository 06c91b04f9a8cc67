//! Device election and routing for ready device-tasks (§4.8). Grounded on
//! `src/sched.cc`'s device-assignment path.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

use crate::coherency::CoherencyRegistry;
use crate::datum::DatumKey;
use crate::device::{Device, DeviceId, DeviceMask};
use crate::task::TaskHandle;

/// Round-robins over the non-host devices (§4.8 rule 3).
pub struct RoundRobin {
    next: AtomicU32,
}

impl RoundRobin {
    pub fn new() -> RoundRobin {
        RoundRobin { next: AtomicU32::new(0) }
    }

    pub fn pick(&self, devices: &[Device]) -> DeviceId {
        let candidates: Vec<DeviceId> = devices.iter().map(|d| d.id).filter(|id| !id.is_host()).collect();
        assert!(!candidates.is_empty(), "round-robin election requires at least one non-host device");
        let idx = self.next.fetch_add(1, Ordering::Relaxed) as usize % candidates.len();
        candidates[idx]
    }
}

impl Default for RoundRobin {
    fn default() -> RoundRobin {
        RoundRobin::new()
    }
}

/// `elect_device` (§4.8): applies the three rules in order and records the
/// outcome on the task (`Task::set_elected_device`) for the caller to
/// route on.
pub fn elect_device(
    task: &TaskHandle,
    devices: &[Device],
    coherency: &CoherencyRegistry,
    ocr_datum: impl Fn(usize) -> DatumKey,
    round_robin: &RoundRobin,
) -> DeviceId {
    let elected = if let Some(access_index) = task.ocr_access_index() {
        let access = &task.accesses[access_index];
        let datum_key = ocr_datum(access_index);
        let owners = crate::coherency::who_owns(coherency, datum_key, access);
        pick_uniform(owners).unwrap_or_else(|| round_robin.pick(devices))
    } else if let Some(target) = task.target_device() {
        target
    } else {
        round_robin.pick(devices)
    };
    task.set_elected_device(elected);
    elected
}

fn pick_uniform(mask: DeviceMask) -> Option<DeviceId> {
    let owners: Vec<DeviceId> = mask.iter_devices().collect();
    if owners.is_empty() {
        return None;
    }
    let idx = rand::thread_rng().gen_range(0..owners.len());
    Some(owners[idx])
}
