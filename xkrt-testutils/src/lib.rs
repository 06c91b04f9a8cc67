//! In-process `Driver` implementation backing xkrt's integration tests.
//!
//! Grounded on `ocl-extras`: the teacher keeps its test/example helpers
//! (`SubBufferPool`, `CommandGraph`) in a companion crate rather than
//! behind `#[cfg(test)]` in the main crate, since examples need them too.
//! `FakeDriver` plays the same role here: a CPU-backed stand-in for a
//! real accelerator backend, so the scheduler/coherency/offloader stack
//! can be exercised without hardware.
//!
//! Every device gets a flat byte buffer standing in for its memory; "host"
//! addresses are treated as real process pointers, since `Runtime`'s own
//! `memory_host_allocate`/`register_memory` hand out real `Vec<u8>`
//! backing. Commands complete synchronously — `stream_launch` always
//! returns [`DriverPoll::Complete`] — matching the runtime's own
//! synchronous pump model (`Runtime::pump`/`task_wait` drive all progress
//! from the calling thread; nothing here spins a background thread to
//! race against).

use std::collections::HashMap;

use parking_lot::Mutex;

use xkrt::device::Affinity;
use xkrt::driver::{Command, DriverPoll};
use xkrt::offloader::StreamKind;
use xkrt::{DeviceId, Driver, DriverType, Result};

/// A CPU-backed fake accelerator. One `FakeDriver` instance can back any
/// number of devices up to `ndevices_max`; each gets its own buffer of
/// `capacity_per_device` bytes the moment `device_create` runs.
pub struct FakeDriver {
    driver_type: DriverType,
    ndevices_max: usize,
    capacity_per_device: usize,
    memory: Mutex<HashMap<DeviceId, Vec<u8>>>,
}

impl FakeDriver {
    pub fn new(driver_type: DriverType, ndevices_max: usize, capacity_per_device: usize) -> FakeDriver {
        FakeDriver { driver_type, ndevices_max, capacity_per_device, memory: Mutex::new(HashMap::new()) }
    }

    fn copy_device_to_host(&self, device: DeviceId, src_addr: usize, dst_addr: usize, len: usize) {
        let memory = self.memory.lock();
        let buf = memory.get(&device).expect("stream_launch on an uncreated device");
        unsafe {
            std::ptr::copy_nonoverlapping(buf[src_addr..src_addr + len].as_ptr(), dst_addr as *mut u8, len);
        }
    }

    fn copy_host_to_device(&self, device: DeviceId, src_addr: usize, dst_addr: usize, len: usize) {
        let mut memory = self.memory.lock();
        let buf = memory.get_mut(&device).expect("stream_launch on an uncreated device");
        unsafe {
            std::ptr::copy_nonoverlapping(src_addr as *const u8, buf[dst_addr..dst_addr + len].as_mut_ptr(), len);
        }
    }

    fn copy_device_to_device(&self, src: DeviceId, dst: DeviceId, src_addr: usize, dst_addr: usize, len: usize) {
        let mut memory = self.memory.lock();
        let mut staging = vec![0u8; len];
        {
            let src_buf = memory.get(&src).expect("stream_launch on an uncreated device");
            staging.copy_from_slice(&src_buf[src_addr..src_addr + len]);
        }
        let dst_buf = memory.get_mut(&dst).expect("stream_launch on an uncreated device");
        dst_buf[dst_addr..dst_addr + len].copy_from_slice(&staging);
    }
}

impl Driver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn driver_type(&self) -> DriverType {
        self.driver_type
    }

    fn ndevices_max(&self) -> usize {
        self.ndevices_max
    }

    fn device_affinity(&self, device: DeviceId) -> Affinity {
        Affinity::same_device_only(device)
    }

    fn device_create(&self, device: DeviceId) -> Result<()> {
        log::debug!(target: "xkrt_testutils::fake_driver", "device {:?} create", device);
        self.memory.lock().insert(device, vec![0u8; self.capacity_per_device]);
        Ok(())
    }

    fn device_init(&self, _device: DeviceId) -> Result<()> {
        Ok(())
    }

    fn device_commit(&self, _device: DeviceId) -> Result<()> {
        Ok(())
    }

    fn device_destroy(&self, device: DeviceId) -> Result<()> {
        log::debug!(target: "xkrt_testutils::fake_driver", "device {:?} destroy", device);
        self.memory.lock().remove(&device);
        Ok(())
    }

    fn memory_device_capacity(&self, _device: DeviceId) -> usize {
        self.capacity_per_device
    }

    fn memory_host_register(&self, _addr: usize, _size: usize) -> Result<()> {
        Ok(())
    }

    fn memory_host_unregister(&self, _addr: usize, _size: usize) -> Result<()> {
        Ok(())
    }

    fn stream_launch(&self, device: DeviceId, kind: StreamKind, cmd: &Command) -> Result<DriverPoll> {
        match kind {
            StreamKind::H2d => self.copy_host_to_device(device, cmd.src_addr, cmd.dst_addr, cmd.len),
            StreamKind::D2h => self.copy_device_to_host(device, cmd.src_addr, cmd.dst_addr, cmd.len),
            StreamKind::D2d => self.copy_device_to_device(cmd.src_device, cmd.dst_device, cmd.src_addr, cmd.dst_addr, cmd.len),
            StreamKind::Kern => {
                // No kernel-language DSL (xkrt Non-goals §1); a test's
                // kernel body runs as a plain task closure on the host
                // thread instead of through this seam, so there is
                // nothing for a `Kern`-kind command to execute here.
            }
        }
        Ok(DriverPoll::Complete)
    }

    fn stream_progress(&self, _device: DeviceId, _kind: StreamKind) -> Result<usize> {
        // Everything completes inline in `stream_launch`; nothing is ever
        // left in a stream's `pending` ring to discover here.
        Ok(0)
    }

    fn stream_wait(&self, _device: DeviceId, _kind: StreamKind) -> Result<()> {
        Ok(())
    }
}

/// Convenience: a fully initialized single-device `Runtime` over one
/// `FakeDriver`-backed device, for tests that don't care about multi-device
/// topology.
pub fn single_device_runtime(capacity_per_device: usize) -> xkrt::Runtime {
    let driver: std::sync::Arc<dyn Driver> = std::sync::Arc::new(FakeDriver::new(DriverType::Cuda, 1, capacity_per_device));
    let config = xkrt::RuntimeConfig::from_env().expect("default config must parse");
    xkrt::Runtime::init(config, vec![driver], &[(DriverType::Cuda, 1)]).expect("runtime init with a fake driver must not fail")
}

/// Convenience: a `Runtime` over `ndevices` `FakeDriver`-backed devices
/// sharing one driver instance, for tests that exercise D2D transfers.
pub fn multi_device_runtime(ndevices: usize, capacity_per_device: usize) -> xkrt::Runtime {
    let driver: std::sync::Arc<dyn Driver> = std::sync::Arc::new(FakeDriver::new(DriverType::Cuda, ndevices, capacity_per_device));
    let config = xkrt::RuntimeConfig::from_env().expect("default config must parse");
    xkrt::Runtime::init(config, vec![driver], &[(DriverType::Cuda, ndevices as u32)]).expect("runtime init with a fake driver must not fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use xkrt::device::DeviceId as Dev;

    #[test]
    fn copies_host_to_device_and_back() {
        let driver = FakeDriver::new(DriverType::Cuda, 1, 64);
        driver.device_create(Dev(1)).unwrap();

        let host_src = vec![7u8; 16];
        let cmd = Command {
            kind: StreamKind::H2d,
            src_device: Dev::HOST,
            dst_device: Dev(1),
            src_addr: host_src.as_ptr() as usize,
            dst_addr: 0,
            len: 16,
            ld_src: 16,
            ld_dst: 16,
            kernel: None,
        };
        assert_eq!(driver.stream_launch(Dev(1), StreamKind::H2d, &cmd).unwrap(), DriverPoll::Complete);

        let mut host_dst = vec![0u8; 16];
        let cmd_back = Command {
            kind: StreamKind::D2h,
            src_device: Dev(1),
            dst_device: Dev::HOST,
            src_addr: 0,
            dst_addr: host_dst.as_mut_ptr() as usize,
            len: 16,
            ld_src: 16,
            ld_dst: 16,
            kernel: None,
        };
        driver.stream_launch(Dev(1), StreamKind::D2h, &cmd_back).unwrap();

        assert_eq!(host_dst, host_src);
    }
}
