//! Stream: a dual fixed-capacity ring (`ready`, `pending`) per device per
//! stream kind (§4.6, §3 "Stream / queue"). Grounded on
//! `src/driver/stream.cc`'s `xkrt_stream_t`: two ring buffers sharing a
//! capacity, `pos.r`/`pos.w` monotonically increasing.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::device::DeviceId;
use crate::driver::{Driver, DriverPoll};
use crate::error::{OffloaderError, Result};
use crate::offloader::command::Slot;

/// The four command classes a device's offloader pumps (§4.6). `Kern` is
/// the only class that ever carries a kernel launch; the rest are copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    H2d,
    D2h,
    D2d,
    Kern,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [StreamKind::H2d, StreamKind::D2h, StreamKind::D2d, StreamKind::Kern];
}

struct Ring {
    capacity: usize,
    slots: VecDeque<Slot>,
}

impl Ring {
    fn new(capacity: usize) -> Ring {
        Ring { capacity, slots: VecDeque::with_capacity(capacity) }
    }

    fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// One stream: `ready` holds commands submitted but not yet handed to the
/// driver; `pending` holds commands the driver has accepted and is
/// executing. `concurrency_limit` bounds `pending`'s size independent of
/// `capacity` (§4.6 backpressure); `capacity` bounds `ready` and is the
/// hard configuration `OFFLOADER_CAPACITY` (§6.4).
pub struct Stream {
    pub device: DeviceId,
    pub kind: StreamKind,
    capacity: usize,
    concurrency_limit: usize,
    ready: Mutex<Ring>,
    pending: Mutex<Ring>,
    not_full: Condvar,
}

impl Stream {
    pub fn new(device: DeviceId, kind: StreamKind, capacity: usize, concurrency_limit: usize) -> Stream {
        Stream {
            device,
            kind,
            capacity,
            concurrency_limit,
            ready: Mutex::new(Ring::new(capacity)),
            pending: Mutex::new(Ring::new(capacity)),
            not_full: Condvar::new(),
        }
    }

    /// Submission path (§4.6): allocate a `ready` slot under the stream
    /// lock, fill it, unlock. Fatal if `ready` has no room — the capacity
    /// is a hard configuration (§7 "stream ring full").
    pub fn submit(&self, slot: Slot) -> Result<()> {
        let mut ready = self.ready.lock();
        if ready.is_full() {
            return Err(OffloaderError::StreamRingFull(self.device, self.kind, self.capacity).into());
        }
        ready.slots.push_back(slot);
        Ok(())
    }

    /// Blocks the calling thread until `pending` has room under
    /// `concurrency_limit` (§4.6 backpressure onto the issuing thread).
    #[cfg(not(feature = "busy_polling"))]
    pub fn wait_for_room(&self) {
        let mut pending = self.pending.lock();
        while pending.len() > self.concurrency_limit {
            self.not_full.wait(&mut pending);
        }
    }

    #[cfg(feature = "busy_polling")]
    pub fn wait_for_room(&self) {
        while self.pending.lock().len() > self.concurrency_limit {
            std::hint::spin_loop();
        }
    }

    /// Worker loop step 3 (§4.6): hand every `ready` entry to the driver
    /// until `pending` is full or `ready` drains.
    pub fn launch_ready(&self, driver: &dyn Driver) -> Result<()> {
        loop {
            if self.pending.lock().is_full() {
                break;
            }
            let slot = {
                let mut ready = self.ready.lock();
                match ready.slots.pop_front() {
                    Some(slot) => slot,
                    None => break,
                }
            };
            match driver.stream_launch(self.device, self.kind, &slot.command)? {
                DriverPoll::InProgress => {
                    self.pending.lock().slots.push_back(slot);
                }
                DriverPoll::Complete => {
                    (slot.callback)();
                }
            }
        }
        Ok(())
    }

    /// Worker loop step 2 (§4.6): poll the driver for completions, pop
    /// that many entries off the front of `pending` (submission order,
    /// §5) and run their callbacks outside any lock.
    pub fn progress(&self, driver: &dyn Driver) -> Result<usize> {
        let n = driver.stream_progress(self.device, self.kind)?;
        let mut completed = Vec::with_capacity(n);
        {
            let mut pending = self.pending.lock();
            for _ in 0..n {
                if let Some(slot) = pending.slots.pop_front() {
                    completed.push(slot);
                } else {
                    break;
                }
            }
        }
        let count = completed.len();
        if count > 0 {
            self.not_full.notify_all();
        }
        for slot in completed {
            (slot.callback)();
        }
        Ok(count)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn has_work(&self) -> bool {
        !self.ready.lock().is_empty() || !self.pending.lock().is_empty()
    }
}
