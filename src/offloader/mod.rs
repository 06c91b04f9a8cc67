//! Per-device offloader (§4.6): tiered command queues over driver streams,
//! pumped by a pool of worker threads. Grounded on `src/driver/stream.cc`
//! and `src/driver/queue.cc`.

mod command;
mod stream;
mod worker;

pub use command::{Callback, Slot};
pub use stream::{Stream, StreamKind};
pub use worker::{StreamSet, Worker};

use std::collections::HashMap;
use std::sync::Arc;

use crate::device::DeviceId;
use crate::driver::Command;
use crate::error::Result;

/// A device's full offloader: one `Worker` per configured thread, each
/// with its own `StreamSet`. Submission picks a worker round-robin
/// (mirroring stream round-robin) and hands the command to its stream set.
pub struct Offloader {
    pub device: DeviceId,
    workers: Vec<Arc<Worker>>,
    next_worker: std::sync::atomic::AtomicUsize,
}

impl Offloader {
    pub fn new(device: DeviceId, n_threads: usize, streams_per_worker: HashMap<StreamKind, usize>, capacity: usize, concurrency_limits: HashMap<StreamKind, usize>) -> Offloader {
        let mut workers = Vec::with_capacity(n_threads);
        for _ in 0..n_threads {
            let mut streams: HashMap<StreamKind, Vec<Arc<Stream>>> = HashMap::new();
            for &kind in &StreamKind::ALL {
                let n = *streams_per_worker.get(&kind).unwrap_or(&1);
                let limit = *concurrency_limits.get(&kind).unwrap_or(&capacity);
                let list = (0..n).map(|_| Arc::new(Stream::new(device, kind, capacity, limit))).collect();
                streams.insert(kind, list);
            }
            workers.push(Arc::new(Worker::new(StreamSet::new(streams))));
        }
        // Every worker can steal from every other worker on this device.
        for i in 0..workers.len() {
            let mut stealers = workers[i].stealers.lock();
            for (j, other) in workers.iter().enumerate() {
                if i != j {
                    stealers.push(other.stealer());
                }
            }
        }
        Offloader { device, workers, next_worker: std::sync::atomic::AtomicUsize::new(0) }
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Pushes a ready device-task onto a worker's deque (§4.8 "the chosen
    /// device's per-thread deque receives the task via its worker
    /// selection counter") and wakes it.
    pub fn push_task(&self, task: crate::task::TaskHandle) {
        let idx = self.next_worker.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.workers.len();
        self.workers[idx].deque.push(task);
        self.workers[idx].wake();
    }

    /// Submits a command to the round-robin-selected stream of `kind` on
    /// the round-robin-selected worker, with backpressure (§4.6).
    pub fn submit(&self, kind: StreamKind, command: Command, callback: Callback) -> Result<()> {
        let idx = self.next_worker.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.workers.len();
        let stream = self.workers[idx].streams.pick(kind);
        stream.wait_for_room();
        stream.submit(Slot::new(command, callback))?;
        self.workers[idx].wake();
        Ok(())
    }

    pub fn request_stop(&self) {
        for worker in &self.workers {
            worker.request_stop();
        }
    }
}
