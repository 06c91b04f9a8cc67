//! Device worker loop (§4.6). One `Worker` per device thread; it owns a
//! slice of that device's streams (round-robin selected per kind) and a
//! work-stealing deque of ready device-tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_deque::{Stealer, Worker as Deque};
use parking_lot::{Condvar, Mutex};

use crate::driver::Driver;
use crate::offloader::stream::{Stream, StreamKind};
use crate::task::TaskHandle;

/// Picks the next stream of `kind` for a new command, round-robin
/// (§4.6 "stream selection for a new command: round-robin on (worker,
/// stream) per type").
pub struct StreamSet {
    streams: HashMap<StreamKind, Vec<Arc<Stream>>>,
    next: HashMap<StreamKind, AtomicUsize>,
}

impl StreamSet {
    pub fn new(streams: HashMap<StreamKind, Vec<Arc<Stream>>>) -> StreamSet {
        let next = streams.keys().map(|&kind| (kind, AtomicUsize::new(0))).collect();
        StreamSet { streams, next }
    }

    pub fn pick(&self, kind: StreamKind) -> Arc<Stream> {
        let list = self.streams.get(&kind).expect("no stream configured for kind");
        let counter = &self.next[&kind];
        let idx = counter.fetch_add(1, Ordering::Relaxed) % list.len();
        list[idx].clone()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<Stream>> {
        self.streams.values().flatten()
    }
}

/// One device worker thread (§4.6). Blocks on `wakeup` until a task is
/// enqueued, a stream has work, or `stop` is requested.
pub struct Worker {
    pub deque: Deque<TaskHandle>,
    pub stealers: Mutex<Vec<Stealer<TaskHandle>>>,
    pub streams: StreamSet,
    stop: AtomicBool,
    wakeup_mtx: Mutex<bool>,
    wakeup_cvar: Condvar,
}

impl Worker {
    pub fn new(streams: StreamSet) -> Worker {
        Worker {
            deque: Deque::new_fifo(),
            stealers: Mutex::new(Vec::new()),
            streams,
            stop: AtomicBool::new(false),
            wakeup_mtx: Mutex::new(false),
            wakeup_cvar: Condvar::new(),
        }
    }

    pub fn stealer(&self) -> Stealer<TaskHandle> {
        self.deque.stealer()
    }

    pub fn wake(&self) {
        let mut pending = self.wakeup_mtx.lock();
        *pending = true;
        self.wakeup_cvar.notify_one();
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn block_until_woken(&self) {
        let mut pending = self.wakeup_mtx.lock();
        while !*pending {
            self.wakeup_cvar.wait(&mut pending);
        }
        *pending = false;
    }

    /// Hierarchical work-stealing pop (§4.9): local deque first, else
    /// probe the other `n-1` victims in `(tid+i) mod n` order.
    fn steal_one(&self) -> Option<TaskHandle> {
        let stealers = self.stealers.lock();
        for stealer in stealers.iter() {
            loop {
                match stealer.steal() {
                    crossbeam_deque::Steal::Success(task) => return Some(task),
                    crossbeam_deque::Steal::Retry => continue,
                    crossbeam_deque::Steal::Empty => break,
                }
            }
        }
        None
    }

    /// One worker loop iteration (§4.6 steps 1-3). `execute` runs a task
    /// popped from the deque or stolen from a peer; it is responsible for
    /// everything from coherency fetch through kernel submission.
    pub fn run(&self, driver: &dyn Driver, execute: impl Fn(TaskHandle)) {
        loop {
            if self.is_stopping() && self.streams.all().all(|s| !s.has_work()) {
                break;
            }

            let task = self.deque.pop().or_else(|| self.steal_one());
            let found_task = task.is_some();
            if let Some(task) = task {
                execute(task);
            }

            for stream in self.streams.all() {
                if let Err(err) = stream.progress(driver) {
                    crate::error::fatal(err);
                }
                if let Err(err) = stream.launch_ready(driver) {
                    crate::error::fatal(err);
                }
            }

            if !found_task && self.streams.all().all(|s| !s.has_work()) && !self.is_stopping() {
                self.block_until_woken();
            }
        }
    }
}
