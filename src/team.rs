//! Teams and work stealing (§3 Team, §4.9, §5 "Teams implement a classical
//! fork-join"). Grounded on `include/xkrt/thread/thread.h` /
//! `src/thread/thread.cc`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_deque::{Steal, Stealer, Worker as Deque};
use parking_lot::{Condvar, Mutex};

use crate::task::TaskHandle;

/// A version-counted barrier (§3 "barrier {atomic n, version, cond,
/// mtx}"): every thread arriving bumps a countdown; the last arrival bumps
/// `version` and wakes everyone waiting on the old version.
pub struct Barrier {
    n_total: u32,
    state: Mutex<BarrierState>,
    cond: Condvar,
}

struct BarrierState {
    remaining: u32,
    version: u64,
}

impl Barrier {
    pub fn new(n_threads: u32) -> Barrier {
        Barrier { n_total: n_threads, state: Mutex::new(BarrierState { remaining: n_threads, version: 0 }), cond: Condvar::new() }
    }

    /// Blocks until every thread in the team has called `wait` at the
    /// current version (§5 "team barrier (`cond_wait` with condition
    /// variable / version number)").
    pub fn wait(&self) {
        let mut state = self.state.lock();
        let my_version = state.version;
        state.remaining -= 1;
        if state.remaining == 0 {
            state.remaining = self.n_total;
            state.version += 1;
            self.cond.notify_all();
        } else {
            while state.version == my_version {
                self.cond.wait(&mut state);
            }
        }
    }
}

/// One team thread's FIFO deque plus a handle usable by other members to
/// steal from it (§4.9).
pub struct Member {
    pub tid: usize,
    deque: Deque<TaskHandle>,
}

impl Member {
    fn new(tid: usize) -> Member {
        Member { tid, deque: Deque::new_fifo() }
    }

    pub fn push(&self, task: TaskHandle) {
        self.deque.push(task);
    }

    fn pop(&self) -> Option<TaskHandle> {
        self.deque.pop()
    }

    pub fn stealer(&self) -> Stealer<TaskHandle> {
        self.deque.stealer()
    }
}

/// A group of worker threads bound to a topology place set (§3 Team).
pub struct Team {
    pub members: Vec<Arc<Member>>,
    stealers: Vec<Stealer<TaskHandle>>,
    pub barrier: Barrier,
    pub critical: Mutex<()>,
    parallel_for_next: AtomicU32,
}

impl Team {
    pub fn new(n_threads: usize) -> Team {
        let members: Vec<Arc<Member>> = (0..n_threads).map(Member::new).map(Arc::new).collect();
        let stealers = members.iter().map(|m| m.stealer()).collect();
        Team { members, stealers, barrier: Barrier::new(n_threads as u32), critical: Mutex::new(()), parallel_for_next: AtomicU32::new(0) }
    }

    pub fn n_threads(&self) -> usize {
        self.members.len()
    }

    /// Hierarchical stealing (§4.9): thread `tid` probes victims in order
    /// `(tid+i) mod n` for `i in [0, n)`; `i=0` is a local pop, every other
    /// `i` is a steal from that victim.
    pub fn next_task(&self, tid: usize) -> Option<TaskHandle> {
        let n = self.members.len();
        for i in 0..n {
            let victim = (tid + i) % n;
            if i == 0 {
                if let Some(task) = self.members[victim].pop() {
                    return Some(task);
                }
                continue;
            }
            loop {
                match self.stealers[victim].steal() {
                    Steal::Success(task) => return Some(task),
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        None
    }

    /// `team_critical_begin`/`team_critical_end` (§6.1): the returned
    /// guard holds the team's single critical-section mutex for its
    /// lifetime. Per §5 lock order this must never be held across any
    /// other lock.
    pub fn critical(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.critical.lock()
    }

    /// `team_parallel_for(f)` (§6.1): splits `0..n` into `self.n_threads()`
    /// chunks, pushes one chunk-closure onto each member's deque, then
    /// barriers. Each worker thread is expected to drain its own deque
    /// (and steal once it drains) before the barrier releases it.
    pub fn parallel_for(&self, n: u32, mut make_task: impl FnMut(u32, u32) -> TaskHandle) {
        let threads = self.n_threads() as u32;
        let chunk = (n + threads - 1) / threads.max(1);
        self.parallel_for_next.store(0, Ordering::SeqCst);
        for (tid, member) in self.members.iter().enumerate() {
            let start = (tid as u32) * chunk;
            let end = (start + chunk).min(n);
            if start < end {
                member.push(make_task(start, end));
            }
        }
        self.barrier.wait();
    }
}
