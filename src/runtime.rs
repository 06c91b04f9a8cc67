//! Runtime façade (§6.1): the crate's public entry points, wiring the
//! dependency/coherency engines, per-device arenas and offloaders,
//! scheduler, and teams into one handle. Grounded on
//! `include/xkrt/runtime.h` / `api/c/src/xkrt.cc`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::access::{Access, AccessMode, AccessRef, AccessType, Concurrency, MemView, Scope};
use crate::arena::Area;
use crate::coherency::{self, Arenas, CoherencyRegistry, FetchPolicy, Offloaders};
use crate::config::RuntimeConfig;
use crate::datum::{DatumKey, UserDatum};
use crate::dependency::{self, DomainRegistry};
use crate::device::{Device, DeviceId, DriverType};
use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::offloader::{Offloader, StreamKind};
use crate::region::{Interval, MatrixTile, Rect2};
use crate::scheduler::{self, RoundRobin};
use crate::task::{Task, TaskBody, TaskFlags, TaskHandle, TaskState};
use crate::team::Team;

/// `distribute_async`'s ownership pattern (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributeKind {
    Cyclic1D,
    Cyclic2D,
}

/// The runtime handle returned by `runtime_init` (§6.1). Every field the
/// public methods below touch is behind the same kind of interior
/// synchronization the reference protects with its own locks (§5).
pub struct Runtime {
    pub config: RuntimeConfig,
    pub devices: Vec<Device>,
    drivers: HashMap<DriverType, Arc<dyn Driver>>,
    arenas: Arenas,
    offloaders: Offloaders,
    dependency: DomainRegistry,
    coherency: CoherencyRegistry,
    host_team: Team,
    round_robin: RoundRobin,
    /// Device tasks whose fetches are still in flight (§4.7 `DataFetching`).
    /// Drained by `pump` once each one's wait counter reaches zero, since
    /// nothing here spins a dedicated progression thread (§6.4
    /// `pause_progression_threads`) — callers drive progress by calling
    /// `pump`/`task_wait` themselves.
    pending_device: Mutex<Vec<(TaskHandle, DeviceId)>>,
}

impl Runtime {
    /// `runtime_init` (§6.1). `drivers` is the set of backends available
    /// to combine per `config`'s `DRIVERS` tunable (§6.4); validated via
    /// `crate::driver::validate_combination` before any device is created.
    pub fn init(config: RuntimeConfig, drivers: Vec<Arc<dyn Driver>>, requested: &[(DriverType, u32)]) -> Result<Runtime> {
        let available: Vec<DriverType> = drivers.iter().map(|d| d.driver_type()).collect();
        crate::driver::validate_combination(requested, &available)?;

        let mut devices = vec![Device::host()];
        let mut arenas: Arenas = HashMap::new();
        let mut offloaders: Offloaders = HashMap::new();
        let mut drivers_by_type = HashMap::new();
        for driver in &drivers {
            drivers_by_type.insert(driver.driver_type(), driver.clone());
        }

        let mut global_id = 1u32;
        for &(ty, count) in requested {
            let driver = drivers_by_type.get(&ty).cloned().ok_or_else(|| DriverError::Unregistered(DeviceId(global_id)))?;
            for local in 0..count {
                let id = DeviceId(global_id);
                driver.device_create(id)?;
                driver.device_init(id)?;
                driver.device_commit(id)?;
                let n_threads = 1;
                let mut device = Device::new(id, ty, local, n_threads);
                device.affinity = driver.device_affinity(id);
                device.state.store(crate::device::DeviceState::Commit);
                devices.push(device);

                let capacity = (driver.memory_device_capacity(id)).max(1);
                arenas.insert(id, Mutex::new(Area::new(id, capacity)));

                let per_kind = [
                    (StreamKind::H2d, config.h2d.n_streams.max(1) as usize),
                    (StreamKind::D2h, config.d2h.n_streams.max(1) as usize),
                    (StreamKind::D2d, config.d2d.n_streams.max(1) as usize),
                    (StreamKind::Kern, config.kern.n_streams.max(1) as usize),
                ]
                .into_iter()
                .collect::<HashMap<_, _>>();
                let limits = [
                    (StreamKind::H2d, config.h2d.concurrency_per_stream.max(1) as usize),
                    (StreamKind::D2h, config.d2h.concurrency_per_stream.max(1) as usize),
                    (StreamKind::D2d, config.d2d.concurrency_per_stream.max(1) as usize),
                    (StreamKind::Kern, config.kern.concurrency_per_stream.max(1) as usize),
                ]
                .into_iter()
                .collect::<HashMap<_, _>>();
                offloaders.insert(id, Offloader::new(id, n_threads, per_kind, config.offloader_capacity, limits));

                global_id += 1;
            }
        }

        Ok(Runtime {
            config,
            devices,
            drivers: drivers_by_type,
            arenas,
            offloaders,
            dependency: DomainRegistry::new(),
            coherency: CoherencyRegistry::new(),
            host_team: Team::new(1),
            round_robin: RoundRobin::new(),
            pending_device: Mutex::new(Vec::new()),
        })
    }

    /// `runtime_deinit` (§6.1, §5 "cancellation"): requests every
    /// offloader's workers to stop, then tears down devices in reverse
    /// order. Tasks already `Ready` but not dispatched are abandoned
    /// (§5 "Cancellation").
    pub fn deinit(self) -> Result<()> {
        for offloader in self.offloaders.values() {
            offloader.request_stop();
        }
        for device in self.devices.iter().rev() {
            if device.id.is_host() {
                continue;
            }
            if let Some(driver) = self.drivers.get(&device.driver_type) {
                driver.device_destroy(device.id)?;
            }
        }
        Ok(())
    }

    /// `runtime_reset`: drops the dependency/coherency state without
    /// tearing down devices, leaving every user datum's tree empty again.
    pub fn reset(&mut self) {
        self.dependency = DomainRegistry::new();
        self.coherency = CoherencyRegistry::new();
    }

    fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy { max_eviction_retries: self.config.max_eviction_retries, use_d2d_forwarding: self.config.use_d2d_forwarding, elem_size: 1 }
    }

    /// `register_memory(ptr, size)` (§6.1): registers a host interval as a
    /// user datum, seeding its domain/coherency trees as host-authoritative
    /// (no device holds a replica yet).
    pub fn register_memory(&self, addr: usize, size: usize) -> Result<UserDatum> {
        for driver in self.drivers.values() {
            driver.memory_host_register(addr, size)?;
        }
        Ok(UserDatum::Interval { addr, size })
    }

    pub fn unregister_memory(&self, datum: UserDatum) -> Result<()> {
        if let UserDatum::Interval { addr, size } = datum {
            for driver in self.drivers.values() {
                driver.memory_host_unregister(addr, size)?;
            }
        }
        Ok(())
    }

    /// `distribute_async` (§6.1): seeds `datum`'s coherency tree with a
    /// device ownership pattern by marking each `block`-sized (and, for
    /// `Cyclic2D`, `halo`-widened) tile coherent on its owning device —
    /// no bytes move yet, this only primes the OCR/fetch machinery's view
    /// of "who already has this".
    pub fn distribute_async(&self, datum: UserDatum, kind: DistributeKind, region: Rect2, block_rows: i64, block_cols: i64, halo: i64, owners: &[DeviceId]) -> Result<()> {
        assert!(!owners.is_empty(), "distribute_async requires at least one owning device");
        let key = datum.key();
        let tree_handle = self.coherency.tree_for(key);
        let mut tree = tree_handle.lock();

        let row_tiles = ((region.row().len() + block_rows - 1) / block_rows).max(1);
        let col_tiles = match kind {
            DistributeKind::Cyclic1D => 1,
            DistributeKind::Cyclic2D => ((region.col().len() + block_cols - 1) / block_cols).max(1),
        };

        let mut owner_idx = 0usize;
        for r in 0..row_tiles {
            for c in 0..col_tiles {
                let row_a = (region.row().a + r * block_rows - halo).max(region.row().a);
                let row_b = (row_a + block_rows + halo).min(region.row().b);
                let col_a = if matches!(kind, DistributeKind::Cyclic2D) { (region.col().a + c * block_cols - halo).max(region.col().a) } else { region.col().a };
                let col_b = if matches!(kind, DistributeKind::Cyclic2D) { (col_a + block_cols + halo).min(region.col().b) } else { region.col().b };
                let tile = Rect2::new2(Interval::new(row_a, row_b), Interval::new(col_a, col_b));
                let owner = owners[owner_idx % owners.len()];
                owner_idx += 1;

                tree.insert(
                    tile,
                    crate::coherency::MemoryBlock::default,
                    |_, _, _, _| {},
                    |parent: &crate::coherency::MemoryBlock, _axis, _old, _new| crate::coherency::MemoryBlock { coherency: parent.coherency, fetching: parent.fetching, replicas: HashMap::new() },
                    move |payload, _| {
                        payload.mark_device_coherent(owner);
                    },
                );
            }
        }
        Ok(())
    }

    /// `copy_async` (§6.1): spawns `n_chunks` virtual-read copy tasks, one
    /// per equal slice of `size`, each a plain H2D/D2H/D2D transfer task
    /// with no dependency fan-out beyond the copied range.
    pub fn copy_async(&self, size: usize, dst_dev: DeviceId, dst_addr: usize, src_dev: DeviceId, src_addr: usize, n_chunks: usize) -> Result<Vec<TaskHandle>> {
        let n_chunks = n_chunks.max(1);
        let chunk = (size + n_chunks - 1) / n_chunks;
        let mut tasks = Vec::with_capacity(n_chunks);
        for i in 0..n_chunks {
            let off = i * chunk;
            let len = chunk.min(size.saturating_sub(off));
            if len == 0 {
                break;
            }
            let region = Rect2::new2(Interval::new(off as i64, (off + len) as i64), Interval::new(0, 1));
            let host_view = MemView { device: src_dev, base_addr: src_addr + off, ld: len as i64 };
            let access = Access::virt(region, host_view);
            let kind = if dst_dev.is_host() { StreamKind::D2h } else if src_dev.is_host() { StreamKind::H2d } else { StreamKind::D2d };
            let offloader = self.offloaders.get(&dst_dev).or_else(|| self.offloaders.get(&src_dev));
            let task = Task::new(0, vec![access], None);
            if let Some(offloader) = offloader {
                let command = crate::driver::Command { kind, src_device: src_dev, dst_device: dst_dev, src_addr: src_addr + off, dst_addr: dst_addr + off, len, ld_src: len as i64, ld_dst: len as i64, kernel: None };
                let completion = task.clone();
                offloader.submit(kind, command, Box::new(move || { completion.advance_to(TaskState::Completed); }))?;
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// `task_spawn` (§6.1): builds accesses' resolve step (§4.7 "Resolve"),
    /// then commits (§4.7 "Commit"). Returns the spawned handle; the
    /// caller is free to attach it as a parent of further children before
    /// it completes.
    pub fn task_spawn(&self, format_id: u32, accesses: Vec<(UserDatum, Access)>, body: Option<TaskBody>) -> TaskHandle {
        let (_datums, access_list): (Vec<UserDatum>, Vec<Access>) = accesses.into_iter().unzip();
        let task = Task::new(format_id, access_list, body);
        for (index, datum) in _datums.iter().enumerate() {
            let domain = self.dependency.domain_for(datum.key());
            let access_ref = AccessRef::new(task.clone(), index);
            dependency::resolve(&domain, &access_ref);
        }
        self.commit(&task, &_datums);
        task
    }

    /// Entry point for tasks built directly off `Task::new` plus builder
    /// methods (`with_target_device`/`with_ocr_access_index`/
    /// `with_detachable`/`with_moldable`) rather than through `task_spawn`'s
    /// plain-dependent-task path.
    pub fn spawn_built(&self, task: TaskHandle, datums: &[UserDatum]) -> TaskHandle {
        for (index, datum) in datums.iter().enumerate() {
            let domain = self.dependency.domain_for(datum.key());
            let access_ref = AccessRef::new(task.clone(), index);
            dependency::resolve(&domain, &access_ref);
        }
        self.commit(&task, datums);
        task
    }

    /// `team_task_spawn` (§6.1): identical resolution/commit path, but the
    /// host-routed case pushes onto `team`'s calling member instead of the
    /// runtime's single implicit host team.
    pub fn team_task_spawn(&self, team: &Team, tid: usize, format_id: u32, accesses: Vec<(UserDatum, Access)>, body: Option<TaskBody>) -> TaskHandle {
        let (_datums, access_list): (Vec<UserDatum>, Vec<Access>) = accesses.into_iter().unzip();
        let task = Task::new(format_id, access_list, body);
        for (index, datum) in _datums.iter().enumerate() {
            let domain = self.dependency.domain_for(datum.key());
            let access_ref = AccessRef::new(task.clone(), index);
            dependency::resolve(&domain, &access_ref);
        }
        if task.commit() {
            self.route_ready(&task, Some(&_datums), Some((team, tid)));
        }
        task
    }

    fn commit(&self, task: &TaskHandle, datums: &[UserDatum]) {
        if task.commit() {
            self.route_ready(task, Some(datums), None);
        }
    }

    /// §4.7 "Commit": routes a task that just became `Ready` — host-tasks
    /// to a team deque, device-tasks through device election (§4.8) and
    /// the coherency fetch path (§4.4) before the elected device's
    /// offloader ever sees it. `datums` is `None` for tasks with no
    /// surviving user-datum identity — moldable split children and
    /// dependency-graph-resumed successors (DESIGN.md) — which fall back
    /// to plain round-robin election (§4.8 rule 3) rather than OCR.
    fn route_ready(&self, task: &TaskHandle, datums: Option<&[UserDatum]>, team: Option<(&Team, usize)>) {
        if !task.flags.contains(TaskFlags::DEVICE) {
            match team {
                Some((team, tid)) => team.members[tid].push(task.clone()),
                None => self.host_team.members[0].push(task.clone()),
            }
            return;
        }

        let device = scheduler::elect_device(
            task,
            &self.devices,
            &self.coherency,
            |idx| datums.and_then(|d| d.get(idx)).map(|d| d.key()).unwrap_or(DatumKey::Handle { ptr: 0 }),
            &self.round_robin,
        );
        if task.accesses.is_empty() {
            self.dispatch_kernel(task, device);
            return;
        }

        let Some(datums) = datums else {
            // No per-access datum identity to fetch against (moldable
            // child, graph-resumed successor): the precedence edges
            // already guarantee correct ordering, so the task is
            // dispatched straight to its elected device without a fresh
            // coherency fetch.
            self.dispatch_kernel(task, device);
            return;
        };

        // One "planning" ticket held across the whole submission loop below
        // (`coherency::fetch` adds one more per actual live transfer it
        // submits); releasing it only after every access has been planned
        // means a task with zero live transfers — every access already
        // coherent — still reaches 0 right here instead of never at all.
        task.bump_wait_counter(1);
        for (index, datum) in datums.iter().enumerate() {
            let access_ref = AccessRef::new(task.clone(), index);
            if let Err(err) = coherency::fetch(&self.coherency, datum.key(), &access_ref, device, &self.arenas, &self.offloaders, self.fetch_policy()) {
                crate::error::fatal(err);
            }
        }
        if task.bump_wait_counter(-1) <= 0 {
            task.advance_to(TaskState::DataFetched);
            self.dispatch_kernel(task, device);
        } else {
            self.pending_device.lock().push((task.clone(), device));
        }
    }

    /// Progresses every device's streams (running any fetch-completion
    /// callbacks due) and dispatches device tasks that have become
    /// `DataFetched` since the last call. There is no dedicated
    /// progression thread (§6.4 `pause_progression_threads`); callers —
    /// chiefly `task_wait` — are expected to call this themselves.
    pub fn pump(&self) {
        for offloader in self.offloaders.values() {
            let Some(driver) = self.devices.iter().find(|d| d.id == offloader.device).and_then(|d| self.drivers.get(&d.driver_type)) else {
                continue;
            };
            for worker in offloader.workers() {
                for stream in worker.streams.all() {
                    if let Err(err) = stream.progress(driver.as_ref()) {
                        crate::error::fatal(err);
                    }
                    if let Err(err) = stream.launch_ready(driver.as_ref()) {
                        crate::error::fatal(err);
                    }
                }
            }
        }

        let ready: Vec<(TaskHandle, DeviceId)> = {
            let mut pending = self.pending_device.lock();
            let mut ready = Vec::new();
            pending.retain(|(task, device)| {
                if task.state() == TaskState::DataFetched {
                    ready.push((task.clone(), *device));
                    false
                } else {
                    true
                }
            });
            ready
        };
        for (task, device) in ready {
            self.dispatch_kernel(&task, device);
        }
    }

    /// §4.7 Moldable: immediately before a moldable task would run, checks
    /// its split condition and, if true, halves it into two children that
    /// re-enter routing in its place instead of ever executing the
    /// original task body.
    fn dispatch_kernel(&self, task: &TaskHandle, device: DeviceId) {
        if task.is_moldable() {
            if let Some(mol) = &task.mol_info {
                if (mol.split_condition)(task) {
                    let (lo, hi) = crate::task::split(task);
                    for child in [lo, hi] {
                        if child.commit() {
                            self.route_ready(&child, None, None);
                        }
                    }
                    return;
                }
            }
        }

        task.advance_to(TaskState::DataFetched);
        if let Some(offloader) = self.offloaders.get(&device) {
            offloader.push_task(task.clone());
        }
        let completed = self.execute_on_worker(task);
        if completed {
            self.complete(task);
        }
    }

    /// Runs a task's body synchronously (used both by the host path and,
    /// in this port, in place of a real device worker thread executing a
    /// kernel launch) and returns whether it reached `Completed` (it may
    /// not, if `Detachable`, §3 invariant).
    pub fn execute_on_worker(&self, task: &TaskHandle) -> bool {
        task.run_and_maybe_complete()
    }

    /// §4.7 "Task completion": decrements the parent's child counter,
    /// then for each access's successors decrements their wait counter,
    /// routing any that reach zero.
    pub fn complete(&self, task: &TaskHandle) {
        if let Some(parent) = &task.parent {
            parent.children_count.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        }
        for access in &task.accesses {
            for succ in access.successors() {
                if succ.task.commit() {
                    // The successor has no surviving datum context here
                    // (completion fires from inside the dependency graph,
                    // not from a fresh `task_spawn` call); `route_ready`
                    // falls back to plain round-robin election for it.
                    self.route_ready(&succ.task, None, None);
                }
            }
            access.clear_successors();
        }
    }

    /// `task_detachable_incr`/`task_detachable_decr` (§6.1, §8 scenario 5).
    pub fn task_detachable_incr(&self, task: &TaskHandle) {
        task.detach_incr();
    }

    pub fn task_detachable_decr(&self, task: &TaskHandle) {
        if task.detach_decr() {
            task.advance_to(TaskState::Completed);
            self.complete(task);
        }
    }

    /// `task_wait` (§6.1, §5 "exponential backoff + work-stealing"):
    /// blocks the calling thread, helping drain the host team's deque
    /// while waiting, until `task` reaches `Completed`.
    pub fn task_wait(&self, task: &TaskHandle) {
        let mut backoff = Duration::from_micros(1);
        loop {
            if task.state() == TaskState::Completed {
                return;
            }
            self.pump();
            if let Some(stolen) = self.host_team.next_task(0) {
                let completed = self.execute_on_worker(&stolen);
                if completed {
                    self.complete(&stolen);
                }
                continue;
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(Duration::from_millis(10));
        }
    }

    pub fn team_create(&self, n_threads: usize) -> Team {
        Team::new(n_threads)
    }

    pub fn memory_device_allocate(&self, device: DeviceId, size: usize) -> Result<crate::arena::ChunkId> {
        let area = self.arenas.get(&device).ok_or(DriverError::Unregistered(device))?;
        Ok(area.lock().allocate(size)?)
    }

    pub fn memory_device_deallocate(&self, device: DeviceId, chunk: crate::arena::ChunkId) {
        if let Some(area) = self.arenas.get(&device) {
            area.lock().deallocate(chunk);
        }
    }

    pub fn memory_host_allocate(&self, size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    pub fn memory_unified_allocate(&self, size: usize) -> Vec<u8> {
        // No distinct unified allocator in this core (driver-specific);
        // backed the same as a host buffer, carrying `Scope::Unified` on
        // the accesses that touch it instead (§4.4 step 1).
        vec![0u8; size]
    }

    pub fn device_get(&self, global_id: u32) -> Option<&Device> {
        self.devices.iter().find(|d| d.id.0 == global_id)
    }

    pub fn driver_get(&self, ty: DriverType) -> Option<Arc<dyn Driver>> {
        self.drivers.get(&ty).cloned()
    }

    pub fn ndevices(&self) -> usize {
        self.devices.len() - 1 // exclude host
    }

    pub fn ndevices_max(&self) -> usize {
        self.drivers.values().map(|d| d.ndevices_max()).sum()
    }
}

/// Builds the `(mode, type, region, host_view)` tuple for a flat interval
/// access (§3 Access, §9 "1-D interval accesses are internally promoted to
/// 2-D matrix accesses with `ld=SIZE_MAX,m=size,n=1,s=1`" — followed here
/// for `Interval`-typed accesses so they share the same ruled-plane
/// machinery as matrix tiles, per the DESIGN.md decision to not maintain a
/// second dedicated 1-D tree).
pub fn interval_access(mode: AccessMode, addr: usize, size: usize) -> Access {
    let region = Rect2::new2(Interval::new(addr as i64, (addr + size) as i64), Interval::new(0, 1));
    let host_view = MemView::host(addr, size as i64);
    Access::new(mode, AccessType::Interval, region, host_view).with_concurrency(Concurrency::Sequential).with_scope(Scope::NonUnified)
}

/// Builds the access tuple for a 2-D matrix tile (§3 Access).
///
/// A tile that wraps past the ruled plane's row boundary decomposes into
/// two rects (§4.1); `Access` carries a single region, so a wrapping tile
/// can't be represented yet and is rejected here rather than silently
/// tracking only its first half.
pub fn matrix_access(mode: AccessMode, tile: &MatrixTile) -> Access {
    let rects = crate::region::matrix_to_rects(tile);
    assert!(rects[1].is_empty(), "matrix_access: tile wraps the row boundary, which a single-region Access cannot represent");
    let host_view = MemView::host(tile.addr() as usize, tile.ld);
    Access::new(mode, AccessType::Matrix, rects[0], host_view)
}
