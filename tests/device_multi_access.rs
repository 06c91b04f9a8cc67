//! §8 scenario 1 (read `src` sub-tile + write `dst` sub-tile): a device task
//! with two accesses, each needing its own H2D transfer, must only reach
//! `DataFetched`/dispatch once *both* transfers have completed, not after
//! the first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use xkrt::runtime::interval_access;
use xkrt::{AccessMode, Task, TaskState};

#[test]
fn two_access_device_task_waits_for_both_transfers() {
    let _ = env_logger::try_init();
    let rt = xkrt_testutils::single_device_runtime(4096);
    let device = rt.device_get(1).expect("one fake device was requested").id;

    let mut src_buf = vec![0xabu8; 64];
    let mut dst_buf = vec![0u8; 64];
    let src_datum = rt.register_memory(src_buf.as_mut_ptr() as usize, src_buf.len()).unwrap();
    let dst_datum = rt.register_memory(dst_buf.as_mut_ptr() as usize, dst_buf.len()).unwrap();

    let src_access = interval_access(AccessMode::R, src_buf.as_ptr() as usize, src_buf.len());
    let dst_access = interval_access(AccessMode::W, dst_buf.as_ptr() as usize, dst_buf.len());

    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_body = ran.clone();
    let body: xkrt::TaskBody = Arc::new(move |_task: &Task| {
        ran_in_body.store(true, Ordering::SeqCst);
    });

    let task = Task::new(1, vec![src_access, dst_access], Some(body)).with_target_device(device);
    let task = rt.spawn_built(task, &[src_datum, dst_datum]);

    rt.task_wait(&task);

    assert!(ran.load(Ordering::SeqCst), "task body must run once both accesses are fetched");
    assert_eq!(task.state(), TaskState::Completed);
}
