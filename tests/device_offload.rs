//! End-to-end device dispatch: registers host memory, spawns a read-only
//! device task targeting a `FakeDriver`-backed device, and confirms the
//! coherency fetch runs and the task body executes (§4.4, §4.7, §6.1).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use xkrt::runtime::interval_access;
use xkrt::{AccessMode, Task, TaskState};

#[test]
fn device_task_fetches_and_runs() {
    let _ = env_logger::try_init();
    let rt = xkrt_testutils::single_device_runtime(4096);
    let device = rt.device_get(1).expect("one fake device was requested").id;

    let mut host_buf = vec![0xabu8; 64];
    let datum = rt.register_memory(host_buf.as_mut_ptr() as usize, host_buf.len()).unwrap();
    let access = interval_access(AccessMode::R, host_buf.as_ptr() as usize, host_buf.len());

    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_body = ran.clone();
    let body: xkrt::TaskBody = Arc::new(move |_task: &Task| {
        ran_in_body.store(true, Ordering::SeqCst);
    });

    let task = Task::new(1, vec![access], Some(body)).with_target_device(device);
    let task = rt.spawn_built(task, &[datum]);

    rt.task_wait(&task);

    assert!(ran.load(Ordering::SeqCst), "task body must run once its access is fetched");
    assert_eq!(task.state(), TaskState::Completed);
}
