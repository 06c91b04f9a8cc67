//! §8 scenario 2 (second/third readers): once a device has fetched a
//! region, a later read-only task over the same region must find it
//! already coherent — no transfer in flight, zero live fetches — and
//! still reach `DataFetched`/`Completed` instead of hanging in `Ready`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use xkrt::runtime::interval_access;
use xkrt::{AccessMode, Task, TaskState};

#[test]
fn second_reader_of_resident_data_completes_without_a_transfer() {
    let _ = env_logger::try_init();
    let rt = xkrt_testutils::single_device_runtime(4096);
    let device = rt.device_get(1).expect("one fake device was requested").id;

    let mut host_buf = vec![0xcdu8; 64];
    let datum = rt.register_memory(host_buf.as_mut_ptr() as usize, host_buf.len()).unwrap();

    let run_count = Arc::new(AtomicUsize::new(0));

    for i in 0..3 {
        let access = interval_access(AccessMode::R, host_buf.as_ptr() as usize, host_buf.len());
        let run_count = run_count.clone();
        let body: xkrt::TaskBody = Arc::new(move |_task: &Task| {
            run_count.fetch_add(1, Ordering::SeqCst);
        });
        let task = Task::new(i, vec![access], Some(body)).with_target_device(device);
        let task = rt.spawn_built(task, &[datum]);

        rt.task_wait(&task);
        assert_eq!(task.state(), TaskState::Completed, "reader {i} must complete");
    }

    assert_eq!(run_count.load(Ordering::SeqCst), 3, "all three readers, including the resident-data rereads, must run");
}
