//! §8 scenario 2 (D2D reader-sharing): once one device holds a region
//! coherently, a second device reading the same region should source the
//! transfer from the first device rather than re-fetching from host, and
//! must still reach `DataFetched`/`Completed` (exercising the
//! `plan_device_read` "prefer an already-coherent device" branch).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use xkrt::runtime::interval_access;
use xkrt::{AccessMode, Task, TaskState};

#[test]
fn second_device_reads_via_d2d_from_the_first() {
    let _ = env_logger::try_init();
    let rt = xkrt_testutils::multi_device_runtime(2, 4096);
    let device_a = rt.device_get(1).expect("two fake devices were requested").id;
    let device_b = rt.device_get(2).expect("two fake devices were requested").id;

    let mut host_buf = vec![0x42u8; 64];
    let datum = rt.register_memory(host_buf.as_mut_ptr() as usize, host_buf.len()).unwrap();

    let run_count = Arc::new(AtomicUsize::new(0));

    for (i, device) in [(0u32, device_a), (1u32, device_b)] {
        let access = interval_access(AccessMode::R, host_buf.as_ptr() as usize, host_buf.len());
        let run_count = run_count.clone();
        let body: xkrt::TaskBody = Arc::new(move |_task: &Task| {
            run_count.fetch_add(1, Ordering::SeqCst);
        });
        let task = Task::new(i, vec![access], Some(body)).with_target_device(device);
        let task = rt.spawn_built(task, &[datum]);

        rt.task_wait(&task);
        assert_eq!(task.state(), TaskState::Completed, "reader on device {i} must complete");
    }

    assert_eq!(run_count.load(Ordering::SeqCst), 2, "both the H2D-seeded reader and the D2D reader must run");
}
