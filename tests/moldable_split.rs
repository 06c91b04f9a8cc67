//! §8 scenario 4 ("Moldable split"): a single moldable 4096-byte interval
//! task with `split_condition = (len > 1024)` must keep halving itself
//! (and its children, recursively) until every leaf is exactly 1024 bytes,
//! then actually run each leaf's body.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use xkrt::runtime::interval_access;
use xkrt::{AccessMode, Task};

#[test]
fn moldable_task_splits_down_to_four_quarters() {
    let _ = env_logger::try_init();
    let rt = xkrt_testutils::single_device_runtime(8192);
    let device = rt.device_get(1).expect("one fake device was requested").id;

    let mut host_buf = vec![0u8; 4096];
    let datum = rt.register_memory(host_buf.as_mut_ptr() as usize, host_buf.len()).unwrap();
    let access = interval_access(AccessMode::R, host_buf.as_ptr() as usize, host_buf.len());

    let ran_regions: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let run_count = Arc::new(AtomicUsize::new(0));

    let ran_regions_in_body = ran_regions.clone();
    let run_count_in_body = run_count.clone();
    let body: xkrt::TaskBody = Arc::new(move |task: &Task| {
        run_count_in_body.fetch_add(1, Ordering::SeqCst);
        ran_regions_in_body.lock().unwrap().push(task.accesses[0].region.row().len());
    });

    let split_condition: xkrt::task::SplitCondition = Arc::new(|task: &Task| task.accesses[0].region.row().len() > 1024);

    let task = Task::new(1, vec![access], Some(body)).with_target_device(device).with_moldable(split_condition);
    let task = rt.spawn_built(task, &[datum]);

    // The top-level task never itself reaches `Completed` (only its leaf
    // descendants do); repeatedly pumping drains every split generation.
    for _ in 0..64 {
        rt.pump();
        if run_count.load(Ordering::SeqCst) == 4 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_micros(100));
    }

    assert_eq!(run_count.load(Ordering::SeqCst), 4, "a 4096-byte task split at >1024 must dispatch exactly 4 leaves");
    let regions = ran_regions.lock().unwrap();
    assert!(regions.iter().all(|&len| len == 1024), "every leaf must cover exactly a 1024-byte sub-interval, got {:?}", *regions);
}
