//! §8 scenario 5 ("Detachable completion"): a task's body registers an
//! external completion blocker via `detach_incr`, returns, and must stay
//! short of `Completed` until a separate thread calls `detach_decr`.

use std::sync::Arc;
use std::time::Duration;

use xkrt::{Runtime, RuntimeConfig, Task, TaskState};

#[test]
fn detachable_task_completes_only_after_external_decrement() {
    let _ = env_logger::try_init();
    let config = RuntimeConfig::from_env().unwrap();
    let rt = Arc::new(Runtime::init(config, vec![], &[]).unwrap());

    let body: xkrt::TaskBody = Arc::new(move |task: &Task| {
        task.detach_incr();
    });

    let task = Task::new(1, vec![], Some(body)).with_detachable();
    let task = rt.spawn_built(task, &[]);

    // Wait for the kernel callback to actually fire before decrementing,
    // so the decrement can never race ahead of `detach_incr` and land on
    // a still-zero counter a moment before the increment (`detach_decr`
    // only completes the task if the counter hits zero *and*
    // `kernel_done` is already set).
    let decrementer = {
        let rt = rt.clone();
        let task = task.clone();
        std::thread::spawn(move || {
            let det = task.det_info.as_ref().expect("detachable task must carry det_info");
            loop {
                if *det.kernel_done.lock() {
                    break;
                }
                std::thread::sleep(Duration::from_micros(50));
            }
            rt.task_detachable_decr(&task);
        })
    };

    rt.task_wait(&task);
    decrementer.join().unwrap();

    assert_eq!(task.state(), TaskState::Completed);
}
