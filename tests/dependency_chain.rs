//! §8 scenario 6 ("Dependency-graph liveness"): a long linear chain of
//! alternating writer/reader tasks over one handle, driven purely through
//! the host team (no device backend needed).

use std::sync::{Arc, Mutex};

use xkrt::runtime::interval_access;
use xkrt::{AccessMode, Runtime, RuntimeConfig, Task, UserDatum};

#[test]
fn dependency_chain_preserves_submission_order() {
    let _ = env_logger::try_init();
    let config = RuntimeConfig::from_env().unwrap();
    let rt = Runtime::init(config, vec![], &[]).unwrap();

    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let datum = UserDatum::Handle { ptr: 0xdead_beef };

    const N: u32 = 256;
    let mut last = None;
    for i in 0..N {
        let mode = if i % 2 == 0 { AccessMode::W } else { AccessMode::R };
        let access = interval_access(mode, 0, 8);
        let order = order.clone();
        let body: xkrt::TaskBody = Arc::new(move |_task: &Task| {
            order.lock().unwrap().push(i);
        });
        last = Some(rt.task_spawn(i, vec![(datum, access)], Some(body)));
    }

    rt.task_wait(&last.unwrap());

    let order = order.lock().unwrap();
    assert_eq!(order.len(), N as usize);
    assert!(order.windows(2).all(|w| w[0] < w[1]), "completion order must equal submission order, got {:?}", *order);
}
