// Engine lifetime and the process-wide job system

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use topaz::config::Config;
use topaz::{job_system, job_system_init, job_system_term, Engine};

// Tests in this file share the global job system
static GLOBAL: Mutex<()> = parking_lot::const_mutex(());

#[test]
fn k_jobs_run_exactly_once_each() {
    let _guard = GLOBAL.lock();
    job_system_init(4);

    const K: usize = 200;
    let seen = Arc::new(Mutex::new(Vec::with_capacity(K)));
    let handles: Vec<_> = (0..K)
        .rev()
        .map(|i| {
            let seen = seen.clone();
            job_system().execute(move || seen.lock().push(i))
        })
        .collect();
    for handle in handles {
        job_system().block(handle);
    }

    let seen = seen.lock();
    assert_eq!(seen.len(), K);
    assert_eq!(seen.iter().copied().collect::<HashSet<_>>().len(), K);
    job_system_term();
}

#[test]
fn engine_owns_the_global_job_system() {
    let _guard = GLOBAL.lock();
    let config = Config::parse("[jobs]\nworker_count = 2\n").unwrap();
    let engine = Engine::initialise(&config);
    assert_eq!(job_system().worker_count(), 2);
    assert!(Arc::ptr_eq(&engine.job_system(), &job_system()));

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let counter = counter.clone();
        job_system().execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    engine.terminate();
    assert_eq!(counter.load(Ordering::SeqCst), 50);
}

#[test]
#[should_panic(expected = "job_system_init")]
fn job_system_after_engine_teardown_panics() {
    // Held through the panic; parking_lot locks do not poison.
    let _guard = GLOBAL.lock();
    let engine = Engine::initialise(&Config::default());
    drop(engine);
    let _ = job_system();
}
