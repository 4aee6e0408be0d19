// =============================================================================
// ENGINE - process-wide setup and teardown
// =============================================================================
//
// Owns the job system for the lifetime of the application and installs it
// as the global instance, so `job::job_system()` works anywhere between
// `Engine::initialise` and `Engine::terminate`.

use crate::config::Config;
use crate::job::{self, JobSystem};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Initialize logging with optional file output for validation errors.
///
/// Safe to call more than once; later calls keep the first logger.
pub fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    if builder.try_init().is_err() {
        log::debug!("Logger already initialised");
    }

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Topaz {} Log ===", version());
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
            }
            Err(e) => log::warn!("Could not open log file {:?}: {}", config.debug.log_file, e),
        }
    }
}

/// Engine lifetime guard.
///
/// Only one engine should be alive at a time: it replaces the global job
/// system on creation and tears it down on drop.
pub struct Engine {
    jobs: Arc<JobSystem>,
    terminated: bool,
}

impl Engine {
    pub fn initialise(config: &Config) -> Self {
        let jobs = Arc::new(JobSystem::new(config.jobs.worker_count));
        job::job_system_install(jobs.clone());
        log::info!(
            "Topaz {} initialised ({} job workers)",
            version(),
            jobs.worker_count()
        );
        Self { jobs, terminated: false }
    }

    /// The engine's job system, for handing to a `Device`.
    pub fn job_system(&self) -> Arc<JobSystem> {
        self.jobs.clone()
    }

    /// Drain outstanding jobs and uninstall the global job system.
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        if job::job_system_active() {
            job::job_system_term();
        } else {
            self.jobs.block_all();
        }
        log::info!("Topaz terminated");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::GLOBAL_TEST_LOCK;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config_with_workers(n: usize) -> Config {
        let mut config = Config::default();
        config.jobs.worker_count = n;
        config
    }

    #[test]
    fn engine_installs_global_job_system() {
        let _guard = GLOBAL_TEST_LOCK.lock();
        let engine = Engine::initialise(&config_with_workers(2));
        assert!(job::job_system_active());
        assert_eq!(job::job_system().worker_count(), 2);
        assert!(Arc::ptr_eq(&job::job_system(), &engine.job_system()));
        engine.terminate();
        assert!(!job::job_system_active());
    }

    #[test]
    fn terminate_drains_pending_jobs() {
        let _guard = GLOBAL_TEST_LOCK.lock();
        let engine = Engine::initialise(&config_with_workers(2));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = counter.clone();
            job::job_system().execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(engine);
        assert_eq!(counter.load(Ordering::SeqCst), 32);
        assert!(!job::job_system_active());
    }

    #[test]
    fn logging_can_be_initialised_twice() {
        let config = Config::default();
        init_logging(&config);
        init_logging(&config);
    }
}
