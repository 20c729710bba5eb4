//! Asynchronous execution of pipelines.
//!
//! An [`Executor`] accepts [`Executable`]s and runs each of them once its
//! preconditions are ready. [`PushExecutor`] does this with one scheduler
//! thread that watches the preconditions of everything submitted and a
//! [`Workers`] pool that does the actual work.

pub mod queue;
pub mod workers;

use std::collections::HashSet;
use std::fmt;
use std::num::NonZero;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::data::DataInfo;
use crate::error::Result;
use crate::executable::Executable;
use crate::promise::{Future, Futures, Promise, wait_for_any};

use self::queue::WorkQueue;
pub use self::workers::{Hook, Workers};

/// Something that runs executables, eventually.
pub trait Executor: Send + Sync {
    /// Submits `executable`. Returns immediately; outcomes are observed
    /// through the executable's postconditions.
    fn schedule(&self, executable: Executable);

    /// Forgets everything submitted that has not been handed to a worker
    /// yet. Running executables are not interrupted.
    fn clear(&self);
}

/// Settings for a [`PushExecutor`] and its [`Workers`].
#[derive(Clone)]
pub struct ExecutorConfig {
    pub(crate) threads: usize,
    pub(crate) name: String,
    pub(crate) setup: Option<Hook>,
    pub(crate) teardown: Option<Hook>,
}

impl ExecutorConfig {
    /// Number of worker threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Prefix for thread names.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Runs once on every worker thread before it takes any work.
    pub fn on_setup(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.setup = Some(Arc::new(hook));
        self
    }

    /// Runs once on every worker thread before it exits.
    pub fn on_teardown(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.teardown = Some(Arc::new(hook));
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(1, NonZero::get),
            name: String::from("pipework"),
            setup: None,
            teardown: None,
        }
    }
}

impl fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("threads", &self.threads)
            .field("name", &self.name)
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/// State shared between a [`PushExecutor`] and its scheduler thread.
struct Shared {
    /// Newly submitted work; `None` stops the scheduler.
    intake: WorkQueue<Option<Executable>>,
    /// Set whenever the scheduler should look at `intake`.
    wake: Promise,
    /// Serializes wake-ups against the scheduler draining `intake`.
    lock: Mutex<()>,
    cleared: AtomicBool,
}

impl Shared {
    /// Requires `lock` to be held.
    fn notify(&self) {
        if !self.wake.is_ready() && self.wake.set(true).is_err() {
            tracing::trace!("scheduler already woken");
        }
    }
}

/// An [`Executor`] that dispatches each executable to a worker as soon as
/// all of its preconditions are ready.
///
/// On every wake-up the scheduler rescans everything pending, so the order
/// in which preconditions become ready does not matter. Dropping the
/// executor discards pending work, waits for running work and joins every
/// thread.
pub struct PushExecutor {
    name: String,
    shared: Arc<Shared>,
    workers: Arc<Workers>,
    scheduler: Option<JoinHandle<()>>,
}

impl PushExecutor {
    /// An executor with `threads` workers and default settings otherwise.
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_config(ExecutorConfig::default().threads(threads))
    }

    pub fn with_config(config: ExecutorConfig) -> Result<Self> {
        let workers = Arc::new(Workers::new(&config)?);
        let shared = Arc::new(Shared {
            intake: WorkQueue::new(),
            wake: Promise::new(DataInfo::of::<bool>("wake")),
            lock: Mutex::new(()),
            cleared: AtomicBool::new(false),
        });

        let scheduler = thread::Builder::new()
            .name(format!("{}-scheduler", config.name))
            .spawn({
                let shared = shared.clone();
                let workers = workers.clone();
                let name = config.name.clone();
                move || {
                    let span = tracing::debug_span!("scheduler", pool = %name);
                    let _enter = span.enter();
                    run_scheduler(&shared, &workers);
                }
            })?;

        Ok(Self {
            name: config.name,
            shared,
            workers,
            scheduler: Some(scheduler),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.size()
    }
}

impl Executor for PushExecutor {
    fn schedule(&self, executable: Executable) {
        let _guard = self.shared.lock.lock();
        tracing::debug!("queued '{}'", executable.name());
        self.shared.intake.push_front(Some(executable));
        self.shared.notify();
    }

    fn clear(&self) {
        let _guard = self.shared.lock.lock();
        self.shared.intake.clear();
        self.shared.cleared.store(true, Ordering::Release);
        self.shared.notify();
    }
}

impl Drop for PushExecutor {
    fn drop(&mut self) {
        {
            let _guard = self.shared.lock.lock();
            self.shared.intake.clear();
            self.shared.intake.push_back(None);
            self.shared.notify();
        }

        if let Some(scheduler) = self.scheduler.take() {
            if scheduler.join().is_err() {
                tracing::error!("scheduler of '{}' panicked", self.name);
            }
        }
    }
}

impl fmt::Debug for PushExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushExecutor")
            .field("name", &self.name)
            .field("threads", &self.workers.size())
            .finish()
    }
}

/// An executable waiting for its preconditions.
struct Pending {
    executable: Executable,
    preconditions: Futures,
}

impl Pending {
    fn is_ready(&self) -> bool {
        self.preconditions.iter().all(Future::is_ready)
    }
}

fn run_scheduler(shared: &Shared, workers: &Workers) {
    let mut pending: Vec<Pending> = Vec::new();
    let mut tracked: HashSet<Future> = HashSet::new();

    loop {
        let wake = shared.wake.future();
        wait_for_any(std::iter::once(&wake).chain(&tracked));

        if wake.is_ready() {
            let _guard = shared.lock.lock();

            if shared.cleared.swap(false, Ordering::AcqRel) {
                tracing::debug!("dropping {} pending executables", pending.len());
                pending.clear();
                tracked.clear();
            }

            while let Some(item) = shared.intake.try_pop() {
                let Some(executable) = item else {
                    tracing::debug!("stopping with {} pending", pending.len());
                    return;
                };

                let preconditions = executable.preconditions();
                tracked.extend(preconditions.iter().filter(|f| !f.is_ready()).cloned());
                tracing::debug!(
                    "tracking '{}' with {} preconditions",
                    executable.name(),
                    preconditions.len()
                );
                pending.push(Pending {
                    executable,
                    preconditions,
                });
            }

            shared.wake.reset();
        }

        pending.retain(|item| {
            if !item.is_ready() {
                return true;
            }
            tracing::debug!("dispatching '{}'", item.executable.name());
            workers.schedule(item.executable.clone());
            false
        });
        tracked.retain(|future| !future.is_ready());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::data::DataInfos;
    use crate::filter::Filter;
    use crate::maps::{FutureMap, PromiseMap};
    use crate::pipe_filter::PipeFilter;

    struct Negate;

    impl Filter for Negate {
        fn input_infos(&self) -> DataInfos {
            vec![DataInfo::of::<i32>("in")]
        }

        fn output_infos(&self) -> DataInfos {
            vec![DataInfo::of::<i32>("out")]
        }

        fn execute(&self, inputs: &FutureMap, outputs: &PromiseMap) -> anyhow::Result<()> {
            outputs.set("out", -*inputs.get::<i32>("in")?)?;
            Ok(())
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_runs_once_ready() {
        let executor = PushExecutor::new(2).unwrap();
        let filter = PipeFilter::new("negate", Negate).unwrap();

        let results = Executable::from(filter.clone()).schedule(&executor);
        assert!(!results.wait_timeout(Duration::from_millis(50)));

        filter.get_promise("in").unwrap().set(7).unwrap();
        assert!(results.wait_timeout(TIMEOUT));
        assert_eq!(*results.get::<i32>("out").unwrap(), -7);
    }

    #[test]
    fn test_submission_order_does_not_matter() {
        let executor = PushExecutor::new(1).unwrap();
        let first = PipeFilter::new("first", Negate).unwrap();
        let second = PipeFilter::new("second", Negate).unwrap();
        first.connect("out", &second, "in").unwrap();

        // the consumer is submitted before its producer
        let results = Executable::from(second.clone()).schedule(&executor);
        Executable::from(first.clone()).schedule(&executor);
        first.get_promise("in").unwrap().set(3).unwrap();

        assert!(results.wait_timeout(TIMEOUT));
        assert_eq!(*results.get::<i32>("out").unwrap(), 3);
    }

    #[test]
    fn test_clear_drops_pending() {
        let executor = PushExecutor::new(1).unwrap();
        let filter = PipeFilter::new("negate", Negate).unwrap();

        let results = Executable::from(filter.clone()).schedule(&executor);
        executor.clear();
        // let the scheduler observe the clear before the input arrives
        std::thread::sleep(Duration::from_millis(50));
        filter.get_promise("in").unwrap().set(1).unwrap();

        assert!(!results.wait_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn test_config() {
        let config = ExecutorConfig::default().threads(3).name("fish");
        let executor = PushExecutor::with_config(config).unwrap();
        assert_eq!(executor.size(), 3);
        assert_eq!(executor.name(), "fish");
    }

    #[test]
    fn test_drop_with_pending_work() {
        let executor = PushExecutor::new(2).unwrap();
        let filter = PipeFilter::new("negate", Negate).unwrap();
        Executable::from(filter).schedule(&executor);
        drop(executor);
    }
}
