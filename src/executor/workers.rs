use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::executable::Executable;
use crate::executor::ExecutorConfig;
use crate::executor::queue::WorkQueue;
use crate::pipeline::RunStatus;

/// Callback run on each worker thread when it starts or stops.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// `None` tells a worker to stop.
type Job = Option<Executable>;

/// A fixed pool of threads running executables from a shared queue.
pub struct Workers {
    name: String,
    queue: Arc<WorkQueue<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Spawns `config.threads` workers, at least one.
    ///
    /// # Errors
    /// [`Error::Spawn`](crate::Error::Spawn) if a thread cannot be started.
    /// Workers started before the failure are stopped again.
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let mut workers = Self {
            name: config.name.clone(),
            queue: Arc::new(WorkQueue::new()),
            threads: Vec::new(),
        };

        for index in 0..config.threads.max(1) {
            let queue = workers.queue.clone();
            let setup = config.setup.clone();
            let teardown = config.teardown.clone();
            let pool = config.name.clone();

            let handle = thread::Builder::new()
                .name(format!("{}-worker-{index}", config.name))
                .spawn(move || {
                    let span = tracing::debug_span!("worker", pool = %pool, index);
                    let _enter = span.enter();
                    work(&queue, setup.as_deref(), teardown.as_deref());
                })?;

            workers.threads.push(handle);
        }

        tracing::debug!("started {} workers for '{}'", workers.size(), workers.name);
        Ok(workers)
    }

    /// Queues `executable` ahead of everything already waiting.
    pub fn schedule(&self, executable: Executable) {
        self.queue.push_front(Some(executable));
    }

    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Executables waiting for a free worker.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        for _ in &self.threads {
            self.queue.push_back(None);
        }

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("a worker of '{}' panicked", self.name);
            }
        }
    }
}

fn work(
    queue: &WorkQueue<Job>,
    setup: Option<&(dyn Fn() + Send + Sync)>,
    teardown: Option<&(dyn Fn() + Send + Sync)>,
) {
    if let Some(setup) = setup {
        setup();
    }

    while let Some(executable) = queue.pop() {
        let name = executable.name();
        match executable.execute() {
            Ok(RunStatus::Complete) => tracing::debug!("finished '{name}'"),
            Ok(RunStatus::Partial { unexecuted }) => {
                tracing::warn!("'{name}' left {} members unexecuted", unexecuted.len())
            }
            Err(err) => tracing::error!("'{name}' failed: {err}"),
        }
    }

    if let Some(teardown) = teardown {
        teardown();
    }
}
