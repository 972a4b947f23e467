/*!
 * Static Thread Pool
 *
 * Fixed set of worker threads fed by an unbounded intrusive run queue.
 *
 * # Architecture
 *
 * - Operation states embed an intrusive `TaskHeader`; the queue links those
 *   headers together, so scheduling never allocates and never rejects work
 * - A bulk operation is queued once with a runner count instead of once per runner
 * - Idle workers park on a parking_lot condvar; producers push and notify under
 *   the queue mutex, so no wakeup is lost and no task is stranded at shutdown
 * - Dropping the pool drains the queue before workers exit
 *
 * # Senders
 *
 * - [`PoolScheduler::schedule`]: completes on a worker thread
 * - [`PoolScheduler::bulk`]: runs `f(0..count)` across up to N workers, then
 *   completes once every item has finished
 */

mod bulk;
mod config;
mod schedule;
mod task;
mod worker;

pub use bulk::{BulkOperation, BulkSender};
pub use config::PoolConfig;
pub use schedule::{ScheduleOperation, ScheduleSender};

pub(crate) use task::{TaskHeader, TaskRef};

use task::RunQueue;

use crate::core::{ScheduleError, ScheduleResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// State shared between the pool handle, its workers and in-flight operations
pub(crate) struct PoolShared {
    id: usize,
    threads: usize,
    queue: Mutex<RunQueue>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

impl PoolShared {
    fn new(config: &PoolConfig) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            threads: config.threads,
            queue: Mutex::new(RunQueue::default()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Enqueue one task
    ///
    /// # Safety
    ///
    /// `task` must not already be queued and must stay valid until it has run.
    pub(crate) unsafe fn enqueue(&self, task: TaskRef) -> ScheduleResult<()> {
        self.enqueue_runners(task, 1)
    }

    /// Enqueue `runners` runs of the same task
    ///
    /// Fails only once the pool is shutting down; the queue itself is unbounded.
    ///
    /// # Safety
    ///
    /// `task` must not already be queued and must stay valid until every runner
    /// has run.
    pub(crate) unsafe fn enqueue_runners(
        &self,
        task: TaskRef,
        runners: usize,
    ) -> ScheduleResult<()> {
        let mut queue = self.queue.lock();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(ScheduleError::PoolShutdown);
        }

        queue.push(task, runners);
        if runners == 1 {
            self.wakeup.notify_one();
        } else {
            self.wakeup.notify_all();
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn threads(&self) -> usize {
        self.threads
    }

    fn begin_shutdown(&self) {
        let _guard = self.queue.lock();
        self.shutdown.store(true, Ordering::Release);
        self.wakeup.notify_all();
    }
}

/// Fixed-size pool of worker threads
pub struct StaticThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl StaticThreadPool {
    /// Spawn the workers described by `config`
    pub fn new(config: PoolConfig) -> ScheduleResult<Self> {
        config.validate()?;

        let shared = Arc::new(PoolShared::new(&config));
        let mut workers = Vec::with_capacity(config.threads);

        for index in 0..config.threads {
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", config.thread_name, index));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let worker_shared = Arc::clone(&shared);
            match builder.spawn(move || worker::run(worker_shared, index)) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    warn!(error = %e, spawned = workers.len(), "Failed to spawn pool worker");
                    shared.begin_shutdown();
                    for handle in workers.drain(..) {
                        let _ = handle.join();
                    }
                    return Err(ScheduleError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!(
            pool_id = shared.id,
            threads = config.threads,
            "Thread pool started"
        );

        Ok(Self { shared, workers })
    }

    /// Pool with default configuration
    pub fn with_defaults() -> ScheduleResult<Self> {
        Self::new(PoolConfig::default())
    }

    /// Handle for creating senders that run on this pool
    pub fn scheduler(&self) -> PoolScheduler {
        PoolScheduler {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.shared.threads
    }

    /// Tasks currently waiting in the run queue
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Whether the calling thread is one of this pool's workers
    pub fn is_worker_thread(&self) -> bool {
        worker::current_pool() == Some(self.shared.id)
    }
}

impl Drop for StaticThreadPool {
    fn drop(&mut self) {
        self.shared.begin_shutdown();

        if self.is_worker_thread() {
            // Joining would wait on ourselves; workers exit once the queue drains.
            warn!(pool_id = self.shared.id, "Thread pool dropped on its own worker, detaching");
            self.workers.clear();
            return;
        }

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(pool_id = self.shared.id, "Pool worker exited with a panic");
            }
        }
        info!(pool_id = self.shared.id, "Thread pool stopped");
    }
}

impl fmt::Debug for StaticThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticThreadPool")
            .field("id", &self.shared.id)
            .field("threads", &self.shared.threads)
            .field("queued", &self.queued())
            .finish()
    }
}

/// Cheap handle for scheduling onto a [`StaticThreadPool`]
#[derive(Clone)]
pub struct PoolScheduler {
    shared: Arc<PoolShared>,
}

impl PoolScheduler {
    /// Sender that completes on one of the pool's workers
    pub fn schedule(&self) -> ScheduleSender {
        ScheduleSender::new(Arc::clone(&self.shared))
    }

    /// Sender that runs `f` once per index in `0..count`, then completes
    pub fn bulk<F>(&self, count: u32, f: F) -> BulkSender<F>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        BulkSender::new(Arc::clone(&self.shared), count, f)
    }

    /// Whether the owning pool has been dropped
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl PartialEq for PoolScheduler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for PoolScheduler {}

impl fmt::Debug for PoolScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolScheduler")
            .field("pool_id", &self.shared.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{sync_wait, then, WaitOutcome};
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_pool_runs_work_off_thread() {
        let pool = StaticThreadPool::new(PoolConfig::default().with_threads(2)).unwrap();
        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&ran_on);
        let outcome = sync_wait(then(pool.scheduler().schedule(), move || {
            *slot.lock() = Some(thread::current().id());
        }));

        assert_eq!(outcome, Ok(WaitOutcome::Completed));
        let worker = ran_on.lock().expect("work did not run");
        assert_ne!(worker, caller);
    }

    #[test]
    fn test_bulk_visits_every_index() {
        let pool = StaticThreadPool::new(PoolConfig::default().with_threads(4)).unwrap();
        let hits: Arc<Vec<AtomicU32>> = Arc::new((0..100).map(|_| AtomicU32::new(0)).collect());

        let counters = Arc::clone(&hits);
        let outcome = sync_wait(pool.scheduler().bulk(100, move |i| {
            counters[i as usize].fetch_add(1, Ordering::Relaxed);
        }));

        assert_eq!(outcome, Ok(WaitOutcome::Completed));
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_schedule_after_drop_fails() {
        let pool = StaticThreadPool::new(PoolConfig::single_threaded()).unwrap();
        let scheduler = pool.scheduler();
        drop(pool);

        assert!(scheduler.is_shutdown());
        assert_eq!(sync_wait(scheduler.schedule()), Err(ScheduleError::PoolShutdown));
    }

    #[test]
    fn test_worker_thread_names() {
        let pool = StaticThreadPool::new(
            PoolConfig::single_threaded().with_thread_name("named-pool"),
        )
        .unwrap();
        let name = Arc::new(Mutex::new(String::new()));

        let slot = Arc::clone(&name);
        sync_wait(then(pool.scheduler().schedule(), move || {
            *slot.lock() = thread::current().name().unwrap_or_default().to_string();
        }))
        .unwrap();

        assert_eq!(name.lock().as_str(), "named-pool-0");
        assert!(!pool.is_worker_thread());
    }

    #[test]
    fn test_scheduler_equality() {
        let a = StaticThreadPool::new(PoolConfig::single_threaded()).unwrap();
        let b = StaticThreadPool::new(PoolConfig::single_threaded()).unwrap();
        assert_eq!(a.scheduler(), a.scheduler());
        assert_ne!(a.scheduler(), b.scheduler());
    }
}
