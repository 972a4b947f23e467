/*!
 * Backend Replacement Tests
 * Process-wide registry: default construction, factory swaps, direct installs
 */

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use system_context::backend::DEFAULT_FACTORY_NAME;
use system_context::exec::{sync_wait, then, WaitOutcome};
use system_context::backend::RegisteredCapability;
use system_context::{
    get_system_scheduler, query_system_context, set_system_context_backend,
    set_system_context_backend_factory, BackendFactory, BulkItemReceiver, PoolConfig, Receiver,
    ScheduleError, Storage, SystemScheduler, ThreadPoolBackend,
};

/// Delegates to a thread-pool backend and counts every call
struct CountingBackend {
    inner: ThreadPoolBackend,
    schedules: Arc<AtomicUsize>,
    bulks: Arc<AtomicUsize>,
}

impl SystemScheduler for CountingBackend {
    unsafe fn schedule(&self, storage: Storage, receiver: NonNull<dyn Receiver>) {
        self.schedules.fetch_add(1, Ordering::SeqCst);
        self.inner.schedule(storage, receiver);
    }

    unsafe fn bulk_schedule(
        &self,
        count: u32,
        storage: Storage,
        receiver: NonNull<dyn BulkItemReceiver>,
    ) {
        self.bulks.fetch_add(1, Ordering::SeqCst);
        self.inner.bulk_schedule(count, storage, receiver);
    }
}

struct Counters {
    builds: Arc<AtomicUsize>,
    schedules: Arc<AtomicUsize>,
    bulks: Arc<AtomicUsize>,
}

fn counting_factory() -> (BackendFactory<dyn SystemScheduler>, Counters) {
    let counters = Counters {
        builds: Arc::new(AtomicUsize::new(0)),
        schedules: Arc::new(AtomicUsize::new(0)),
        bulks: Arc::new(AtomicUsize::new(0)),
    };

    let builds = Arc::clone(&counters.builds);
    let schedules = Arc::clone(&counters.schedules);
    let bulks = Arc::clone(&counters.bulks);
    let factory = BackendFactory::new("counting", move || {
        builds.fetch_add(1, Ordering::SeqCst);
        let backend: Arc<dyn SystemScheduler> = Arc::new(CountingBackend {
            inner: ThreadPoolBackend::new(PoolConfig::default().with_threads(2))?,
            schedules: Arc::clone(&schedules),
            bulks: Arc::clone(&bulks),
        });
        Ok(backend)
    });

    (factory, counters)
}

fn restore_default() {
    set_system_context_backend_factory(ThreadPoolBackend::factory()).unwrap();
}

#[test]
#[serial]
fn test_default_backend_shared_across_threads() {
    restore_default();

    let here = query_system_context::<dyn SystemScheduler>().unwrap();
    let there = thread::spawn(|| query_system_context::<dyn SystemScheduler>().unwrap())
        .join()
        .unwrap();

    assert!(Arc::ptr_eq(&here, &there));
    assert_eq!(
        <dyn SystemScheduler as RegisteredCapability>::registry().factory_name(),
        DEFAULT_FACTORY_NAME
    );
}

#[test]
#[serial]
fn test_replaced_factory_routes_work() {
    restore_default();
    let (factory, counters) = counting_factory();
    let previous = set_system_context_backend_factory(factory).unwrap();
    assert_eq!(previous.name(), DEFAULT_FACTORY_NAME);
    assert_eq!(counters.builds.load(Ordering::SeqCst), 1);

    let scheduler = get_system_scheduler().unwrap();
    let ran_on = Arc::new(parking_lot::Mutex::new(None));
    let slot = Arc::clone(&ran_on);
    let outcome = sync_wait(then(scheduler.schedule(), move || {
        *slot.lock() = Some(thread::current().id());
    }));
    assert_eq!(outcome, Ok(WaitOutcome::Completed));
    assert_ne!(ran_on.lock().expect("did not run"), thread::current().id());

    let outcome = sync_wait(scheduler.bulk(10, |_| {}));
    assert_eq!(outcome, Ok(WaitOutcome::Completed));

    assert_eq!(counters.schedules.load(Ordering::SeqCst), 1);
    assert_eq!(counters.bulks.load(Ordering::SeqCst), 1);
    assert_eq!(counters.builds.load(Ordering::SeqCst), 1);

    restore_default();
    assert_ne!(get_system_scheduler().unwrap(), scheduler);
}

#[test]
#[serial]
fn test_old_scheduler_keeps_working_after_swap() {
    restore_default();
    let before = get_system_scheduler().unwrap();

    let (factory, counters) = counting_factory();
    set_system_context_backend_factory(factory).unwrap();

    let outcome = sync_wait(before.schedule());
    assert_eq!(outcome, Ok(WaitOutcome::Completed));
    assert_eq!(counters.schedules.load(Ordering::SeqCst), 0);

    restore_default();
}

#[test]
#[serial]
fn test_failing_factory_keeps_current_backend() {
    restore_default();
    let before = get_system_scheduler().unwrap();

    let err = set_system_context_backend_factory::<dyn SystemScheduler>(BackendFactory::new(
        "broken",
        || Err(ScheduleError::FactoryFailed("out of threads".to_string())),
    ))
    .unwrap_err();

    assert_eq!(err, ScheduleError::FactoryFailed("out of threads".to_string()));
    assert_eq!(get_system_scheduler().unwrap(), before);
    assert_eq!(
        <dyn SystemScheduler as RegisteredCapability>::registry().factory_name(),
        DEFAULT_FACTORY_NAME
    );
}

#[test]
#[serial]
fn test_direct_instance_install() {
    restore_default();

    let schedules = Arc::new(AtomicUsize::new(0));
    let backend: Arc<dyn SystemScheduler> = Arc::new(CountingBackend {
        inner: ThreadPoolBackend::new(PoolConfig::single_threaded()).unwrap(),
        schedules: Arc::clone(&schedules),
        bulks: Arc::new(AtomicUsize::new(0)),
    });

    assert!(set_system_context_backend(Arc::clone(&backend)).is_some());
    let scheduler = get_system_scheduler().unwrap();
    assert!(Arc::ptr_eq(scheduler.backend(), &backend));

    sync_wait(scheduler.schedule()).unwrap();
    assert_eq!(schedules.load(Ordering::SeqCst), 1);

    restore_default();
}
