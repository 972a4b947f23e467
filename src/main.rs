/*!
 * System Context Demo
 *
 * Runs a continuation and a bulk fan-out on the process-wide scheduler and
 * prints where the work ran.
 */

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::info;

use system_context::exec::{sync_wait, then};
use system_context::monitoring::span_operation;
use system_context::{get_system_scheduler, init_tracing, query_system_context, SystemScheduler};

const BULK_ITEMS: u32 = 1024;

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let scheduler = get_system_scheduler()?;
    info!(
        progress = ?scheduler.forward_progress_guarantee(),
        "System scheduler ready"
    );

    let caller = thread::current().id();
    let outcome = sync_wait(then(scheduler.schedule(), move || {
        let here = thread::current();
        println!(
            "Got: continuation on {} (caller {:?})",
            here.name().unwrap_or("unnamed"),
            caller
        );
    }))?;
    info!(?outcome, "Continuation finished");

    let span = span_operation("bulk_sum");
    let sum = Arc::new(AtomicU64::new(0));
    let total = Arc::clone(&sum);
    let outcome = sync_wait(scheduler.bulk(BULK_ITEMS, move |i| {
        total.fetch_add(u64::from(i), Ordering::Relaxed);
    }))?;
    span.record_items(u64::from(BULK_ITEMS));
    drop(span);

    println!("Got: bulk sum {} ({:?})", sum.load(Ordering::Relaxed), outcome);

    let backend = query_system_context::<dyn SystemScheduler>()?;
    info!(same_backend = Arc::ptr_eq(&backend, scheduler.backend()), "Done");
    Ok(())
}
