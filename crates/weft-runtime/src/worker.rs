//! Worker loop.
//!
//! Each OS worker thread runs [`worker_loop`]: take a ready instance,
//! acquire its region-backed dependencies, run the task function, then
//! release acquisitions, satisfy completion events, cascade finish
//! scopes, and retire the instance. A take miss walks a tiered backoff —
//! spin, yield, then park until `give` signals new work.
//!
//! A region-mode conflict (two ready tasks declaring exclusive access to
//! the same region) never blocks the worker: the instance is handed back
//! to the scheduler and retried later.

use weft_core::{Handle, RuntimeError, TaskState};

use crate::runtime::{Runlevel, Runtime};
use crate::sched::TaskDeque;
use crate::task::TaskContext;

/// Tiered idle backoff: spin-hint, then yield, then park.
struct IdleBackoff {
    spins: u32,
    yields: u32,
    spin_limit: u32,
    yield_limit: u32,
}

impl IdleBackoff {
    fn new(spin_limit: u32, yield_limit: u32) -> Self {
        IdleBackoff {
            spins: 0,
            yields: 0,
            spin_limit,
            yield_limit,
        }
    }

    fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
    }

    /// One backoff step; returns `true` when the caller should park.
    fn step(&mut self) -> bool {
        if self.spins < self.spin_limit {
            self.spins += 1;
            std::hint::spin_loop();
            false
        } else if self.yields < self.yield_limit {
            self.yields += 1;
            std::thread::yield_now();
            false
        } else {
            true
        }
    }
}

/// Body of every worker thread.
pub(crate) fn worker_loop(rt: Runtime, worker_id: usize, local: Option<TaskDeque>) {
    tracing::debug!(worker_id, "worker started");
    let scheduler_config = rt.config().scheduler.clone();
    let mut backoff = IdleBackoff::new(
        scheduler_config.spin_before_yield,
        scheduler_config.yields_before_park,
    );
    let park_timeout = std::time::Duration::from_millis(scheduler_config.park_timeout_ms);

    loop {
        if rt.runlevel() == Runlevel::Shutdown {
            break;
        }
        // The running counter covers the take itself so drain never
        // observes "queues empty" while an item is in hand but not yet
        // marked running.
        rt.inner().note_task_started();
        match rt.inner().sched.take(worker_id, local.as_ref()) {
            Some(handle) => {
                backoff.reset();
                execute_one(&rt, worker_id, handle);
                rt.inner().note_task_stopped();
            }
            None => {
                rt.inner().note_task_stopped();
                if backoff.step() {
                    rt.inner().idle.wait_for(park_timeout);
                    backoff.reset();
                }
            }
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}

/// Executes one dequeued instance through its full lifecycle.
fn execute_one(rt: &Runtime, worker_id: usize, handle: Handle) {
    let Ok(instance) = rt.inner().registry.task(handle) else {
        tracing::warn!(%handle, "dequeued instance no longer resolves");
        return;
    };
    if !rt.inner().tasks.begin_run(&instance) {
        tracing::warn!(%handle, state = ?instance.state(), "dequeued instance not ready");
        return;
    }

    // Acquire every region-backed slot under its declared mode. On a
    // conflict, hand the instance back instead of blocking the worker.
    let views = instance.dep_views();
    let mut acquired: Vec<Handle> = Vec::new();
    for view in &views {
        if view.payload.is_null() {
            continue;
        }
        match rt.inner().regions.acquire(view.payload, view.mode) {
            Ok(_region) => acquired.push(view.payload),
            Err(RuntimeError::AccessDenied { .. }) => {
                release_all(rt, &acquired);
                rt.inner().tasks.requeue(&instance);
                rt.inner().enqueue_ready(&instance);
                tracing::debug!(%handle, "region conflict; instance requeued");
                return;
            }
            Err(error) => {
                release_all(rt, &acquired);
                rt.inner().metrics.record_task_failure();
                fail_fast(rt, handle, error);
                return;
            }
        }
    }

    let ctx = TaskContext::new(rt, Some(worker_id), Some(handle), instance.child_scope());
    let result = (instance.template().func())(&ctx, instance.params(), &views);
    drop(ctx);

    release_all(rt, &acquired);

    match result {
        Ok(returned) => {
            let completions = rt
                .inner()
                .tasks
                .finish(&instance, returned.unwrap_or(Handle::NULL));
            for (event, payload) in completions {
                if let Err(error) = rt.event_satisfy(event, payload) {
                    tracing::warn!(%event, %error, "completion satisfy failed");
                }
            }
            if let Err(error) = rt.inner().registry.retire(handle) {
                tracing::warn!(%handle, %error, "instance retire failed");
            }
            rt.inner().metrics.record_task_completion();
            debug_assert_eq!(instance.state(), TaskState::Finished);
        }
        Err(error) => {
            rt.inner().metrics.record_task_failure();
            let _ = rt.inner().registry.retire(handle);
            fail_fast(
                rt,
                handle,
                RuntimeError::TaskFailed {
                    instance: handle,
                    message: error.to_string(),
                },
            );
        }
    }
}

fn release_all(rt: &Runtime, acquired: &[Handle]) {
    for &region in acquired {
        if let Err(error) = rt.inner().regions.release(region) {
            tracing::warn!(%region, %error, "epilogue release failed");
        }
    }
}

/// An unhandled task fault is fatal to the runtime instance: record the
/// first error and initiate shutdown.
fn fail_fast(rt: &Runtime, handle: Handle, error: RuntimeError) {
    tracing::error!(%handle, %error, "task fault; stopping runtime");
    rt.inner().set_first_error(error);
    rt.inner().request_shutdown();
}
