//! Bounded-concurrency fan-out with deterministic result ordering.
//!
//! Tasks are dispatched to a fixed pool of scoped worker threads. Result
//! slots are indexed by input position and each task writes only its own
//! slot, so output order always matches input order regardless of
//! completion order. Error policy is either fail-fast (first error cancels
//! the shared execution context) or continue-on-error with optional
//! aggregation.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::unbounded;

use crate::context::Context;
use crate::error::{Error, Result};

/// Options controlling a parallel run.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Upper bound on concurrent workers; clamped to `[1, total]`.
    pub workers: usize,
    /// Run every task even after failures.
    pub continue_on_error: bool,
    /// With `continue_on_error`, join captured errors into one composite.
    pub aggregate_errors: bool,
}

impl ExecOptions {
    pub fn fail_fast(workers: usize) -> Self {
        Self {
            workers,
            continue_on_error: false,
            aggregate_errors: false,
        }
    }

    pub fn collect_all(workers: usize) -> Self {
        Self {
            workers,
            continue_on_error: true,
            aggregate_errors: true,
        }
    }
}

/// Run `total` indexed tasks, discarding their outputs.
pub fn run<F>(ctx: &Context, total: usize, opts: &ExecOptions, f: F) -> Result<()>
where
    F: Fn(&Context, usize) -> Result<()> + Sync,
{
    map(ctx, total, opts, f).map(|_| ())
}

/// Run `total` indexed tasks and collect outputs in input order.
///
/// Fail-fast mode returns the first observed error; remaining in-flight
/// tasks see the shared context cancelled at their next suspension point.
/// Continue mode runs everything and either aggregates the captured errors
/// or returns the first by index.
pub fn map<T, F>(ctx: &Context, total: usize, opts: &ExecOptions, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&Context, usize) -> Result<T> + Sync,
{
    if total == 0 {
        return Ok(Vec::new());
    }
    ctx.check()?;

    let workers = opts.workers.max(1).min(total);
    let exec = ctx.child();

    let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();

    if workers == 1 {
        for (idx, slot) in slots.iter_mut().enumerate() {
            exec.check()?;
            match f(&exec, idx) {
                Err(err) if !opts.continue_on_error => return Err(err),
                result => *slot = Some(result),
            }
        }
    } else {
        let next = AtomicUsize::new(0);
        let (tx, rx) = unbounded();
        let f = &f;
        let exec_ref = &exec;
        let next_ref = &next;

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                scope.spawn(move || loop {
                    let idx = next_ref.fetch_add(1, Ordering::SeqCst);
                    if idx >= total {
                        break;
                    }
                    if exec_ref.is_cancelled() {
                        let _ = tx.send((idx, Err(Error::Cancelled)));
                        continue;
                    }
                    let result = f(exec_ref, idx);
                    if result.is_err() && !opts.continue_on_error {
                        exec_ref.cancel();
                    }
                    let _ = tx.send((idx, result));
                });
            }
            drop(tx);
        });

        // Channel arrival order approximates observation order; remember
        // which slot held the first real (non-cancellation) error.
        let mut first_observed: Option<usize> = None;
        let mut saw_cancelled = false;
        for (idx, result) in rx.iter() {
            match &result {
                Err(Error::Cancelled) => saw_cancelled = true,
                Err(_) if first_observed.is_none() => first_observed = Some(idx),
                _ => {}
            }
            slots[idx] = Some(result);
        }

        if !opts.continue_on_error {
            if let Some(idx) = first_observed {
                match slots[idx].take() {
                    Some(Err(err)) => return Err(err),
                    _ => unreachable!("first_observed always indexes an error slot"),
                }
            }
            if saw_cancelled {
                return Err(Error::Cancelled);
            }
        }
    }

    // Pull captured errors out in index order.
    let mut values = Vec::with_capacity(total);
    let mut errors = Vec::new();
    for slot in slots {
        match slot.expect("every slot is written exactly once") {
            Ok(value) => values.push(value),
            Err(err) => errors.push(err),
        }
    }

    if errors.is_empty() {
        return Ok(values);
    }
    if opts.aggregate_errors {
        Err(Error::Aggregate(errors))
    } else {
        Err(errors.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn empty_input_is_ok() {
        let ctx = Context::background();
        let result: Vec<usize> =
            map(&ctx, 0, &ExecOptions::fail_fast(4), |_, i| Ok(i)).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn results_follow_input_order() {
        let ctx = Context::background();
        let results = map(&ctx, 16, &ExecOptions::fail_fast(4), |_, idx| {
            // Later indexes finish first.
            std::thread::sleep(Duration::from_millis((16 - idx as u64) * 2));
            Ok(idx * 10)
        })
        .unwrap();
        let expected: Vec<usize> = (0..16).map(|i| i * 10).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn single_worker_runs_sequentially() {
        let ctx = Context::background();
        let order = Mutex::new(Vec::new());
        map(&ctx, 8, &ExecOptions::fail_fast(1), |_, idx| {
            order.lock().unwrap().push(idx);
            Ok(())
        })
        .unwrap();
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn fail_fast_returns_first_error_and_cancels() {
        let ctx = Context::background();
        let started = AtomicUsize::new(0);
        let err = map(&ctx, 32, &ExecOptions::fail_fast(2), |task_ctx, idx| {
            started.fetch_add(1, Ordering::SeqCst);
            if idx == 0 {
                return Err(Error::Internal("clone failed".into()));
            }
            // Tasks observe cancellation at their suspension point.
            for _ in 0..50 {
                if task_ctx.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        })
        .unwrap_err();
        assert!(err.to_string().contains("clone failed"));
        assert!(started.load(Ordering::SeqCst) < 32);
    }

    #[test]
    fn continue_on_error_runs_everything_and_aggregates() {
        let ctx = Context::background();
        let ran = AtomicUsize::new(0);
        let err = map(&ctx, 6, &ExecOptions::collect_all(3), |_, idx| {
            ran.fetch_add(1, Ordering::SeqCst);
            if idx % 2 == 0 {
                Err(Error::Internal(format!("task {idx}")))
            } else {
                Ok(idx)
            }
        })
        .unwrap_err();

        assert_eq!(ran.load(Ordering::SeqCst), 6);
        match err {
            Error::Aggregate(errors) => {
                assert_eq!(errors.len(), 3);
                // Index order, not completion order.
                assert!(errors[0].to_string().contains("task 0"));
                assert!(errors[2].to_string().contains("task 4"));
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn continue_without_aggregate_returns_first_by_index() {
        let ctx = Context::background();
        let err = map(
            &ctx,
            4,
            &ExecOptions {
                workers: 2,
                continue_on_error: true,
                aggregate_errors: false,
            },
            |_, idx| {
                if idx >= 2 {
                    Err(Error::Internal(format!("task {idx}")))
                } else {
                    Ok(())
                }
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("task 2"));
    }

    #[test]
    fn pre_cancelled_context_refuses_to_run() {
        let ctx = Context::background();
        ctx.cancel();
        let err = run(&ctx, 4, &ExecOptions::fail_fast(2), |_, _| Ok(())).unwrap_err();
        assert_eq!(err.code(), "cancelled");
    }

    #[test]
    fn worker_bound_is_respected() {
        let ctx = Context::background();
        let live = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        map(&ctx, 24, &ExecOptions::fail_fast(3), |_, _| {
            let current = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(current, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            live.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
