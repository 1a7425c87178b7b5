//! Scope close semantics: finalizer ordering, failure aggregation,
//! idempotence, and late registration.

use fibra::test_utils::{expect_success, ok, test_executor};
use fibra::{Error, Outcome};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn finalizers_run_in_reverse_registration_order() {
    let mut exec = test_executor();
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let scope = exec.make_scope();
    for n in 1..=3 {
        let order_f = order.clone();
        scope
            .add_finalizer(move || {
                order_f.lock().unwrap().push(n);
                Ok(())
            })
            .expect("scope is open");
    }

    let outcome = exec.block_on(scope.close());
    expect_success(outcome);
    assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
}

#[test]
fn a_failing_finalizer_does_not_stop_the_rest() {
    let mut exec = test_executor();
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let scope = exec.make_scope();
    let order_1 = order.clone();
    scope
        .add_finalizer(move || {
            order_1.lock().unwrap().push(1);
            Ok(())
        })
        .expect("scope is open");
    let order_2 = order.clone();
    scope
        .add_finalizer(move || {
            order_2.lock().unwrap().push(2);
            Err(Error::Message("finalizer two failed"))
        })
        .expect("scope is open");
    let order_3 = order.clone();
    scope
        .add_finalizer(move || {
            order_3.lock().unwrap().push(3);
            Ok(())
        })
        .expect("scope is open");

    let outcome = exec.block_on(scope.close());
    // Every finalizer ran, in order, and the one failure is aggregated.
    assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
    match outcome {
        Outcome::Failure(Error::FinalizerFailure(errors)) => assert_eq!(errors.len(), 1),
        other => panic!("expected FinalizerFailure, got {other:?}"),
    }
}

#[test]
fn async_finalizers_interleave_with_sync_ones() {
    let mut exec = test_executor();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let scope = exec.make_scope();
    let order_sync = order.clone();
    scope
        .add_finalizer(move || {
            order_sync.lock().unwrap().push("sync");
            Ok(())
        })
        .expect("scope is open");
    let order_async = order.clone();
    scope
        .add_async_finalizer(async move {
            order_async.lock().unwrap().push("async");
            Ok(())
        })
        .expect("scope is open");

    let outcome = exec.block_on(scope.close());
    expect_success(outcome);
    assert_eq!(*order.lock().unwrap(), vec!["async", "sync"]);
}

#[test]
fn close_is_idempotent_and_repeats_the_stored_outcome() {
    let mut exec = test_executor();
    let runs = Arc::new(AtomicU32::new(0));

    let scope = exec.make_scope();
    let runs_f = runs.clone();
    scope
        .add_finalizer(move || {
            runs_f.fetch_add(1, Ordering::SeqCst);
            Err(Error::Message("once"))
        })
        .expect("scope is open");

    let first = exec.block_on(scope.close());
    let second = exec.block_on(scope.close());

    assert_eq!(runs.load(Ordering::SeqCst), 1, "finalizers run exactly once");
    assert!(first.is_failure());
    assert!(second.is_failure(), "late closers see the stored outcome");
}

#[test]
fn concurrent_closers_share_one_close() {
    let mut exec = test_executor();
    let runs = Arc::new(AtomicU32::new(0));

    let scope = exec.make_scope();
    let runs_f = runs.clone();
    scope
        .add_finalizer(move || {
            runs_f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .expect("scope is open");

    // Park one fiber inside the scope so the close has to drain it, keeping
    // both closers in flight at once.
    let scope_w = scope.clone();
    let root = exec
        .spawn(move |cx| async move {
            let _worker = cx.fork_in(&scope_w, |cx| async move {
                for _ in 0..3 {
                    cx.yield_now().await;
                }
                ok(())
            })?;
            ok(())
        })
        .expect("fork failed");
    exec.run_steps(2);
    expect_success(root.poll_outcome().expect("root should be done"));

    let close_a = scope.close();
    let close_b = scope.close();
    let (a, b) = exec.block_on(async move {
        let a = close_a.await;
        let b = close_b.await;
        (a, b)
    });

    assert_eq!(runs.load(Ordering::SeqCst), 1, "finalizers run exactly once");
    assert!(a.is_success());
    assert!(b.is_success());
}

#[test]
fn late_finalizer_still_runs_but_reports_scope_closed() {
    let mut exec = test_executor();
    let scope = exec.make_scope();
    let outcome = exec.block_on(scope.close());
    expect_success(outcome);

    let ran = Arc::new(AtomicU32::new(0));
    let ran_f = ran.clone();
    let result = scope.add_finalizer(move || {
        ran_f.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(matches!(result, Err(Error::ScopeClosed)));
    assert_eq!(ran.load(Ordering::SeqCst), 1, "the action still ran");
}

#[test]
fn closing_a_scope_interrupts_and_awaits_attached_fibers_first() {
    let mut exec = test_executor();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let scope = exec.make_scope();
    let order_fin = order.clone();
    scope
        .add_finalizer(move || {
            order_fin.lock().unwrap().push("finalizer");
            Ok(())
        })
        .expect("scope is open");

    let scope_w = scope.clone();
    let order_w = order.clone();
    let root = exec
        .spawn(move |cx| async move {
            let order_inner = order_w.clone();
            let _worker = cx.fork_in::<_, _, ()>(&scope_w, move |cx| async move {
                loop {
                    order_inner.lock().unwrap().push("worker");
                    cx.yield_now().await;
                }
            })?;
            ok(())
        })
        .expect("fork failed");
    exec.run_steps(3);
    expect_success(root.poll_outcome().expect("root should be done"));

    let outcome = exec.block_on(scope.close());
    expect_success(outcome);

    let order = order.lock().unwrap();
    assert_eq!(order.last(), Some(&"finalizer"));
    assert!(order.iter().filter(|s| **s == "worker").count() >= 1);
}
