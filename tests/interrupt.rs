//! Interruption protocol: idempotence, wakeups, masking, and unwinding.

use fibra::test_utils::{expect_interrupted, expect_success, ok, test_executor};
use fibra::{InterruptKind, Outcome};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn repeated_interrupts_are_idempotent() {
    let mut exec = test_executor();
    let handle = exec
        .spawn::<_, _, ()>(|cx| async move {
            loop {
                cx.yield_now().await;
            }
        })
        .expect("fork failed");

    exec.run_steps(3);
    handle.request_interrupt();
    handle.request_interrupt();
    handle.request_interrupt();
    exec.run_until_quiescent();

    let cause = expect_interrupted(handle.poll_outcome().expect("fiber should be done"));
    assert_eq!(cause.kind, InterruptKind::Explicit);
}

#[test]
fn interrupting_a_sleeping_fiber_wakes_it_immediately() {
    let mut exec = test_executor();
    let handle = exec
        .spawn(|cx| async move {
            cx.sleep(Duration::from_secs(3600)).await;
            ok(())
        })
        .expect("fork failed");

    // Park the fiber on its timer without advancing time.
    exec.run_steps(2);
    assert!(handle.poll_outcome().is_none());
    assert_eq!(exec.now(), fibra::Time::ZERO);

    // Interrupt-and-await returns long before the hour elapses.
    let outcome = exec.block_on(handle.interrupt());
    expect_interrupted(outcome);
    assert_eq!(exec.now(), fibra::Time::ZERO);
}

#[test]
fn interrupting_a_done_fiber_is_a_no_op() {
    let mut exec = test_executor();
    let handle = exec.spawn(|_cx| async move { ok(7) }).expect("fork failed");
    exec.run_until_quiescent();

    let outcome = exec.block_on(handle.interrupt());
    match outcome {
        Outcome::Success(v) => assert_eq!(v, 7),
        other => panic!("natural outcome must be preserved, got {other:?}"),
    }
}

#[test]
fn awaiting_a_done_fiber_resolves_immediately_and_repeatedly() {
    let mut exec = test_executor();
    let handle = exec.spawn(|_cx| async move { ok(42) }).expect("fork failed");
    exec.run_until_quiescent();

    for _ in 0..3 {
        match handle.poll_outcome().expect("fiber is done") {
            Outcome::Success(v) => assert_eq!(v, 42),
            other => panic!("expected identical stored outcome, got {other:?}"),
        }
    }
    let joined = exec.block_on(handle.join());
    assert_eq!(joined.unwrap(), 42);
    let joined_again = exec.block_on(handle.join());
    assert_eq!(joined_again.unwrap(), 42);
}

#[test]
fn masking_defers_interruption_until_the_next_checkpoint() {
    let mut exec = test_executor();
    let progressed = Arc::new(AtomicU32::new(0));

    let progressed_f = progressed.clone();
    let handle = exec
        .spawn(move |cx| async move {
            let guard = cx.mask();
            for _ in 0..3 {
                progressed_f.fetch_add(1, Ordering::SeqCst);
                cx.yield_now().await;
            }
            drop(guard);
            cx.checkpoint().await;
            ok(())
        })
        .expect("fork failed");

    exec.run_steps(1);
    handle.request_interrupt();
    exec.run_until_quiescent();

    // The masked section finished all three turns before unwinding.
    assert_eq!(progressed.load(Ordering::SeqCst), 3);
    expect_interrupted(handle.poll_outcome().expect("fiber should be done"));
}

#[test]
fn interrupt_waits_for_the_targets_own_finalizers() {
    let mut exec = test_executor();
    let cleaned = Arc::new(AtomicU32::new(0));

    let cleaned_f = cleaned.clone();
    let handle = exec
        .spawn::<_, _, ()>(move |cx| async move {
            let scope = cx.make_scope();
            let cleaned_inner = cleaned_f.clone();
            scope
                .add_finalizer(move || {
                    cleaned_inner.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .expect("scope is open");
            loop {
                cx.yield_now().await;
            }
        })
        .expect("fork failed");

    exec.run_steps(3);
    assert_eq!(cleaned.load(Ordering::SeqCst), 0);

    let outcome = exec.block_on(handle.interrupt());
    expect_interrupted(outcome);
    // The owned scope's finalizer completed before interrupt() returned.
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn interrupted_fiber_unwinds_owned_scopes_in_reverse_order() {
    let mut exec = test_executor();
    let order: Arc<std::sync::Mutex<Vec<&'static str>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));

    let order_f = order.clone();
    let handle = exec
        .spawn::<_, _, ()>(move |cx| async move {
            let first = cx.make_scope();
            let order_a = order_f.clone();
            first
                .add_finalizer(move || {
                    order_a.lock().unwrap().push("first");
                    Ok(())
                })
                .expect("scope is open");

            let second = cx.make_scope();
            let order_b = order_f.clone();
            second
                .add_finalizer(move || {
                    order_b.lock().unwrap().push("second");
                    Ok(())
                })
                .expect("scope is open");

            loop {
                cx.yield_now().await;
            }
        })
        .expect("fork failed");

    exec.run_steps(2);
    let outcome = exec.block_on(handle.interrupt());
    expect_interrupted(outcome);

    // Scopes close LIFO: the most recently created unwinds first.
    assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
}

#[test]
fn a_panicking_fiber_becomes_a_failure_outcome() {
    let mut exec = test_executor();
    let handle = exec
        .spawn::<_, _, ()>(|_cx| async move { panic!("fiber exploded") })
        .expect("fork failed");

    exec.run_until_quiescent();
    match handle.poll_outcome().expect("fiber should be done") {
        Outcome::Failure(e) => assert!(e.to_string().contains("fiber exploded")),
        other => panic!("expected Failure, got {other:?}"),
    }
}

#[test]
fn an_explicit_checkpoint_observes_a_pending_interrupt() {
    let mut exec = test_executor();
    let progress = Arc::new(AtomicU32::new(0));

    let progress_f = progress.clone();
    let handle = exec
        .spawn::<_, _, ()>(move |cx| async move {
            progress_f.fetch_add(1, Ordering::SeqCst);
            cx.interrupt_self("stop requested");
            // The flag is set mid-segment; this checkpoint is where it is
            // observed. Nothing below ever runs.
            cx.checkpoint().await;
            progress_f.fetch_add(100, Ordering::SeqCst);
            loop {
                cx.yield_now().await;
            }
        })
        .expect("fork failed");

    exec.run_until_quiescent();
    assert_eq!(progress.load(Ordering::SeqCst), 1);
    let cause = expect_interrupted(handle.poll_outcome().expect("fiber should be done"));
    assert_eq!(cause.kind, InterruptKind::Explicit);
    assert_eq!(cause.message, Some("stop requested"));
}

#[test]
fn interrupting_from_inside_via_a_fiber_handle_works_across_fibers() {
    let mut exec = test_executor();

    let root = exec
        .spawn(|cx| async move {
            let worker = cx.fork_daemon::<_, _, ()>(|cx| async move {
                loop {
                    cx.yield_now().await;
                }
            })?;
            cx.yield_now().await;
            // Interrupt-and-await from a sibling fiber.
            let outcome = worker.interrupt().await;
            ok(outcome.is_interrupted())
        })
        .expect("fork failed");

    exec.run_until_quiescent();
    assert!(expect_success(
        root.poll_outcome().expect("root should be done")
    ));
}
