//! Smoke tests for the threaded runtime.
//!
//! The scheduling properties proper are pinned down deterministically in the
//! executor suites; these tests check that the same dispatch core behaves
//! over real worker threads and a real clock.

use fibra::test_utils::{expect_success, init_test_logging, ok};
use fibra::{Outcome, RuntimeBuilder};
use std::time::Duration;

#[test]
fn runs_fibers_to_completion_across_workers() {
    init_test_logging();
    let rt = RuntimeBuilder::new()
        .worker_threads(2)
        .thread_name_prefix("threaded-smoke")
        .build()
        .expect("runtime should build");

    let handle = rt
        .spawn(|cx| async move {
            let child = cx.fork(|cx| async move {
                cx.yield_now().await;
                ok(21)
            })?;
            match child.join().await {
                Outcome::Success(v) => ok(v * 2),
                other => panic!("child failed: {other:?}"),
            }
        })
        .expect("spawn failed");

    let outcome = rt.block_on(handle.join());
    assert_eq!(expect_success(outcome), 42);
    expect_success(rt.shutdown());
}

#[test]
fn sleep_completes_against_the_monotonic_clock() {
    init_test_logging();
    let rt = RuntimeBuilder::new()
        .worker_threads(1)
        .build()
        .expect("runtime should build");

    let handle = rt
        .spawn(|cx| async move {
            cx.sleep(Duration::from_millis(5)).await;
            ok("woke")
        })
        .expect("spawn failed");

    let outcome = rt.block_on(handle.join());
    assert_eq!(expect_success(outcome), "woke");
    expect_success(rt.shutdown());
}

#[test]
fn shutdown_interrupts_lingering_daemons() {
    init_test_logging();
    let rt = RuntimeBuilder::new()
        .worker_threads(2)
        .build()
        .expect("runtime should build");

    let daemon = rt
        .spawn(|cx| async move {
            cx.sleep(Duration::from_secs(3600)).await;
            ok(())
        })
        .expect("spawn failed");

    // Give the daemon a chance to park on its timer.
    std::thread::sleep(Duration::from_millis(20));

    expect_success(rt.shutdown());
    let outcome = daemon.poll_outcome().expect("daemon should be done");
    assert!(outcome.is_interrupted());
}
