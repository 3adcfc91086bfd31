//! Failure propagation: fail-fast outside watch mode, containment inside it,
//! and service-ended errors reaching every dependent.

use std::error::Error;
use std::time::Duration;

use tokio::time::sleep;

use workdag::state::{EndReason, ServicePhase, TaskPhase};
use workdag_test_utils::builders::{
    test_id, BuildFileBuilder, ServiceConfigBuilder, TaskConfigBuilder,
};
use workdag_test_utils::harness::EngineHarness;
use workdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn a_dead_service_errors_its_dependents_with_the_reason() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_service("db", ServiceConfigBuilder::new(&["db"]).build())
        .with_task(
            "migrate",
            TaskConfigBuilder::new(&["migrate"]).need("db").build(),
        )
        .build();

    let harness = EngineHarness::builder(build).target("migrate").build();
    harness.runtime.fail("db");
    let snapshots = harness.snapshots.clone();

    let report = with_timeout(harness.run()).await;
    assert!(!report.success);

    let last = snapshots.lock().unwrap().last().cloned().expect("no snapshots");
    assert!(matches!(
        last.services[&test_id("db")].phase,
        ServicePhase::Ended {
            reason: EndReason::Crashed
        }
    ));
    match &last.tasks[&test_id("migrate")].phase {
        TaskPhase::Error { message } => {
            assert!(
                message.contains("db") && message.contains("ended"),
                "dependent error should name the dead service: {message}"
            );
        }
        other => panic!("expected the dependent to error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn outside_watch_mode_a_crash_cancels_everything_else() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task("bad", TaskConfigBuilder::new(&["false"]).build())
        .with_task("slow", TaskConfigBuilder::new(&["sleep"]).build())
        .build();

    let harness = EngineHarness::builder(build).build();
    harness.runtime.fail("bad");
    harness.runtime.hold("slow");
    let snapshots = harness.snapshots.clone();

    let report = with_timeout(harness.run()).await;
    assert!(!report.success);

    let last = snapshots.lock().unwrap().last().cloned().expect("no snapshots");
    assert!(matches!(
        last.tasks[&test_id("bad")].phase,
        TaskPhase::Crashed { exit_code: 1 }
    ));
    assert!(
        matches!(last.tasks[&test_id("slow")].phase, TaskPhase::Canceled),
        "the held task must be canceled by fail-fast"
    );
    Ok(())
}

#[tokio::test]
async fn inside_watch_mode_a_crash_is_contained() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task("bad", TaskConfigBuilder::new(&["false"]).build())
        .with_task(
            "downstream",
            TaskConfigBuilder::new(&["echo"]).dep("bad").build(),
        )
        .with_task("good", TaskConfigBuilder::new(&["echo"]).build())
        .build();

    let harness = EngineHarness::builder(build).watch(true).build();
    harness.runtime.fail("bad");
    let snapshots = harness.snapshots.clone();
    let events_tx = harness.events_tx.clone();

    let engine = tokio::spawn(harness.run());

    // Wait until the crash landed and the unrelated task finished.
    let settled = || {
        let guard = snapshots.lock().unwrap();
        guard
            .last()
            .map(|s| {
                matches!(s.tasks[&test_id("bad")].phase, TaskPhase::Crashed { .. })
                    && s.tasks[&test_id("good")].is_success()
            })
            .unwrap_or(false)
    };
    for _ in 0..500 {
        if settled() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(settled(), "crash did not stay contained");

    // The dependent of the crashed task is parked, not canceled: it can
    // proceed if a watch reset fixes its dep.
    {
        let guard = snapshots.lock().unwrap();
        let last = guard.last().expect("no snapshots");
        assert!(matches!(
            last.tasks[&test_id("downstream")].phase,
            TaskPhase::Pending
        ));
    }

    events_tx.send(workdag::engine::EngineEvent::Shutdown).unwrap();
    let report = with_timeout(async { engine.await.unwrap() }).await;
    assert!(!report.success);
    Ok(())
}

#[tokio::test]
async fn keep_services_mode_leaves_services_running_until_shutdown() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_service("db", ServiceConfigBuilder::new(&["db"]).build())
        .with_task("seed", TaskConfigBuilder::new(&["seed"]).need("db").build())
        .build();

    let harness = EngineHarness::builder(build).keep_services(true).build();
    let snapshots = harness.snapshots.clone();
    let events_tx = harness.events_tx.clone();

    let engine = tokio::spawn(harness.run());

    // The dependent task completes while the service keeps running.
    let ready = || {
        let guard = snapshots.lock().unwrap();
        guard
            .last()
            .map(|s| {
                s.tasks[&test_id("seed")].is_success()
                    && s.services[&test_id("db")].is_running()
            })
            .unwrap_or(false)
    };
    for _ in 0..500 {
        if ready() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(ready(), "service should stay up after its dependent finished");

    events_tx.send(workdag::engine::EngineEvent::Shutdown).unwrap();
    let report = with_timeout(async { engine.await.unwrap() }).await;
    assert!(report.success);
    Ok(())
}
