//! A dependency cycle errors its members (and anything that requires them)
//! but never takes unrelated work down with it.

use std::error::Error;

use workdag::dag::{detect_cycles, plan_graph, render_cycle};
use workdag::state::TaskPhase;
use workdag_test_utils::builders::{test_id, BuildFileBuilder, TaskConfigBuilder};
use workdag_test_utils::harness::EngineHarness;
use workdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn detect_cycles_reports_the_full_path() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new(&["echo"]).dep("b").build())
        .with_task("b", TaskConfigBuilder::new(&["echo"]).dep("a").build())
        .with_task("c", TaskConfigBuilder::new(&["echo"]).build())
        .build();
    let graph = plan_graph(&build)?;

    let cycles = detect_cycles(&graph);
    assert_eq!(cycles.len(), 1);

    let rendered = render_cycle(&cycles[0]);
    assert!(
        rendered == "a -> b -> a" || rendered == "b -> a -> b",
        "unexpected cycle rendering: {rendered}"
    );
    Ok(())
}

#[tokio::test]
async fn cycle_members_error_while_unrelated_work_completes() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new(&["echo"]).dep("b").build())
        .with_task("b", TaskConfigBuilder::new(&["echo"]).dep("a").build())
        .with_task("c", TaskConfigBuilder::new(&["echo"]).build())
        .build();

    let harness = EngineHarness::builder(build).build();
    let snapshots = harness.snapshots.clone();
    let runtime = harness.runtime.clone();

    let report = with_timeout(harness.run()).await;

    let last = snapshots.lock().unwrap().last().cloned().expect("no snapshots");
    assert!(matches!(
        last.tasks[&test_id("a")].phase,
        TaskPhase::Error { .. }
    ));
    assert!(matches!(
        last.tasks[&test_id("b")].phase,
        TaskPhase::Error { .. }
    ));
    assert!(matches!(
        last.tasks[&test_id("c")].phase,
        TaskPhase::Completed { .. }
    ));

    // Only the unrelated task ever executed, and the run reports failure.
    assert_eq!(runtime.executed(), vec!["c"]);
    assert!(!report.success);
    Ok(())
}

#[tokio::test]
async fn dependents_of_a_cycle_are_blocked_not_hung() -> TestResult {
    init_tracing();

    // d is outside the cycle but requires a member of it.
    let build = BuildFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new(&["echo"]).dep("b").build())
        .with_task("b", TaskConfigBuilder::new(&["echo"]).dep("a").build())
        .with_task("d", TaskConfigBuilder::new(&["echo"]).dep("a").build())
        .with_task("c", TaskConfigBuilder::new(&["echo"]).build())
        .build();

    let harness = EngineHarness::builder(build).build();
    let snapshots = harness.snapshots.clone();

    let report = with_timeout(harness.run()).await;
    assert!(!report.success);

    let last = snapshots.lock().unwrap().last().cloned().expect("no snapshots");
    match &last.tasks[&test_id("d")].phase {
        TaskPhase::Error { message } => {
            assert!(
                message.contains("cycle"),
                "blocked task should name the cycle, got: {message}"
            );
        }
        other => panic!("expected d to be errored, got {other:?}"),
    }
    assert!(matches!(
        last.tasks[&test_id("c")].phase,
        TaskPhase::Completed { .. }
    ));
    Ok(())
}
