//! The worker limit bounds concurrent task executions; services run in the
//! unbounded background class.

use std::error::Error;

use workdag::state::TaskPhase;
use workdag_test_utils::builders::{BuildFileBuilder, ServiceConfigBuilder, TaskConfigBuilder};
use workdag_test_utils::harness::EngineHarness;
use workdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn no_more_than_n_tasks_execute_at_once() -> TestResult {
    init_tracing();

    // Six independent leaves, limit two.
    let mut builder = BuildFileBuilder::new();
    for i in 0..6 {
        builder = builder.with_task(
            &format!("leaf{i}"),
            TaskConfigBuilder::new(&["echo", "leaf"]).build(),
        );
    }
    let build = builder.build();

    let harness = EngineHarness::builder(build).workers(2).build();
    let runtime = harness.runtime.clone();
    let snapshots = harness.snapshots.clone();

    let report = with_timeout(harness.run()).await;
    assert!(report.success);
    assert_eq!(runtime.executed().len(), 6);
    assert!(
        runtime.max_concurrent_tasks() <= 2,
        "observed {} concurrent executions with workers = 2",
        runtime.max_concurrent_tasks()
    );

    // The store must agree: never more than two tasks in `Running`.
    for snapshot in snapshots.lock().unwrap().iter() {
        let running = snapshot
            .tasks
            .values()
            .filter(|t| matches!(t.phase, TaskPhase::Running))
            .count();
        assert!(running <= 2, "snapshot shows {running} running tasks");
    }
    Ok(())
}

#[tokio::test]
async fn zero_limit_means_unbounded() -> TestResult {
    init_tracing();

    let mut builder = BuildFileBuilder::new();
    for i in 0..4 {
        builder = builder.with_task(
            &format!("leaf{i}"),
            TaskConfigBuilder::new(&["echo", "leaf"]).build(),
        );
    }
    let build = builder.build();

    let harness = EngineHarness::builder(build).workers(0).build();
    let runtime = harness.runtime.clone();

    let report = with_timeout(harness.run()).await;
    assert!(report.success);
    assert_eq!(runtime.executed().len(), 4);
    Ok(())
}

#[tokio::test]
async fn services_do_not_consume_worker_slots() -> TestResult {
    init_tracing();

    // One worker slot; the task still runs while both services are up.
    let build = BuildFileBuilder::new()
        .with_service("db", ServiceConfigBuilder::new(&["db"]).build())
        .with_service("queue", ServiceConfigBuilder::new(&["queue"]).build())
        .with_task(
            "work",
            TaskConfigBuilder::new(&["do-work"])
                .need("db")
                .need("queue")
                .build(),
        )
        .build();

    let harness = EngineHarness::builder(build)
        .target("work")
        .workers(1)
        .build();
    let runtime = harness.runtime.clone();

    let report = with_timeout(harness.run()).await;
    assert!(report.success);
    assert_eq!(runtime.executed().len(), 3);
    Ok(())
}
