//! End-to-end runs over the real local runtime: actual child processes, a
//! temporary cache root, real service readiness via stdout.

#![cfg(unix)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use workdag::config::BuildFile;
use workdag::dag::plan_graph;
use workdag::engine::{EngineEvent, EngineOptions, Orchestrator, RunReport};
use workdag::exec::ProcessManager;
use workdag::fingerprint::{CacheStore, FingerprintResolver};
use workdag::fs::{FileSystem, RealFileSystem};
use workdag::runtime::{LocalRuntime, Runtime};
use workdag::state::{Snapshot, StateStore};
use workdag::types::CacheMode;
use workdag_test_utils::builders::{
    test_id, BuildFileBuilder, ServiceConfigBuilder, TaskConfigBuilder,
};
use workdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Wire a real engine (local runtime, real filesystem, temp cache root) over
/// every item in the build file.
fn real_engine(
    build: &BuildFile,
    cache_root: PathBuf,
) -> (Orchestrator, Arc<Mutex<Vec<Snapshot>>>) {
    let graph = Arc::new(plan_graph(build).expect("planning failed"));
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let cache = CacheStore::new(fs.clone(), cache_root.clone());
    let resolver = FingerprintResolver::new(fs.clone(), cache, CacheMode::None, PathBuf::new());

    let (events_tx, events_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let manager = ProcessManager::new(0, events_tx.clone(), CancellationToken::new());
    let runtime: Arc<dyn Runtime> = Arc::new(LocalRuntime::new(
        events_tx,
        fs,
        cache_root.join("services"),
    ));

    let task_ids: Vec<String> = graph.tasks().map(|i| i.id.clone()).collect();
    let service_ids: Vec<String> = graph.services().map(|i| i.id.clone()).collect();
    let mut store = StateStore::new(task_ids, service_ids);

    let snapshots: Arc<Mutex<Vec<Snapshot>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let snapshots = snapshots.clone();
        store.subscribe(move |snapshot| snapshots.lock().unwrap().push(snapshot.clone()));
    }

    let orchestrator = Orchestrator::new(
        graph,
        store,
        manager,
        runtime,
        resolver,
        EngineOptions::default(),
        events_rx,
    );
    (orchestrator, snapshots)
}

async fn run_real(build: &BuildFile) -> (RunReport, Arc<Mutex<Vec<Snapshot>>>) {
    let dir = tempdir().expect("tempdir");
    let (orchestrator, snapshots) = real_engine(build, dir.path().to_path_buf());
    let report = with_timeout(orchestrator.run()).await.expect("run failed");
    (report, snapshots)
}

#[tokio::test]
async fn a_real_task_completes() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task("hello", TaskConfigBuilder::new(&["echo", "hello"]).build())
        .build();

    let (report, _) = run_real(&build).await;
    assert!(report.success);
    Ok(())
}

#[tokio::test]
async fn a_nonzero_exit_becomes_a_crash_with_the_exit_code() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task(
            "broken",
            TaskConfigBuilder::new(&["sh", "-c", "echo oops >&2; exit 3"]).build(),
        )
        .build();

    let (report, snapshots) = run_real(&build).await;
    assert!(!report.success);

    let last = snapshots.lock().unwrap().last().cloned().expect("no snapshots");
    assert!(matches!(
        last.tasks[&test_id("broken")].phase,
        workdag::state::TaskPhase::Crashed { exit_code: 3 }
    ));

    // The stderr tail reaches the report.
    let item = report.items.iter().find(|i| i.name == "broken").unwrap();
    assert!(item.tail.iter().any(|line| line.contains("oops")));
    Ok(())
}

#[tokio::test]
async fn a_missing_binary_is_an_execution_error() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task(
            "ghost",
            TaskConfigBuilder::new(&["definitely-not-a-real-binary-7351"]).build(),
        )
        .build();

    let (report, snapshots) = run_real(&build).await;
    assert!(!report.success);

    let last = snapshots.lock().unwrap().last().cloned().expect("no snapshots");
    assert!(matches!(
        last.tasks[&test_id("ghost")].phase,
        workdag::state::TaskPhase::Error { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn a_task_timeout_is_treated_as_a_failure() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_task(
            "stuck",
            TaskConfigBuilder::new(&["sleep", "30"]).timeout("200ms").build(),
        )
        .build();

    let (report, snapshots) = run_real(&build).await;
    assert!(!report.success);

    let last = snapshots.lock().unwrap().last().cloned().expect("no snapshots");
    match &last.tasks[&test_id("stuck")].phase {
        workdag::state::TaskPhase::Error { message } => {
            assert!(message.contains("timed out"), "got: {message}");
        }
        other => panic!("expected a timeout error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn service_readiness_via_stdout_gates_the_dependent_task() -> TestResult {
    init_tracing();

    let build = BuildFileBuilder::new()
        .with_service(
            "announcer",
            ServiceConfigBuilder::new(&[
                "sh",
                "-c",
                "echo starting; sleep 0.1; echo now ready; sleep 30",
            ])
            .ready_on_stdout("now ready")
            .endpoint("localhost:9999")
            .build(),
        )
        .with_task(
            "dependent",
            TaskConfigBuilder::new(&["true"]).need("announcer").build(),
        )
        .build();

    let (report, snapshots) = run_real(&build).await;
    assert!(report.success);

    // The service reported its configured endpoint before the task ran.
    let endpoint_seen = snapshots.lock().unwrap().iter().any(|s| {
        matches!(
            &s.services[&test_id("announcer")].phase,
            workdag::state::ServicePhase::Running { endpoint } if endpoint == "localhost:9999"
        )
    });
    assert!(endpoint_seen);
    Ok(())
}
