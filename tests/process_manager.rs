//! Process manager admission discipline: single-flight per id, FIFO queueing
//! under the worker limit, cancellation semantics.

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use workdag::engine::EngineEvent;
use workdag::exec::{CancelOutcome, ExecClass, ExecFactory, ExecOutcome, ProcessManager};
use workdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn instant_success() -> ExecFactory {
    Box::new(|_cancel| {
        Box::pin(async {
            ExecOutcome::Success {
                duration: Duration::from_millis(1),
            }
        })
    })
}

fn wait_for_cancel(counter: Arc<AtomicUsize>) -> ExecFactory {
    Box::new(move |cancel: CancellationToken| {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
            ExecOutcome::Canceled
        })
    })
}

/// Receive engine events until the settlement for `id` arrives.
async fn next_settlement(
    rx: &mut mpsc::UnboundedReceiver<EngineEvent>,
) -> workdag::engine::Settlement {
    loop {
        match rx.recv().await.expect("event channel closed") {
            EngineEvent::ExecSettled(settlement) => return settlement,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn second_run_for_the_same_id_is_rejected() -> TestResult {
    init_tracing();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = ProcessManager::new(0, tx, CancellationToken::new());
    let started = Arc::new(AtomicUsize::new(0));

    assert!(manager.run("a", "key1", ExecClass::Worker, wait_for_cancel(started.clone())));
    assert!(
        !manager.run("a", "key2", ExecClass::Worker, wait_for_cancel(started.clone())),
        "duplicate run for an in-flight id must be rejected"
    );

    // Only one execution ever started.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);

    manager.cancel("a");
    let settlement = with_timeout(next_settlement(&mut rx)).await;
    assert_eq!(settlement.id, "a");
    assert_eq!(settlement.outcome, ExecOutcome::Canceled);
    Ok(())
}

#[tokio::test]
async fn queued_executions_are_admitted_fifo() -> TestResult {
    init_tracing();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = ProcessManager::new(1, tx, CancellationToken::new());

    let blocker = Arc::new(AtomicUsize::new(0));
    assert!(manager.run("first", "k", ExecClass::Worker, wait_for_cancel(blocker)));
    assert!(manager.run("second", "k", ExecClass::Worker, instant_success()));
    assert!(manager.run("third", "k", ExecClass::Worker, instant_success()));
    assert_eq!(manager.queued_count(), 2);

    manager.cancel("first");
    let settled = with_timeout(next_settlement(&mut rx)).await;
    assert_eq!(settled.id, "first");
    manager.on_settled(&settled.id);

    // FIFO: "second" before "third".
    let settled = with_timeout(next_settlement(&mut rx)).await;
    assert_eq!(settled.id, "second");
    manager.on_settled(&settled.id);
    let settled = with_timeout(next_settlement(&mut rx)).await;
    assert_eq!(settled.id, "third");
    manager.on_settled(&settled.id);

    assert_eq!(manager.active_count(), 0);
    assert_eq!(manager.queued_count(), 0);
    Ok(())
}

#[tokio::test]
async fn cancelling_a_queued_execution_settles_it_synthetically() -> TestResult {
    init_tracing();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = ProcessManager::new(1, tx, CancellationToken::new());

    let blocker = Arc::new(AtomicUsize::new(0));
    manager.run("running", "k", ExecClass::Worker, wait_for_cancel(blocker));
    manager.run("queued", "k", ExecClass::Worker, instant_success());

    assert_eq!(manager.cancel("queued"), CancelOutcome::Dequeued);
    let settled = with_timeout(next_settlement(&mut rx)).await;
    assert_eq!(settled.id, "queued");
    assert_eq!(settled.outcome, ExecOutcome::Canceled);

    assert_eq!(manager.cancel("missing"), CancelOutcome::NotFound);
    assert_eq!(manager.cancel("running"), CancelOutcome::InFlight);
    Ok(())
}

#[tokio::test]
async fn background_executions_bypass_the_worker_limit() -> TestResult {
    init_tracing();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = ProcessManager::new(1, tx, CancellationToken::new());

    let blocker = Arc::new(AtomicUsize::new(0));
    manager.run("task", "k", ExecClass::Worker, wait_for_cancel(blocker.clone()));
    // The worker slot is taken, but a background execution still starts.
    manager.run("svc", "k", ExecClass::Background, instant_success());

    let settled = with_timeout(next_settlement(&mut rx)).await;
    assert_eq!(settled.id, "svc");
    manager.on_settled(&settled.id);

    manager.cancel("task");
    let settled = with_timeout(next_settlement(&mut rx)).await;
    assert_eq!(settled.id, "task");
    Ok(())
}
