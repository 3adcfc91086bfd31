//! State store semantics: key-guarded patches, observer notification and
//! reset discipline.

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use workdag::state::{StateStore, TaskPhase};
use workdag_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn store_with_task(id: &str) -> StateStore {
    StateStore::new(vec![id.to_string()], Vec::new())
}

#[test]
fn stale_patches_are_dropped() -> TestResult {
    init_tracing();
    let mut store = store_with_task("t");

    // First run installs key "old" at Ready.
    assert!(store.patch_task("t", TaskPhase::Ready, Some("old")));
    assert!(store.patch_task("t", TaskPhase::Running, Some("old")));

    // A completion from a superseded execution carries a different key.
    assert!(!store.patch_task(
        "t",
        TaskPhase::Completed {
            cached: false,
            duration: Duration::from_secs(1)
        },
        Some("new")
    ));
    assert!(matches!(
        store.snapshot().tasks["t"].phase,
        TaskPhase::Running
    ));

    // The matching key is accepted.
    assert!(store.patch_task(
        "t",
        TaskPhase::Completed {
            cached: false,
            duration: Duration::from_secs(1)
        },
        Some("old")
    ));
    assert!(store.snapshot().tasks["t"].is_success());
    Ok(())
}

#[test]
fn reset_clears_the_key_so_a_new_run_can_install_its_own() -> TestResult {
    init_tracing();
    let mut store = store_with_task("t");

    store.patch_task("t", TaskPhase::Ready, Some("old"));
    store.patch_task(
        "t",
        TaskPhase::Completed {
            cached: false,
            duration: Duration::ZERO,
        },
        Some("old"),
    );

    assert!(store.reset_node("t"));
    let state = &store.snapshot().tasks["t"];
    assert!(matches!(state.phase, TaskPhase::Pending));
    assert!(state.state_key.is_none());

    // The next run installs a fresh key; the old key would now be stale.
    assert!(store.patch_task("t", TaskPhase::Ready, Some("new")));
    assert!(!store.patch_task("t", TaskPhase::Running, Some("old")));
    assert!(store.patch_task("t", TaskPhase::Running, Some("new")));
    Ok(())
}

#[test]
fn reset_refuses_non_terminal_states() -> TestResult {
    init_tracing();
    let mut store = store_with_task("t");

    store.patch_task("t", TaskPhase::Ready, Some("k"));
    store.patch_task("t", TaskPhase::Running, Some("k"));

    // A running item must be canceled and settled before it can reset.
    assert!(!store.reset_node("t"));
    assert!(matches!(
        store.snapshot().tasks["t"].phase,
        TaskPhase::Running
    ));
    Ok(())
}

#[test]
fn observers_see_every_successful_patch_and_no_rejected_ones() -> TestResult {
    init_tracing();
    let mut store = store_with_task("t");

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        store.subscribe(move |snapshot| {
            let phase = format!("{:?}", snapshot.tasks["t"].phase);
            seen.lock().unwrap().push(phase);
        });
    }

    store.patch_task("t", TaskPhase::Ready, Some("k"));
    store.patch_task("t", TaskPhase::Running, Some("stale")); // rejected
    store.patch_task("t", TaskPhase::Running, Some("k"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2, "rejected patches must not notify: {seen:?}");
    Ok(())
}

#[test]
fn unknown_items_are_ignored() -> TestResult {
    init_tracing();
    let mut store = store_with_task("t");
    assert!(!store.patch_task("nope", TaskPhase::Ready, Some("k")));
    assert!(!store.reset_node("nope"));
    Ok(())
}
