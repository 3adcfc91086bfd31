use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use workdag::config::BuildFile;
use workdag::dag::{plan_graph, WorkGraph};
use workdag::engine::{EngineEvent, EngineOptions, Orchestrator, RunReport};
use workdag::exec::ProcessManager;
use workdag::fingerprint::{CacheStore, FingerprintResolver};
use workdag::fs::mock::MockFileSystem;
use workdag::fs::FileSystem;
use workdag::state::{Snapshot, StateStore};
use workdag::types::CacheMode;

use crate::fake_runtime::FakeRuntime;

/// A fully wired engine over a [`FakeRuntime`] and a [`MockFileSystem`],
/// ready to run in a test.
pub struct EngineHarness {
    pub graph: Arc<WorkGraph>,
    pub events_tx: mpsc::UnboundedSender<EngineEvent>,
    pub runtime: Arc<FakeRuntime>,
    pub fs: Arc<MockFileSystem>,
    /// Every snapshot the store published, in order.
    pub snapshots: Arc<Mutex<Vec<Snapshot>>>,
    orchestrator: Orchestrator,
}

impl EngineHarness {
    pub fn builder(build: BuildFile) -> HarnessBuilder {
        HarnessBuilder {
            build,
            target: None,
            watch: false,
            keep_services: false,
            workers: 0,
            cache_mode: CacheMode::None,
            fs: None,
        }
    }

    /// Drive the engine to completion and return the report.
    pub async fn run(self) -> RunReport {
        self.orchestrator.run().await.expect("engine run failed")
    }

    /// Send a shutdown event (ends watch / keep-services runs).
    pub fn shutdown(&self) {
        let _ = self.events_tx.send(EngineEvent::Shutdown);
    }
}

pub struct HarnessBuilder {
    build: BuildFile,
    target: Option<String>,
    watch: bool,
    keep_services: bool,
    workers: usize,
    cache_mode: CacheMode,
    fs: Option<Arc<MockFileSystem>>,
}

impl HarnessBuilder {
    /// Schedule only the closure of this task (by name). Default: everything.
    pub fn target(mut self, name: &str) -> Self {
        self.target = Some(name.to_string());
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn keep_services(mut self, keep: bool) -> Self {
        self.keep_services = keep;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Share a mock filesystem across harnesses (e.g. two runs over the
    /// same cache).
    pub fn fs(mut self, fs: Arc<MockFileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn build(self) -> EngineHarness {
        let graph = Arc::new(plan_graph(&self.build).expect("planning failed"));

        let closure: Vec<String> = match &self.target {
            Some(name) => {
                let item = graph.by_name(name).expect("unknown target task");
                graph.closure_of(&item.id)
            }
            None => {
                let mut ids: Vec<String> = graph.items().map(|i| i.id.clone()).collect();
                ids.sort();
                ids
            }
        };

        let fs = self.fs.unwrap_or_else(|| Arc::new(MockFileSystem::new()));
        let fs_dyn: Arc<dyn FileSystem> = fs.clone();
        let cache = CacheStore::new(fs_dyn.clone(), PathBuf::from("cache"));
        // Empty project root: mock paths like "src/a.rs" resolve as-is.
        let resolver = FingerprintResolver::new(fs_dyn, cache, self.cache_mode, PathBuf::new());

        let (events_tx, events_rx) = mpsc::unbounded_channel::<EngineEvent>();
        let shutdown = CancellationToken::new();
        let manager = ProcessManager::new(self.workers, events_tx.clone(), shutdown);
        let runtime = Arc::new(FakeRuntime::new(events_tx.clone()));

        let task_ids: Vec<String> = closure
            .iter()
            .filter(|id| graph.item(id).map(|i| i.is_task()).unwrap_or(false))
            .cloned()
            .collect();
        let service_ids: Vec<String> = closure
            .iter()
            .filter(|id| graph.item(id).map(|i| i.is_service()).unwrap_or(false))
            .cloned()
            .collect();

        let mut store = StateStore::new(task_ids, service_ids);
        let snapshots: Arc<Mutex<Vec<Snapshot>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let snapshots = snapshots.clone();
            store.subscribe(move |snapshot| {
                snapshots.lock().unwrap().push(snapshot.clone());
            });
        }

        let options = EngineOptions {
            watch: self.watch,
            keep_services: self.keep_services,
        };

        let orchestrator = Orchestrator::new(
            graph.clone(),
            store,
            manager,
            runtime.clone(),
            resolver,
            options,
            events_rx,
        );

        EngineHarness {
            graph,
            events_tx,
            runtime,
            fs,
            snapshots,
            orchestrator,
        }
    }
}
