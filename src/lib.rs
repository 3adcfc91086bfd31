// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fingerprint;
pub mod fs;
pub mod logging;
pub mod runtime;
pub mod state;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::loader::load_and_validate;
use crate::dag::{detect_cycles, plan_graph, render_cycle};
use crate::engine::{EngineEvent, EngineOptions, Orchestrator, RunReport};
use crate::errors::{Result, WorkdagError};
use crate::exec::ProcessManager;
use crate::fingerprint::{CacheStore, FingerprintResolver};
use crate::fs::{FileSystem, RealFileSystem};
use crate::runtime::{LocalRuntime, Runtime};
use crate::state::StateStore;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - build file loading and planning
/// - the state store, fingerprint resolver and process manager
/// - the local runtime backend
/// - (optional) file watching
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    match &args.command {
        Command::Clean => cmd_clean(&args),
        Command::Store { path } => {
            let path = path.clone();
            cmd_store(&args, &path)
        }
        Command::Restore { path } => {
            let path = path.clone();
            cmd_restore(&args, &path)
        }
        Command::Validate => cmd_validate(&args),
        Command::Ls => cmd_ls(&args),
        Command::Down => cmd_down(&args),
        Command::Exec { task } => {
            let task = task.clone();
            cmd_run(&args, RunScope::Task(task)).await
        }
        Command::Up => cmd_run(&args, RunScope::AllServices).await,
    }
}

/// What a scheduling run covers.
enum RunScope {
    /// One task plus the transitive closure of its deps/needs.
    Task(String),
    /// Every service plus the closure of their deps/needs, kept running.
    AllServices,
}

async fn cmd_run(args: &CliArgs, scope: RunScope) -> Result<i32> {
    let build_path = PathBuf::from(&args.file);
    let build = load_and_validate(&build_path)?;
    let graph = plan_graph(&build)?;
    let project_root = config_root_dir(&build_path);

    // Determine which items this run schedules.
    let (closure, options) = match &scope {
        RunScope::Task(name) => {
            let item = graph.by_name(name).ok_or_else(|| {
                WorkdagError::UnknownItem(name.clone())
            })?;
            let closure = graph.closure_of(&item.id);
            (
                closure,
                EngineOptions {
                    watch: args.watch,
                    keep_services: false,
                },
            )
        }
        RunScope::AllServices => {
            let mut closure: Vec<String> = Vec::new();
            for service in graph.services() {
                for id in graph.closure_of(&service.id) {
                    if !closure.contains(&id) {
                        closure.push(id);
                    }
                }
            }
            closure.sort();
            (
                closure,
                EngineOptions {
                    watch: args.watch,
                    keep_services: true,
                },
            )
        }
    };

    if closure.is_empty() {
        info!("nothing to run");
        return Ok(0);
    }
    debug!(?closure, "scheduled items");

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let cache_root = CacheStore::default_root();
    let cache = CacheStore::new(fs.clone(), cache_root.clone());
    let cache_mode = args.cache_mode.unwrap_or(build.config.cache_mode);
    let resolver = FingerprintResolver::new(fs.clone(), cache, cache_mode, project_root.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let shutdown = CancellationToken::new();

    let workers = args.workers.unwrap_or(build.config.workers);
    let manager = ProcessManager::new(workers, events_tx.clone(), shutdown.clone());

    let runtime: Arc<dyn Runtime> = Arc::new(LocalRuntime::new(
        events_tx.clone(),
        fs.clone(),
        cache_root.join("services"),
    ));

    let task_ids = closure
        .iter()
        .filter(|id| graph.item(id).map(|i| i.is_task()).unwrap_or(false))
        .cloned()
        .collect::<Vec<_>>();
    let service_ids = closure
        .iter()
        .filter(|id| graph.item(id).map(|i| i.is_service()).unwrap_or(false))
        .cloned()
        .collect::<Vec<_>>();
    let store = StateStore::new(task_ids, service_ids);

    // Optional file watcher, scoped to the scheduled items.
    let _watcher_handle = if args.watch {
        let mut profiles = watch::build_profiles(&graph, &project_root)?;
        profiles.retain(|p| closure.iter().any(|id| id == p.id()));
        if profiles.is_empty() {
            None
        } else {
            Some(watch::spawn_watcher(profiles, events_tx.clone(), None)?)
        }
    } else {
        None
    };

    // Ctrl-C → graceful shutdown.
    {
        let tx = events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(EngineEvent::Shutdown);
        });
    }

    let orchestrator = Orchestrator::new(
        Arc::new(graph),
        store,
        manager,
        runtime,
        resolver,
        options,
        events_rx,
    );

    let report = orchestrator.run().await?;
    print_report(&report);
    Ok(if report.success { 0 } else { 1 })
}

fn cmd_validate(args: &CliArgs) -> Result<i32> {
    let build = load_and_validate(Path::new(&args.file))?;
    let graph = plan_graph(&build)?;

    // References were checked during loading; report cycles per path.
    if let Err(e) = config::check_acyclic(&build) {
        eprintln!("validation failed: {e}");
        for cycle in detect_cycles(&graph) {
            eprintln!("  cycle: {}", render_cycle(&cycle));
        }
        return Ok(1);
    }

    println!(
        "ok: {} task(s), {} service(s)",
        graph.tasks().count(),
        graph.services().count()
    );
    Ok(0)
}

fn cmd_ls(args: &CliArgs) -> Result<i32> {
    let build = load_and_validate(Path::new(&args.file))?;
    let graph = plan_graph(&build)?;
    let runtime = maintenance_runtime();

    let mut items: Vec<_> = graph.items().collect();
    items.sort_by(|a, b| a.id.cmp(&b.id));

    println!("work items ({}):", items.len());
    for item in items {
        let kind = if item.is_task() { "task" } else { "service" };
        let running = item.is_service() && runtime.current_state_key(item).is_some();
        if running {
            println!("  - {} ({}, launched earlier)", item.name, kind);
        } else {
            println!("  - {} ({})", item.name, kind);
        }
        if let Some(desc) = &item.description {
            println!("      {desc}");
        }
        println!("      cmd: {:?}", item.exec.cmd);
        if !item.deps.is_empty() {
            println!("      deps: {:?}", item.dep_names());
        }
        if !item.needs.is_empty() {
            let needs: Vec<&str> = item
                .needs
                .iter()
                .map(|id| id.rsplit(':').next().unwrap_or(id.as_str()))
                .collect();
            println!("      needs: {:?}", needs);
        }
        if !item.src.is_empty() {
            for spec in item.src.iter() {
                println!(
                    "      src: {} {:?}",
                    spec.path.display(),
                    spec.matches
                );
            }
        }
        if !item.generates.is_empty() {
            println!("      generates: {:?}", item.generates);
        }
    }
    Ok(0)
}

fn cmd_down(args: &CliArgs) -> Result<i32> {
    let build = load_and_validate(Path::new(&args.file))?;
    let graph = plan_graph(&build)?;
    let runtime = maintenance_runtime();

    for service in graph.services() {
        runtime.stop(service);
    }
    Ok(0)
}

/// Drop every cache record, and (when the build file is readable) the
/// generated outputs of its tasks.
fn cmd_clean(args: &CliArgs) -> Result<i32> {
    default_cache_store().clear()?;

    if let Ok(build) = load_and_validate(Path::new(&args.file)) {
        let graph = plan_graph(&build)?;
        let runtime = maintenance_runtime();
        for item in graph.tasks() {
            if let Err(e) = runtime.remove(item) {
                tracing::warn!(item = %item.id, error = %e, "failed to remove generated outputs");
            }
        }
    }
    Ok(0)
}

/// Export cache records plus the generated outputs of every task, so a later
/// `restore` can rehydrate both.
fn cmd_store(args: &CliArgs, path: &Path) -> Result<i32> {
    default_cache_store().export(path)?;

    let build = load_and_validate(Path::new(&args.file))?;
    let graph = plan_graph(&build)?;
    let runtime = maintenance_runtime();
    for item in graph.tasks() {
        if item.generates.is_empty() {
            continue;
        }
        if let Err(e) = runtime.archive(item, &path.join("outputs")) {
            tracing::warn!(item = %item.id, error = %e, "failed to archive outputs");
        }
    }
    Ok(0)
}

fn cmd_restore(args: &CliArgs, path: &Path) -> Result<i32> {
    default_cache_store().import(path)?;

    let build = load_and_validate(Path::new(&args.file))?;
    let graph = plan_graph(&build)?;
    let runtime = maintenance_runtime();
    for item in graph.tasks() {
        if item.generates.is_empty() {
            continue;
        }
        if let Err(e) = runtime.restore(item, &path.join("outputs")) {
            tracing::warn!(item = %item.id, error = %e, "failed to restore outputs");
        }
    }
    Ok(0)
}

/// A local runtime wired to a throwaway event channel, for subcommands that
/// only need its maintenance operations (`stop`, `remove`, `archive`,
/// `restore`).
fn maintenance_runtime() -> LocalRuntime {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let (events_tx, _events_rx) = mpsc::unbounded_channel::<EngineEvent>();
    LocalRuntime::new(events_tx, fs, CacheStore::default_root().join("services"))
}

fn default_cache_store() -> CacheStore {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    CacheStore::new(fs, CacheStore::default_root())
}

/// Figure out a sensible project root.
///
/// - If the build file path has a non-empty parent (e.g.
///   "configs/Workdag.toml"), we use that directory.
/// - If it's just a bare filename like "Workdag.toml" (parent = ""), we
///   fall back to the current working directory "."
fn config_root_dir(build_path: &Path) -> PathBuf {
    match build_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("run report:");
    for item in report.items.iter() {
        let mark = if item.ok { "ok" } else { "failed" };
        match &item.detail {
            Some(detail) => println!("  [{mark}] {:<20} {} ({})", item.name, item.state, detail),
            None => println!("  [{mark}] {:<20} {}", item.name, item.state),
        }
        for line in item.tail.iter() {
            println!("      | {line}");
        }
    }
    println!(
        "result: {}",
        if report.success { "success" } else { "failure" }
    );
}
