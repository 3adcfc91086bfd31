// src/runtime/local.rs

//! Local process runtime: runs work items as child processes on this host.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dag::item::{ItemKind, StateKey, WorkItem};
use crate::engine::EngineEvent;
use crate::errors::Result;
use crate::exec::{ExecFuture, ExecOutcome};
use crate::fs::FileSystem;
use crate::runtime::{ExecContext, Runtime};
use crate::state::model::Snapshot;

/// Number of output lines kept for the final report.
const TAIL_LINES: usize = 20;

/// Registry entry for a service process this runtime launched, persisted so
/// a later `workdag down` (or `initialize` of the next run) can find it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServiceRecord {
    id: String,
    pid: u32,
    state_key: StateKey,
}

/// Runs items as local child processes.
///
/// - Tasks: `cmd` is spawned as-is (argv list), stdout/stderr captured, the
///   last lines kept for reporting. An optional timeout converts into a
///   `TimedOut` outcome.
/// - Services: the process is spawned and readiness is detected via
///   `ready_on_stdout` (regex on stdout lines), `ready_after` (fixed delay)
///   or immediately after spawn when neither is configured. Readiness is
///   reported over the engine event channel.
///
/// `image` and `mounts` are meaningless for local execution and are logged
/// once at debug level, then ignored.
pub struct LocalRuntime {
    events: mpsc::UnboundedSender<EngineEvent>,
    fs: Arc<dyn FileSystem>,
    /// Directory for service records, usually `<cache root>/services`.
    state_dir: PathBuf,
}

impl std::fmt::Debug for LocalRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRuntime")
            .field("state_dir", &self.state_dir)
            .finish_non_exhaustive()
    }
}

impl LocalRuntime {
    pub fn new(
        events: mpsc::UnboundedSender<EngineEvent>,
        fs: Arc<dyn FileSystem>,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            events,
            fs,
            state_dir,
        }
    }

    fn record_path(&self, item_id: &str) -> PathBuf {
        let digest = blake3::hash(item_id.as_bytes()).to_hex();
        self.state_dir.join(format!("{}.json", &digest[..16]))
    }

    fn read_record(&self, item_id: &str) -> Option<ServiceRecord> {
        let path = self.record_path(item_id);
        if !self.fs.exists(&path) {
            return None;
        }
        let contents = self.fs.read_to_string(&path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn drop_record(&self, item_id: &str) {
        let path = self.record_path(item_id);
        if self.fs.exists(&path) {
            let _ = self.fs.remove(&path);
        }
    }

    fn spawn_process(item: &WorkItem) -> std::io::Result<Child> {
        let mut cmd = Command::new(&item.exec.cmd[0]);
        cmd.args(&item.exec.cmd[1..]);
        cmd.envs(item.exec.env.iter());
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.spawn()
    }
}

impl Runtime for LocalRuntime {
    fn initialize(&self, snapshot: &Snapshot) -> Result<()> {
        // Reconcile: drop records for services that are not part of this run
        // anymore. Liveness of the recorded pids cannot be verified
        // portably, so leftover records for scheduled services are only
        // reported; the state keys they carry are available through
        // `current_state_key`.
        if !self.fs.exists(&self.state_dir) {
            return Ok(());
        }
        for path in self.fs.read_dir(&self.state_dir)? {
            let Ok(contents) = self.fs.read_to_string(&path) else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<ServiceRecord>(&contents) else {
                debug!(path = %path.display(), "dropping unreadable service record");
                let _ = self.fs.remove(&path);
                continue;
            };
            if snapshot.services.contains_key(&record.id) {
                info!(
                    item = %record.id,
                    pid = record.pid,
                    "found record of a previously launched service"
                );
            } else {
                debug!(item = %record.id, "dropping service record not in this run");
                let _ = self.fs.remove(&path);
            }
        }
        Ok(())
    }

    fn execute(&self, item: Arc<WorkItem>, ctx: ExecContext) -> ExecFuture {
        let events = self.events.clone();
        let fs = self.fs.clone();
        let record_path = self.record_path(&item.id);

        Box::pin(async move {
            if item.exec.image.is_some() || !item.exec.mounts.is_empty() {
                debug!(item = %item.id, "local runtime ignores image/mounts");
            }
            if item.exec.cmd.is_empty() {
                return ExecOutcome::Error {
                    message: "empty command list".to_string(),
                };
            }

            info!(
                item = %item.id,
                cmd = ?item.exec.cmd,
                "starting process"
            );

            let started = Instant::now();
            let mut child = match LocalRuntime::spawn_process(&item) {
                Ok(child) => child,
                Err(e) => {
                    return ExecOutcome::Error {
                        message: format!("spawning '{}': {}", item.exec.cmd[0], e),
                    };
                }
            };

            if item.is_service() {
                if let Some(pid) = child.id() {
                    let record = ServiceRecord {
                        id: item.id.clone(),
                        pid,
                        state_key: ctx.state_key.clone(),
                    };
                    if let Ok(bytes) = serde_json::to_vec(&record) {
                        if let Err(e) = fs.write(&record_path, &bytes) {
                            warn!(item = %item.id, error = %e, "failed to write service record");
                        }
                    }
                }
            }

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let tail = Arc::new(std::sync::Mutex::new(VecDeque::with_capacity(TAIL_LINES)));

            setup_output_monitors(&item, &ctx, stdout, stderr, events.clone(), tail.clone());

            let outcome = wait_for_exit(&item, &mut child, &ctx, started, &tail).await;

            if item.is_service() && fs.exists(&record_path) {
                let _ = fs.remove(&record_path);
            }

            outcome
        })
    }

    fn stop(&self, item: &WorkItem) {
        // Only used for resources that outlived their orchestrator (`down`);
        // in-run teardown goes through the cancellation token.
        let Some(record) = self.read_record(&item.id) else {
            debug!(item = %item.id, "no service record; nothing to stop");
            return;
        };
        info!(item = %item.id, pid = record.pid, "stopping recorded service process");
        #[cfg(unix)]
        {
            match std::process::Command::new("kill")
                .arg(record.pid.to_string())
                .status()
            {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(item = %item.id, ?status, "kill reported failure"),
                Err(e) => warn!(item = %item.id, error = %e, "failed to run kill"),
            }
        }
        self.drop_record(&item.id);
    }

    fn remove(&self, item: &WorkItem) -> Result<()> {
        for path in item.generates.iter() {
            if self.fs.exists(path) {
                self.fs.remove(path)?;
                debug!(item = %item.id, path = %path.display(), "removed generated path");
            }
        }
        self.drop_record(&item.id);
        Ok(())
    }

    fn restore(&self, item: &WorkItem, path: &Path) -> Result<()> {
        for generated in item.generates.iter() {
            let name = generated
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string());
            let source = path.join(&item.name).join(&name);
            if self.fs.exists(&source) {
                self.fs.copy(&source, generated)?;
                debug!(item = %item.id, from = %source.display(), "restored generated path");
            }
        }
        Ok(())
    }

    fn archive(&self, item: &WorkItem, path: &Path) -> Result<()> {
        for generated in item.generates.iter() {
            if !self.fs.exists(generated) {
                continue;
            }
            let name = generated
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string());
            let target = path.join(&item.name).join(&name);
            self.fs.copy(generated, &target)?;
            debug!(item = %item.id, to = %target.display(), "archived generated path");
        }
        Ok(())
    }

    fn current_state_key(&self, item: &WorkItem) -> Option<StateKey> {
        self.read_record(&item.id).map(|r| r.state_key)
    }
}

/// Attach stdout/stderr monitors: tail capture, debug logging, and service
/// readiness detection.
fn setup_output_monitors(
    item: &Arc<WorkItem>,
    ctx: &ExecContext,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    events: mpsc::UnboundedSender<EngineEvent>,
    tail: Arc<std::sync::Mutex<VecDeque<String>>>,
) {
    let ready_regex = match item.kind {
        ItemKind::Service => item.exec.ready_on_stdout.as_ref().and_then(|pattern| {
            match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(
                        item = %item.id,
                        pattern = %pattern,
                        error = %e,
                        "invalid ready_on_stdout regex; service counts as ready at spawn"
                    );
                    None
                }
            }
        }),
        ItemKind::Task => None,
    };

    let endpoint = item
        .exec
        .endpoint
        .clone()
        .unwrap_or_else(|| "localhost".to_string());

    if item.is_service() {
        match (&ready_regex, item.exec.ready_after) {
            (Some(_), _) => {
                // Readiness comes from the stdout monitor below.
            }
            (None, Some(delay)) => {
                let events = events.clone();
                let id = item.id.clone();
                let state_key = ctx.state_key.clone();
                let endpoint = endpoint.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    debug!(item = %id, "ready_after elapsed; reporting service ready");
                    let _ = events.send(EngineEvent::ServiceReady {
                        id,
                        state_key,
                        endpoint,
                    });
                });
            }
            (None, None) => {
                debug!(item = %item.id, "no readiness probe configured; ready at spawn");
                let _ = events.send(EngineEvent::ServiceReady {
                    id: item.id.clone(),
                    state_key: ctx.state_key.clone(),
                    endpoint: endpoint.clone(),
                });
            }
        }
    }

    if let Some(stdout) = stdout {
        let id = item.id.clone();
        let state_key = ctx.state_key.clone();
        let tail = tail.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            let mut reported_ready = false;

            while let Ok(Some(line)) = lines.next_line().await {
                debug!(item = %id, "stdout: {}", line);
                push_tail(&tail, &line);

                if !reported_ready {
                    if let Some(re) = &ready_regex {
                        if re.is_match(&line) {
                            debug!(item = %id, "stdout matched ready_on_stdout");
                            reported_ready = true;
                            let _ = events.send(EngineEvent::ServiceReady {
                                id: id.clone(),
                                state_key: state_key.clone(),
                                endpoint: endpoint.clone(),
                            });
                        }
                    }
                }
            }
        });
    }

    // Always consume stderr so buffers don't fill.
    if let Some(stderr) = stderr {
        let id = item.id.clone();
        let tail = tail.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(item = %id, "stderr: {}", line);
                push_tail(&tail, &line);
            }
        });
    }
}

fn push_tail(tail: &Arc<std::sync::Mutex<VecDeque<String>>>, line: &str) {
    if let Ok(mut guard) = tail.lock() {
        if guard.len() == TAIL_LINES {
            guard.pop_front();
        }
        guard.push_back(line.to_string());
    }
}

/// Wait for the process to exit, the cancellation token to fire, or the
/// configured timeout to elapse, whichever comes first.
async fn wait_for_exit(
    item: &Arc<WorkItem>,
    child: &mut Child,
    ctx: &ExecContext,
    started: Instant,
    tail: &Arc<std::sync::Mutex<VecDeque<String>>>,
) -> ExecOutcome {
    let timeout_sleep = async {
        match item.exec.timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        status_res = child.wait() => {
            match status_res {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    info!(
                        item = %item.id,
                        exit_code = code,
                        success = status.success(),
                        "process exited"
                    );
                    if status.success() {
                        ExecOutcome::Success { duration: started.elapsed() }
                    } else {
                        ExecOutcome::Crashed {
                            exit_code: code,
                            tail: collect_tail(tail),
                        }
                    }
                }
                Err(e) => ExecOutcome::Error {
                    message: format!("waiting for process of '{}': {}", item.name, e),
                },
            }
        }

        _ = ctx.cancel.cancelled() => {
            info!(item = %item.id, "cancellation requested; killing process");
            if let Err(e) = child.kill().await {
                warn!(item = %item.id, error = %e, "failed to kill child process");
            }
            ExecOutcome::Canceled
        }

        _ = timeout_sleep => {
            warn!(
                item = %item.id,
                timeout = ?item.exec.timeout,
                "execution timed out; killing process"
            );
            if let Err(e) = child.kill().await {
                warn!(item = %item.id, error = %e, "failed to kill timed-out process");
            }
            ExecOutcome::TimedOut
        }
    }
}

fn collect_tail(tail: &Arc<std::sync::Mutex<VecDeque<String>>>) -> Vec<String> {
    tail.lock()
        .map(|guard| guard.iter().cloned().collect())
        .unwrap_or_default()
}
