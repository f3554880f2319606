//! Bounded worker pool for train and inference jobs
//!
//! Every submitted job goes through the same scoped sequence on a worker:
//! acquire workspace, run work, run callback, release workspace. The
//! callback runs exactly once per job, including when the work panics, and
//! the workspace is released even if the callback itself panics.
//!
//! Remote reconcile loops occupy a worker for the whole remote job, so
//! `worker_count` bounds the number of concurrently outstanding remote jobs.

use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use tsplug_core::{ModelId, TenantId, TimeKey};

use crate::config::ServiceConfig;
use crate::workspace::WorkspaceManager;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type WorkFn = Box<dyn FnOnce(PathBuf) -> BoxFuture<JobOutcome> + Send>;
type CallbackFn = Box<dyn FnOnce(JobOutcome) -> BoxFuture<()> + Send>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Job queue is full, try again later")]
    QueueFull,

    #[error("Dispatcher is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum JobKind {
    Train,
    Infer,
}

/// Unit of work scheduled on the pool; never shared between workers
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub tenant: TenantId,
    pub model_id: ModelId,
    pub time_key: TimeKey,
    pub kind: JobKind,
}

impl Job {
    pub fn new(tenant: TenantId, model_id: ModelId, time_key: TimeKey, kind: JobKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant,
            model_id,
            time_key,
            kind,
        }
    }

    /// Workspace directory name, unique per job
    pub fn workspace_name(&self) -> String {
        let short: String = self.id.chars().take(8).collect();
        format!(
            "{}_{}_{}_{}_{}",
            self.tenant, self.model_id, self.time_key, self.kind, short
        )
    }
}

/// How a job settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure(String),
}

impl JobOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Returned by [`JobDispatcher::submit`]; resolves once the job settled
/// and its workspace was released
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    settled: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn wait(self) -> JobOutcome {
        self.settled
            .await
            .unwrap_or_else(|_| JobOutcome::failure("dispatcher dropped the job"))
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub workers: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

struct QueuedJob {
    job: Job,
    work: WorkFn,
    callback: CallbackFn,
    settled: oneshot::Sender<JobOutcome>,
}

pub struct JobDispatcher {
    sender: RwLock<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    counters: Arc<Counters>,
}

impl JobDispatcher {
    /// Spawn `worker_count` workers on the current runtime
    pub fn start(workspaces: WorkspaceManager, worker_count: usize, queue_capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let workers = (0..worker_count)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    receiver.clone(),
                    workspaces.clone(),
                    counters.clone(),
                ))
            })
            .collect();

        info!(worker_count, queue_capacity, "job dispatcher started");
        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            worker_count,
            counters,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::start(
            WorkspaceManager::from_config(config),
            config.worker_count,
            config.queue_capacity,
        )
    }

    /// Queue a job without waiting for it.
    ///
    /// `work` receives the job's workspace path; `callback` receives the
    /// outcome of `work`.
    pub fn submit<W, WF, C, CF>(&self, job: Job, work: W, callback: C) -> Result<JobHandle, DispatchError>
    where
        W: FnOnce(PathBuf) -> WF + Send + 'static,
        WF: Future<Output = JobOutcome> + Send + 'static,
        C: FnOnce(JobOutcome) -> CF + Send + 'static,
        CF: Future<Output = ()> + Send + 'static,
    {
        let sender = self
            .sender
            .read()
            .map_err(|_| DispatchError::ShuttingDown)?
            .clone()
            .ok_or(DispatchError::ShuttingDown)?;

        let (settled, receiver) = oneshot::channel();
        let job_id = job.id.clone();
        let queued = QueuedJob {
            job,
            work: Box::new(move |path| Box::pin(work(path))),
            callback: Box::new(move |outcome| Box::pin(callback(outcome))),
            settled,
        };

        // Count before sending so a fast worker never decrements below zero
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = sender.try_send(queued) {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DispatchError::ShuttingDown,
            });
        }

        debug!(job_id = %job_id, "job queued");
        Ok(JobHandle {
            job_id,
            settled: receiver,
        })
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.worker_count,
            queued: self.counters.queued.load(Ordering::SeqCst),
            running: self.counters.running.load(Ordering::SeqCst),
            succeeded: self.counters.succeeded.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting jobs, drain the queue and wait for the workers
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.write() {
            sender.take();
        }
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "dispatcher worker terminated abnormally");
            }
        }
        info!("job dispatcher stopped");
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    workspaces: WorkspaceManager,
    counters: Arc<Counters>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(queued) = next else {
            break;
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.running.fetch_add(1, Ordering::SeqCst);

        let outcome = run_job(queued.job, queued.work, queued.callback, &workspaces).await;

        counters.running.fetch_sub(1, Ordering::SeqCst);
        if outcome.is_success() {
            counters.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
        let _ = queued.settled.send(outcome);
    }
    debug!(worker, "dispatcher worker exiting");
}

async fn run_job(
    job: Job,
    work: WorkFn,
    callback: CallbackFn,
    workspaces: &WorkspaceManager,
) -> JobOutcome {
    info!(job_id = %job.id, tenant = %job.tenant, model_id = %job.model_id, kind = %job.kind, "job started");

    let workspace = match workspaces.acquire(&job.workspace_name()).await {
        Ok(workspace) => Some(workspace),
        Err(e) => {
            error!(job_id = %job.id, error = %e, "workspace unavailable");
            None
        }
    };

    let outcome = match &workspace {
        Some(workspace) => {
            // Build and run on its own task so any panic surfaces as a JoinError
            let path = workspace.path().to_path_buf();
            match tokio::spawn(async move { work(path).await }).await {
                Ok(outcome) => outcome,
                Err(e) => JobOutcome::Failure(join_failure(e)),
            }
        }
        None => JobOutcome::failure("Failed to create job workspace"),
    };

    if let JobOutcome::Failure(message) = &outcome {
        warn!(job_id = %job.id, kind = %job.kind, error = %message, "job failed");
    }

    let settled = outcome.clone();
    if let Err(e) = tokio::spawn(async move { callback(settled).await }).await {
        error!(job_id = %job.id, error = %join_failure(e), "job callback failed");
    }

    if let Some(workspace) = workspace {
        if let Err(e) = workspace.release().await {
            warn!(job_id = %job.id, error = %e, "workspace cleanup failed");
        }
    }

    info!(job_id = %job.id, success = outcome.is_success(), "job settled");
    outcome
}

fn join_failure(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    fn job(kind: JobKind) -> Job {
        Job::new(
            TenantId::default(),
            ModelId::from_string("m1"),
            TimeKey::from_string("20200418000000000000"),
            kind,
        )
    }

    fn dispatcher(dir: &TempDir, workers: usize, capacity: usize) -> JobDispatcher {
        JobDispatcher::start(WorkspaceManager::new(dir.path()), workers, capacity)
    }

    async fn exploding_work() -> JobOutcome {
        panic!("disk full")
    }

    async fn exploding_callback(_outcome: JobOutcome) {
        panic!("callback exploded")
    }

    fn workspace_count(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_success_runs_callback_and_releases_workspace() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 2, 8);
        let (tx, rx) = oneshot::channel();

        let handle = dispatcher
            .submit(
                job(JobKind::Train),
                |path: PathBuf| async move {
                    tokio::fs::write(path.join("artifact"), b"x").await.unwrap();
                    JobOutcome::Success
                },
                move |outcome| async move {
                    let _ = tx.send(outcome);
                },
            )
            .unwrap();

        assert_eq!(handle.wait().await, JobOutcome::Success);
        assert_eq!(rx.await.unwrap(), JobOutcome::Success);
        assert_eq!(workspace_count(&dir), 0);
        assert_eq!(dispatcher.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_panicking_work_reports_failure() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 1, 8);
        let (tx, rx) = oneshot::channel();

        let handle = dispatcher
            .submit(
                job(JobKind::Train),
                |_path: PathBuf| exploding_work(),
                move |outcome| async move {
                    let _ = tx.send(outcome);
                },
            )
            .unwrap();

        let outcome = handle.wait().await;
        match rx.await.unwrap() {
            JobOutcome::Failure(message) => assert!(message.contains("disk full")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!outcome.is_success());
        assert_eq!(workspace_count(&dir), 0);
        assert_eq!(dispatcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_callback_still_releases_workspace() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 1, 8);

        let handle = dispatcher
            .submit(
                job(JobKind::Infer),
                |_path: PathBuf| async move { JobOutcome::failure("backend failed") },
                exploding_callback,
            )
            .unwrap();

        assert_eq!(handle.wait().await, JobOutcome::failure("backend failed"));
        assert_eq!(workspace_count(&dir), 0);

        // The worker survives and keeps serving jobs
        let handle = dispatcher
            .submit(
                job(JobKind::Infer),
                |_path: PathBuf| async move { JobOutcome::Success },
                |_outcome| async move {},
            )
            .unwrap();
        assert_eq!(handle.wait().await, JobOutcome::Success);
    }

    #[tokio::test]
    async fn test_panic_while_building_futures_is_contained() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 1, 8);

        let handle = dispatcher
            .submit(
                job(JobKind::Train),
                |_path: PathBuf| -> std::future::Ready<JobOutcome> { panic!("no work future") },
                |_outcome: JobOutcome| -> std::future::Ready<()> { panic!("no callback future") },
            )
            .unwrap();

        match handle.wait().await {
            JobOutcome::Failure(message) => assert!(message.contains("no work future")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(workspace_count(&dir), 0);

        // The single worker is still alive
        let handle = dispatcher
            .submit(
                job(JobKind::Train),
                |_path: PathBuf| async move { JobOutcome::Success },
                |_outcome| async move {},
            )
            .unwrap();
        assert_eq!(handle.wait().await, JobOutcome::Success);
    }

    #[tokio::test]
    async fn test_full_queue_is_rejected() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 1, 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let blocking = dispatcher
            .submit(
                job(JobKind::Train),
                move |_path: PathBuf| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    JobOutcome::Success
                },
                |_outcome| async move {},
            )
            .unwrap();
        started_rx.await.unwrap();

        let queued = dispatcher
            .submit(
                job(JobKind::Train),
                |_path: PathBuf| async move { JobOutcome::Success },
                |_outcome| async move {},
            )
            .unwrap();
        let rejected = dispatcher.submit(
            job(JobKind::Train),
            |_path: PathBuf| async move { JobOutcome::Success },
            |_outcome| async move {},
        );
        assert_eq!(rejected.unwrap_err(), DispatchError::QueueFull);
        assert_eq!(dispatcher.stats().queued, 1);

        release_tx.send(()).unwrap();
        assert!(blocking.wait().await.is_success());
        assert!(queued.wait().await.is_success());
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, 1, 8);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let handle = dispatcher
            .submit(
                job(JobKind::Train),
                |_path: PathBuf| async move { JobOutcome::Success },
                move |_outcome| async move {
                    flag.store(true, Ordering::SeqCst);
                },
            )
            .unwrap();

        dispatcher.shutdown().await;
        assert!(ran.load(Ordering::SeqCst));
        assert!(handle.wait().await.is_success());

        let rejected = dispatcher.submit(
            job(JobKind::Train),
            |_path: PathBuf| async move { JobOutcome::Success },
            |_outcome| async move {},
        );
        assert_eq!(rejected.unwrap_err(), DispatchError::ShuttingDown);
    }

    #[test]
    fn test_workspace_name() {
        let job = job(JobKind::Infer);
        let name = job.workspace_name();
        assert!(name.starts_with("Official_m1_20200418000000000000_infer_"));
        assert_eq!(name.len(), "Official_m1_20200418000000000000_infer_".len() + 8);
    }
}
