//! Worker / WorkerHost - バックグラウンドの task 実行
//!
//! # フロー
//! 1. `WorkerHost::start` が N 個の Worker を tokio task として起動
//! 2. 各 Worker は queue から pop → 実行 → 失敗なら on_error → ロック解放 をくり返す
//! 3. `terminate` で shutdown を通知し、残った entry を on_aborted で片付ける
//!
//! # 学習ポイント
//! - watch channel による shutdown 通知（select! で pop と競合させる）
//! - `tokio::spawn` を失敗境界にして panic を TaskError に変換する
//! - shutdown 時の abort sweep は dispatched_at の古い順

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::queue::{QueueEntry, TaskQueue};
use super::status::HostCounts;
use crate::domain::{HostId, TaskError};

/// What a worker has in hand.
struct Running {
    entry: Arc<QueueEntry>,
    /// The spawned `execute` / `on_error` call, so terminate can stop it.
    call: Option<AbortHandle>,
    /// Set once the task is done and only the lock release remains.
    releasing: bool,
}

type RunningSlot = Arc<Mutex<Option<Running>>>;

/// Runs `fut` on its own tokio task so a panic comes back as a [`TaskError`].
pub(crate) async fn isolated<F>(fut: F) -> Result<(), TaskError>
where
    F: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    join_isolated(tokio::spawn(fut)).await
}

async fn join_isolated(handle: JoinHandle<Result<(), TaskError>>) -> Result<(), TaskError> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(TaskError::panicked(panic_message(e.into_panic()))),
        Err(e) => Err(TaskError::panicked(e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Worker は 1 つの queue を消費し続ける
pub struct Worker {
    worker_id: usize,
    queue: Arc<TaskQueue>,
    running: RunningSlot,
}

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(worker_id = self.worker_id, "worker is started");

        loop {
            // shutdown が来ていたら抜ける（手元の task は実行済み）
            if *shutdown_rx.borrow() {
                break;
            }

            let entry = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                entry = self.queue.pop() => entry,
            };

            *self.slot() = Some(Running {
                entry: entry.clone(),
                call: None,
                releasing: false,
            });
            self.execute(&entry).await;
            if let Some(running) = self.slot().as_mut() {
                running.call = None;
                running.releasing = true;
            }
            entry.unlock_session().await;
            *self.slot() = None;
        }

        info!(worker_id = self.worker_id, "worker is terminated");
    }

    async fn execute(&self, entry: &Arc<QueueEntry>) {
        let worker_id = self.worker_id;
        let task_type = entry.task().task_type().to_string();
        warn!(worker_id, %task_type, entry_id = %entry.id(), "worker tries to execute a task");

        let run = entry.clone();
        let result = self
            .call(async move { run.task().execute(run.ctx(), run.payload()).await })
            .await;

        match result {
            Ok(()) => warn!(worker_id, %task_type, "task is done"),
            Err(err) => {
                error!(worker_id, %task_type, error = %err, "task failed");
                let hook = entry.clone();
                let hook_err = err.clone();
                let handled = self
                    .call(async move { hook.task().on_error(hook.ctx(), &hook_err).await })
                    .await;
                if let Err(e) = handled {
                    error!(worker_id, %task_type, error = %e, "on_error hook failed");
                }
            }
        }
    }

    /// Spawns a task call and records its abort handle in the running slot.
    async fn call<F>(&self, fut: F) -> Result<(), TaskError>
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        if let Some(running) = self.slot().as_mut() {
            running.call = Some(handle.abort_handle());
        }
        join_isolated(handle).await
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct WorkerHandle {
    running: RunningSlot,
    join: JoinHandle<()>,
}

/// WorkerHost は共有 queue と Worker 群を持つ
///
/// # 使用例
/// ```ignore
/// let host = WorkerHost::start(10, Duration::from_secs(30));
/// host.push(entry).await?;
/// let aborted = host.terminate().await;
/// ```
pub struct WorkerHost {
    id: HostId,
    queue: Arc<TaskQueue>,
    worker_count: usize,
    workers: Mutex<Vec<WorkerHandle>>,
    shutdown_tx: watch::Sender<bool>,
    terminated_tx: watch::Sender<bool>,
    shutdown_grace: Duration,
}

impl WorkerHost {
    /// Spawns `worker_count` workers on the current tokio runtime.
    pub fn start(worker_count: usize, shutdown_grace: Duration) -> Self {
        let id = HostId::new();
        let queue = Arc::new(TaskQueue::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (terminated_tx, _) = watch::channel(false);

        let mut workers = Vec::with_capacity(worker_count);
        for n in 0..worker_count {
            let running: RunningSlot = Arc::new(Mutex::new(None));
            let worker = Worker {
                worker_id: n + 1,
                queue: queue.clone(),
                running: running.clone(),
            };
            let join = tokio::spawn(worker.run(shutdown_rx.clone()));
            workers.push(WorkerHandle { running, join });
        }
        info!(host_id = %id, worker_count, "worker host is started");

        Self {
            id,
            queue,
            worker_count,
            workers: Mutex::new(workers),
            shutdown_tx,
            terminated_tx,
            shutdown_grace,
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Puts an entry on the queue. After `terminate` the entry is handed back.
    pub async fn push(&self, entry: Arc<QueueEntry>) -> Result<(), Arc<QueueEntry>> {
        self.queue.push(entry).await
    }

    pub async fn counts(&self) -> HostCounts {
        let running = self
            .workers()
            .iter()
            .filter(|w| w.running.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .count();
        HostCounts {
            queued: self.queue.len().await,
            running,
            workers: self.worker_count,
        }
    }

    /// Resolves once `terminate` has finished.
    pub async fn wait_terminated(&self) {
        let mut rx = self.terminated_tx.subscribe();
        // sender は self が持っているので closed にはならない
        if rx.wait_for(|done| *done).await.is_err() {
            warn!(host_id = %self.id, "terminated signal is closed");
        }
    }

    /// Stops the workers and aborts everything that did not run.
    ///
    /// 1. every worker is told to stop after the entry in hand
    /// 2. the queue is closed and drained
    /// 3. in-flight entries get up to `shutdown_grace` to finish normally
    /// 4. entries still running after the grace period are stopped: the worker
    ///    and the task call are both aborted
    /// 5. drained and stopped entries get `on_aborted` and a lock release,
    ///    oldest dispatch first
    ///
    /// Returns the number of aborted entries.
    pub async fn terminate(&self) -> usize {
        self.shutdown_tx.send_replace(true);
        let mut entries = self.queue.close_and_drain().await;

        let workers: Vec<WorkerHandle> = std::mem::take(&mut *self.workers());
        let deadline = Instant::now() + self.shutdown_grace;
        for mut worker in workers {
            if tokio::time::timeout_at(deadline, &mut worker.join).await.is_ok() {
                continue;
            }
            worker.join.abort();
            // abort 後は worker が slot を触らない
            if let Err(e) = (&mut worker.join).await
                && e.is_panic()
            {
                error!(host_id = %self.id, "worker panicked during shutdown");
            }

            let stuck = worker
                .running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let Some(running) = stuck else {
                continue;
            };
            if let Some(call) = running.call {
                call.abort();
            }
            if running.releasing {
                // 実行は終わっている。ロック解放だけやり直す
                running.entry.unlock_session().await;
                continue;
            }
            warn!(
                entry_id = %running.entry.id(),
                "task is still running after the shutdown grace period"
            );
            entries.push(running.entry);
        }

        entries.sort_by(|a, b| a.dispatched_at().total_cmp(&b.dispatched_at()));
        warn!(
            host_id = %self.id,
            count = entries.len(),
            "tasks are not completed at background app stopped"
        );

        let aborted = entries.len();
        for entry in entries {
            let hook = entry.clone();
            let result = isolated(async move { hook.task().on_aborted(hook.ctx()).await }).await;
            if let Err(e) = result {
                error!(entry_id = %entry.id(), error = %e, "on_aborted hook failed");
            }
            entry.unlock_session().await;
        }

        self.terminated_tx.send_replace(true);
        info!(host_id = %self.id, "worker host is terminated");
        aborted
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, Vec<WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
