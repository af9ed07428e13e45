//! BackgroundRuntime - バックグラウンドプロセスの実行コンテキスト
//!
//! Owns the task registry and the one active [`WorkerHost`]. Request handlers
//! enqueue through it; the app lifecycle starts and stops the host through it.
//!
//! # 不変条件
//! - 同時に動いている host は高々 1 つ
//! - enqueue された entry は必ずロック取得済みで queue に入る

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::queue::QueueEntry;
use super::status::HostCounts;
use super::worker::{WorkerHost, isolated};
use crate::config::BackgroundSettings;
use crate::domain::{BackgroundError, EntryId, TaskAttributes, TaskPayload};
use crate::ports::DeviceApi;
use crate::typed::{DynTask, TaskContext, TaskRegistry};

pub struct BackgroundRuntime {
    registry: TaskRegistry,
    api: Arc<dyn DeviceApi>,
    settings: BackgroundSettings,
    host: Mutex<Option<Arc<WorkerHost>>>,
}

impl BackgroundRuntime {
    pub fn new(
        registry: TaskRegistry,
        api: Arc<dyn DeviceApi>,
        settings: BackgroundSettings,
    ) -> Self {
        Self {
            registry,
            api,
            settings,
            host: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn api(&self) -> &Arc<dyn DeviceApi> {
        &self.api
    }

    pub fn settings(&self) -> &BackgroundSettings {
        &self.settings
    }

    /// Starts the worker host. A second start while one is running fails.
    pub async fn start_host(&self) -> Result<Arc<WorkerHost>, BackgroundError> {
        let mut slot = self.host.lock().await;
        if slot.is_some() {
            return Err(BackgroundError::HostAlreadyRunning);
        }
        let host = Arc::new(WorkerHost::start(
            self.settings.worker_count,
            self.settings.shutdown_grace(),
        ));
        *slot = Some(host.clone());
        Ok(host)
    }

    /// Terminates the current host and returns how many entries were aborted.
    pub async fn stop_host(&self) -> Result<usize, BackgroundError> {
        let host = self
            .host
            .lock()
            .await
            .take()
            .ok_or(BackgroundError::HostNotStarted)?;
        Ok(host.terminate().await)
    }

    pub async fn current_host(&self) -> Option<Arc<WorkerHost>> {
        self.host.lock().await.clone()
    }

    pub async fn counts(&self) -> Option<HostCounts> {
        match self.current_host().await {
            Some(host) => Some(host.counts().await),
            None => None,
        }
    }

    /// Puts a task on the current host's queue.
    ///
    /// 1. requires a running host
    /// 2. runs `on_enqueued`, bounded by `enqueue_hook_timeout`
    /// 3. acquires a background session lock for the task's origin session
    /// 4. pushes the entry
    pub async fn enqueue(
        &self,
        task: Box<dyn DynTask>,
        attributes: TaskAttributes,
        payload: Option<TaskPayload>,
    ) -> Result<EntryId, BackgroundError> {
        let host = self
            .current_host()
            .await
            .ok_or(BackgroundError::HostNotStarted)?;

        let ctx = TaskContext::new(attributes, self.api.clone());
        let entry = Arc::new(QueueEntry::new(task, ctx, payload));
        let task_type = entry.task().task_type().to_string();

        let hook = entry.clone();
        let on_enqueued = isolated(async move {
            hook.task().on_enqueued(hook.ctx(), hook.payload()).await;
            Ok(())
        });
        match tokio::time::timeout(self.settings.enqueue_hook_timeout(), on_enqueued).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(%task_type, error = %e, "on_enqueued hook failed"),
            Err(_) => warn!(%task_type, "on_enqueued hook did not return in time"),
        }

        entry.lock_session().await.map_err(BackgroundError::Lock)?;

        let entry_id = entry.id();
        if let Err(rejected) = host.push(entry).await {
            // terminate と競合した
            rejected.unlock_session().await;
            return Err(BackgroundError::HostNotStarted);
        }
        info!(%entry_id, %task_type, "task is enqueued");
        Ok(entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LockScope;
    use crate::domain::TaskError;
    use crate::impls::InMemoryDeviceApi;
    use crate::ports::HttpMethod;
    use crate::typed::{Task, TypedTask};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Default, Serialize, Deserialize)]
    struct SlowHookTask;

    #[async_trait]
    impl Task for SlowHookTask {
        const TYPE: &'static str = "tests.SlowHookTask";

        async fn execute(&self, _: &TaskContext, _: Option<&TaskPayload>) -> Result<(), TaskError> {
            Ok(())
        }

        async fn on_enqueued(&self, _: &TaskContext, _: Option<&TaskPayload>) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }

    fn runtime(device: &Arc<InMemoryDeviceApi>, worker_count: usize) -> BackgroundRuntime {
        let settings = BackgroundSettings {
            worker_count,
            shutdown_grace_secs: 1,
            enqueue_hook_timeout_secs: 0,
        };
        BackgroundRuntime::new(TaskRegistry::new(), device.clone(), settings)
    }

    fn attributes(at: f64) -> TaskAttributes {
        TaskAttributes::new("token", at, "en_US")
    }

    #[tokio::test]
    async fn test_enqueue_requires_host() {
        let device = Arc::new(InMemoryDeviceApi::new());
        let runtime = runtime(&device, 1);

        let err = runtime
            .enqueue(TypedTask::boxed(SlowHookTask), attributes(1.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackgroundError::HostNotStarted));
        assert_eq!(device.locks_acquired(LockScope::Background.path()), 0);
    }

    #[tokio::test]
    async fn test_single_host() {
        let device = Arc::new(InMemoryDeviceApi::new());
        let runtime = runtime(&device, 1);

        runtime.start_host().await.unwrap();
        assert!(matches!(
            runtime.start_host().await,
            Err(BackgroundError::HostAlreadyRunning)
        ));

        runtime.stop_host().await.unwrap();
        assert!(matches!(runtime.stop_host().await, Err(BackgroundError::HostNotStarted)));

        // 停止後は再起動できる
        runtime.start_host().await.unwrap();
        runtime.stop_host().await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_enqueue_hook_is_bounded() {
        let device = Arc::new(InMemoryDeviceApi::new());
        let runtime = runtime(&device, 0);
        runtime.start_host().await.unwrap();

        runtime
            .enqueue(TypedTask::boxed(SlowHookTask), attributes(1.0), None)
            .await
            .unwrap();
        assert_eq!(runtime.counts().await.unwrap().queued, 1);
        assert!(runtime.settings().enqueue_hook_timeout().is_zero());
    }

    #[tokio::test]
    async fn test_lock_failure_is_not_enqueued() {
        let device = Arc::new(InMemoryDeviceApi::new());
        let runtime = runtime(&device, 0);
        runtime.start_host().await.unwrap();
        device.inject_fault(
            HttpMethod::Post,
            LockScope::Background.path(),
            "IllegalStateException",
            1,
        );

        let err = runtime
            .enqueue(TypedTask::boxed(SlowHookTask), attributes(1.0), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "session_lock_failed");
        assert_eq!(runtime.counts().await.unwrap().queued, 0);
    }

    #[tokio::test]
    async fn test_every_enqueued_lock_is_released_by_stop() {
        let device = Arc::new(InMemoryDeviceApi::new());
        let runtime = runtime(&device, 2);
        runtime.start_host().await.unwrap();

        for at in 0..8 {
            runtime
                .enqueue(TypedTask::boxed(SlowHookTask), attributes(at as f64), None)
                .await
                .unwrap();
        }
        runtime.stop_host().await.unwrap();

        let path = LockScope::Background.path();
        assert_eq!(device.locks_acquired(path), 8);
        assert_eq!(device.locks_released(path), 8);
        assert!(device.active_locks().is_empty());
    }
}
