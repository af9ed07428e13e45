//! Task trait - バックグラウンドで実行される型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`) で登録キーを型に結びつける
//! - hook はデフォルト実装付き。実装側は必要なものだけ上書きする

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{TaskAttributes, TaskError, TaskPayload};
use crate::ports::DeviceApi;

/// Everything a task can see while it runs.
///
/// Attributes are read-only here; they were stamped by the background request
/// handler and never change afterwards.
#[derive(Clone)]
pub struct TaskContext {
    attributes: TaskAttributes,
    api: Arc<dyn DeviceApi>,
}

impl TaskContext {
    pub fn new(attributes: TaskAttributes, api: Arc<dyn DeviceApi>) -> Self {
        Self { attributes, api }
    }

    pub fn attributes(&self) -> &TaskAttributes {
        &self.attributes
    }

    /// Access token of the session that dispatched the task.
    pub fn api_token(&self) -> &str {
        &self.attributes.api_token
    }

    pub fn dispatched_at(&self) -> f64 {
        self.attributes.dispatched_at
    }

    pub fn locale(&self) -> &str {
        &self.attributes.locale
    }

    /// Device API for calls made on behalf of the dispatching session.
    pub fn api(&self) -> &Arc<dyn DeviceApi> {
        &self.api
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Task は task_type と型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct UploadTask {
///     destination: String,
/// }
///
/// #[async_trait]
/// impl Task for UploadTask {
///     const TYPE: &'static str = "tasks.upload.UploadTask";
///
///     async fn execute(&self, ctx: &TaskContext, payload: Option<&TaskPayload>) -> Result<(), TaskError> {
///         let dir = payload.and_then(|p| p.get_str("dir_path")).unwrap_or_default();
///         // upload files under `dir` ...
///         Ok(())
///     }
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: business fields cross the process boundary as JSON
/// - `Default`: tasks dispatched by class name start from a fresh instance
/// - `Send + Sync + 'static`: workers run them on the tokio runtime
#[async_trait]
pub trait Task: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Registry key, e.g. `tasks.upload.UploadTask`.
    const TYPE: &'static str;

    /// Runs the task. `payload` is set for tasks dispatched by class name.
    async fn execute(
        &self,
        ctx: &TaskContext,
        payload: Option<&TaskPayload>,
    ) -> Result<(), TaskError>;

    /// Invoked when the task enters the queue. Must return promptly.
    async fn on_enqueued(&self, _ctx: &TaskContext, _payload: Option<&TaskPayload>) {}

    /// Invoked after `execute` failed.
    async fn on_error(&self, _ctx: &TaskContext, _error: &TaskError) -> Result<(), TaskError> {
        Ok(())
    }

    /// Invoked when the background app stops before the task finished.
    async fn on_aborted(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }
}
