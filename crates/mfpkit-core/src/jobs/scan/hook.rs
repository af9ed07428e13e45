//! Scan completion hooks - スキャン成功時に呼ばれる処理
//!
//! A hook runs after `jobs_completed(success)` and before the client is told
//! "completed". Returning [`ScanJobFailure`] turns the job into a failure with
//! that reason instead.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::comm::Dispatcher;
use crate::domain::{DispatchError, FailedReason, JobId, TaskPayload};

/// Outcome of a successfully scanned job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanJobResult {
    #[serde(skip)]
    pub api_token: String,
    pub id: Option<JobId>,
    pub scanned_pages: u64,
    pub omitted_pages: u64,
}

/// The scan must be reported to the client as failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("scan job is not completed successfully (reason: {})", .reason.as_str())]
pub struct ScanJobFailure {
    pub reason: FailedReason,
}

impl ScanJobFailure {
    pub fn new(reason: FailedReason) -> Self {
        Self { reason }
    }
}

#[async_trait]
pub trait ScanCompletionHook: Send + Sync + 'static {
    async fn on_completed(&self, result: &ScanJobResult) -> Result<(), ScanJobFailure>;
}

/// Does nothing; the client is notified right away.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl ScanCompletionHook for NoopHook {
    async fn on_completed(&self, _result: &ScanJobResult) -> Result<(), ScanJobFailure> {
        Ok(())
    }
}

/// Dispatches a background task by class name once the scan is filed.
///
/// # 使用例
/// ```ignore
/// let hook = TaskDispatchingHook::new(
///     dispatcher,
///     "tasks.upload.UploadTask",
///     TaskPayload::new().with("document_name", "Sample"),
/// );
/// let listener = ScanJobListener::new(api, notifier, running, Arc::new(hook));
/// ```
///
/// A communication failure is reported to the client as `communication_failed`.
pub struct TaskDispatchingHook {
    dispatcher: Dispatcher,
    task_class: String,
    payload: TaskPayload,
}

impl TaskDispatchingHook {
    pub fn new(dispatcher: Dispatcher, task_class: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            dispatcher,
            task_class: task_class.into(),
            payload,
        }
    }

    pub fn task_class(&self) -> &str {
        &self.task_class
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }
}

#[async_trait]
impl ScanCompletionHook for TaskDispatchingHook {
    async fn on_completed(&self, result: &ScanJobResult) -> Result<(), ScanJobFailure> {
        let dispatched = self
            .dispatcher
            .dispatch(&result.api_token, &self.task_class, self.payload.clone())
            .await;

        match dispatched {
            Ok(()) => {
                info!(task_class = %self.task_class, "scan task is dispatched");
                Ok(())
            }
            Err(DispatchError::Communication(e)) => {
                error!(task_class = %self.task_class, error = %e, "scan task cannot be dispatched");
                Err(ScanJobFailure::new(FailedReason::CommunicationFailed))
            }
            Err(e) => {
                error!(task_class = %self.task_class, error = %e, "scan task dispatch failed");
                Err(ScanJobFailure::new(FailedReason::Unexpected))
            }
        }
    }
}
