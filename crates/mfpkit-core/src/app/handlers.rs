//! Task request handlers - リクエストから task を組み立てて enqueue する
//!
//! | handler_path                   | message           | task の作り方              |
//! |--------------------------------|-------------------|---------------------------|
//! | `TASK_HANDLER_PATH`            | `RunTask`         | business fields を decode |
//! | `TASK_PAYLOAD_HANDLER_PATH`    | `RunTaskByClass`  | class 名から新規生成        |
//!
//! Both stamp the caller token, dispatch time and locale as [`TaskAttributes`].
//! This is the only place attributes are set.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::runtime::BackgroundRuntime;
use super::server::RequestHandler;
use crate::domain::{BackgroundError, TaskAttributes, TaskMessage};
use crate::typed::RegistryError;

fn parse_message(body: Value) -> Result<TaskMessage, BackgroundError> {
    serde_json::from_value(body)
        .map_err(|e| BackgroundError::InvalidRequest(format!("malformed task message: {e}")))
}

fn resolve_error(e: RegistryError) -> BackgroundError {
    match e {
        RegistryError::NotRegistered(name) => BackgroundError::TaskClassNotFound(name),
        other => BackgroundError::InvalidRequest(other.to_string()),
    }
}

/// Runs a task object built in the foreground.
pub struct TaskRequestHandler {
    runtime: Arc<BackgroundRuntime>,
}

impl TaskRequestHandler {
    pub fn new(runtime: Arc<BackgroundRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl RequestHandler for TaskRequestHandler {
    async fn handle_request(
        &self,
        caller_token: &str,
        body: Value,
    ) -> Result<Value, BackgroundError> {
        let TaskMessage::RunTask {
            task_type,
            fields,
            dispatched_at,
            locale,
        } = parse_message(body)?
        else {
            return Err(BackgroundError::InvalidRequest(
                "expected a run_task message".to_string(),
            ));
        };

        let task = self
            .runtime
            .registry()
            .decode(&task_type, fields)
            .map_err(resolve_error)?;
        let attributes = TaskAttributes::new(caller_token, dispatched_at, locale);

        let entry_id = self.runtime.enqueue(task, attributes, None).await?;
        debug!(%entry_id, %task_type, "run_task request is accepted");
        Ok(Value::Null)
    }
}

/// Instantiates a task by class name and runs it with a detached payload.
pub struct TaskPayloadRequestHandler {
    runtime: Arc<BackgroundRuntime>,
}

impl TaskPayloadRequestHandler {
    pub fn new(runtime: Arc<BackgroundRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl RequestHandler for TaskPayloadRequestHandler {
    async fn handle_request(
        &self,
        caller_token: &str,
        body: Value,
    ) -> Result<Value, BackgroundError> {
        let TaskMessage::RunTaskByClass {
            task_class,
            payload,
            dispatched_at,
            locale,
        } = parse_message(body)?
        else {
            return Err(BackgroundError::InvalidRequest(
                "expected a run_task_by_class message".to_string(),
            ));
        };

        let task = self
            .runtime
            .registry()
            .instantiate(&task_class)
            .map_err(resolve_error)?;
        let attributes = TaskAttributes::new(caller_token, dispatched_at, locale);

        let entry_id = self.runtime.enqueue(task, attributes, Some(payload)).await?;
        debug!(%entry_id, %task_class, "run_task_by_class request is accepted");
        Ok(Value::Null)
    }
}
