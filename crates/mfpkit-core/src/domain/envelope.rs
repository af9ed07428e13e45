//! Envelope - プロセス間でやり取りするメッセージの形
//!
//! A request names the background handler by a string path and carries a JSON
//! body. Task requests use the tagged [`TaskMessage`] schema; no code or live
//! object ever travels inside a message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::TaskPayload;

/// Handler path of the "run this task object" handler.
pub const TASK_HANDLER_PATH: &str = "mfpkit.background.handlers.task.TaskHandler";

/// Handler path of the "instantiate this task class with a payload" handler.
pub const TASK_PAYLOAD_HANDLER_PATH: &str =
    "mfpkit.background.handlers.task_payload.TaskPayloadHandler";

/// Request sent from the foreground to the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub handler_path: String,
    #[serde(default)]
    pub body: Value,
}

impl RemoteRequest {
    pub fn new(handler_path: impl Into<String>, body: Value) -> Self {
        Self {
            handler_path: handler_path.into(),
            body,
        }
    }
}

/// Response returned by the background for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteResponse {
    Ok {
        #[serde(default)]
        value: Value,
    },
    Err {
        kind: String,
        message: String,
    },
}

impl RemoteResponse {
    pub fn ok(value: Value) -> Self {
        Self::Ok { value }
    }

    pub fn err(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Err {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Body of the two task requests.
///
/// - `RunTask`: a task object built in the foreground, sent as its type tag plus
///   business fields
/// - `RunTaskByClass`: only a class name and a detached payload; the background
///   builds a fresh instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskMessage {
    RunTask {
        task_type: String,
        #[serde(default)]
        fields: Value,
        dispatched_at: f64,
        locale: String,
    },
    RunTaskByClass {
        task_class: String,
        #[serde(default)]
        payload: TaskPayload,
        dispatched_at: f64,
        locale: String,
    },
}

impl TaskMessage {
    pub fn dispatched_at(&self) -> f64 {
        match self {
            Self::RunTask { dispatched_at, .. } | Self::RunTaskByClass { dispatched_at, .. } => {
                *dispatched_at
            }
        }
    }

    pub fn locale(&self) -> &str {
        match self {
            Self::RunTask { locale, .. } | Self::RunTaskByClass { locale, .. } => locale,
        }
    }
}
