//! Errors - エラー型と分類
//!
//! Each layer owns one error enum. Lower layers are wrapped with `#[from]`
//! so `?` composes across the pipeline:
//!
//! - **WebApiError**: device REST transport
//! - **CodecError**: envelope encode/decode
//! - **CommunicationError**: foreground → background channel
//! - **DispatchError**: dispatcher (channel + session lookup)
//! - **BackgroundError**: background request handling / worker host
//! - **TaskError**: task execution and hooks
//! - **JobError**: device job start / wait

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error names the device reports when an established channel went stale.
const STALE_CONNECTION_ERRORS: [&str; 3] = [
    "IllegalStateException",
    "AppServerAccessException",
    "DataNotFoundException",
];

/// Error name the device reports when the background app does not accept connections.
pub const APP_SERVER_ACCESS_ERROR: &str = "AppServerAccessException";

/// One entry of the `errors` array returned by the device on HTTP >= 400.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub name: String,
    #[serde(default)]
    pub message: String,
}

impl ApiErrorDetail {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum WebApiError {
    #[error("device api returned status {status}: {errors:?}")]
    Api {
        status: u16,
        errors: Vec<ApiErrorDetail>,
    },

    #[error("device api unreachable: {0}")]
    Http(String),

    #[error("device api response could not be decoded: {0}")]
    Decode(String),
}

impl WebApiError {
    pub fn api(status: u16, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            errors: vec![ApiErrorDetail::new(name, message)],
        }
    }

    /// Name of the first reported error, if the device answered with one.
    pub fn error_name(&self) -> Option<&str> {
        match self {
            Self::Api { errors, .. } => errors.first().map(|e| e.name.as_str()),
            _ => None,
        }
    }

    /// True when the error means the channel connection id is no longer usable.
    pub fn is_stale_connection(&self) -> bool {
        self.error_name()
            .is_some_and(|name| STALE_CONNECTION_ERRORS.contains(&name))
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("blob is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("blob is not a valid message: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CommunicationError {
    #[error("app communication is not available")]
    Unavailable,

    #[error("client side cannot access the background app")]
    BackgroundUnreachable,

    #[error("cannot acquire communication connection within {0:?}")]
    ConnectionBusy(std::time::Duration),

    #[error(transparent)]
    Transport(#[from] WebApiError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("background app rejected the request ({kind}): {message}")]
    Remote { kind: String, message: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Communication(#[from] CommunicationError),

    #[error("cannot resolve session locale: {0}")]
    Session(WebApiError),
}

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("worker host is not started")]
    HostNotStarted,

    #[error("worker host is already running")]
    HostAlreadyRunning,

    #[error("requested handler {0} is not found")]
    HandlerNotFound(String),

    #[error("task class {0} is not found")]
    TaskClassNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session lock failed: {0}")]
    Lock(WebApiError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl BackgroundError {
    /// Stable tag carried by error responses back to the foreground.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HostNotStarted => "host_not_started",
            Self::HostAlreadyRunning => "host_already_running",
            Self::HandlerNotFound(_) => "handler_not_found",
            Self::TaskClassNotFound(_) => "task_class_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Lock(_) => "session_lock_failed",
            Self::Codec(_) => "codec",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    Failed,
    Panicked,
    Decode,
}

/// TaskError は task 実行・hook の失敗
#[derive(Debug, Clone, Error)]
#[error("task error (kind: {kind:?}): {message}")]
pub struct TaskError {
    kind: TaskErrorKind,
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Panicked,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Decode,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> TaskErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<WebApiError> for TaskError {
    fn from(e: WebApiError) -> Self {
        Self::new(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job cannot be started: {0}")]
    Start(#[from] WebApiError),

    #[error("job start response does not carry a job id")]
    MissingJobId,

    #[error("app job is not completed in {0:?}")]
    Timeout(std::time::Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("IllegalStateException", true)]
    #[case("AppServerAccessException", true)]
    #[case("DataNotFoundException", true)]
    #[case("InvalidParameterException", false)]
    fn stale_connection_is_classified_by_error_name(#[case] name: &str, #[case] stale: bool) {
        let err = WebApiError::api(400, name, "");
        assert_eq!(err.is_stale_connection(), stale);
    }

    #[test]
    fn http_errors_are_never_stale() {
        let err = WebApiError::Http("connection refused".to_string());
        assert_eq!(err.error_name(), None);
        assert!(!err.is_stale_connection());
    }

    #[test]
    fn background_error_kinds_are_stable() {
        assert_eq!(
            BackgroundError::TaskClassNotFound("x".into()).kind(),
            "task_class_not_found"
        );
        assert_eq!(BackgroundError::HandlerNotFound("x".into()).kind(), "handler_not_found");
    }
}
