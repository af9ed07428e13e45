//! Domain model: ids, task attributes, wire envelope, job events, vocabularies, errors.
//!
//! Nothing in here performs I/O.

pub mod envelope;
pub mod errors;
pub mod events;
pub mod fallback;
pub mod ids;
pub mod locale;
pub mod reasons;
pub mod task;

pub use self::envelope::{
    RemoteRequest, RemoteResponse, TASK_HANDLER_PATH, TASK_PAYLOAD_HANDLER_PATH, TaskMessage,
};
pub use self::errors::{
    ApiErrorDetail, BackgroundError, CodecError, CommunicationError, DispatchError, JobError,
    TaskError, TaskErrorKind, WebApiError,
};
pub use self::events::{JobEvent, JobEventName, JobStatus, StatusReason};
pub use self::fallback::Fallback;
pub use self::ids::{EntryId, HostId, JobId};
pub use self::locale::normalize_locale;
pub use self::reasons::{FailedReason, ScanEventType, SuspendedReason};
pub use self::task::{TaskAttributes, TaskPayload};
