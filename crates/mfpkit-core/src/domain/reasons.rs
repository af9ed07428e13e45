//! Client-facing vocabularies for scan job notifications.
//!
//! Device reasons are mapped onto these closed sets; nothing else ever reaches
//! the client.

use serde::Serialize;

use super::events::StatusReason;

/// Notification names sent to the client for a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanEventType {
    PageScanned,
    PreviewCreated,
    Suspended,
    FilingStarted,
    Canceled,
    Completed,
    Failed,
}

impl ScanEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageScanned => "page_scanned",
            Self::PreviewCreated => "preview_created",
            Self::Suspended => "suspended",
            Self::FilingStarted => "filing_started",
            Self::Canceled => "canceled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Why a scan job is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendedReason {
    /// Waiting for the next sheet (also when the user stops DF scanning).
    WaitNext,
    MaxPage,
    DfJam,
    CoverOpen,
    Unexpected,
}

impl From<StatusReason> for SuspendedReason {
    fn from(reason: StatusReason) -> Self {
        match reason {
            StatusReason::WaitNextOriginal | StatusReason::UserRequest => Self::WaitNext,
            StatusReason::MaxPage => Self::MaxPage,
            StatusReason::AdfJam => Self::DfJam,
            StatusReason::CoverOpen => Self::CoverOpen,
            _ => Self::Unexpected,
        }
    }
}

/// Why a scan job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedReason {
    /// Jam, open cover or missing original before the first page.
    NotStarted,
    StorageFull,
    AllOmitted,
    CopyProtection,
    CounterfeitProhibited,
    /// The background task could not be handed off.
    CommunicationFailed,
    Unexpected,
}

impl From<StatusReason> for FailedReason {
    fn from(reason: StatusReason) -> Self {
        match reason {
            StatusReason::AdfJam | StatusReason::CoverOpen | StatusReason::WaitNextOriginal => {
                Self::NotStarted
            }
            StatusReason::HardDiskFull => Self::StorageFull,
            StatusReason::AllPagesOmitted => Self::AllOmitted,
            StatusReason::CopyProtection => Self::CopyProtection,
            StatusReason::CounterfeitMoney => Self::CounterfeitProhibited,
            _ => Self::Unexpected,
        }
    }
}

impl FailedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::StorageFull => "storage_full",
            Self::AllOmitted => "all_omitted",
            Self::CopyProtection => "copy_protection",
            Self::CounterfeitProhibited => "counterfeit_prohibited",
            Self::CommunicationFailed => "communication_failed",
            Self::Unexpected => "unexpected",
        }
    }
}
