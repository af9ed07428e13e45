//! Job events - デバイスから届くジョブイベントのスナップショット

use serde::Deserialize;
use serde_json::{Map, Value};

use super::fallback::Fallback;
use super::ids::JobId;

/// Lifecycle event names the job routing understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum JobEventName {
    #[serde(rename = "jobs_page_scanned")]
    PageScanned,
    #[serde(rename = "jobs_preview_img_created")]
    PreviewCreated,
    #[serde(rename = "jobs_input_processing_suspended")]
    InputProcessingSuspended,
    #[serde(rename = "jobs_suspended")]
    Suspended,
    #[serde(rename = "jobs_input_processing_completed")]
    InputProcessingCompleted,
    #[serde(rename = "jobs_completed")]
    Completed,
    Unknown,
}

impl Fallback for JobEventName {
    const FALLBACK: Self = JobEventName::Unknown;
}

/// Coarse job status carried in `job_status.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Processing,
    Suspended,
    Other,
}

impl Fallback for JobStatus {
    const FALLBACK: Self = JobStatus::Other;
}

/// Device status reasons that matter to job handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReason {
    Success,
    UserRequest,
    WaitNextOriginal,
    MaxPage,
    #[serde(rename = "job_status_reason_adf_jam")]
    AdfJam,
    CoverOpen,
    HardDiskFull,
    AllPagesOmitted,
    CopyProtection,
    CounterfeitMoney,
    FatalError,
    Other,
}

impl Fallback for StatusReason {
    const FALLBACK: Self = StatusReason::Other;
}

/// Immutable snapshot of one raw job event.
///
/// The typed fields cover what routing needs; `raw` keeps every original field
/// for handler-specific extraction (page number, preview url, page counts).
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub api_token: Option<String>,
    pub name: Option<String>,
    pub job_id: Option<JobId>,
    pub status: Option<String>,
    pub reason: Option<String>,
    raw: Map<String, Value>,
}

impl JobEvent {
    /// Builds the snapshot from the raw event object.
    ///
    /// Missing fields become `None`; a non-object value yields an empty event.
    pub fn from_value(event: &Value) -> Self {
        let raw = event.as_object().cloned().unwrap_or_default();
        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

        let job_status = raw.get("job_status");
        let field = |key: &str| job_status.and_then(|s| s.get(key));

        Self {
            api_token: text(raw.get("accesstoken")),
            name: text(raw.get("event_name")),
            job_id: field("job_id").and_then(JobId::from_value),
            status: text(field("status")),
            reason: text(field("status_reason")),
            raw,
        }
    }

    pub fn event_name(&self) -> JobEventName {
        JobEventName::parse_opt(self.name.as_deref())
    }

    pub fn job_status(&self) -> JobStatus {
        JobStatus::parse_opt(self.status.as_deref())
    }

    pub fn status_reason(&self) -> StatusReason {
        StatusReason::parse_opt(self.reason.as_deref())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn parses_job_status_block() {
        let event = JobEvent::from_value(&json!({
            "event_class": "jobs",
            "event_name": "jobs_completed",
            "accesstoken": "token-1",
            "job_status": {"job_id": 12, "status": "completed", "status_reason": "success"},
            "page_scanned_result": {"total_pages": 3},
        }));

        assert_eq!(event.api_token.as_deref(), Some("token-1"));
        assert_eq!(event.event_name(), JobEventName::Completed);
        assert_eq!(event.job_id, Some(JobId::new("12")));
        assert_eq!(event.job_status(), JobStatus::Completed);
        assert_eq!(event.status_reason(), StatusReason::Success);
        assert_eq!(event.get("page_scanned_result").unwrap()["total_pages"], 3);
    }

    #[test]
    fn missing_job_status_yields_none() {
        let event = JobEvent::from_value(&json!({"event_name": "jobs_page_scanned"}));
        assert_eq!(event.job_id, None);
        assert_eq!(event.status, None);
        assert_eq!(event.job_status(), JobStatus::Other);
    }

    #[rstest]
    #[case("jobs_page_scanned", JobEventName::PageScanned)]
    #[case("jobs_preview_img_created", JobEventName::PreviewCreated)]
    #[case("jobs_input_processing_completed", JobEventName::InputProcessingCompleted)]
    #[case("jobs_firmware_v9_event", JobEventName::Unknown)]
    fn event_names_fall_back_to_unknown(#[case] raw: &str, #[case] expected: JobEventName) {
        assert_eq!(JobEventName::parse(raw), expected);
    }

    #[rstest]
    #[case("job_status_reason_adf_jam", StatusReason::AdfJam)]
    #[case("hard_disk_full", StatusReason::HardDiskFull)]
    #[case("counterfeit_money", StatusReason::CounterfeitMoney)]
    #[case("something_new", StatusReason::Other)]
    fn status_reasons_parse(#[case] raw: &str, #[case] expected: StatusReason) {
        assert_eq!(StatusReason::parse(raw), expected);
    }
}
