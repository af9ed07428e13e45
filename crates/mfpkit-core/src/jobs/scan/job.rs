//! ScanJob - scan-to-app ジョブの開始と実行中ジョブの記録

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::warn;

use crate::domain::{JobError, JobId};
use crate::events::EventSubscriber;
use crate::jobs::job::{JobListener, start_job};
use crate::ports::DeviceApi;

const SCAN_TO_APP_PATH: &str = "/jobs/scan/scan_to_app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    api_token: String,
    id: JobId,
}

impl ScanJob {
    pub fn new(api_token: impl Into<String>, id: JobId) -> Self {
        Self {
            api_token: api_token.into(),
            id,
        }
    }

    /// Starts a scan-to-app job whose events go to `listener`.
    ///
    /// The started job becomes the running job in `running`.
    pub async fn start(
        api: &dyn DeviceApi,
        subscriber: &EventSubscriber,
        running: &RunningScanJob,
        api_token: &str,
        parameter: Value,
        listener: Arc<dyn JobListener>,
    ) -> Result<ScanJob, JobError> {
        let id = start_job(
            api,
            subscriber,
            api_token,
            SCAN_TO_APP_PATH,
            Some(parameter),
            Some(listener),
        )
        .await?;
        warn!(job_id = %id, "new scan job is started");

        let job = ScanJob::new(api_token, id);
        running.set(job.clone());
        Ok(job)
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }
}

/// The one scan job currently running on the device.
///
/// Shared between whoever starts scan jobs and the listener that clears it on
/// `jobs_completed`.
#[derive(Debug, Clone, Default)]
pub struct RunningScanJob {
    slot: Arc<Mutex<Option<ScanJob>>>,
}

impl RunningScanJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the running job if its id is `job_id`.
    pub fn get(&self, job_id: &JobId) -> Option<ScanJob> {
        self.slot().as_ref().filter(|job| job.id() == job_id).cloned()
    }

    pub fn current(&self) -> Option<ScanJob> {
        self.slot().clone()
    }

    pub fn set(&self, job: ScanJob) {
        *self.slot() = Some(job);
    }

    pub fn clear(&self) {
        *self.slot() = None;
    }

    fn slot(&self) -> MutexGuard<'_, Option<ScanJob>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobEvent;
    use crate::impls::InMemoryDeviceApi;
    use async_trait::async_trait;
    use serde_json::json;

    struct Ignore;

    #[async_trait]
    impl JobListener for Ignore {
        async fn handle_event(&self, _event: &JobEvent) {}
    }

    #[tokio::test]
    async fn test_start_records_running_job() {
        let device = Arc::new(InMemoryDeviceApi::new());
        let subscriber = EventSubscriber::new(device.clone());
        let running = RunningScanJob::new();

        let job = ScanJob::start(
            device.as_ref(),
            &subscriber,
            &running,
            "home-token",
            json!({"auto_adjust": true}),
            Arc::new(Ignore),
        )
        .await
        .unwrap();

        assert_eq!(running.get(job.id()), Some(job.clone()));
        assert_eq!(running.get(&JobId::new("other")), None);
        assert_eq!(job.api_token(), "home-token");

        running.clear();
        assert_eq!(running.current(), None);
    }
}
