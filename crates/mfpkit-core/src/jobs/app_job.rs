//! AppJobListener - app ジョブの完了を待つ

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::warn;

use super::job::JobListener;
use crate::domain::{JobError, JobEvent, JobEventName};

/// How long [`AppJobListener::listen`] waits when no timeout is given.
pub const DEFAULT_APP_JOB_TIMEOUT: Duration = Duration::from_secs(90 * 60);

/// Waits for `jobs_completed` of one app job.
///
/// # 使用例
/// ```ignore
/// let listener = Arc::new(AppJobListener::new());
/// start_job(api, &subscriber, token, "/jobs/app", Some(param), Some(listener.clone())).await?;
/// let completed = listener.listen(None).await?;
/// ```
pub struct AppJobListener {
    completed: watch::Sender<Option<JobEvent>>,
}

impl AppJobListener {
    pub fn new() -> Self {
        let (completed, _) = watch::channel(None);
        Self { completed }
    }

    /// Returns the `jobs_completed` event, or [`JobError::Timeout`].
    pub async fn listen(&self, timeout: Option<Duration>) -> Result<JobEvent, JobError> {
        let timeout = timeout.unwrap_or(DEFAULT_APP_JOB_TIMEOUT);
        let mut rx = self.completed.subscribe();

        let waited = tokio::time::timeout(timeout, async {
            match rx.wait_for(Option::is_some).await {
                Ok(event) => event.clone(),
                // sender は self が持っているので閉じない
                Err(_) => None,
            }
        })
        .await;

        match waited {
            Ok(Some(event)) => Ok(event),
            _ => Err(JobError::Timeout(timeout)),
        }
    }
}

impl Default for AppJobListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobListener for AppJobListener {
    async fn handle_event(&self, event: &JobEvent) {
        warn!(
            job_id = ?event.job_id,
            name = ?event.name,
            status = ?event.status,
            reason = ?event.reason,
            "app job event is received"
        );
        if event.event_name() == JobEventName::Completed {
            self.completed.send_replace(Some(event.clone()));
        }
    }
}
