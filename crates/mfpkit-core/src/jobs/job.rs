//! Job - デバイスジョブの開始とイベントの振り分け
//!
//! # フロー
//! 1. listener があれば [`JobEventHandler`] を先に購読する（開始直後のイベントを落とさない）
//! 2. ジョブ開始 API を POST し、レスポンスの `WFID` を読む
//! 3. handler に job id を設定する。以降そのジョブのイベントだけが listener に届く
//! 4. `jobs_completed` を受けたら handler は購読から外れる

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{JobError, JobEvent, JobEventName, JobId};
use crate::events::{EventHandler, EventSubscriber, Subscription};
use crate::ports::DeviceApi;

const JOB_EVENT_CLASS: &str = "jobs";

/// Receives the events of one job.
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn handle_event(&self, event: &JobEvent);
}

/// Routes `jobs` events of one job id to its [`JobListener`].
///
/// Until the job id is known every event is ignored.
pub struct JobEventHandler {
    api_token: String,
    listener: Arc<dyn JobListener>,
    job_id: Mutex<Option<JobId>>,
}

impl JobEventHandler {
    pub fn new(api_token: impl Into<String>, listener: Arc<dyn JobListener>) -> Self {
        Self {
            api_token: api_token.into(),
            listener,
            job_id: Mutex::new(None),
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.slot().clone()
    }

    pub fn set_job_id(&self, job_id: JobId) {
        *self.slot() = Some(job_id);
    }

    fn slot(&self) -> MutexGuard<'_, Option<JobId>> {
        self.job_id.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventHandler for JobEventHandler {
    fn api_token(&self) -> &str {
        &self.api_token
    }

    fn event_class(&self) -> &str {
        JOB_EVENT_CLASS
    }

    async fn handle_event(&self, event: &Value) -> Subscription {
        let event = JobEvent::from_value(event);
        let Some(event_job_id) = event.job_id.as_ref() else {
            return Subscription::Keep;
        };
        if self.job_id().as_ref() != Some(event_job_id) {
            return Subscription::Keep;
        }

        self.listener.handle_event(&event).await;
        debug!(job_id = %event_job_id, event_name = ?event.name, "job event is handled");

        if event.event_name() == JobEventName::Completed {
            Subscription::Cancel
        } else {
            Subscription::Keep
        }
    }
}

/// Starts a device job and returns its id.
///
/// With a `listener`, the job's events are routed to it until `jobs_completed`.
pub async fn start_job(
    api: &dyn DeviceApi,
    subscriber: &EventSubscriber,
    api_token: &str,
    api_path: &str,
    parameter: Option<Value>,
    listener: Option<Arc<dyn JobListener>>,
) -> Result<JobId, JobError> {
    let handler = match listener {
        Some(listener) => {
            let handler = Arc::new(JobEventHandler::new(api_token, listener));
            subscriber.subscribe(handler.clone()).await?;
            Some(handler)
        }
        None => None,
    };

    let started = api.post(api_path, api_token, parameter).await;
    let response = match started {
        Ok(response) => response,
        Err(e) => {
            if let Some(handler) = handler {
                let handler: Arc<dyn EventHandler> = handler;
                subscriber.unsubscribe(&handler);
            }
            return Err(e.into());
        }
    };

    let job_id = response
        .get("WFID")
        .and_then(JobId::from_value)
        .ok_or(JobError::MissingJobId)?;
    info!(%job_id, api_path, "new job is started");

    if let Some(handler) = handler {
        handler.set_job_id(job_id.clone());
    }
    Ok(job_id)
}
