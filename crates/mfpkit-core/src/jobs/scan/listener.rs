//! ScanJobListener - スキャンジョブのイベント状態機械
//!
//! # 状態遷移
//! ```text
//! started ─▶ page_scanned* ─▶ input_processing_suspended? ─▶ suspended?
//!        ─▶ input_processing_completed ─▶ completed (終端)
//! ```
//!
//! - `input_processing_completed(success)`: HomeApp ロックを取得し filing_started を通知
//! - `input_processing_completed(その他)`: reason をキャッシュするだけ
//! - `jobs_completed`: 結果を通知し、必ず後始末をする
//!   （キャッシュ消去・実行中ジョブの解除・ロック解放）
//!
//! The device's reason on `jobs_completed` is not reliable for failures (it may
//! say `fatal_error` for a copy-protected original), so failures are classified
//! by the reason cached from `input_processing_completed`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::hook::{ScanCompletionHook, ScanJobFailure, ScanJobResult};
use super::job::RunningScanJob;
use crate::comm::{LockScope, SessionLock};
use crate::domain::{
    FailedReason, Fallback, JobEvent, JobEventName, JobStatus, ScanEventType, StatusReason,
    SuspendedReason,
};
use crate::jobs::job::JobListener;
use crate::ports::{ClientNotification, ClientNotifier, DeviceApi};

/// Notification `type` of every scan job event.
pub const SCAN_JOB_TYPE: &str = "scan_job";

#[derive(Debug, Default)]
struct ScanState {
    lock: Option<SessionLock>,
    cached_reason: Option<String>,
}

pub struct ScanJobListener {
    api: Arc<dyn DeviceApi>,
    notifier: Arc<dyn ClientNotifier>,
    running: RunningScanJob,
    hook: Arc<dyn ScanCompletionHook>,
    state: Mutex<ScanState>,
}

impl ScanJobListener {
    pub fn new(
        api: Arc<dyn DeviceApi>,
        notifier: Arc<dyn ClientNotifier>,
        running: RunningScanJob,
        hook: Arc<dyn ScanCompletionHook>,
    ) -> Self {
        Self {
            api,
            notifier,
            running,
            hook,
            state: Mutex::new(ScanState::default()),
        }
    }

    /// True while the HomeApp lock taken at filing start is held.
    pub async fn is_locked(&self) -> bool {
        self.state.lock().await.lock.is_some()
    }

    pub async fn cached_reason(&self) -> Option<String> {
        self.state.lock().await.cached_reason.clone()
    }

    fn notify(&self, event: &JobEvent, event_type: ScanEventType, extra: Option<Value>) {
        let mut body = Map::new();
        body.insert(
            "job_id".to_string(),
            event
                .job_id
                .as_ref()
                .map_or(Value::Null, |id| Value::String(id.to_string())),
        );
        if let Some(Value::Object(extra)) = extra {
            body.extend(extra);
        }

        self.notifier.notify(ClientNotification {
            api_token: event.api_token.clone().unwrap_or_default(),
            event_type: SCAN_JOB_TYPE.to_string(),
            name: event_type.as_str().to_string(),
            body: Value::Object(body),
        });
    }

    fn page_scanned(&self, event: &JobEvent) {
        let Some(page_number) = event.get("page_num") else {
            warn!(job_id = ?event.job_id, "page scanned event does not carry page_num");
            return;
        };
        warn!(job_id = ?event.job_id, page = %page_number, "page scanned event occurs");
        self.notify(
            event,
            ScanEventType::PageScanned,
            Some(json!({ "page_number": page_number })),
        );
    }

    fn preview_created(&self, event: &JobEvent) {
        let page_number = event.get("page_num").cloned().unwrap_or(Value::Null);
        let preview_url = event.get("preview_url").cloned().unwrap_or(Value::Null);
        warn!(job_id = ?event.job_id, page = %page_number, "preview image created event occurs");
        self.notify(
            event,
            ScanEventType::PreviewCreated,
            Some(json!({ "page_number": page_number, "preview_url": preview_url })),
        );
    }

    fn job_suspended(&self, event: &JobEvent) {
        let reason = SuspendedReason::from(event.status_reason());
        warn!(job_id = ?event.job_id, device_reason = ?event.reason, ?reason, "scan job is suspended");
        self.notify(event, ScanEventType::Suspended, Some(json!({ "reason": reason })));
    }

    async fn input_processing_completed(&self, event: &JobEvent) {
        warn!(
            job_id = ?event.job_id,
            status = ?event.status,
            reason = ?event.reason,
            "scan job input processing completed event is received"
        );

        let mut state = self.state.lock().await;
        if event.status_reason() != StatusReason::Success {
            state.cached_reason = event.reason.clone();
            return;
        }

        if state.lock.is_none() {
            let api_token = event.api_token.as_deref().unwrap_or_default();
            match SessionLock::acquire(self.api.clone(), api_token, LockScope::HomeApp).await {
                Ok(lock) => state.lock = Some(lock),
                Err(e) => {
                    error!(job_id = ?event.job_id, error = %e, "home app session cannot be locked");
                    return;
                }
            }
        }
        drop(state);

        self.notify(event, ScanEventType::FilingStarted, None);
    }

    async fn job_completed(&self, event: &JobEvent) {
        warn!(
            job_id = ?event.job_id,
            status = ?event.status,
            reason = ?event.reason,
            "scan job completed event is received"
        );
        let result = scan_result(event);

        match self.classify(event, &result).await {
            Ok(Terminal::Completed) => {
                warn!(job_id = ?event.job_id, "scan job is completed successfully");
                self.notify(
                    event,
                    ScanEventType::Completed,
                    Some(json!({
                        "scanned_pages": result.scanned_pages,
                        "omitted_pages": result.omitted_pages,
                    })),
                );
            }
            Ok(Terminal::Canceled) => {
                warn!(job_id = ?event.job_id, "scan job is canceled by user request");
                self.notify(event, ScanEventType::Canceled, None);
            }
            Err(failure) => {
                warn!(job_id = ?event.job_id, reason = failure.reason.as_str(), "scan job is failed");
                self.notify(
                    event,
                    ScanEventType::Failed,
                    Some(json!({
                        "scanned_pages": result.scanned_pages,
                        "omitted_pages": result.omitted_pages,
                        "reason": failure.reason,
                    })),
                );
            }
        }

        self.cleanup().await;
    }

    async fn classify(
        &self,
        event: &JobEvent,
        result: &ScanJobResult,
    ) -> Result<Terminal, ScanJobFailure> {
        if event.job_status() != JobStatus::Completed {
            warn!(status = ?event.status, "scan job is completed incorrectly");
            return Err(ScanJobFailure::new(FailedReason::Unexpected));
        }

        match event.status_reason() {
            StatusReason::Success => {
                self.run_hook(result).await?;
                Ok(Terminal::Completed)
            }
            StatusReason::UserRequest => Ok(Terminal::Canceled),
            _ => {
                let cached = self.state.lock().await.cached_reason.clone();
                let reason = FailedReason::from(StatusReason::parse_opt(cached.as_deref()));
                Err(ScanJobFailure::new(reason))
            }
        }
    }

    /// Runs the completion hook on its own task; a panic becomes `unexpected`.
    async fn run_hook(&self, result: &ScanJobResult) -> Result<(), ScanJobFailure> {
        let hook = self.hook.clone();
        let result = result.clone();
        match tokio::spawn(async move { hook.on_completed(&result).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "scan completion hook panicked");
                Err(ScanJobFailure::new(FailedReason::Unexpected))
            }
        }
    }

    async fn cleanup(&self) {
        self.running.clear();

        let mut state = self.state.lock().await;
        state.cached_reason = None;
        let lock = state.lock.take();
        drop(state);

        if let Some(mut lock) = lock
            && let Err(e) = lock.release().await
        {
            error!(error = %e, "home app session lock release failed");
        }
    }
}

enum Terminal {
    Completed,
    Canceled,
}

fn scan_result(event: &JobEvent) -> ScanJobResult {
    let scanned = event.get("page_scanned_result");
    let count = |key: &str| {
        scanned
            .and_then(|s| s.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    ScanJobResult {
        api_token: event.api_token.clone().unwrap_or_default(),
        id: event.job_id.clone(),
        scanned_pages: count("total_pages"),
        omitted_pages: count("omitted_blank_pages"),
    }
}

#[async_trait]
impl JobListener for ScanJobListener {
    async fn handle_event(&self, event: &JobEvent) {
        match event.event_name() {
            JobEventName::PageScanned => self.page_scanned(event),
            JobEventName::PreviewCreated => self.preview_created(event),
            JobEventName::InputProcessingSuspended => {
                warn!(job_id = ?event.job_id, reason = ?event.reason, "scan job input processing suspended event is received");
            }
            JobEventName::Suspended => self.job_suspended(event),
            JobEventName::InputProcessingCompleted => self.input_processing_completed(event).await,
            JobEventName::Completed => self.job_completed(event).await,
            JobEventName::Unknown => {
                warn!(name = ?event.name, "unexpected scan event occurs");
            }
        }
        debug!(job_id = ?event.job_id, name = ?event.name, "scan event is handled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;
    use crate::impls::{BroadcastNotifier, InMemoryDeviceApi};
    use crate::jobs::scan::hook::NoopHook;
    use crate::jobs::scan::job::ScanJob;
    use crate::ports::HttpMethod;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    enum HookBehavior {
        Succeed,
        Fail(FailedReason),
        Panic,
    }

    struct CountingHook {
        calls: AtomicUsize,
        behavior: HookBehavior,
    }

    impl CountingHook {
        fn new(behavior: HookBehavior) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behavior,
            })
        }
    }

    #[async_trait]
    impl ScanCompletionHook for CountingHook {
        async fn on_completed(&self, result: &ScanJobResult) -> Result<(), ScanJobFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(result.api_token, "home-token");
            match self.behavior {
                HookBehavior::Succeed => Ok(()),
                HookBehavior::Fail(reason) => Err(ScanJobFailure::new(reason)),
                HookBehavior::Panic => panic!("hook exploded"),
            }
        }
    }

    struct Fixture {
        device: Arc<InMemoryDeviceApi>,
        running: RunningScanJob,
        listener: ScanJobListener,
        rx: broadcast::Receiver<ClientNotification>,
    }

    fn fixture(hook: Arc<dyn ScanCompletionHook>) -> Fixture {
        let device = Arc::new(InMemoryDeviceApi::new());
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let rx = notifier.subscribe();
        let running = RunningScanJob::new();
        running.set(ScanJob::new("home-token", JobId::new("7")));
        let listener = ScanJobListener::new(device.clone(), notifier, running.clone(), hook);
        Fixture {
            device,
            running,
            listener,
            rx,
        }
    }

    fn event(name: &str, status: &str, reason: &str, extra: Value) -> JobEvent {
        let mut raw = json!({
            "event_class": "jobs",
            "event_name": name,
            "accesstoken": "home-token",
            "job_status": {"job_id": 7, "status": status, "status_reason": reason},
        });
        if let (Some(raw), Value::Object(extra)) = (raw.as_object_mut(), extra) {
            raw.extend(extra);
        }
        JobEvent::from_value(&raw)
    }

    fn completed(reason: &str) -> JobEvent {
        event(
            "jobs_completed",
            "completed",
            reason,
            json!({"page_scanned_result": {"total_pages": 4, "omitted_blank_pages": 1}}),
        )
    }

    fn drain(rx: &mut broadcast::Receiver<ClientNotification>) -> Vec<ClientNotification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    const HOME_LOCK: &str = "/app/homeapp/lock";

    #[tokio::test]
    async fn test_successful_scan() {
        let hook = CountingHook::new(HookBehavior::Succeed);
        let mut f = fixture(hook.clone());

        f.listener
            .handle_event(&event("jobs_input_processing_completed", "processing", "success", json!({})))
            .await;
        assert_eq!(f.device.locks_acquired(HOME_LOCK), 1);
        assert!(f.listener.is_locked().await);

        f.listener.handle_event(&completed("success")).await;

        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        let sent = drain(&mut f.rx);
        let names: Vec<_> = sent.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["filing_started", "completed"]);
        assert_eq!(sent[1].event_type, SCAN_JOB_TYPE);
        assert_eq!(
            sent[1].body,
            json!({"job_id": "7", "scanned_pages": 4, "omitted_pages": 1})
        );

        assert_eq!(f.device.locks_released(HOME_LOCK), 1);
        assert!(!f.listener.is_locked().await);
        assert_eq!(f.listener.cached_reason().await, None);
        assert_eq!(f.running.current(), None);
    }

    #[tokio::test]
    async fn test_second_filing_start_keeps_one_lock() {
        let f = fixture(Arc::new(NoopHook));
        let started = event("jobs_input_processing_completed", "processing", "success", json!({}));

        f.listener.handle_event(&started).await;
        f.listener.handle_event(&started).await;

        assert_eq!(f.device.locks_acquired(HOME_LOCK), 1);
        f.listener.handle_event(&completed("success")).await;
        assert_eq!(f.device.locks_released(HOME_LOCK), 1);
    }

    #[tokio::test]
    async fn test_cached_reason_wins_over_terminal_reason() {
        let hook = CountingHook::new(HookBehavior::Succeed);
        let mut f = fixture(hook.clone());

        f.listener
            .handle_event(&event(
                "jobs_input_processing_completed",
                "processing",
                "hard_disk_full",
                json!({}),
            ))
            .await;
        assert_eq!(f.listener.cached_reason().await.as_deref(), Some("hard_disk_full"));
        assert_eq!(f.device.locks_acquired(HOME_LOCK), 0);

        f.listener.handle_event(&completed("fatal_error")).await;

        let sent = drain(&mut f.rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name, "failed");
        assert_eq!(
            sent[0].body,
            json!({"job_id": "7", "scanned_pages": 4, "omitted_pages": 1, "reason": "storage_full"})
        );
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.listener.cached_reason().await, None);
    }

    #[tokio::test]
    async fn test_user_request_is_canceled() {
        let hook = CountingHook::new(HookBehavior::Succeed);
        let mut f = fixture(hook.clone());

        f.listener.handle_event(&completed("user_request")).await;

        let sent = drain(&mut f.rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name, "canceled");
        assert_eq!(sent[0].body, json!({"job_id": "7"}));
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.running.current(), None);
    }

    #[tokio::test]
    async fn test_failed_reason_without_cache_is_unexpected() {
        let mut f = fixture(Arc::new(NoopHook));

        f.listener.handle_event(&completed("copy_protection")).await;

        let sent = drain(&mut f.rx);
        assert_eq!(sent[0].name, "failed");
        assert_eq!(sent[0].body["reason"], "unexpected");
    }

    #[tokio::test]
    async fn test_status_other_than_completed_is_unexpected() {
        let hook = CountingHook::new(HookBehavior::Succeed);
        let mut f = fixture(hook.clone());

        f.listener
            .handle_event(&event("jobs_completed", "canceled", "success", json!({})))
            .await;

        let sent = drain(&mut f.rx);
        assert_eq!(sent[0].name, "failed");
        assert_eq!(
            sent[0].body,
            json!({"job_id": "7", "scanned_pages": 0, "omitted_pages": 0, "reason": "unexpected"})
        );
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hook_failure_is_reported_and_lock_released() {
        let hook = CountingHook::new(HookBehavior::Fail(FailedReason::CommunicationFailed));
        let mut f = fixture(hook);

        f.listener
            .handle_event(&event("jobs_input_processing_completed", "processing", "success", json!({})))
            .await;
        f.listener.handle_event(&completed("success")).await;

        let sent = drain(&mut f.rx);
        assert_eq!(sent.last().unwrap().name, "failed");
        assert_eq!(sent.last().unwrap().body["reason"], "communication_failed");
        assert_eq!(f.device.locks_released(HOME_LOCK), 1);
    }

    #[tokio::test]
    async fn test_panicking_hook_is_unexpected() {
        let mut f = fixture(CountingHook::new(HookBehavior::Panic));

        f.listener
            .handle_event(&event("jobs_input_processing_completed", "processing", "success", json!({})))
            .await;
        f.listener.handle_event(&completed("success")).await;

        let sent = drain(&mut f.rx);
        assert_eq!(sent.last().unwrap().body["reason"], "unexpected");
        assert!(!f.listener.is_locked().await);
        assert!(f.device.active_locks().is_empty());
    }

    #[tokio::test]
    async fn test_lock_failure_skips_filing_started() {
        let mut f = fixture(Arc::new(NoopHook));
        f.device
            .inject_fault(HttpMethod::Post, HOME_LOCK, "IllegalStateException", 1);

        f.listener
            .handle_event(&event("jobs_input_processing_completed", "processing", "success", json!({})))
            .await;

        assert!(drain(&mut f.rx).is_empty());
        assert!(!f.listener.is_locked().await);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let mut f = fixture(Arc::new(NoopHook));

        f.listener
            .handle_event(&event("jobs_page_scanned", "processing", "", json!({"page_num": 1})))
            .await;
        f.listener
            .handle_event(&event(
                "jobs_preview_img_created",
                "processing",
                "",
                json!({"page_num": 1, "preview_url": "/preview/1.jpg"}),
            ))
            .await;
        f.listener
            .handle_event(&event("jobs_suspended", "suspended", "job_status_reason_adf_jam", json!({})))
            .await;
        f.listener
            .handle_event(&event("jobs_suspended", "suspended", "toner_empty", json!({})))
            .await;

        let bodies: Vec<_> = drain(&mut f.rx).into_iter().map(|n| (n.name, n.body)).collect();
        assert_eq!(
            bodies,
            vec![
                ("page_scanned".to_string(), json!({"job_id": "7", "page_number": 1})),
                (
                    "preview_created".to_string(),
                    json!({"job_id": "7", "page_number": 1, "preview_url": "/preview/1.jpg"})
                ),
                ("suspended".to_string(), json!({"job_id": "7", "reason": "df_jam"})),
                ("suspended".to_string(), json!({"job_id": "7", "reason": "unexpected"})),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_and_log_only_events_do_nothing() {
        let mut f = fixture(Arc::new(NoopHook));

        f.listener
            .handle_event(&event("jobs_firmware_v9_event", "processing", "", json!({})))
            .await;
        f.listener
            .handle_event(&event(
                "jobs_input_processing_suspended",
                "processing",
                "wait_next_original",
                json!({}),
            ))
            .await;

        assert!(drain(&mut f.rx).is_empty());
        assert!(f.running.current().is_some());
    }
}
