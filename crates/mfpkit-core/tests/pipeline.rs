//! Foreground → device channel → background worker, end to end over the
//! in-memory device.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use mfpkit_core::app::{AppBuilder, BackgroundApp};
use mfpkit_core::comm::{ChannelRegistry, Dispatcher, LockScope};
use mfpkit_core::config::{BackgroundSettings, CommunicationSettings};
use mfpkit_core::domain::{CommunicationError, DispatchError, TaskError, TaskPayload};
use mfpkit_core::events::EventSubscriber;
use mfpkit_core::impls::{BroadcastNotifier, InMemoryDeviceApi};
use mfpkit_core::jobs::scan::{RunningScanJob, ScanJob, ScanJobListener, TaskDispatchingHook};
use mfpkit_core::ports::{ClientNotification, SystemClock};
use mfpkit_core::typed::{Task, TaskContext};

const BACKGROUND_TOKEN: &str = "background-token";
const HOME_TOKEN: &str = "home-token";

type Run = (String, String, Option<TaskPayload>);

static ARCHIVE_RUNS: Mutex<Option<mpsc::UnboundedSender<Run>>> = Mutex::new(None);
static UPLOAD_RUNS: Mutex<Option<mpsc::UnboundedSender<Run>>> = Mutex::new(None);

fn record(slot: &Mutex<Option<mpsc::UnboundedSender<Run>>>, run: Run) {
    if let Some(tx) = slot.lock().unwrap().as_ref() {
        let _ = tx.send(run);
    }
}

#[derive(Default, Serialize, Deserialize)]
struct ArchiveTask {
    folder: String,
}

#[async_trait]
impl Task for ArchiveTask {
    const TYPE: &'static str = "tasks.archive.ArchiveTask";

    async fn execute(&self, ctx: &TaskContext, payload: Option<&TaskPayload>) -> Result<(), TaskError> {
        record(
            &ARCHIVE_RUNS,
            (self.folder.clone(), ctx.locale().to_string(), payload.cloned()),
        );
        Ok(())
    }
}

#[derive(Default, Serialize, Deserialize)]
struct UploadTask;

#[async_trait]
impl Task for UploadTask {
    const TYPE: &'static str = "tasks.upload.UploadTask";

    async fn execute(&self, ctx: &TaskContext, payload: Option<&TaskPayload>) -> Result<(), TaskError> {
        record(
            &UPLOAD_RUNS,
            (ctx.api_token().to_string(), ctx.locale().to_string(), payload.cloned()),
        );
        Ok(())
    }
}

struct Harness {
    device: Arc<InMemoryDeviceApi>,
    app: Arc<BackgroundApp>,
    dispatcher: Dispatcher,
}

async fn harness() -> Harness {
    let device = Arc::new(InMemoryDeviceApi::with_display_language("ja-jp"));
    let settings = BackgroundSettings {
        worker_count: 2,
        shutdown_grace_secs: 5,
        enqueue_hook_timeout_secs: 1,
    };
    let app = AppBuilder::new()
        .register::<ArchiveTask>()
        .unwrap()
        .register::<UploadTask>()
        .unwrap()
        .expect_tasks(&[ArchiveTask::TYPE, UploadTask::TYPE])
        .with_settings(settings)
        .build(device.clone(), BACKGROUND_TOKEN)
        .unwrap();
    device.set_endpoint(app.clone());
    app.on_start().await;

    let channels = Arc::new(ChannelRegistry::new(
        device.clone(),
        CommunicationSettings::default(),
    ));
    let dispatcher = Dispatcher::new(channels, Arc::new(SystemClock));
    Harness {
        device,
        app,
        dispatcher,
    }
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

#[tokio::test]
async fn task_object_runs_in_background_and_releases_its_lock() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    *ARCHIVE_RUNS.lock().unwrap() = Some(tx);
    let h = harness().await;

    let task = ArchiveTask {
        folder: "/scan/0001".to_string(),
    };
    h.dispatcher.dispatch_task(HOME_TOKEN, &task).await.unwrap();

    let (folder, locale, payload) = next(&mut rx).await;
    assert_eq!(folder, "/scan/0001");
    assert_eq!(locale, "ja_JP");
    assert_eq!(payload, None);

    // 接続が切れても 1 回の再接続で届く
    h.device.expire_connections();
    h.dispatcher.dispatch_task(HOME_TOKEN, &task).await.unwrap();
    next(&mut rx).await;

    h.app.on_stop().await;
    let path = LockScope::Background.path();
    assert_eq!(h.device.locks_acquired(path), 2);
    assert_eq!(h.device.locks_released(path), 2);
    assert!(h.device.active_locks().is_empty());
}

#[tokio::test]
async fn unknown_task_class_comes_back_as_remote_error() {
    let h = harness().await;

    let err = h
        .dispatcher
        .dispatch(HOME_TOKEN, "tasks.missing.MissingTask", TaskPayload::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Communication(CommunicationError::Remote { ref kind, .. })
            if kind == "task_class_not_found"
    ));
    h.app.on_stop().await;
    assert_eq!(h.device.locks_acquired(LockScope::Background.path()), 0);
}

#[tokio::test]
async fn scan_job_hands_off_to_background_task() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    *UPLOAD_RUNS.lock().unwrap() = Some(tx);
    let h = harness().await;

    // フォアグラウンド側: スキャンジョブを開始して完了イベントを流す
    let subscriber = EventSubscriber::new(h.device.clone());
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut notifications = notifier.subscribe();
    let running = RunningScanJob::new();
    let hook = TaskDispatchingHook::new(
        h.dispatcher.clone(),
        UploadTask::TYPE,
        TaskPayload::new().with("dir_path", "/scan/0002"),
    );
    let listener = Arc::new(ScanJobListener::new(
        h.device.clone(),
        notifier.clone(),
        running.clone(),
        Arc::new(hook),
    ));

    let job = ScanJob::start(
        h.device.as_ref(),
        &subscriber,
        &running,
        HOME_TOKEN,
        json!({"auto_adjust": true, "auto_event": false}),
        listener,
    )
    .await
    .unwrap();
    assert!(running.get(job.id()).is_some());

    let event = |name: &str, status: &str, reason: &str| {
        json!({
            "event_class": "jobs",
            "event_name": name,
            "accesstoken": HOME_TOKEN,
            "job_status": {"job_id": job.id().as_str(), "status": status, "status_reason": reason},
            "page_scanned_result": {"total_pages": 3, "omitted_blank_pages": 1},
        })
        .to_string()
    };
    subscriber
        .handle_raw(&event("jobs_input_processing_completed", "processing", "success"))
        .await;
    subscriber
        .handle_raw(&event("jobs_completed", "completed", "success"))
        .await;

    // バックグラウンド側で UploadTask が payload 付きで動く
    let (token, locale, payload) = next(&mut rx).await;
    assert_eq!(token, HOME_TOKEN);
    assert_eq!(locale, "ja_JP");
    assert_eq!(payload, Some(TaskPayload::new().with("dir_path", "/scan/0002")));

    let sent: Vec<ClientNotification> = std::iter::from_fn(|| notifications.try_recv().ok()).collect();
    let names: Vec<_> = sent.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["filing_started", "completed"]);
    assert_eq!(sent[1].body["scanned_pages"], 3);

    assert!(running.current().is_none());
    assert_eq!(subscriber.handler_count(), 0);

    h.app.on_stop().await;
    for scope in [LockScope::Background, LockScope::HomeApp] {
        assert_eq!(h.device.locks_acquired(scope.path()), 1);
        assert_eq!(h.device.locks_released(scope.path()), 1);
    }
}

#[tokio::test]
async fn scan_hand_off_to_stopped_background_fails_the_job() {
    let h = harness().await;
    h.app.on_stop().await;

    let subscriber = EventSubscriber::new(h.device.clone());
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut notifications = notifier.subscribe();
    let running = RunningScanJob::new();
    let hook = TaskDispatchingHook::new(h.dispatcher.clone(), UploadTask::TYPE, TaskPayload::new());
    let listener = Arc::new(ScanJobListener::new(
        h.device.clone(),
        notifier.clone(),
        running.clone(),
        Arc::new(hook),
    ));

    let job = ScanJob::start(
        h.device.as_ref(),
        &subscriber,
        &running,
        HOME_TOKEN,
        json!({}),
        listener,
    )
    .await
    .unwrap();

    let completed = json!({
        "event_class": "jobs",
        "event_name": "jobs_completed",
        "accesstoken": HOME_TOKEN,
        "job_status": {"job_id": job.id().as_str(), "status": "completed", "status_reason": "success"},
    });
    subscriber.handle_event(&completed).await;

    let failed = notifications.try_recv().unwrap();
    assert_eq!(failed.name, "failed");
    assert_eq!(failed.body["reason"], "communication_failed");
}
