use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{Duration, sleep};
use tracing::info;

use mfpkit_core::app::AppBuilder;
use mfpkit_core::comm::{ChannelRegistry, Dispatcher};
use mfpkit_core::config::load_settings;
use mfpkit_core::domain::{TaskError, TaskPayload};
use mfpkit_core::events::EventSubscriber;
use mfpkit_core::impls::{BroadcastNotifier, InMemoryDeviceApi};
use mfpkit_core::jobs::scan::{RunningScanJob, ScanJob, ScanJobListener, TaskDispatchingHook};
use mfpkit_core::observability::init_tracing;
use mfpkit_core::ports::SystemClock;
use mfpkit_core::typed::{Task, TaskContext};

const BACKGROUND_TOKEN: &str = "background-token";
const HOME_TOKEN: &str = "home-token";

/// Runs a scripted scan-to-app job against the in-memory device and hands the
/// scanned document to a background task.
#[derive(Debug, Parser)]
#[command(name = "mfpkit", version)]
struct Args {
    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides background.worker_count
    #[arg(long)]
    workers: Option<usize>,

    /// Pages the simulated scan produces
    #[arg(long, default_value_t = 3)]
    pages: u64,

    /// Document name handed to the background task
    #[arg(long, default_value = "Sample")]
    document: String,

    /// Device reason reported at input processing completed (e.g. hard_disk_full)
    #[arg(long, default_value = "success")]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct FilePayload {
    document_name: String,
    dir_path: String,
}

/// バックグラウンドで動く task（スキャン結果のファイリング）
#[derive(Default, Serialize, Deserialize)]
struct FileScanTask;

#[async_trait]
impl Task for FileScanTask {
    const TYPE: &'static str = "tasks.filing.FileScanTask";

    async fn execute(&self, ctx: &TaskContext, payload: Option<&TaskPayload>) -> Result<(), TaskError> {
        let payload: FilePayload = payload
            .ok_or_else(|| TaskError::new("payload is required"))?
            .decode()
            .map_err(|e| TaskError::new(format!("payload decode: {e}")))?;

        sleep(Duration::from_millis(100)).await;
        println!(
            "filed \"{}\" from {} (locale={})",
            payload.document_name,
            payload.dir_path,
            ctx.locale()
        );
        Ok(())
    }

    async fn on_aborted(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        println!("filing aborted (dispatched_at={})", ctx.dispatched_at());
        Ok(())
    }
}

fn job_event(job: &ScanJob, name: &str, status: &str, reason: &str, pages: u64) -> String {
    json!({
        "event_class": "jobs",
        "event_name": name,
        "accesstoken": HOME_TOKEN,
        "page_num": pages,
        "job_status": {"job_id": job.id().as_str(), "status": status, "status_reason": reason},
        "page_scanned_result": {"total_pages": pages, "omitted_blank_pages": 0},
    })
    .to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // (A) 設定とログ
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        settings.background.worker_count = workers;
    }
    init_tracing(&settings.logging);

    // (B) バックグラウンドアプリを起動（デバイスはシミュレーション）
    let device = Arc::new(InMemoryDeviceApi::with_display_language("en-us"));
    let app = AppBuilder::new()
        .register::<FileScanTask>()?
        .expect_tasks(&[FileScanTask::TYPE])
        .with_settings(settings.background.clone())
        .build(device.clone(), BACKGROUND_TOKEN)?;
    device.set_endpoint(app.clone());
    app.on_start().await;

    // (C) フォアグラウンド側: 通知の購読とスキャンジョブの開始
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut notifications = notifier.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(n) = notifications.recv().await {
            println!("client <- {}/{} {}", n.event_type, n.name, n.body);
        }
    });

    let channels = Arc::new(ChannelRegistry::new(device.clone(), settings.communication.clone()));
    let dispatcher = Dispatcher::new(channels, Arc::new(SystemClock));
    let hook = TaskDispatchingHook::new(
        dispatcher,
        FileScanTask::TYPE,
        TaskPayload::new()
            .with("document_name", args.document.as_str())
            .with("dir_path", "/scan/0001"),
    );

    let subscriber = EventSubscriber::new(device.clone());
    let running = RunningScanJob::new();
    let listener = Arc::new(ScanJobListener::new(
        device.clone(),
        notifier.clone(),
        running.clone(),
        Arc::new(hook),
    ));
    let job = ScanJob::start(
        device.as_ref(),
        &subscriber,
        &running,
        HOME_TOKEN,
        json!({"auto_adjust": true, "auto_event": false}),
        listener,
    )
    .await?;
    info!(job_id = %job.id(), "scan job is started");

    // (D) デバイスのイベントを流す
    for page in 1..=args.pages {
        subscriber
            .handle_raw(&job_event(&job, "jobs_page_scanned", "processing", "", page))
            .await;
    }
    subscriber
        .handle_raw(&job_event(
            &job,
            "jobs_input_processing_completed",
            "processing",
            &args.reason,
            args.pages,
        ))
        .await;
    let terminal_reason = if args.reason == "success" { "success" } else { "fatal_error" };
    subscriber
        .handle_raw(&job_event(&job, "jobs_completed", "completed", terminal_reason, args.pages))
        .await;

    // (E) バックグラウンドの task が終わるのをポーリングで待つ
    loop {
        match app.runtime().counts().await {
            Some(counts) if counts.queued + counts.running > 0 => {
                sleep(Duration::from_millis(50)).await;
            }
            counts => {
                println!("host counts: {counts:?}");
                break;
            }
        }
    }

    // (F) 停止。ロックが全て解放されていることを確認する
    app.on_stop().await;
    println!("active locks after stop: {:?}", device.active_locks());

    drop(notifier);
    printer.abort();
    Ok(())
}
