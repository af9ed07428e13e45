//! BackgroundApp - バックグラウンドプロセスのエントリポイント
//!
//! The device framework drives the background process through these callbacks:
//!
//! | callback                | 処理                                          |
//! |-------------------------|-----------------------------------------------|
//! | `on_start`              | worker host を起動し、通信サーバーを開く、`LifecycleHook::on_started` |
//! | `on_stop`               | 通信サーバーを閉じ、worker host を停止する、`LifecycleHook::on_stopped` |
//! | `on_event`              | 生イベントを EventSubscriber に渡す              |
//! | `on_requested`          | チャネルのリクエストを処理して応答 blob を返す      |
//! | `on_connection_*`       | ログのみ                                        |
//!
//! No callback returns an error: failures are logged and the process keeps running.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::runtime::BackgroundRuntime;
use super::server::CommunicationServer;
use crate::events::EventSubscriber;
use crate::ports::ChannelEndpoint;

/// Extension points for application code around start and stop.
///
/// `on_started` runs only when the worker host and the communication server are
/// both up. `on_stopped` runs after every `on_stop`.
#[async_trait]
pub trait LifecycleHook: Send + Sync + 'static {
    async fn on_started(&self, _app: &BackgroundApp) {}

    async fn on_stopped(&self, _app: &BackgroundApp) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycle;

impl LifecycleHook for NoopLifecycle {}

pub struct BackgroundApp {
    api_token: String,
    runtime: Arc<BackgroundRuntime>,
    server: CommunicationServer,
    subscriber: Arc<EventSubscriber>,
    lifecycle: Arc<dyn LifecycleHook>,
}

impl BackgroundApp {
    pub(crate) fn new(
        api_token: String,
        runtime: Arc<BackgroundRuntime>,
        server: CommunicationServer,
        subscriber: Arc<EventSubscriber>,
        lifecycle: Arc<dyn LifecycleHook>,
    ) -> Self {
        Self {
            api_token,
            runtime,
            server,
            subscriber,
            lifecycle,
        }
    }

    /// Access token the framework gave the background process.
    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    pub fn runtime(&self) -> &Arc<BackgroundRuntime> {
        &self.runtime
    }

    pub fn server(&self) -> &CommunicationServer {
        &self.server
    }

    pub fn subscriber(&self) -> &Arc<EventSubscriber> {
        &self.subscriber
    }

    pub async fn on_start(&self) {
        warn!("background app is started");

        match self.runtime.start_host().await {
            Ok(host) => info!(host_id = %host.id(), workers = host.worker_count(), "worker host is started"),
            Err(e) => {
                error!(error = %e, "worker host cannot be started");
                return;
            }
        }
        if let Err(e) = self.server.open().await {
            error!(error = %e, "app communication cannot be opened");
            return;
        }
        self.lifecycle.on_started(self).await;
    }

    pub async fn on_stop(&self) {
        info!("background app is stopped");

        if let Err(e) = self.server.close().await {
            error!(error = %e, "app communication cannot be closed");
        }
        match self.runtime.stop_host().await {
            Ok(aborted) => info!(aborted, "worker host is terminated"),
            Err(e) => error!(error = %e, "worker host cannot be terminated"),
        }
        self.lifecycle.on_stopped(self).await;
    }

    pub async fn on_event(&self, raw_event: &str) {
        debug!("app job event occurs");
        self.subscriber.handle_raw(raw_event).await;
    }

    pub fn on_connection_opened(&self, caller_token: &str, _event: &Value) {
        debug!(caller_token, "app communication is opened from client side");
    }

    /// Handles `{"app_server_request": {"data": <blob>}}` and returns the response blob.
    pub async fn on_requested(&self, caller_token: &str, event: &Value) -> Option<String> {
        debug!("app communication is requested from client side");

        let Some(data) = event
            .get("app_server_request")
            .and_then(|r| r.get("data"))
            .and_then(Value::as_str)
        else {
            error!("app_server_request.data is not found in request");
            return None;
        };
        self.deliver(caller_token, data).await
    }

    pub fn on_connection_closed(&self, caller_token: &str, _event: &Value) {
        debug!(caller_token, "app communication is closed from client side");
    }
}

#[async_trait]
impl ChannelEndpoint for BackgroundApp {
    async fn deliver(&self, caller_token: &str, data: &str) -> Option<String> {
        match self.server.handle(data, caller_token).await {
            Ok(response) => Some(response),
            Err(e) => {
                error!(error = %e, "request data cannot be decoded");
                None
            }
        }
    }
}
