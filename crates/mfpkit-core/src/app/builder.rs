//! AppBuilder - バックグラウンドアプリの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 組み込み handler と追加 handler の衝突を build 時に検出する

use std::sync::Arc;

use super::background::{BackgroundApp, LifecycleHook, NoopLifecycle};
use super::handlers::{TaskPayloadRequestHandler, TaskRequestHandler};
use super::runtime::BackgroundRuntime;
use super::server::{CommunicationServer, HandlerRegistry, RequestHandler};
use crate::config::BackgroundSettings;
use crate::domain::{TASK_HANDLER_PATH, TASK_PAYLOAD_HANDLER_PATH};
use crate::events::EventSubscriber;
use crate::ports::DeviceApi;
use crate::typed::{RegistryError, Task, TaskRegistry};

/// AppBuilder は BackgroundApp を構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .register::<UploadTask>()?
///     .expect_tasks(&["tasks.upload.UploadTask"])
///     .with_settings(settings.background.clone())
///     .build(api, &background_token)?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct AppBuilder {
    registry: TaskRegistry,
    expected_tasks: Option<Vec<String>>,
    settings: BackgroundSettings,
    handlers: Vec<(String, Arc<dyn RequestHandler>)>,
    lifecycle: Arc<dyn LifecycleHook>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            expected_tasks: None,
            settings: BackgroundSettings::default(),
            handlers: Vec::new(),
            lifecycle: Arc::new(NoopLifecycle),
        }
    }

    /// Task 型を登録
    pub fn register<T: Task>(mut self) -> Result<Self, RegistryError> {
        self.registry.register::<T>()?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_settings(mut self, settings: BackgroundSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Adds a request handler next to the two task handlers.
    pub fn handler(mut self, handler_path: &str, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.push((handler_path.to_string(), handler));
        self
    }

    /// Sets the hook called after start and stop.
    pub fn lifecycle(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.lifecycle = hook;
        self
    }

    /// Builds the app. Nothing is started until `on_start`.
    pub fn build(
        self,
        api: Arc<dyn DeviceApi>,
        api_token: &str,
    ) -> Result<Arc<BackgroundApp>, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered_types = self.registry.registered_types();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered_types.contains(x))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        let runtime = Arc::new(BackgroundRuntime::new(
            self.registry,
            api.clone(),
            self.settings,
        ));

        let mut handlers = HandlerRegistry::new();
        handlers.register(
            TASK_HANDLER_PATH,
            Arc::new(TaskRequestHandler::new(runtime.clone())),
        )?;
        handlers.register(
            TASK_PAYLOAD_HANDLER_PATH,
            Arc::new(TaskPayloadRequestHandler::new(runtime.clone())),
        )?;
        for (path, handler) in self.handlers {
            handlers.register(&path, handler)?;
        }

        let server = CommunicationServer::new(api.clone(), api_token, handlers);
        let subscriber = Arc::new(EventSubscriber::new(api));
        Ok(Arc::new(BackgroundApp::new(
            api_token.to_string(),
            runtime,
            server,
            subscriber,
            self.lifecycle,
        )))
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
