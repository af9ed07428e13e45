//! App - バックグラウンドアプリ層
//!
//! # 主要コンポーネント
//! - **AppBuilder**: task 登録と handler のワイヤリング
//! - **BackgroundApp**: フレームワークからのコールバック（start/stop/event/request）と LifecycleHook
//! - **BackgroundRuntime**: TaskRegistry と稼働中の WorkerHost を持つ
//! - **WorkerHost / Worker**: 共有 FIFO キューを消費する常駐ワーカー、停止時の abort sweep
//! - **CommunicationServer**: handler_path でリクエストを振り分ける
//! - **TaskRequestHandler / TaskPayloadRequestHandler**: task を enqueue する組み込み handler

pub mod background;
pub mod builder;
pub mod handlers;
pub mod queue;
pub mod runtime;
pub mod server;
pub mod status;
pub mod worker;

// 主要な型を再エクスポート
pub use self::background::{BackgroundApp, LifecycleHook, NoopLifecycle};
pub use self::builder::{AppBuilder, BuildError};
pub use self::handlers::{TaskPayloadRequestHandler, TaskRequestHandler};
pub use self::queue::{QueueEntry, TaskQueue};
pub use self::runtime::BackgroundRuntime;
pub use self::server::{CommunicationServer, HandlerRegistry, RequestHandler};
pub use self::status::HostCounts;
pub use self::worker::{Worker, WorkerHost};
