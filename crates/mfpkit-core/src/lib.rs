//! mfpkit-core
//!
//! Background task dispatch for MFP embedded apps: a foreground session hands
//! work to the background process over the device's communication channel, and
//! the background runs it on a worker pool while holding the session lock.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task attributes/payload, envelope, job events, reasons, errors）
//! - **ports**: 抽象化レイヤー（DeviceApi, ClientNotifier, ChannelEndpoint, Clock）
//! - **typed**: 型付き Task API（Task trait, DynTask, TaskRegistry, EnvelopeCodec）
//! - **comm**: フォアグラウンド側（ChannelRegistry, CommunicationClient, SessionLock, Dispatcher）
//! - **app**: バックグラウンド側（BackgroundApp, AppBuilder, WorkerHost, CommunicationServer）
//! - **events**: イベントストリームの購読
//! - **jobs**: デバイスジョブ（job 開始, AppJobListener, スキャン状態機械）
//! - **impls**: 実装（HttpDeviceApi, 開発用 InMemoryDeviceApi, BroadcastNotifier）
//! - **config** / **observability**: 設定と tracing

pub mod app;
pub mod comm;
pub mod config;
pub mod domain;
pub mod events;
pub mod impls;
pub mod jobs;
pub mod observability;
pub mod ports;
pub mod typed;
