//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpDeviceApi**: 実機の REST API (reqwest)
//! - **InMemoryDeviceApi**: 開発・テスト用のデバイスシミュレーション
//! - **BroadcastNotifier**: tokio broadcast によるクライアント通知

pub mod broadcast_notifier;
pub mod http_api;
pub mod memory_api;

pub use self::broadcast_notifier::BroadcastNotifier;
pub use self::http_api::{ACCESS_TOKEN_HEADER, HttpDeviceApi};
pub use self::memory_api::{InMemoryDeviceApi, RecordedCall};
