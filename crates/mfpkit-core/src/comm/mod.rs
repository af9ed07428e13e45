//! Comm - フォアグラウンド側の通信
//!
//! - **ChannelRegistry / CommunicationClient**: バックグラウンドへの接続と送信
//! - **Dispatcher**: task の送信
//! - **SessionLock**: デバイスセッションの保持
//! - **session**: 送信元セッションの locale

pub mod client;
pub mod dispatcher;
pub mod lock;
pub mod session;

pub use self::client::{ChannelRegistry, CommunicationClient};
pub use self::dispatcher::Dispatcher;
pub use self::lock::{LockScope, SessionLock};
pub use self::session::get_locale;
