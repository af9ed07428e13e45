//! ChannelEndpoint port - 通信チャネルの受信側
//!
//! The device framework forwards data posted on a client connection to the
//! background app that opened the server side. `BackgroundApp` implements this;
//! device adapters that simulate the framework call it.

use async_trait::async_trait;

#[async_trait]
pub trait ChannelEndpoint: Send + Sync {
    /// Handles one request blob from `caller_token`'s session.
    ///
    /// `None` means the request could not be answered.
    async fn deliver(&self, caller_token: &str, data: &str) -> Option<String>;
}
