//! BroadcastNotifier - クライアント通知の配信 (tokio broadcast)
//!
//! The client UI side (SSE endpoint, panel bridge, tests) subscribes and filters
//! by `api_token`.

use tokio::sync::broadcast;
use tracing::debug;

use crate::ports::{ClientNotification, ClientNotifier};

pub struct BroadcastNotifier {
    sender: broadcast::Sender<ClientNotification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientNotification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ClientNotifier for BroadcastNotifier {
    fn notify(&self, notification: ClientNotification) {
        let name = notification.name.clone();
        if self.sender.send(notification).is_err() {
            // 受信者がいない場合は捨てる
            debug!(name, "client notification dropped, nobody is listening");
        }
    }
}
