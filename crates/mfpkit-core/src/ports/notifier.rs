//! ClientNotifier port - クライアント UI へのプッシュ通知

use serde::Serialize;
use serde_json::Value;

/// One push message for the client UI of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientNotification {
    #[serde(skip)]
    pub api_token: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub name: String,
    pub body: Value,
}

/// Delivers notifications to the client side of a session.
///
/// Delivery is fire-and-forget: a notifier logs its own failures.
pub trait ClientNotifier: Send + Sync {
    fn notify(&self, notification: ClientNotification);
}
