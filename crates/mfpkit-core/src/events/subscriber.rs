//! EventSubscriber - デバイスイベントの購読とルーティング
//!
//! # フロー
//! 1. `subscribe(handler)`: `/subscription/eventstream/{event_class}` に購読を登録し、
//!    handler を保持する
//! 2. `handle_raw(event)`: 受け取った生イベントを parse し、
//!    (access token, event_class) が一致する handler 全てに渡す
//! 3. handler が [`Subscription::Cancel`] を返したら購読から外す
//!
//! Malformed events (not JSON, no `event_class`, no `accesstoken`) are logged and
//! dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::WebApiError;
use crate::ports::DeviceApi;

const SUBSCRIPTION_PATH: &str = "/subscription/eventstream";

/// What a handler wants after seeing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Keep,
    Cancel,
}

/// A receiver of device events for one session and event class.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Access token of the session whose events this handler receives.
    fn api_token(&self) -> &str;

    /// Event class, e.g. `jobs`.
    fn event_class(&self) -> &str;

    /// Event names to subscribe to. Empty means every event of the class.
    fn event_names(&self) -> Vec<String> {
        Vec::new()
    }

    async fn handle_event(&self, event: &Value) -> Subscription;
}

pub struct EventSubscriber {
    api: Arc<dyn DeviceApi>,
    handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
}

impl EventSubscriber {
    pub fn new(api: Arc<dyn DeviceApi>) -> Self {
        Self {
            api,
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Registers the subscription on the device, then starts routing events to `handler`.
    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> Result<(), WebApiError> {
        let path = format!("{SUBSCRIPTION_PATH}/{}", handler.event_class());
        let body = json!({ "event_names": handler.event_names() });
        self.api.post(&path, handler.api_token(), Some(body)).await?;

        debug!(event_class = handler.event_class(), "event handler is subscribed");
        self.handlers().push(handler);
        Ok(())
    }

    /// Stops routing events to `handler`. Unknown handlers are ignored.
    pub fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) {
        self.handlers().retain(|h| !Arc::ptr_eq(h, handler));
    }

    pub fn handler_count(&self) -> usize {
        self.handlers().len()
    }

    /// Entry point for raw event text delivered by the device.
    pub async fn handle_raw(&self, raw: &str) {
        match serde_json::from_str::<Value>(raw) {
            Ok(event) => self.handle_event(&event).await,
            Err(e) => warn!(error = %e, "event is not valid json"),
        }
    }

    pub async fn handle_event(&self, event: &Value) {
        let Some(event_class) = event.get("event_class").and_then(Value::as_str) else {
            warn!("event_class is not found in event");
            return;
        };
        let Some(api_token) = event.get("accesstoken").and_then(Value::as_str) else {
            warn!(event_class, "accesstoken is not found in event");
            return;
        };

        // handler の呼び出し中はロックを持たない（handler が subscribe できるように）
        let targets: Vec<Arc<dyn EventHandler>> = self
            .handlers()
            .iter()
            .filter(|h| h.api_token() == api_token && h.event_class() == event_class)
            .cloned()
            .collect();
        if targets.is_empty() {
            warn!(event_class, "no event handler is registered for event");
            return;
        }

        for handler in targets {
            if handler.handle_event(event).await == Subscription::Cancel {
                self.unsubscribe(&handler);
                debug!(event_class, "event handler is unsubscribed");
            }
        }
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<Arc<dyn EventHandler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryDeviceApi;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        token: String,
        seen: AtomicUsize,
        cancel_after: usize,
    }

    impl Counter {
        fn new(token: &str, cancel_after: usize) -> Arc<Self> {
            Arc::new(Self {
                token: token.to_string(),
                seen: AtomicUsize::new(0),
                cancel_after,
            })
        }
    }

    #[async_trait]
    impl EventHandler for Counter {
        fn api_token(&self) -> &str {
            &self.token
        }

        fn event_class(&self) -> &str {
            "jobs"
        }

        fn event_names(&self) -> Vec<String> {
            vec!["jobs_completed".to_string()]
        }

        async fn handle_event(&self, _event: &Value) -> Subscription {
            let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
            if seen >= self.cancel_after {
                Subscription::Cancel
            } else {
                Subscription::Keep
            }
        }
    }

    fn event(token: &str) -> String {
        json!({"event_class": "jobs", "accesstoken": token, "event_name": "jobs_completed"})
            .to_string()
    }

    #[tokio::test]
    async fn test_subscribe_posts_event_names() {
        let device = Arc::new(InMemoryDeviceApi::new());
        let subscriber = EventSubscriber::new(device.clone());

        subscriber.subscribe(Counter::new("t1", 1)).await.unwrap();

        assert_eq!(
            device.subscriptions(),
            vec![("jobs".to_string(), json!({"event_names": ["jobs_completed"]}))]
        );
        assert_eq!(subscriber.handler_count(), 1);
    }

    #[tokio::test]
    async fn test_routes_by_token_and_cancels() {
        let device = Arc::new(InMemoryDeviceApi::new());
        let subscriber = EventSubscriber::new(device);
        let mine = Counter::new("t1", 2);
        let other = Counter::new("t2", 10);
        subscriber.subscribe(mine.clone()).await.unwrap();
        subscriber.subscribe(other.clone()).await.unwrap();

        subscriber.handle_raw(&event("t1")).await;
        assert_eq!(subscriber.handler_count(), 2);
        subscriber.handle_raw(&event("t1")).await;
        assert_eq!(subscriber.handler_count(), 1);

        // 解除済みなので届かない
        subscriber.handle_raw(&event("t1")).await;
        assert_eq!(mine.seen.load(Ordering::SeqCst), 2);
        assert_eq!(other.seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_events_are_dropped() {
        let device = Arc::new(InMemoryDeviceApi::new());
        let subscriber = EventSubscriber::new(device);
        let handler = Counter::new("t1", 10);
        subscriber.subscribe(handler.clone()).await.unwrap();

        subscriber.handle_raw("not json").await;
        subscriber.handle_raw(&json!({"accesstoken": "t1"}).to_string()).await;
        subscriber.handle_raw(&json!({"event_class": "jobs"}).to_string()).await;

        assert_eq!(handler.seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_subscription_is_not_kept() {
        let device = Arc::new(InMemoryDeviceApi::new());
        device.inject_fault(
            crate::ports::HttpMethod::Post,
            SUBSCRIPTION_PATH,
            "InvalidAccessTokenException",
            1,
        );
        let subscriber = EventSubscriber::new(device);

        assert!(subscriber.subscribe(Counter::new("t1", 1)).await.is_err());
        assert_eq!(subscriber.handler_count(), 0);
    }
}
