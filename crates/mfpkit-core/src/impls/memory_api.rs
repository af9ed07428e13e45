//! InMemoryDeviceApi - 開発・テスト用のデバイス API シミュレーション
//!
//! Simulates the part of the device framework the pipeline talks to:
//!
//! - communication server open/close and client connections
//! - channel delivery to a registered [`ChannelEndpoint`]
//! - session locks on both lock endpoints
//! - session lookup, event-stream subscription, job start (`WFID`)
//!
//! # 学習ポイント
//! - std Mutex で状態を守り、await の前に必ず guard を落とす
//! - 障害注入（fault injection）で retry / reconnect をテストする
//! - endpoint は Weak で持ち、循環参照を作らない

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::domain::WebApiError;
use crate::ports::{ChannelEndpoint, DeviceApi, HttpMethod};

const SERVER_PATH: &str = "/app/communication/server";
const CLIENT_PATH: &str = "/app/communication/client";
const LOCK_PATHS: [&str; 2] = ["/app/communication/server/lock", "/app/homeapp/lock"];
const SESSION_PATH: &str = "/session/current";
const SUBSCRIPTION_PREFIX: &str = "/subscription/eventstream/";
const JOBS_PREFIX: &str = "/jobs/";

struct Fault {
    method: HttpMethod,
    path_prefix: String,
    error: WebApiError,
    remaining: usize,
}

/// One recorded call: method and path.
pub type RecordedCall = (HttpMethod, String);

struct DeviceState {
    server_open: bool,
    next_id: u64,
    /// lock_id → lock path
    locks: HashMap<String, String>,
    acquired: HashMap<String, usize>,
    released: HashMap<String, usize>,
    connections: HashSet<String>,
    display_language: String,
    subscriptions: Vec<(String, Value)>,
    calls: Vec<RecordedCall>,
    faults: Vec<Fault>,
}

enum Route {
    Reply(Result<Value, WebApiError>),
    Deliver {
        endpoint: Arc<dyn ChannelEndpoint>,
        data: String,
    },
}

/// InMemoryDeviceApi は開発用のデバイス API
///
/// # 使用例
/// ```ignore
/// let device = Arc::new(InMemoryDeviceApi::new());
/// device.set_endpoint(background_app.clone());
/// device.inject_fault(HttpMethod::Post, "/app/communication/client/", "IllegalStateException", 1);
/// ```
pub struct InMemoryDeviceApi {
    state: Mutex<DeviceState>,
    endpoint: Mutex<Option<Weak<dyn ChannelEndpoint>>>,
}

impl InMemoryDeviceApi {
    pub fn new() -> Self {
        Self::with_display_language("en-US")
    }

    pub fn with_display_language(display_language: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(DeviceState {
                server_open: false,
                next_id: 1,
                locks: HashMap::new(),
                acquired: HashMap::new(),
                released: HashMap::new(),
                connections: HashSet::new(),
                display_language: display_language.into(),
                subscriptions: Vec::new(),
                calls: Vec::new(),
                faults: Vec::new(),
            }),
            endpoint: Mutex::new(None),
        }
    }

    /// Registers the background app that receives channel data.
    pub fn set_endpoint(&self, endpoint: Arc<dyn ChannelEndpoint>) {
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::downgrade(&endpoint));
    }

    /// Makes the next `times` matching calls fail with a device error named `name`.
    pub fn inject_fault(&self, method: HttpMethod, path_prefix: &str, name: &str, times: usize) {
        self.inject_error(
            method,
            path_prefix,
            WebApiError::api(400, name, format!("injected {name}")),
            times,
        );
    }

    pub fn inject_error(
        &self,
        method: HttpMethod,
        path_prefix: &str,
        error: WebApiError,
        times: usize,
    ) {
        self.state().faults.push(Fault {
            method,
            path_prefix: path_prefix.to_string(),
            error,
            remaining: times,
        });
    }

    /// Drops every open client connection, as the device does when the background restarts.
    pub fn expire_connections(&self) {
        self.state().connections.clear();
    }

    pub fn call_count(&self, method: HttpMethod, path_prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|(m, p)| *m == method && p.starts_with(path_prefix))
            .count()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn locks_acquired(&self, lock_path: &str) -> usize {
        self.state().acquired.get(lock_path).copied().unwrap_or(0)
    }

    pub fn locks_released(&self, lock_path: &str) -> usize {
        self.state().released.get(lock_path).copied().unwrap_or(0)
    }

    /// Lock ids that were acquired and not released yet.
    pub fn active_locks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().locks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn server_open(&self) -> bool {
        self.state().server_open
    }

    /// `(event_class, body)` of every event-stream subscription request.
    pub fn subscriptions(&self) -> Vec<(String, Value)> {
        self.state().subscriptions.clone()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self) -> Option<Arc<dyn ChannelEndpoint>> {
        self.endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn route(&self, method: HttpMethod, path: &str, params: Option<Value>) -> Route {
        let mut state = self.state();
        state.calls.push((method, path.to_string()));

        if let Some(fault) = state
            .faults
            .iter_mut()
            .find(|f| f.remaining > 0 && f.method == method && path.starts_with(&f.path_prefix))
        {
            fault.remaining -= 1;
            debug!(?method, path, "injected fault");
            return Route::Reply(Err(fault.error.clone()));
        }

        let reply = match (method, path) {
            (HttpMethod::Post, SERVER_PATH) => {
                state.server_open = true;
                Ok(json!({}))
            }
            (HttpMethod::Delete, SERVER_PATH) => {
                state.server_open = false;
                state.connections.clear();
                Ok(json!({}))
            }
            (HttpMethod::Post, p) if LOCK_PATHS.contains(&p) => {
                let lock_id = format!("lock-{}", state.next_id);
                state.next_id += 1;
                state.locks.insert(lock_id.clone(), p.to_string());
                *state.acquired.entry(p.to_string()).or_default() += 1;
                Ok(json!({ "lock_id": lock_id }))
            }
            (HttpMethod::Delete, p) if LOCK_PATHS.contains(&p) => {
                let lock_id = params
                    .as_ref()
                    .and_then(|v| v.get("lock_id"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match state.locks.remove(lock_id) {
                    Some(_) => {
                        *state.released.entry(p.to_string()).or_default() += 1;
                        Ok(json!({}))
                    }
                    None => Err(not_found(format!("lock {lock_id} does not exist"))),
                }
            }
            (HttpMethod::Post, CLIENT_PATH) => {
                if state.server_open {
                    let connection_id = format!("conn-{}", state.next_id);
                    state.next_id += 1;
                    state.connections.insert(connection_id.clone());
                    Ok(json!({ "connection_id": connection_id }))
                } else {
                    Err(WebApiError::api(
                        400,
                        "AppServerAccessException",
                        "background app does not accept connections",
                    ))
                }
            }
            (HttpMethod::Post, p) if p.starts_with(CLIENT_PATH) => {
                let connection_id = p.trim_start_matches(CLIENT_PATH).trim_start_matches('/');
                if !state.connections.contains(connection_id) {
                    Err(not_found(format!("connection {connection_id} does not exist")))
                } else {
                    let data = params
                        .as_ref()
                        .and_then(|v| v.get("data"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    drop(state);
                    return match self.endpoint() {
                        Some(endpoint) => Route::Deliver { endpoint, data },
                        None => Route::Reply(Err(WebApiError::api(
                            400,
                            "AppServerAccessException",
                            "background app is not running",
                        ))),
                    };
                }
            }
            (HttpMethod::Get, SESSION_PATH) => Ok(json!({
                "display_language": state.display_language,
                "login_user": { "name": "guest" },
            })),
            (HttpMethod::Post, p) if p.starts_with(SUBSCRIPTION_PREFIX) => {
                let event_class = p.trim_start_matches(SUBSCRIPTION_PREFIX).to_string();
                state
                    .subscriptions
                    .push((event_class, params.unwrap_or_else(|| json!({}))));
                Ok(json!({}))
            }
            (HttpMethod::Post, p) if p.starts_with(JOBS_PREFIX) => {
                let job_id = state.next_id;
                state.next_id += 1;
                Ok(json!({ "WFID": job_id }))
            }
            _ => Err(WebApiError::api(
                404,
                "NotFoundException",
                format!("{method:?} {path} is not simulated"),
            )),
        };
        Route::Reply(reply)
    }
}

impl Default for InMemoryDeviceApi {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(message: String) -> WebApiError {
    WebApiError::api(404, "DataNotFoundException", message)
}

#[async_trait]
impl DeviceApi for InMemoryDeviceApi {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        api_token: &str,
        params: Option<Value>,
    ) -> Result<Value, WebApiError> {
        match self.route(method, path, params) {
            Route::Reply(reply) => reply,
            Route::Deliver { endpoint, data } => match endpoint.deliver(api_token, &data).await {
                Some(blob) => Ok(json!({ "data": blob })),
                None => Err(WebApiError::api(
                    500,
                    "InternalServerError",
                    "background app did not answer",
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ChannelEndpoint for Echo {
        async fn deliver(&self, caller_token: &str, data: &str) -> Option<String> {
            Some(format!("{caller_token}:{data}"))
        }
    }

    #[tokio::test]
    async fn test_lock_bookkeeping() {
        let device = InMemoryDeviceApi::new();
        let path = LOCK_PATHS[0];

        let response = device.post(path, "t", None).await.unwrap();
        let lock_id = response["lock_id"].as_str().unwrap().to_string();
        assert_eq!(device.active_locks(), vec![lock_id.clone()]);

        device
            .delete(path, "t", Some(json!({ "lock_id": lock_id })))
            .await
            .unwrap();
        assert_eq!(device.locks_acquired(path), 1);
        assert_eq!(device.locks_released(path), 1);
        assert!(device.active_locks().is_empty());

        // 二重解放はデバイス側でエラーになる
        let err = device
            .delete(path, "t", Some(json!({ "lock_id": lock_id })))
            .await
            .unwrap_err();
        assert_eq!(err.error_name(), Some("DataNotFoundException"));
    }

    #[tokio::test]
    async fn test_client_requires_open_server() {
        let device = InMemoryDeviceApi::new();
        let err = device.post(CLIENT_PATH, "t", None).await.unwrap_err();
        assert_eq!(err.error_name(), Some("AppServerAccessException"));

        device.post(SERVER_PATH, "bg", None).await.unwrap();
        let response = device.post(CLIENT_PATH, "t", None).await.unwrap();
        assert!(response["connection_id"].is_string());
    }

    #[tokio::test]
    async fn test_channel_delivery() {
        let device = InMemoryDeviceApi::new();
        let endpoint: Arc<dyn ChannelEndpoint> = Arc::new(Echo);
        device.set_endpoint(endpoint.clone());
        device.post(SERVER_PATH, "bg", None).await.unwrap();
        let id = device.post(CLIENT_PATH, "t", None).await.unwrap()["connection_id"]
            .as_str()
            .unwrap()
            .to_string();

        let path = format!("{CLIENT_PATH}/{id}");
        let response = device
            .post(&path, "t", Some(json!({ "data": "blob" })))
            .await
            .unwrap();
        assert_eq!(response["data"], "t:blob");

        device.expire_connections();
        let err = device
            .post(&path, "t", Some(json!({ "data": "blob" })))
            .await
            .unwrap_err();
        assert!(err.is_stale_connection());
    }

    #[tokio::test]
    async fn test_faults_are_consumed() {
        let device = InMemoryDeviceApi::new();
        device.inject_fault(HttpMethod::Get, SESSION_PATH, "IllegalStateException", 1);

        assert!(device.get(SESSION_PATH, "t").await.is_err());
        let session = device.get(SESSION_PATH, "t").await.unwrap();
        assert_eq!(session["display_language"], "en-US");
        assert_eq!(device.call_count(HttpMethod::Get, SESSION_PATH), 2);
    }

    #[tokio::test]
    async fn test_job_start_returns_wfid() {
        let device = InMemoryDeviceApi::new();
        let first = device.post("/jobs/scan/scan_to_app", "t", None).await.unwrap();
        let second = device.post("/jobs/scan/scan_to_app", "t", None).await.unwrap();
        assert_ne!(first["WFID"], second["WFID"]);
    }
}
