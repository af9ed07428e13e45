//! CommunicationClient - フォアグラウンド側の通信チャネル
//!
//! # フロー
//! 1. `ChannelRegistry::connect` がトークンごとの接続をキャッシュから返す（なければ開く）
//! 2. `CommunicationClient::request` が envelope を送って応答を待つ
//! 3. 接続が古くなっていたら（stale error）一度だけ張り直して同じリクエストを再送
//!
//! # 学習ポイント
//! - `tokio::time::timeout` で mutex 取得待ちに上限を付ける
//! - connect / refresh / 張り直しは同じ gate mutex を通るので、同時に二本の接続が開かれない

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::CommunicationSettings;
use crate::domain::errors::APP_SERVER_ACCESS_ERROR;
use crate::domain::{CommunicationError, RemoteRequest, RemoteResponse};
use crate::ports::DeviceApi;
use crate::ports::device_api::response_str;
use crate::typed::EnvelopeCodec;

pub(crate) const OPEN_PATH: &str = "/app/communication/client";

fn connection_path(connection_id: &str) -> String {
    format!("{OPEN_PATH}/{connection_id}")
}

/// Opens a new logical connection to the background app.
async fn establish_connection(
    api: &dyn DeviceApi,
    api_token: &str,
) -> Result<String, CommunicationError> {
    let body = json!({
        // デバイス側の仕様で固定値
        "address": "localhost",
        "app_id": "",
    });
    let response = match api.post(OPEN_PATH, api_token, Some(body)).await {
        Ok(response) => response,
        Err(e) if e.error_name() == Some(APP_SERVER_ACCESS_ERROR) => {
            return Err(CommunicationError::BackgroundUnreachable);
        }
        Err(e) => return Err(e.into()),
    };
    Ok(response_str(&response, "connection_id")?)
}

/// Serializes every attempt to open a connection.
///
/// Shared by the registry and the clients it hands out; waiting is bounded by
/// `connect_wait`.
#[derive(Clone)]
struct ConnectGate {
    lock: Arc<Mutex<()>>,
    wait: Duration,
}

impl ConnectGate {
    async fn enter(&self) -> Result<MutexGuard<'_, ()>, CommunicationError> {
        tokio::time::timeout(self.wait, self.lock.lock())
            .await
            .map_err(|_| CommunicationError::ConnectionBusy(self.wait))
    }
}

/// ChannelRegistry はプロセス内で共有される接続キャッシュ
///
/// One cached client at a time, keyed by access token. A different token or
/// `refresh` replaces it.
pub struct ChannelRegistry {
    api: Arc<dyn DeviceApi>,
    settings: CommunicationSettings,
    gate: ConnectGate,
    cached: StdMutex<Option<Arc<CommunicationClient>>>,
}

impl ChannelRegistry {
    pub fn new(api: Arc<dyn DeviceApi>, settings: CommunicationSettings) -> Self {
        let gate = ConnectGate {
            lock: Arc::new(Mutex::new(())),
            wait: settings.connect_wait(),
        };
        Self {
            api,
            settings,
            gate,
            cached: StdMutex::new(None),
        }
    }

    pub fn api(&self) -> &Arc<dyn DeviceApi> {
        &self.api
    }

    /// Returns the cached client for `api_token`, or opens a new connection.
    ///
    /// Waiting for the connect gate is bounded by `connect_wait`; running out
    /// of time is [`CommunicationError::ConnectionBusy`].
    pub async fn connect(
        &self,
        api_token: &str,
        refresh: bool,
    ) -> Result<Arc<CommunicationClient>, CommunicationError> {
        let _gate = self.gate.enter().await?;

        let cached = self.cached().clone();
        if !refresh
            && let Some(client) = cached
            && client.api_token == api_token
        {
            info!("existing connection is used for app communication");
            return Ok(client);
        }

        let connection_id = establish_connection(self.api.as_ref(), api_token).await?;
        warn!(%connection_id, "app communication is established");

        let client = Arc::new(CommunicationClient {
            api: self.api.clone(),
            api_token: api_token.to_string(),
            connection_id: Mutex::new(connection_id),
            retry_count: self.settings.retry_count,
            gate: self.gate.clone(),
        });
        *self.cached() = Some(client.clone());
        Ok(client)
    }

    fn cached(&self) -> std::sync::MutexGuard<'_, Option<Arc<CommunicationClient>>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct CommunicationClient {
    api: Arc<dyn DeviceApi>,
    api_token: String,
    connection_id: Mutex<String>,
    retry_count: u32,
    gate: ConnectGate,
}

impl std::fmt::Debug for CommunicationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationClient")
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}

impl CommunicationClient {
    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    pub async fn connection_id(&self) -> String {
        self.connection_id.lock().await.clone()
    }

    /// Sends one request to the background handler at `handler_path`.
    ///
    /// A stale-connection error re-opens the connection (through the registry's
    /// connect gate) and resends the same blob while attempts remain
    /// (`retry_count + 1` in total). Other device errors propagate at once.
    pub async fn request(
        &self,
        handler_path: &str,
        body: Value,
    ) -> Result<Value, CommunicationError> {
        let blob = EnvelopeCodec::encode(&RemoteRequest::new(handler_path, body))?;
        let attempts = self.retry_count + 1;

        let mut connection_id = self.connection_id.lock().await;
        let mut response = None;
        for attempt in 1..=attempts {
            let sent = self
                .api
                .post(
                    &connection_path(&connection_id),
                    &self.api_token,
                    Some(json!({ "data": blob })),
                )
                .await;
            match sent {
                Ok(r) => {
                    response = Some(r);
                    break;
                }
                Err(e) if e.is_stale_connection() => {
                    warn!(
                        attempt,
                        error = e.error_name().unwrap_or_default(),
                        "app communication is not available"
                    );
                }
                Err(e) => return Err(e.into()),
            }

            if attempt < attempts {
                let _gate = self.gate.enter().await?;
                *connection_id = establish_connection(self.api.as_ref(), &self.api_token).await?;
                warn!(connection_id = %*connection_id, "app communication is re-opened");
            }
        }
        drop(connection_id);

        let response = response.ok_or(CommunicationError::Unavailable)?;
        info!(handler_path, "request is sent via app communication and answered");

        let data = response_str(&response, "data")?;
        match EnvelopeCodec::decode::<RemoteResponse>(&data)? {
            RemoteResponse::Ok { value } => Ok(value),
            RemoteResponse::Err { kind, message } => {
                Err(CommunicationError::Remote { kind, message })
            }
        }
    }
}
