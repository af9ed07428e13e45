//! CommunicationServer - バックグラウンド側の通信チャネル
//!
//! Decodes a request blob, routes it by `handler_path` to a registered
//! [`RequestHandler`] and encodes the handler's result as a [`RemoteResponse`].
//! Handler failures travel back as `RemoteResponse::Err`; they never take the
//! server down.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::domain::{BackgroundError, CodecError, RemoteRequest, RemoteResponse, WebApiError};
use crate::ports::DeviceApi;
use crate::typed::{EnvelopeCodec, RegistryError};

const SERVER_PATH: &str = "/app/communication/server";

/// A handler for one `handler_path`.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles `body` on behalf of the session identified by `caller_token`.
    async fn handle_request(&self, caller_token: &str, body: Value)
    -> Result<Value, BackgroundError>;
}

/// Registry of handlers (handler_path -> handler).
///
/// Built during initialization, read-only afterwards.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        handler_path: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(handler_path) {
            return Err(RegistryError::HandlerAlreadyRegistered(handler_path.to_string()));
        }
        self.handlers.insert(handler_path.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, handler_path: &str) -> Option<&Arc<dyn RequestHandler>> {
        self.handlers.get(handler_path)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct CommunicationServer {
    api: Arc<dyn DeviceApi>,
    api_token: String,
    handlers: HandlerRegistry,
    opened: AtomicBool,
}

impl CommunicationServer {
    pub fn new(api: Arc<dyn DeviceApi>, api_token: impl Into<String>, handlers: HandlerRegistry) -> Self {
        Self {
            api,
            api_token: api_token.into(),
            handlers,
            opened: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Starts accepting channel requests from signed-in client sessions of this app.
    pub async fn open(&self) -> Result<(), WebApiError> {
        let body = json!({
            "is_different_address_allowed": false,
            "is_different_appid_allowed": false,
            "session_mode": "client",
        });
        self.api.post(SERVER_PATH, &self.api_token, Some(body)).await?;
        self.opened.store(true, Ordering::SeqCst);
        info!("app communication is opened on server side");
        Ok(())
    }

    /// Closes the server side. Closing a closed server only logs a warning.
    pub async fn close(&self) -> Result<(), WebApiError> {
        if !self.is_open() {
            warn!("app communication is already closed");
            return Ok(());
        }
        self.api.delete(SERVER_PATH, &self.api_token, None).await?;
        self.opened.store(false, Ordering::SeqCst);
        info!("app communication is closed on server side");
        Ok(())
    }

    /// Handles one request blob and returns the encoded response.
    ///
    /// Only an undecodable request is an `Err`: there is nothing to answer.
    pub async fn handle(&self, request_blob: &str, caller_token: &str) -> Result<String, CodecError> {
        let request: RemoteRequest = EnvelopeCodec::decode(request_blob)?;
        debug!(handler_path = %request.handler_path, "remote request is received");

        let response = match self.route(request, caller_token).await {
            Ok(value) => RemoteResponse::ok(value),
            Err(e) => {
                error!(kind = e.kind(), error = %e, "remote request failed");
                RemoteResponse::err(e.kind(), e.to_string())
            }
        };
        EnvelopeCodec::encode(&response)
    }

    async fn route(&self, request: RemoteRequest, caller_token: &str) -> Result<Value, BackgroundError> {
        let handler = self
            .handlers
            .get(&request.handler_path)
            .ok_or_else(|| BackgroundError::HandlerNotFound(request.handler_path.clone()))?;
        handler.handle_request(caller_token, request.body).await
    }
}
