//! DeviceApi port - デバイス Web API の抽象化
//!
//! Every device call goes through this trait: session locks, the communication
//! channel endpoints, session lookup, event subscription and job start.
//!
//! # 実装
//! - `HttpDeviceApi`: reqwest で実機の REST API を叩く
//! - `InMemoryDeviceApi`: 開発・テスト用のシミュレーション

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::WebApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// GET and DELETE carry their parameters as query strings, the rest as a JSON body.
    pub fn uses_query(&self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }
}

/// DeviceApi は access token 付きでデバイスの API を呼び出す
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Sends one request and returns the decoded JSON body.
    ///
    /// `params` is the query for GET/DELETE and the body otherwise.
    /// HTTP statuses >= 400 come back as [`WebApiError::Api`].
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        api_token: &str,
        params: Option<Value>,
    ) -> Result<Value, WebApiError>;

    async fn get(&self, path: &str, api_token: &str) -> Result<Value, WebApiError> {
        self.request(HttpMethod::Get, path, api_token, None).await
    }

    async fn post(
        &self,
        path: &str,
        api_token: &str,
        body: Option<Value>,
    ) -> Result<Value, WebApiError> {
        self.request(HttpMethod::Post, path, api_token, body).await
    }

    async fn delete(
        &self,
        path: &str,
        api_token: &str,
        query: Option<Value>,
    ) -> Result<Value, WebApiError> {
        self.request(HttpMethod::Delete, path, api_token, query).await
    }
}

/// Reads a string field out of a device response.
pub(crate) fn response_str(response: &Value, key: &str) -> Result<String, WebApiError> {
    match response.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(WebApiError::Decode(format!("response does not carry \"{key}\""))),
    }
}
