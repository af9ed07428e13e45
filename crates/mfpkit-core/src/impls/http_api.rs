//! HttpDeviceApi - 実機の REST API クライアント (reqwest)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::DeviceSettings;
use crate::domain::{ApiErrorDetail, WebApiError};
use crate::ports::{DeviceApi, HttpMethod};

/// Header the device framework reads the session access token from.
pub const ACCESS_TOKEN_HEADER: &str = "X-WebAPI-AccessToken";

pub struct HttpDeviceApi {
    client: Client,
    base_url: String,
}

impl HttpDeviceApi {
    pub fn new(settings: &DeviceSettings) -> Result<Self, WebApiError> {
        Self::with_timeout(&settings.base_url, settings.request_timeout())
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, WebApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| WebApiError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Flattens a JSON object into query pairs; strings are sent unquoted.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Some(object) = params.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Pulls the `errors` array out of an error body; unknown shapes yield an empty list.
fn error_details(body: &str) -> Vec<ApiErrorDetail> {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("errors").cloned())
        .and_then(|errors| serde_json::from_value(errors).ok())
        .unwrap_or_default()
}

#[async_trait]
impl DeviceApi for HttpDeviceApi {
    async fn request(
        &self,
        http_method: HttpMethod,
        path: &str,
        api_token: &str,
        params: Option<Value>,
    ) -> Result<Value, WebApiError> {
        let url = self.url(path);
        let mut builder = self
            .client
            .request(method(http_method), &url)
            .header(ACCESS_TOKEN_HEADER, api_token);

        if let Some(params) = params {
            builder = if http_method.uses_query() {
                builder.query(&query_pairs(&params))
            } else {
                builder.json(&params)
            };
        }

        debug!(method = ?http_method, %url, "device api request");
        let response = builder
            .send()
            .await
            .map_err(|e| WebApiError::Http(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| WebApiError::Http(e.to_string()))?;

        if status.as_u16() >= 400 {
            return Err(WebApiError::Api {
                status: status.as_u16(),
                errors: error_details(&text),
            });
        }

        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&text).map_err(|e| WebApiError::Decode(e.to_string()))
    }
}
