use futures::future::BoxFuture;
use reqwest::{Method, Response};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

use crate::sync::error::TransportError;
use crate::sync::transport::Transport;

/// reqwest-backed [`Transport`] for the mindmap REST API
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    auth_token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: RwLock::new(auth_token),
        })
    }

    /// Replace the bearer token used for subsequent requests
    pub fn set_auth_token(&self, token: Option<String>) {
        let mut guard = self.auth_token.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn bearer(&self) -> Option<String> {
        self.auth_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, TransportError> {
        let url = self.url(path);
        debug!(%method, %url, "Sending request");

        let mut request = self
            .client
            .request(method, &url)
            .header("Accept", "application/json");

        if let Some(token) = self.bearer() {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(from_reqwest)?;
        handle_response(response).await
    }
}

impl Transport for HttpTransport {
    fn request<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<Value>,
    ) -> BoxFuture<'a, Result<Value, TransportError>> {
        Box::pin(self.send(method, path, body))
    }
}

async fn handle_response(response: Response) -> Result<Value, TransportError> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("application/json"))
        .unwrap_or(false);

    let text = response.text().await.map_err(from_reqwest)?;

    if !status.is_success() {
        let message = error_message(&text).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        return Err(TransportError::status(status.as_u16(), message));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    if !is_json {
        return Ok(Value::String(text));
    }

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| TransportError::decode(format!("Invalid JSON response: {}", e)))?;
    unwrap_envelope(value)
}

/// Pull a human-readable message out of an error body
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "detail", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Strip the `{code, data, message}` envelope and the `{items}` list wrapper.
///
/// A non-zero envelope code is an application-level failure even on HTTP 200.
pub(crate) fn unwrap_envelope(value: Value) -> Result<Value, TransportError> {
    let is_envelope = value
        .as_object()
        .map(|obj| obj.contains_key("code") && (obj.contains_key("data") || obj.contains_key("message")))
        .unwrap_or(false);

    let payload = if is_envelope {
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 && code != 200 {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Request failed with code {}", code));
            let status = u16::try_from(code).unwrap_or(500);
            return Err(TransportError::status(status, message));
        }
        value.get("data").cloned().unwrap_or(Value::Null)
    } else {
        value
    };

    Ok(match payload {
        Value::Object(mut obj) if obj.get("items").map(Value::is_array).unwrap_or(false) => {
            obj.remove("items").unwrap_or(Value::Null)
        }
        other => other,
    })
}

fn from_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_decode() {
        TransportError::decode(err.to_string())
    } else if let Some(status) = err.status() {
        TransportError::status(status.as_u16(), err.to_string())
    } else {
        TransportError::network(err.to_string())
    }
}
