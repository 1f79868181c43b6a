use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::Value;

use crate::sync::error::TransportError;

/// JSON request/response channel to the mindmap server.
///
/// Implementations return the unwrapped payload: any `{code, data, message}`
/// envelope is already removed. Paths are relative to the API base URL.
pub trait Transport: Send + Sync {
    fn request<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<Value>,
    ) -> BoxFuture<'a, Result<Value, TransportError>>;
}
