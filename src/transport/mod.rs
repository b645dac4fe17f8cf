pub mod http_client;
pub mod path;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

pub use http_client::ReqwestTransport;

/// How a request relates to the stored session.
///
/// Both flags are explicit so no call site relies on an implicit default:
/// build options through [`RequestOptions::private`], [`RequestOptions::public`]
/// or [`RequestOptions::hybrid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub requires_auth: bool,
    pub send_auth_if_present: bool,
}

impl RequestOptions {
    /// Auth required; a 401 enters the renewal protocol.
    pub const fn private() -> Self {
        Self {
            requires_auth: true,
            send_auth_if_present: false,
        }
    }

    /// Never carries a credential; a 401 is forwarded.
    pub const fn public() -> Self {
        Self {
            requires_auth: false,
            send_auth_if_present: false,
        }
    }

    /// Carries the access token when one is stored; a 401 is forwarded.
    pub const fn hybrid() -> Self {
        Self {
            requires_auth: false,
            send_auth_if_present: true,
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::private()
    }
}

/// One outgoing call as issued by application code.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub options: RequestOptions,
    /// Set once the request has been replayed after a renewal. A retried
    /// request is never replayed again.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            options: RequestOptions::private(),
            retried: false,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// A fully resolved request, ready for the wire.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Decoded JSON body; `Value::Null` when empty, `Value::String` when the
    /// server answered with something that is not JSON.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure before any HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Sends prepared requests to the backend.
///
/// The gateway holds no I/O of its own; every network suspension point goes
/// through this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: PreparedRequest) -> Result<ApiResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_private() {
        let options = RequestOptions::default();
        assert!(options.requires_auth);
        assert!(!options.send_auth_if_present);
        assert_eq!(ApiRequest::new(Method::GET, "/x").options, RequestOptions::private());
    }

    #[test]
    fn test_success_range() {
        assert!(ApiResponse::new(200, Value::Null).is_success());
        assert!(ApiResponse::new(204, Value::Null).is_success());
        assert!(!ApiResponse::new(301, Value::Null).is_success());
        assert!(!ApiResponse::new(401, Value::Null).is_success());
    }
}
