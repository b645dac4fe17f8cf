use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::transport::{ApiResponse, PreparedRequest, Transport, TransportError};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(default_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(default_timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("building http client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn build_headers(bearer: Option<&str>, request_id: &str) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        REQUEST_ID_HEADER,
        HeaderValue::from_str(request_id)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
    );

    if let Some(token) = bearer {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| {
                TransportError::InvalidRequest("token is not a valid header value".into())
            })?;
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

fn map_send_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Empty bodies decode to `Null`; bodies that are not JSON are kept verbatim
/// as a string so error details still reach the caller.
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: PreparedRequest) -> Result<ApiResponse, TransportError> {
        let request_id = Uuid::new_v4().to_string();
        let headers = build_headers(request.bearer.as_deref(), &request_id)?;

        trace!(
            method = %request.method,
            url = %request.url,
            request_id = %request_id,
            authenticated = request.bearer.is_some(),
            timeout_secs = request.timeout.as_secs(),
            "sending request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout)
            .headers(headers);

        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| TransportError::InvalidRequest(format!("serialize json body: {e}")))?;
            builder = builder.header(CONTENT_TYPE, "application/json").body(bytes);
        }

        let resp = builder.send().await.map_err(map_send_error)?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(map_send_error)?;

        debug!(
            method = %request.method,
            url = %request.url,
            request_id = %request_id,
            status_code = status,
            "received response"
        );

        Ok(ApiResponse::new(status, decode_body(&text)))
    }
}
