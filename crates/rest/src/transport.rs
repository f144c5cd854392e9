//! HTTP transport seam
//!
//! The executor talks to the network only through [`HttpTransport`]. A
//! transport sends exactly one request and reports whatever status came
//! back; only I/O-level failures are errors. This keeps retry policy out of
//! the transport and lets tests script responses without sockets.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use reqwest::{Client, Method};
use stowage_core::{Error, HttpSettings, Result};
use tokio_util::io::{ReaderStream, StreamReader};
use url::Url;

use crate::body::RepeatableBody;
use crate::release::ReleasingBody;

/// Idle connections kept per host
const MAX_IDLE_CONNECTIONS: usize = 20;

/// One attempt at sending a request
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RepeatableBody>,
}

/// Status, headers and streaming body of a response
#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: ReleasingBody,
}

/// Sends a single HTTP request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request; non-2xx statuses are returned, not raised
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Transport backed by a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport from HTTP settings
    ///
    /// Redirects are not followed here; the executor handles them so that
    /// the request can be re-signed.
    pub fn new(settings: &HttpSettings, insecure: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .read_timeout(Duration::from_millis(settings.socket_timeout_ms))
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            if let Some(len) = body.content_length() {
                builder = builder.header(CONTENT_LENGTH, len);
            }
            builder = builder.body(reqwest::Body::wrap_stream(ReaderStream::new(body)));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request failed: {e}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let body = ReleasingBody::new(StreamReader::new(Box::pin(stream)), || {
            tracing::trace!("Released HTTP connection");
        });

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}
