//! The transport performing the actual network I/O.

use crate::request::{RequestBody, RequestContext};
use crate::response::Response;
use crate::{Error, Result};
use async_trait::async_trait;

/// Sends a materialized request and returns the buffered response.
///
/// The pipeline never does I/O itself; it hands every attempt to a
/// `Transport`. Cancellation is handled by the caller racing `send` against
/// the request's signal, so implementations need not watch it.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use http::{HeaderMap, StatusCode};
/// use typed_fetch::request::RequestContext;
/// use typed_fetch::response::Response;
/// use typed_fetch::{Result, Transport};
///
/// /// Answers every request with an empty JSON object.
/// struct Canned;
///
/// #[async_trait]
/// impl Transport for Canned {
///     async fn send(&self, _request: &RequestContext) -> Result<Response> {
///         Ok(Response::new(StatusCode::OK, HeaderMap::new(), "{}"))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestContext) -> Result<Response>;
}

/// The default transport, backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be built.
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    /// Wraps an existing, preconfigured `reqwest` client.
    pub fn from_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestContext) -> Result<Response> {
        let url = request.url.to_absolute()?;
        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        builder = match &request.body {
            None => builder,
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes.clone()),
            Some(RequestBody::Form(pairs)) => builder.form(pairs),
            Some(RequestBody::Stream(stream)) => builder.body(reqwest::Body::wrap_stream(stream.open())),
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Response::new(status, headers, body))
    }
}
