//! Request materialization: method, headers and body derived from options.

use crate::error::BoxError;
use crate::options::RequestOptions;
use crate::url::{MethodModifier, RequestUrl};
use crate::{Error, Result};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type StreamFactory = Arc<dyn Fn() -> BoxStream<'static, std::result::Result<Bytes, BoxError>> + Send + Sync>;

/// A re-openable streaming body.
///
/// Every attempt opens a fresh stream, so retries resend the whole body.
#[derive(Clone)]
pub struct StreamBody {
    open: StreamFactory,
}

impl StreamBody {
    pub fn new<F>(open: F) -> Self
    where
        F: Fn() -> BoxStream<'static, std::result::Result<Bytes, BoxError>> + Send + Sync + 'static,
    {
        Self { open: Arc::new(open) }
    }

    pub fn open(&self) -> BoxStream<'static, std::result::Result<Bytes, BoxError>> {
        (self.open)()
    }
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamBody")
    }
}

/// A request body as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Serialized to a JSON string; `content-type` defaults to `application/json`.
    Json(Value),
    /// Sent verbatim.
    Text(String),
    /// Binary payload, passed through untouched.
    Bytes(Bytes),
    /// URL-encoded form pairs, encoded by the transport.
    Form(Vec<(String, String)>),
    /// Streaming payload; implies half-duplex unless set otherwise.
    Stream(StreamBody),
}

impl PartialEq for StreamBody {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.open, &other.open)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Bytes(value)
    }
}

/// A body ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Bytes(Bytes),
    Form(Vec<(String, String)>),
    Stream(StreamBody),
}

impl RequestBody {
    /// Returns the body text for text bodies.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Streaming mode for request bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// A materialized, ready-to-send request. One is created per attempt.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url: RequestUrl,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub signal: CancellationToken,
    pub duplex: Option<Duplex>,
    /// Zero for the first attempt, incremented on every retry.
    pub attempt: u32,
}

impl RequestContext {
    /// Returns a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// Method, headers and body derived from options.
#[derive(Debug, Clone)]
pub struct Materialized {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

/// Resolves the method: explicit option, then URL modifier, then `POST` if a
/// body is present, then `GET`.
pub fn resolve_method(url: &str, options: &RequestOptions) -> Method {
    if let Some(method) = &options.method {
        let upper = method.as_str().to_ascii_uppercase();
        return Method::from_bytes(upper.as_bytes()).unwrap_or_else(|_| method.clone());
    }
    if let Some(modifier) = MethodModifier::from_url(url) {
        return modifier.method();
    }
    if options.body.is_some() {
        Method::POST
    } else {
        Method::GET
    }
}

/// Builds the header map: caller headers, then the authorization header.
///
/// # Errors
///
/// Returns an error if the resolved credential is not a valid header value.
pub async fn build_headers(options: &RequestOptions) -> Result<HeaderMap> {
    let mut headers = options.headers.clone();
    if let Some(auth) = &options.auth {
        if let Some(value) = auth.header_value().await {
            let value = HeaderValue::try_from(value)
                .map_err(|e| Error::Configuration(format!("Invalid authorization header: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
    }
    Ok(headers)
}

/// Serializes the body, defaulting `content-type` for JSON payloads. A JSON
/// string is sent as-is.
///
/// # Errors
///
/// Returns an error if a JSON body cannot be serialized.
pub fn serialize_body(body: Option<&Body>, headers: &mut HeaderMap) -> Result<Option<RequestBody>> {
    let Some(body) = body else {
        return Ok(None);
    };
    let serialized = match body {
        // Strings are already serialized.
        Body::Json(Value::String(text)) => RequestBody::Text(text.clone()),
        Body::Json(value) => {
            let text = serde_json::to_string(value)
                .map_err(|e| Error::SerializationFailed(e.to_string()))?;
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            RequestBody::Text(text)
        }
        Body::Text(text) => RequestBody::Text(text.clone()),
        Body::Bytes(bytes) => RequestBody::Bytes(bytes.clone()),
        Body::Form(pairs) => RequestBody::Form(pairs.clone()),
        Body::Stream(stream) => RequestBody::Stream(stream.clone()),
    };
    Ok(Some(serialized))
}

/// Derives method, headers and body for one attempt.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use typed_fetch::request::{materialize, Body};
/// use typed_fetch::RequestOptions;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let options = RequestOptions::new().with_body(Body::Json(json!({"num": 42})));
/// let request = materialize("/echo", &options).await.unwrap();
/// assert_eq!(request.method, http::Method::POST);
/// assert_eq!(request.headers["content-type"], "application/json");
/// # }
/// ```
pub async fn materialize(url: &str, options: &RequestOptions) -> Result<Materialized> {
    let method = resolve_method(url, options);
    let mut headers = build_headers(options).await?;
    let body = serialize_body(options.body.as_ref(), &mut headers)?;
    Ok(Materialized {
        method,
        headers,
        body,
    })
}

/// Streaming bodies default to half-duplex.
pub(crate) fn default_duplex(body: Option<&RequestBody>, explicit: Option<Duplex>) -> Option<Duplex> {
    match (explicit, body) {
        (Some(duplex), _) => Some(duplex),
        (None, Some(RequestBody::Stream(_))) => Some(Duplex::Half),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Auth;
    use serde_json::json;

    #[test]
    fn test_method_resolution_order() {
        let explicit = RequestOptions::new()
            .with_method(Method::from_bytes(b"patch").unwrap())
            .with_body(Body::Json(json!({})));
        assert_eq!(resolve_method("@get/x", &explicit), Method::PATCH);

        let modifier = RequestOptions::new().with_body(Body::Json(json!({})));
        assert_eq!(resolve_method("@put/x", &modifier), Method::PUT);

        assert_eq!(resolve_method("/x", &modifier), Method::POST);
        assert_eq!(resolve_method("/x", &RequestOptions::new()), Method::GET);
        assert_eq!(resolve_method("@head/x", &RequestOptions::new()), Method::GET);
    }

    #[tokio::test]
    async fn test_json_body_sets_content_type() {
        let options = RequestOptions::new().with_body(Body::Json(json!({"num": 42})));
        let request = materialize("/echo", &options).await.unwrap();
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");
        assert_eq!(request.body, Some(RequestBody::Text(r#"{"num":42}"#.to_string())));
    }

    #[tokio::test]
    async fn test_explicit_content_type_is_kept() {
        let options = RequestOptions::new()
            .with_header("content-type", "application/vnd.api+json")
            .unwrap()
            .with_body(Body::Json(json!([1, 2])));
        let request = materialize("/echo", &options).await.unwrap();
        assert_eq!(request.headers[CONTENT_TYPE], "application/vnd.api+json");
        assert_eq!(request.body.unwrap().as_text(), Some("[1,2]"));
    }

    #[tokio::test]
    async fn test_binary_and_text_bodies_pass_through() {
        let options = RequestOptions::new().with_body(Body::Bytes(Bytes::from_static(b"\x00\x01")));
        let request = materialize("/upload", &options).await.unwrap();
        assert!(!request.headers.contains_key(CONTENT_TYPE));
        assert_eq!(request.body, Some(RequestBody::Bytes(Bytes::from_static(b"\x00\x01"))));

        let options = RequestOptions::new().with_body(Body::from("raw"));
        let request = materialize("/upload", &options).await.unwrap();
        assert_eq!(request.body, Some(RequestBody::Text("raw".into())));
    }

    #[tokio::test]
    async fn test_json_string_is_sent_verbatim() {
        let options = RequestOptions::new().with_json(&"hello").unwrap();
        let request = materialize("/echo", &options).await.unwrap();
        assert_eq!(request.method, Method::POST);
        assert!(!request.headers.contains_key(CONTENT_TYPE));
        assert_eq!(request.body, Some(RequestBody::Text("hello".into())));
    }

    #[tokio::test]
    async fn test_auth_overlays_headers() {
        let options = RequestOptions::new()
            .with_header("authorization", "stale")
            .unwrap()
            .with_auth(Auth::bearer("fresh"));
        let request = materialize("/me", &options).await.unwrap();
        assert_eq!(request.headers[AUTHORIZATION], "Bearer fresh");

        let anonymous = RequestOptions::new().with_auth(Auth::bearer(""));
        let request = materialize("/me", &anonymous).await.unwrap();
        assert!(!request.headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn test_stream_defaults_to_half_duplex() {
        let stream = RequestBody::Stream(StreamBody::new(|| Box::pin(futures_util::stream::empty())));
        assert_eq!(default_duplex(Some(&stream), None), Some(Duplex::Half));
        assert_eq!(default_duplex(Some(&stream), Some(Duplex::Full)), Some(Duplex::Full));
        assert_eq!(default_duplex(None, None), None);
    }
}
