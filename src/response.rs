//! Responses: the transport-level [`Response`], parsed [`ResponseData`], and
//! the [`FetchResponse`]/[`FetchResult`] values returned to callers.

use crate::error::{ErrorBody, ErrorPayload};
use crate::{Error, Result};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A response as returned by a [`Transport`](crate::Transport).
///
/// The body readers take `self`, so a response is read exactly once. Hooks
/// that want to look at the body without taking it from the pipeline work on
/// an explicit [`Clone`].
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.into(),
        }
    }

    /// Overrides the reason phrase.
    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    /// `true` for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Reads the body as UTF-8 text, replacing invalid sequences.
    pub fn text(self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Decodes the body as JSON into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] with the raw body if decoding
    /// fails.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::DeserializationFailed {
            raw_response: String::from_utf8_lossy(&self.body).into_owned(),
            serde_error: e.to_string(),
            status: self.status,
        })
    }
}

/// How a successful body is read, decided from `content-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Text,
    Blob,
}

const TEXT_TYPES: [&str; 4] = ["image/svg", "application/xml", "application/xhtml", "application/html"];

/// Detects the content kind of a response.
///
/// A missing `content-type` is treated as JSON. `application/json` and any
/// `application/<suffix>+json` are JSON, XML/HTML/SVG types and `text/*` are
/// text, everything else is a binary blob.
pub fn detect_content_kind(headers: &HeaderMap) -> ContentKind {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return ContentKind::Json;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if is_json_mime(&mime) {
        ContentKind::Json
    } else if mime.starts_with("text/") || TEXT_TYPES.iter().any(|t| mime.starts_with(t)) {
        ContentKind::Text
    } else {
        ContentKind::Blob
    }
}

fn is_json_mime(mime: &str) -> bool {
    let Some(subtype) = mime.strip_prefix("application/") else {
        return false;
    };
    if subtype == "json" {
        return true;
    }
    match subtype.strip_suffix("+json") {
        Some(prefix) => prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_!#$%&*.^`~-".contains(c)),
        None => false,
    }
}

/// A pluggable JSON parser applied to JSON and text bodies.
pub type JsonParser = Arc<dyn Fn(&str) -> serde_json::Result<Value> + Send + Sync>;

/// Parsed body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    Json(Value),
    Text(String),
    Binary(Bytes),
}

impl ResponseData {
    /// The data as a JSON value. Text is wrapped in a JSON string; binary
    /// data has no JSON form.
    pub fn as_value(&self) -> Option<Value> {
        match self {
            ResponseData::Json(value) => Some(value.clone()),
            ResponseData::Text(text) => Some(Value::String(text.clone())),
            ResponseData::Binary(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseData::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseData::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Reads a successful body according to its content kind.
///
/// With no custom parser, text that is not valid JSON is kept as text. A
/// custom parser's failure is an error.
pub(crate) fn parse_body(response: Response, parser: Option<&JsonParser>) -> Result<ResponseData> {
    match detect_content_kind(response.headers()) {
        ContentKind::Blob => Ok(ResponseData::Binary(response.bytes())),
        ContentKind::Json | ContentKind::Text => {
            let status = response.status();
            let text = response.text();
            match parser {
                Some(parse) => parse(&text)
                    .map(ResponseData::Json)
                    .map_err(|e| Error::DeserializationFailed {
                        raw_response: text,
                        serde_error: e.to_string(),
                        status,
                    }),
                None => Ok(match serde_json::from_str(&text) {
                    Ok(value) => ResponseData::Json(value),
                    Err(_) => ResponseData::Text(text),
                }),
            }
        }
    }
}

/// Reads a failed body: JSON when it parses, text otherwise.
pub(crate) fn parse_error_body(text: String, parser: Option<&JsonParser>) -> ErrorBody {
    let parsed = match parser {
        Some(parse) => parse(&text),
        None => serde_json::from_str(&text),
    };
    match parsed {
        Ok(value) => ErrorBody::Json { value, raw: text },
        Err(_) => ErrorBody::Text(text),
    }
}

/// A successful response with its parsed data and transaction metadata.
///
/// # Examples
///
/// ```no_run
/// use serde::Deserialize;
/// use typed_fetch::{Client, RequestOptions};
///
/// #[derive(Deserialize)]
/// struct Todo {
///     id: u64,
///     title: String,
/// }
///
/// # async fn example() -> Result<(), typed_fetch::Error> {
/// let client = Client::builder()
///     .base_url("https://jsonplaceholder.typicode.com")?
///     .build()?;
///
/// if let Some(response) = client.get("/todos/1", RequestOptions::new()).await?.into_response() {
///     let todo = response.json::<Todo>()?;
///     println!("{} took {:?} over {} attempt(s)", todo.title, todo.latency, todo.attempts);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FetchResponse<T = ResponseData> {
    pub data: T,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Time from the first dispatch to the final response, including retries.
    pub latency: Duration,
    /// Number of transport calls made, `1` when no retry happened.
    pub attempts: u32,
}

impl<T> FetchResponse<T> {
    /// Transforms the data, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> FetchResponse<U>
    where
        F: FnOnce(T) -> U,
    {
        FetchResponse {
            data: f(self.data),
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl FetchResponse<ResponseData> {
    /// Decodes the data into `U`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] if the data has no JSON form
    /// or does not match `U`.
    pub fn json<U: DeserializeOwned>(self) -> Result<FetchResponse<U>> {
        let status = self.status;
        let value = self.data.as_value().ok_or_else(|| Error::DeserializationFailed {
            raw_response: String::new(),
            serde_error: "binary response has no JSON representation".to_string(),
            status,
        })?;
        let data = serde_json::from_value::<U>(value.clone()).map_err(|e| {
            tracing::warn!(status = %status, error = %e, "Failed to decode response data");
            Error::DeserializationFailed {
                raw_response: value.to_string(),
                serde_error: e.to_string(),
                status,
            }
        })?;
        Ok(self.map(|_| data))
    }
}

impl<T> AsRef<T> for FetchResponse<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for FetchResponse<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// The value form of a request outcome: data on success, a tagged error
/// payload on an HTTP failure.
#[derive(Debug, Clone)]
pub enum FetchResult<T = ResponseData> {
    Success(FetchResponse<T>),
    Failure(ErrorPayload),
}

impl<T> FetchResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            FetchResult::Success(response) => Some(&response.data),
            FetchResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        match self {
            FetchResult::Success(_) => None,
            FetchResult::Failure(error) => Some(error),
        }
    }

    pub fn into_data(self) -> Option<T> {
        self.into_response().map(|response| response.data)
    }

    pub fn into_response(self) -> Option<FetchResponse<T>> {
        match self {
            FetchResult::Success(response) => Some(response),
            FetchResult::Failure(_) => None,
        }
    }
}
