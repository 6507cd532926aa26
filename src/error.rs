//! Error types for the request pipeline.
//!
//! Failures fall into four families. HTTP errors (non-2xx responses) and
//! validation errors (schema rejections) are classified locally and carry a
//! tagged [`ErrorPayload`]. Transport errors (network failures, aborts,
//! timeouts) always propagate as `Err`. Configuration errors are raised before
//! anything is sent.

use crate::schema::{Issue, ValidationError};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};

/// A boxed error used where the concrete type belongs to a caller (custom
/// transports, hooks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for the request pipeline.
///
/// # Examples
///
/// ```no_run
/// use typed_fetch::{Client, Error, RequestOptions};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .throw_on_error(true)
///     .build()?;
///
/// match client.fetch("/todos/1", RequestOptions::new()).await {
///     Ok(result) => println!("Success: {:?}", result.data()),
///     Err(Error::Http { status, body, .. }) => {
///         eprintln!("HTTP error {}: {:?}", status, body);
///     }
///     Err(Error::Validation(err)) => {
///         eprintln!("Response did not match the schema: {}", err);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error reported by the default `reqwest` transport.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A failure reported by a custom transport.
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// The abort signal was cancelled before the transport call resolved.
    #[error("The operation was aborted")]
    Aborted,

    /// The internal timeout fired and aborted the request.
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The server returned a non-2xx status code.
    ///
    /// Only raised in throw mode; otherwise the failure is returned as an
    /// [`ErrorPayload::Http`] value.
    #[error("HTTP error {status} {status_text}")]
    Http {
        /// The HTTP status code
        status: StatusCode,
        /// The reason phrase reported with the status
        status_text: String,
        /// The response body, parsed as JSON when possible
        body: ErrorBody,
        /// The response headers
        headers: HeaderMap,
    },

    /// A schema rejected the request input, query, params, or response output.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An absolute URL failed to parse.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// Failed to decode response data into a caller-provided type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// A hook or plugin failed; the request was abandoned.
    #[error("Hook failed: {0}")]
    Hook(#[source] BoxError),
}

impl Error {
    /// Wraps an arbitrary error raised from inside a hook or plugin.
    pub fn hook(err: impl Into<BoxError>) -> Self {
        Error::Hook(err.into())
    }

    /// Wraps an arbitrary error raised by a custom transport.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Error::Transport(err.into())
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Http { body, .. } => Some(body.raw()),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns `true` for schema validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Returns `true` when the request was cancelled, either by the caller's
    /// signal or by the internal timeout.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted | Error::Timeout(_))
    }

    /// Returns the tagged payload for HTTP and validation errors.
    pub fn payload(&self) -> Option<ErrorPayload> {
        match self {
            Error::Http {
                status,
                status_text,
                body,
                ..
            } => Some(ErrorPayload::Http(HttpErrorPayload::new(
                *status,
                status_text.clone(),
                body.clone(),
            ))),
            Error::Validation(err) => Some(ErrorPayload::from(err)),
            _ => None,
        }
    }
}

/// The body of a failed response.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    /// The body parsed as JSON. The raw text is kept alongside.
    Json { value: Value, raw: String },
    /// The body could not be parsed as JSON.
    Text(String),
}

impl ErrorBody {
    /// Returns the unparsed body text.
    pub fn raw(&self) -> &str {
        match self {
            ErrorBody::Json { raw, .. } => raw,
            ErrorBody::Text(raw) => raw,
        }
    }

    /// Returns the parsed JSON value, if the body was JSON.
    pub fn json(&self) -> Option<&Value> {
        match self {
            ErrorBody::Json { value, .. } => Some(value),
            ErrorBody::Text(_) => None,
        }
    }
}

/// A failure returned as a value instead of raised.
///
/// The `type` tag lets hooks branch on the failure kind without probing the
/// shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ErrorPayload {
    /// A non-2xx response.
    Http(HttpErrorPayload),
    /// A schema rejection.
    Validation(ValidationErrorPayload),
}

impl ErrorPayload {
    /// Returns the HTTP status if this is an HTTP failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorPayload::Http(http) => Some(http.status),
            ErrorPayload::Validation(_) => None,
        }
    }

    /// Returns the HTTP payload, if any.
    pub fn as_http(&self) -> Option<&HttpErrorPayload> {
        match self {
            ErrorPayload::Http(http) => Some(http),
            ErrorPayload::Validation(_) => None,
        }
    }

    /// Returns the validation payload, if any.
    pub fn as_validation(&self) -> Option<&ValidationErrorPayload> {
        match self {
            ErrorPayload::Validation(v) => Some(v),
            ErrorPayload::Http(_) => None,
        }
    }
}

impl From<&ValidationError> for ErrorPayload {
    fn from(err: &ValidationError) -> Self {
        ErrorPayload::Validation(ValidationErrorPayload {
            issues: err.issues().to_vec(),
            message: err.message().to_string(),
        })
    }
}

/// Payload of an HTTP failure: the fields of a JSON object body, merged with
/// `status` and `statusText`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpErrorPayload {
    /// The HTTP status code.
    pub status: u16,
    /// The reason phrase.
    #[serde(rename = "statusText")]
    pub status_text: String,
    /// Top-level fields of the parsed JSON body. Empty if the body was not a
    /// JSON object.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// The body text as received.
    #[serde(skip)]
    pub raw_body: String,
}

impl HttpErrorPayload {
    pub(crate) fn new(status: StatusCode, status_text: String, body: ErrorBody) -> Self {
        let raw_body = body.raw().to_string();
        let mut fields = match body {
            ErrorBody::Json {
                value: Value::Object(map),
                ..
            } => map,
            _ => Map::new(),
        };
        // status and statusText always win over body fields of the same name
        fields.remove("status");
        fields.remove("statusText");
        Self {
            status: status.as_u16(),
            status_text,
            fields,
            raw_body,
        }
    }

    /// Returns a field of the parsed body.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the `message` field of the parsed body, if it is a string.
    pub fn message(&self) -> Option<&str> {
        self.get("message").and_then(Value::as_str)
    }
}

/// Payload of a validation failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationErrorPayload {
    /// Every issue the validator reported.
    pub issues: Vec<Issue>,
    /// A human-readable summary.
    pub message: String,
}

/// A specialized `Result` type for the request pipeline.
pub type Result<T> = std::result::Result<T, Error>;
