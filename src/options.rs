//! Per-request configuration.

use crate::auth::Auth;
use crate::hooks::FetchHooks;
use crate::plugin::Plugin;
use crate::request::{Body, Duplex};
use crate::response::JsonParser;
use crate::retry::RetryStrategy;
use crate::schema::SchemaRef;
use crate::transport::Transport;
use crate::url::{Params, Query};
use crate::{Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything needed to make a single request.
///
/// Fields left unset fall back to the client's defaults. Options are cloned
/// for every attempt, so a retry re-runs plugins and re-resolves auth against
/// the same logical request.
///
/// # Examples
///
/// ```
/// use typed_fetch::{RequestOptions, RetryStrategy};
/// use typed_fetch::url::Params;
/// use std::time::Duration;
///
/// let options = RequestOptions::new()
///     .with_params(Params::positional(["42"]))
///     .with_query("expand", "author")
///     .with_timeout(Duration::from_secs(5))
///     .with_retry(3);
/// ```
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Base URL the path is resolved against. May be relative.
    pub base_url: Option<String>,

    /// Explicit HTTP method. Takes precedence over method modifiers.
    pub method: Option<Method>,

    /// Request body.
    pub body: Option<Body>,

    /// Query parameters.
    pub query: Query,

    /// Dynamic path parameters.
    pub params: Option<Params>,

    /// Headers for this request.
    pub headers: HeaderMap,

    /// Authorization header builder.
    pub auth: Option<Auth>,

    /// Abort the request if the transport has not answered in time. Ignored
    /// when an explicit `signal` is supplied.
    pub timeout: Option<Duration>,

    /// Caller-owned abort signal.
    pub signal: Option<CancellationToken>,

    /// Retry policy for non-2xx responses.
    pub retry: Option<RetryStrategy>,

    /// Schema for the response data.
    pub output: Option<SchemaRef>,

    /// Schema for the JSON body.
    pub input: Option<SchemaRef>,

    /// Schema for the query object.
    pub query_schema: Option<SchemaRef>,

    /// Schema for the path parameter object.
    pub params_schema: Option<SchemaRef>,

    pub disable_validation: Option<bool>,

    /// Transport override for this request.
    pub transport: Option<Arc<dyn Transport>>,

    /// Plugins applied in order before the request is built.
    pub plugins: Vec<Arc<dyn Plugin>>,

    /// Raise HTTP failures as `Err` instead of returning them as values.
    pub throw: Option<bool>,

    /// Top-level hooks. Run before any plugin hooks.
    pub hooks: Option<Arc<dyn FetchHooks>>,

    pub duplex: Option<Duplex>,

    /// Parser for JSON and text bodies.
    pub json_parser: Option<JsonParser>,

    /// Leave unmatched `:name` path tokens literal instead of failing.
    pub allow_unmatched_params: Option<bool>,

    /// Extra fields consumed by plugins.
    pub extra: Map<String, Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a JSON body from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented as JSON.
    pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self> {
        let value =
            serde_json::to_value(body).map_err(|e| Error::SerializationFailed(e.to_string()))?;
        Ok(self.with_body(Body::Json(value)))
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_retry(mut self, retry: impl Into<RetryStrategy>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    pub fn with_output(mut self, schema: SchemaRef) -> Self {
        self.output = Some(schema);
        self
    }

    pub fn with_input(mut self, schema: SchemaRef) -> Self {
        self.input = Some(schema);
        self
    }

    pub fn with_query_schema(mut self, schema: SchemaRef) -> Self {
        self.query_schema = Some(schema);
        self
    }

    pub fn with_params_schema(mut self, schema: SchemaRef) -> Self {
        self.params_schema = Some(schema);
        self
    }

    pub fn with_disable_validation(mut self, disable: bool) -> Self {
        self.disable_validation = Some(disable);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_throw(mut self, throw: bool) -> Self {
        self.throw = Some(throw);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn FetchHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_duplex(mut self, duplex: Duplex) -> Self {
        self.duplex = Some(duplex);
        self
    }

    pub fn with_json_parser(mut self, parser: JsonParser) -> Self {
        self.json_parser = Some(parser);
        self
    }

    pub fn with_allow_unmatched_params(mut self, allow: bool) -> Self {
        self.allow_unmatched_params = Some(allow);
        self
    }

    /// Sets an extra field for plugins to read.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn validation_disabled(&self) -> bool {
        self.disable_validation.unwrap_or(false)
    }

    pub fn throws(&self) -> bool {
        self.throw.unwrap_or(false)
    }

    pub fn allows_unmatched_params(&self) -> bool {
        self.allow_unmatched_params.unwrap_or(false)
    }

    /// Layers `overrides` on top of `self`.
    ///
    /// Set fields in `overrides` win. Headers are overlaid key by key, query
    /// pairs and plugins are appended, extra fields are merged.
    pub fn merge(mut self, overrides: RequestOptions) -> Self {
        let RequestOptions {
            base_url,
            method,
            body,
            query,
            params,
            headers,
            auth,
            timeout,
            signal,
            retry,
            output,
            input,
            query_schema,
            params_schema,
            disable_validation,
            transport,
            plugins,
            throw,
            hooks,
            duplex,
            json_parser,
            allow_unmatched_params,
            extra,
        } = overrides;

        self.base_url = base_url.or(self.base_url);
        self.method = method.or(self.method);
        self.body = body.or(self.body);
        self.query.extend(query);
        self.params = params.or(self.params);
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self.auth = auth.or(self.auth);
        self.timeout = timeout.or(self.timeout);
        self.signal = signal.or(self.signal);
        self.retry = retry.or(self.retry);
        self.output = output.or(self.output);
        self.input = input.or(self.input);
        self.query_schema = query_schema.or(self.query_schema);
        self.params_schema = params_schema.or(self.params_schema);
        self.disable_validation = disable_validation.or(self.disable_validation);
        self.transport = transport.or(self.transport);
        self.plugins.extend(plugins);
        self.throw = throw.or(self.throw);
        self.hooks = hooks.or(self.hooks);
        self.duplex = duplex.or(self.duplex);
        self.json_parser = json_parser.or(self.json_parser);
        self.allow_unmatched_params = allow_unmatched_params.or(self.allow_unmatched_params);
        self.extra.extend(extra);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("base_url", &self.base_url)
            .field("method", &self.method)
            .field("body", &self.body)
            .field("query", &self.query)
            .field("params", &self.params)
            .field("headers", &self.headers)
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("plugins", &self.plugins.iter().map(|p| p.id()).collect::<Vec<_>>())
            .field("throw", &self.throw)
            .field("disable_validation", &self.disable_validation)
            .finish_non_exhaustive()
    }
}
