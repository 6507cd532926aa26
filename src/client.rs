//! The request pipeline.
//!
//! [`Client`] runs every request through the same phases: plugins, URL and
//! request materialization, `on_request` hooks, dispatch, `on_response`
//! hooks, then either the success branch (parse, validate, `on_success`) or
//! the error branch (parse, `on_error`, retry or fail). Use [`ClientBuilder`]
//! to set defaults shared by every request.

use crate::auth::Auth;
use crate::error::{ErrorBody, ErrorPayload, HttpErrorPayload};
use crate::hooks::{ErrorContext, FetchHooks, HookChain, ResponseContext, SuccessContext};
use crate::options::RequestOptions;
use crate::plugin::{apply_plugins, Plugin, Prepared};
use crate::request::{default_duplex, materialize, Materialized, RequestContext};
use crate::response::{parse_body, parse_error_body, FetchResponse, FetchResult, JsonParser, Response, ResponseData};
use crate::retry::{RetryDecision, RetryState, RetryStrategy};
use crate::schema::{validate, validate_request_inputs, Issue, Schema, SchemaMatchPolicy, SchemaPlugin, ValidationError};
use crate::transport::{ReqwestTransport, Transport};
use crate::url::{build_url, UrlParts};
use crate::{Error, Result};
use http::{Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};
use url::Url;

const CATCH_ALL_MESSAGE: &str =
    "Fetch related error. Captured by catchAllError option. See error property for more details.";

/// A reusable client holding request defaults, route schemas and a
/// transport.
///
/// Cloning is cheap; clones share the same configuration.
///
/// # Examples
///
/// ```no_run
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
/// use typed_fetch::{Client, RequestOptions, RetryStrategy};
///
/// #[derive(Serialize)]
/// struct NewTodo {
///     title: String,
/// }
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
///     .timeout(Duration::from_secs(30))
///     .retry(RetryStrategy::exponential(
///         3,
///         Duration::from_millis(100),
///         Duration::from_secs(10),
///     ))
///     .build()?;
///
/// let todo = client
///     .post("/todos", &NewTodo { title: "write docs".into() }, RequestOptions::new())
///     .await?;
/// match todo.into_response() {
///     Some(response) => println!("created {}", response.json::<Todo>()?.id),
///     None => eprintln!("request failed"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    defaults: RequestOptions,
    schemas: Vec<Schema>,
    match_policy: SchemaMatchPolicy,
    catch_all_error: bool,
    transport: Arc<dyn Transport>,
    span: Span,
}

/// Outcome of a single pass through the pipeline.
enum Attempt {
    Done(FetchResult),
    Retry { delay: Duration },
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Sends a request.
    ///
    /// Returns `Ok(FetchResult::Failure)` for non-2xx responses unless throw
    /// mode is on, in which case they are `Err(Error::Http)`. Validation,
    /// transport, abort and configuration errors are always `Err`, unless
    /// the client was built with `catch_all_error`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use typed_fetch::url::Params;
    /// use typed_fetch::{Client, FetchResult, RequestOptions};
    ///
    /// # async fn example() -> Result<(), typed_fetch::Error> {
    /// let client = Client::builder().base_url("http://localhost:4001")?.build()?;
    ///
    /// let options = RequestOptions::new().with_params(Params::positional(["2"]));
    /// match client.fetch("/param/:id", options).await? {
    ///     FetchResult::Success(response) => println!("{:?}", response.data),
    ///     FetchResult::Failure(error) => eprintln!("{:?}", error.status()),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch(&self, url: impl Into<String>, options: RequestOptions) -> Result<FetchResult> {
        let result = self
            .execute(url.into(), options)
            .instrument(self.inner.span.clone())
            .await;

        match result {
            Err(e) if self.inner.catch_all_error => {
                tracing::error!(error = %e, "Request failed, converted by catch_all_error");
                Ok(FetchResult::Failure(catch_all_payload(&e)))
            }
            other => other,
        }
    }

    pub async fn get(&self, url: impl Into<String>, options: RequestOptions) -> Result<FetchResult> {
        self.fetch(url, options.with_method(Method::GET)).await
    }

    /// Sends `body` as JSON with `POST`.
    pub async fn post<B: Serialize>(
        &self,
        url: impl Into<String>,
        body: &B,
        options: RequestOptions,
    ) -> Result<FetchResult> {
        self.fetch(url, options.with_method(Method::POST).with_json(body)?)
            .await
    }

    pub async fn put<B: Serialize>(
        &self,
        url: impl Into<String>,
        body: &B,
        options: RequestOptions,
    ) -> Result<FetchResult> {
        self.fetch(url, options.with_method(Method::PUT).with_json(body)?)
            .await
    }

    pub async fn patch<B: Serialize>(
        &self,
        url: impl Into<String>,
        body: &B,
        options: RequestOptions,
    ) -> Result<FetchResult> {
        self.fetch(url, options.with_method(Method::PATCH).with_json(body)?)
            .await
    }

    pub async fn delete(&self, url: impl Into<String>, options: RequestOptions) -> Result<FetchResult> {
        self.fetch(url, options.with_method(Method::DELETE)).await
    }

    async fn execute(&self, url: String, options: RequestOptions) -> Result<FetchResult> {
        let options = self.with_schema_plugin(self.inner.defaults.clone().merge(options));
        let started = Instant::now();
        let mut state = RetryState::new();

        loop {
            match self.attempt(&url, options.clone(), state, started).await? {
                Attempt::Done(result) => return Ok(result),
                Attempt::Retry { delay } => {
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        attempt = state.attempt,
                        "Retrying request after delay"
                    );
                    match &options.signal {
                        Some(signal) => tokio::select! {
                            biased;
                            _ = signal.cancelled() => {
                                tracing::warn!(attempt = state.attempt, "Request aborted during retry delay");
                                return Err(Error::Aborted);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                    state = state.next();
                }
            }
        }
    }

    /// Appends the route-matching plugin after every other plugin. Plugin
    /// schemas are consulted before the client's own.
    fn with_schema_plugin(&self, mut options: RequestOptions) -> RequestOptions {
        let mut schemas: Vec<Schema> = options
            .plugins
            .iter()
            .filter_map(|plugin| plugin.schema().cloned())
            .collect();
        schemas.extend(self.inner.schemas.iter().cloned());

        if !schemas.is_empty() {
            options
                .plugins
                .push(Arc::new(SchemaPlugin::new(schemas, self.inner.match_policy)));
        }
        options
    }

    async fn attempt(
        &self,
        url: &str,
        options: RequestOptions,
        state: RetryState,
        started: Instant,
    ) -> Result<Attempt> {
        let Prepared {
            url,
            mut options,
            hooks,
        } = apply_plugins(url.to_string(), options).await?;

        if !options.validation_disabled() {
            let input = options.input.clone();
            let query = options.query_schema.clone();
            let params = options.params_schema.clone();
            validate_request_inputs(
                input.as_deref(),
                query.as_deref(),
                params.as_deref(),
                &mut options,
                &url,
            )
            .await?;
        }

        let request_url = build_url(
            &url,
            UrlParts {
                base_url: options.base_url.as_deref(),
                params: options.params.as_ref(),
                query: &options.query,
                allow_unmatched_params: options.allows_unmatched_params(),
            },
        )?;
        let Materialized {
            method,
            headers,
            body,
        } = materialize(&url, &options).await?;

        let internal_signal = match &options.signal {
            Some(_) => None,
            None => Some(CancellationToken::new()),
        };
        let signal = options
            .signal
            .clone()
            .or_else(|| internal_signal.clone())
            .unwrap_or_default();

        let mut request = hooks
            .run_on_request(RequestContext {
                url: request_url,
                method,
                headers,
                body,
                signal,
                duplex: options.duplex,
                attempt: state.attempt,
            })
            .await?;
        request.duplex = default_duplex(request.body.as_ref(), request.duplex);

        let timer = match (&internal_signal, options.timeout) {
            (Some(token), Some(timeout)) => Some(start_timer(token.clone(), timeout)),
            _ => None,
        };

        let transport = options
            .transport
            .clone()
            .unwrap_or_else(|| self.inner.transport.clone());

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            attempt = state.attempt,
            "Executing HTTP request"
        );

        let sent = tokio::select! {
            biased;
            _ = request.signal.cancelled() => Err(Error::Aborted),
            response = transport.send(&request) => response,
        };
        if let Some(timer) = &timer {
            timer.abort();
        }

        let response = match sent {
            Ok(response) => response,
            Err(Error::Aborted) => {
                let timed_out = timer.is_some() && internal_signal.as_ref().is_some_and(|t| t.is_cancelled());
                return Err(match (timed_out, options.timeout) {
                    (true, Some(timeout)) => {
                        tracing::warn!(timeout_ms = timeout.as_millis(), "Request timed out");
                        Error::Timeout(timeout)
                    }
                    _ => {
                        tracing::warn!(attempt = state.attempt, "Request aborted");
                        Error::Aborted
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt = state.attempt, "Request failed");
                return Err(e);
            }
        };

        let latency = started.elapsed();
        tracing::info!(
            status = response.status().as_u16(),
            latency_ms = latency.as_millis(),
            attempt = state.attempt,
            "Received HTTP response"
        );

        let ResponseContext { response, request } = hooks
            .run_on_response(ResponseContext { response, request })
            .await?;

        if response.ok() {
            self.on_ok(response, request, &options, &hooks, state, latency)
                .await
                .map(Attempt::Done)
        } else {
            self.on_error(response, request, &options, &hooks, state).await
        }
    }

    async fn on_ok(
        &self,
        response: Response,
        request: RequestContext,
        options: &RequestOptions,
        hooks: &HookChain,
        state: RetryState,
        latency: Duration,
    ) -> Result<FetchResult> {
        let success = |data: ResponseData, response: &Response| {
            FetchResult::Success(FetchResponse {
                data,
                status: response.status(),
                headers: response.headers().clone(),
                latency,
                attempts: state.calls(),
            })
        };

        if request.method == Method::HEAD {
            return Ok(success(ResponseData::Text(String::new()), &response));
        }

        let mut data = parse_body(response.clone(), options.json_parser.as_ref())?;

        if let (Some(schema), false) = (&options.output, options.validation_disabled()) {
            let checked = match data.as_value() {
                Some(value) => validate(schema.as_ref(), value).await,
                None => Err(ValidationError::new(
                    vec![Issue::new("binary response data cannot be validated")],
                    None,
                )),
            };
            match checked {
                Ok(value) => data = validated_data(data, value),
                Err(err) => {
                    tracing::warn!(
                        status = response.status().as_u16(),
                        error = %err,
                        "Response failed output validation"
                    );
                    let ctx = ErrorContext {
                        response_text: response.clone().text(),
                        response,
                        request,
                        error: ErrorPayload::from(&err),
                    };
                    hooks.run_on_error(&ctx).await?;
                    return Err(Error::Validation(err));
                }
            }
        }

        let ctx = SuccessContext {
            data,
            response,
            request,
        };
        hooks.run_on_success(&ctx).await?;
        Ok(success(ctx.data, &ctx.response))
    }

    async fn on_error(
        &self,
        response: Response,
        request: RequestContext,
        options: &RequestOptions,
        hooks: &HookChain,
        state: RetryState,
    ) -> Result<Attempt> {
        let status = response.status();
        let status_text = response.status_text().to_string();
        let response_text = response.clone().text();

        if status.is_client_error() {
            tracing::error!(status = status.as_u16(), response = %response_text, "Client error (4xx)");
        } else if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), response = %response_text, "Server error (5xx)");
        }

        let body = parse_error_body(response_text.clone(), options.json_parser.as_ref());
        let payload = HttpErrorPayload::new(status, status_text.clone(), body.clone());
        let ctx = ErrorContext {
            response,
            response_text,
            request,
            error: ErrorPayload::Http(payload.clone()),
        };
        hooks.run_on_error(&ctx).await?;
        let ErrorContext { response, request, .. } = ctx;

        if let Some(strategy) = &options.retry {
            if let RetryDecision::Retry { delay } = strategy.decide(state, Some(&response)).await {
                hooks
                    .run_on_retry(&ResponseContext { response, request })
                    .await?;
                return Ok(Attempt::Retry { delay });
            }
            tracing::debug!(attempts = state.calls(), "Retries exhausted");
        }

        if options.throws() {
            return Err(Error::Http {
                status,
                status_text,
                body,
                headers: response.headers().clone(),
            });
        }
        Ok(Attempt::Done(FetchResult::Failure(ErrorPayload::Http(payload))))
    }
}

fn start_timer(token: CancellationToken, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        token.cancel();
    })
}

/// Keeps text data as text when the validator returned a string.
fn validated_data(original: ResponseData, value: Value) -> ResponseData {
    match (original, value) {
        (ResponseData::Text(_), Value::String(text)) => ResponseData::Text(text),
        (_, value) => ResponseData::Json(value),
    }
}

fn catch_all_payload(error: &Error) -> ErrorPayload {
    let value = json!({
        "message": CATCH_ALL_MESSAGE,
        "error": error.to_string(),
    });
    ErrorPayload::Http(HttpErrorPayload::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Fetch Error".to_string(),
        ErrorBody::Json {
            raw: value.to_string(),
            value,
        },
    ))
}

/// Builder for configuring and creating a [`Client`].
///
/// Every setting becomes a default for each request; per-call
/// [`RequestOptions`] override it.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use typed_fetch::{Auth, ClientBuilder};
///
/// # fn example() -> Result<(), typed_fetch::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .retry(3)
///     .auth(Auth::bearer("secret"))
///     .default_header("User-Agent", "my-app/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    defaults: RequestOptions,
    schemas: Vec<Schema>,
    match_policy: SchemaMatchPolicy,
    catch_all_error: bool,
    transport: Option<Arc<dyn Transport>>,
    span: Option<Span>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            defaults: RequestOptions::new(),
            schemas: Vec::new(),
            match_policy: SchemaMatchPolicy::default(),
            catch_all_error: false,
            transport: None,
            span: None,
        }
    }

    /// Sets the base URL for all requests. Relative base URLs are allowed
    /// and require a transport that accepts relative URLs.
    ///
    /// # Errors
    ///
    /// Returns an error if an absolute URL is malformed.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();
        if url.contains("://") {
            Url::parse(url)?;
        }
        self.defaults.base_url = Some(url.to_string());
        Ok(self)
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        self.defaults = self.defaults.with_header(name, value)?;
        Ok(self)
    }

    /// Layers a whole options bag onto the defaults.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.defaults = self.defaults.merge(options);
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.defaults.auth = Some(auth);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: impl Into<RetryStrategy>) -> Self {
        self.defaults.retry = Some(retry.into());
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.defaults.plugins.push(plugin);
        self
    }

    /// Registers a route table. Tables are matched in registration order
    /// unless the match policy says otherwise.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn schema_match_policy(mut self, policy: SchemaMatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.defaults.throw = Some(throw);
        self
    }

    /// Turns every `Err` into a generic 500 `Failure` value.
    pub fn catch_all_error(mut self, catch_all: bool) -> Self {
        self.catch_all_error = catch_all;
        self
    }

    pub fn disable_validation(mut self, disable: bool) -> Self {
        self.defaults.disable_validation = Some(disable);
        self
    }

    /// Replaces the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn json_parser(mut self, parser: JsonParser) -> Self {
        self.defaults.json_parser = Some(parser);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn FetchHooks>) -> Self {
        self.defaults.hooks = Some(hooks);
        self
    }

    /// Span every request is instrumented with. Defaults to a `typed_fetch`
    /// info span.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn allow_unmatched_params(mut self, allow: bool) -> Self {
        self.defaults.allow_unmatched_params = Some(allow);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the default transport cannot be created.
    pub fn build(self) -> Result<Client> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("typed_fetch"));

        Ok(Client {
            inner: Arc::new(ClientInner {
                defaults: self.defaults,
                schemas: self.schemas,
                match_policy: self.match_policy,
                catch_all_error: self.catch_all_error,
                transport,
                span,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends a one-off request with a default client.
///
/// # Errors
///
/// Same as [`Client::fetch`].
pub async fn fetch(url: impl Into<String>, options: RequestOptions) -> Result<FetchResult> {
    Client::builder().build()?.fetch(url, options).await
}
