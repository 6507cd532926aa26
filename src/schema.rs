//! Schema validation.
//!
//! Validators implement [`StandardSchema`], a single-method contract that
//! either returns the validated value or a list of issues. Nothing here falls
//! back to passing data through: a failed validation is always an error.
//!
//! Route schemas ([`Schema`]) attach per-path declarations to a client. The
//! internal [`SchemaPlugin`] matches outgoing requests against them, applies
//! prefix rewriting, and validates body, query and params before dispatch.

use crate::options::RequestOptions;
use crate::plugin::{Plugin, PluginInit};
use crate::request::Body;
use crate::url::{param_names, strip_method_modifier, MethodModifier, Params};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// One step in the path to an offending value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
}

impl Issue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    pub fn at(mut self, segment: PathSegment) -> Self {
        self.path.push(segment);
        self
    }
}

/// Outcome of a single validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Validated {
    Value(Value),
    Issues(Vec<Issue>),
}

/// The validator contract.
///
/// Any validation library can be adapted by implementing this trait; the
/// pipeline depends on nothing else.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use typed_fetch::schema::{Issue, StandardSchema, Validated};
///
/// struct NonEmptyString;
///
/// #[async_trait]
/// impl StandardSchema for NonEmptyString {
///     async fn validate(&self, input: Value) -> Validated {
///         match input {
///             Value::String(s) if !s.is_empty() => Validated::Value(Value::String(s)),
///             _ => Validated::Issues(vec![Issue::new("expected a non-empty string")]),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait StandardSchema: Send + Sync {
    /// Name of the library behind this validator.
    fn vendor(&self) -> &str {
        "custom"
    }

    async fn validate(&self, input: Value) -> Validated;
}

/// Shared handle to a validator.
pub type SchemaRef = Arc<dyn StandardSchema>;

/// A schema rejected a value.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ValidationError {
    issues: Vec<Issue>,
    message: String,
}

impl ValidationError {
    /// Creates an error; the message defaults to the pretty-printed issues.
    pub fn new(issues: Vec<Issue>, message: Option<String>) -> Self {
        let message = message.unwrap_or_else(|| {
            serde_json::to_string_pretty(&issues).unwrap_or_else(|_| "validation failed".to_string())
        });
        Self { issues, message }
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Runs `schema` against `input`.
///
/// # Errors
///
/// Returns [`ValidationError`] carrying every issue the validator reported.
pub async fn validate(schema: &dyn StandardSchema, input: Value) -> std::result::Result<Value, ValidationError> {
    match schema.validate(input).await {
        Validated::Value(value) => Ok(value),
        Validated::Issues(issues) => Err(ValidationError::new(issues, None)),
    }
}

/// Validates by decoding into `T` and re-encoding the decoded value.
///
/// # Examples
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use typed_fetch::schema::SerdeSchema;
///
/// #[derive(Serialize, Deserialize)]
/// struct Todo {
///     id: u64,
///     title: String,
/// }
///
/// let output = SerdeSchema::<Todo>::shared();
/// ```
pub struct SerdeSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeSchema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Returns the schema behind a shared handle.
    pub fn shared() -> SchemaRef {
        Arc::new(Self::new())
    }
}

impl<T> Default for SerdeSchema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> StandardSchema for SerdeSchema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn vendor(&self) -> &str {
        "serde"
    }

    async fn validate(&self, input: Value) -> Validated {
        let decoded = match serde_json::from_value::<T>(input) {
            Ok(decoded) => decoded,
            Err(e) => return Validated::Issues(vec![Issue::new(e.to_string())]),
        };
        match serde_json::to_value(decoded) {
            Ok(value) => Validated::Value(value),
            Err(e) => Validated::Issues(vec![Issue::new(e.to_string())]),
        }
    }
}

/// A validator backed by a closure.
pub struct FnSchema<F> {
    f: F,
}

impl<F> FnSchema<F>
where
    F: Fn(Value) -> Validated + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn shared(f: F) -> SchemaRef {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F> StandardSchema for FnSchema<F>
where
    F: Fn(Value) -> Validated + Send + Sync + 'static,
{
    async fn validate(&self, input: Value) -> Validated {
        (self.f)(input)
    }
}

/// Per-route declaration of expected shapes and method.
#[derive(Clone, Default)]
pub struct FetchSchema {
    pub input: Option<SchemaRef>,
    pub output: Option<SchemaRef>,
    pub query: Option<SchemaRef>,
    pub params: Option<SchemaRef>,
    pub method: Option<MethodModifier>,
}

impl FetchSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, schema: SchemaRef) -> Self {
        self.input = Some(schema);
        self
    }

    pub fn output(mut self, schema: SchemaRef) -> Self {
        self.output = Some(schema);
        self
    }

    pub fn query(mut self, schema: SchemaRef) -> Self {
        self.query = Some(schema);
        self
    }

    pub fn params(mut self, schema: SchemaRef) -> Self {
        self.params = Some(schema);
        self
    }

    pub fn method(mut self, method: MethodModifier) -> Self {
        self.method = Some(method);
        self
    }
}

impl fmt::Debug for FetchSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchSchema")
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .field("query", &self.query.is_some())
            .field("params", &self.params.is_some())
            .field("method", &self.method)
            .finish()
    }
}

/// How a route table is matched against outgoing URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaConfig {
    /// Reject requests whose route is not declared.
    pub strict: bool,
    /// URL prefix identifying this table's routes. Stripped before lookup,
    /// and replaced by `base_url` when both are set.
    pub prefix: Option<String>,
    /// Base URL the routes live under.
    pub base_url: Option<String>,
}

/// A route table: route key (path template, optionally `@method/`-prefixed)
/// to [`FetchSchema`].
#[derive(Debug, Clone, Default)]
pub struct Schema {
    routes: HashMap<String, FetchSchema>,
    config: SchemaConfig,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, key: impl Into<String>, schema: FetchSchema) -> Self {
        self.routes.insert(key.into(), schema);
        self
    }

    pub fn with_config(mut self, config: SchemaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    pub fn get(&self, key: &str) -> Option<&FetchSchema> {
        self.routes.get(key)
    }
}

/// Precedence when several route tables could match the same URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemaMatchPolicy {
    /// The first table in registration order wins.
    #[default]
    FirstRegistered,
    /// The table with the longest matching prefix or base URL wins; ties go
    /// to the earlier table.
    MostSpecific,
}

struct RouteMatch<'a> {
    schema: &'a Schema,
    key: String,
    url: String,
    specificity: usize,
}

/// Matches requests against route tables. Always runs after every
/// user-registered plugin.
pub(crate) struct SchemaPlugin {
    schemas: Vec<Schema>,
    policy: SchemaMatchPolicy,
}

/// Strips `prefix` only at a path boundary, so `/admin` never claims
/// `/administrators`.
fn strip_route_prefix<'a>(url: &'a str, prefix: &str) -> Option<&'a str> {
    let residual = url.strip_prefix(prefix)?;
    let at_boundary = prefix.ends_with('/')
        || residual.is_empty()
        || residual.starts_with(['/', '?', '#']);
    at_boundary.then_some(residual)
}

impl SchemaPlugin {
    pub(crate) fn new(schemas: Vec<Schema>, policy: SchemaMatchPolicy) -> Self {
        Self { schemas, policy }
    }

    fn candidate<'a>(schema: &'a Schema, url: &str, options: &RequestOptions) -> Option<RouteMatch<'a>> {
        let config = schema.config();
        let trim = |s: &str| s.trim_end_matches('/').to_string();

        let (key, url, specificity) = if let Some(prefix) = config.prefix.as_deref() {
            let residual = strip_route_prefix(url, prefix)?;
            (residual.to_string(), residual.to_string(), prefix.len())
        } else if let Some(base) = config.base_url.as_deref() {
            let base = trim(base);
            if let Some(residual) = strip_route_prefix(url, &base) {
                (residual.to_string(), url.to_string(), base.len())
            } else if options.base_url.as_deref().map(trim).as_deref() == Some(base.as_str()) {
                (url.to_string(), url.to_string(), base.len())
            } else {
                return None;
            }
        } else {
            // Unscoped tables only claim routes they declare.
            schema.get(url)?;
            (url.to_string(), url.to_string(), 0)
        };

        Some(RouteMatch {
            schema,
            key,
            url,
            specificity,
        })
    }

    fn select(&self, url: &str, options: &RequestOptions) -> Option<RouteMatch<'_>> {
        let mut candidates = self
            .schemas
            .iter()
            .filter_map(|schema| Self::candidate(schema, url, options));
        match self.policy {
            SchemaMatchPolicy::FirstRegistered => candidates.next(),
            SchemaMatchPolicy::MostSpecific => candidates.fold(None, |best: Option<RouteMatch<'_>>, next| match best {
                Some(best) if best.specificity >= next.specificity => Some(best),
                _ => Some(next),
            }),
        }
    }
}

#[async_trait]
impl Plugin for SchemaPlugin {
    fn id(&self) -> &str {
        "apply-schema"
    }

    fn name(&self) -> &str {
        "Apply Schema"
    }

    async fn init(&self, url: String, mut options: RequestOptions) -> Result<PluginInit> {
        let Some(matched) = self.select(&url, &options) else {
            return Ok(PluginInit { url, options });
        };
        let config = matched.schema.config();
        if config.prefix.is_some() {
            if let Some(base) = &config.base_url {
                options.base_url = Some(base.clone());
            }
        }

        let Some(route) = matched.schema.get(&matched.key) else {
            if config.strict {
                return Err(Error::Configuration(format!(
                    "Route {} is not declared in the schema",
                    matched.key
                )));
            }
            return Ok(PluginInit {
                url: matched.url,
                options,
            });
        };

        tracing::trace!(route = %matched.key, "Matched route schema");
        if options.method.is_none() {
            options.method = route
                .method
                .or_else(|| MethodModifier::from_url(&matched.key))
                .map(MethodModifier::method);
        }
        if options.output.is_none() {
            options.output = route.output.clone();
        }
        if !options.validation_disabled() {
            validate_request_inputs(
                route.input.as_deref(),
                route.query.as_deref(),
                route.params.as_deref(),
                &mut options,
                &matched.key,
            )
            .await?;
        }

        Ok(PluginInit {
            url: matched.url,
            options,
        })
    }
}

/// Validates body, query and params in place. `template` names positional
/// params for the params schema.
pub(crate) async fn validate_request_inputs(
    input: Option<&dyn StandardSchema>,
    query: Option<&dyn StandardSchema>,
    params: Option<&dyn StandardSchema>,
    options: &mut RequestOptions,
    template: &str,
) -> Result<()> {
    if let Some(schema) = input {
        options.body = match options.body.take() {
            Some(Body::Json(value)) => Some(Body::Json(validate(schema, value).await?)),
            Some(Body::Text(text)) => match validate(schema, Value::String(text)).await? {
                Value::String(text) => Some(Body::Text(text)),
                other => Some(Body::Json(other)),
            },
            Some(Body::Form(pairs)) => {
                let object = pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
                let validated = validate(schema, Value::Object(object)).await?;
                Some(Body::Form(into_object(validated)?.into_iter().map(stringify).collect()))
            }
            Some(Body::Bytes(_) | Body::Stream(_)) => {
                return Err(Error::Validation(ValidationError::new(
                    vec![Issue::new("binary request body cannot be validated")],
                    None,
                )));
            }
            None => {
                validate(schema, Value::Null).await?;
                None
            }
        };
    }

    // Repeated keys collapse to their last value; send an array to repeat a key.
    if let Some(schema) = query {
        let mut order: Vec<String> = Vec::new();
        for (key, _) in &options.query {
            if !order.contains(key) {
                order.push(key.clone());
            }
        }
        let object: Map<String, Value> = options.query.drain(..).collect();
        let mut validated = into_object(validate(schema, Value::Object(object)).await?)?;
        let mut query: Vec<(String, Value)> = order
            .into_iter()
            .filter_map(|key| validated.remove(&key).map(|value| (key, value)))
            .collect();
        query.extend(validated);
        options.query = query;
    }

    if let Some(schema) = params {
        let (_, path) = strip_method_modifier(template);
        let named: Map<String, Value> = match options.params.take() {
            Some(Params::Named(pairs)) => pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
            Some(Params::Positional(values)) => param_names(path)
                .into_iter()
                .map(str::to_string)
                .zip(values.into_iter().map(Value::String))
                .collect(),
            None => Map::new(),
        };
        let validated = validate(schema, Value::Object(named)).await?;
        let pairs = into_object(validated)?.into_iter().map(stringify).collect();
        options.params = Some(Params::Named(pairs));
    }
    Ok(())
}

fn stringify((key, value): (String, Value)) -> (String, String) {
    match value {
        Value::String(s) => (key, s),
        other => (key, other.to_string()),
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::Validation(ValidationError::new(
            vec![Issue::new(format!("expected an object, got {}", other))],
            None,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Id {
        id: u64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Search {
        term: String,
    }

    #[tokio::test]
    async fn test_serde_schema_accepts_and_normalizes() {
        let value = validate(&SerdeSchema::<Id>::new(), json!({"id": 1, "extra": true}))
            .await
            .unwrap();
        assert_eq!(value, json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_serde_schema_rejects_wrong_type() {
        let err = validate(&SerdeSchema::<Id>::new(), json!({"id": "abc"}))
            .await
            .unwrap_err();
        assert_eq!(err.issues().len(), 1);
        assert!(err.message().contains("invalid type"));
    }

    #[tokio::test]
    async fn test_fn_schema() {
        let schema = FnSchema::new(|v: Value| match v.as_i64() {
            Some(n) if n > 0 => Validated::Value(v),
            _ => Validated::Issues(vec![Issue::new("must be positive").at(PathSegment::Index(0))]),
        });
        assert!(validate(&schema, json!(3)).await.is_ok());
        let err = validate(&schema, json!(-1)).await.unwrap_err();
        assert_eq!(err.issues()[0].path, vec![PathSegment::Index(0)]);
    }

    #[tokio::test]
    async fn test_plugin_injects_method_and_output() {
        let schema = Schema::new().route(
            "@post/signin",
            FetchSchema::new().output(SerdeSchema::<Id>::shared()),
        );
        let plugin = SchemaPlugin::new(vec![schema], SchemaMatchPolicy::default());
        let init = plugin
            .init("@post/signin".to_string(), RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(init.url, "@post/signin");
        assert_eq!(init.options.method, Some(http::Method::POST));
        assert!(init.options.output.is_some());
    }

    #[tokio::test]
    async fn test_plugin_validates_query() {
        let schema = Schema::new().route("/query", FetchSchema::new().query(SerdeSchema::<Search>::shared()));
        let plugin = SchemaPlugin::new(vec![schema], SchemaMatchPolicy::default());

        let ok = RequestOptions::new().with_query("term", "rust");
        assert!(plugin.init("/query".to_string(), ok).await.is_ok());

        let err = plugin
            .init("/query".to_string(), RequestOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let skipped = RequestOptions::new().with_disable_validation(true);
        assert!(plugin.init("/query".to_string(), skipped).await.is_ok());
    }

    #[tokio::test]
    async fn test_plugin_names_positional_params() {
        let schema = Schema::new().route("/user/:id", FetchSchema::new().params(SerdeSchema::<Id>::shared()));
        let plugin = SchemaPlugin::new(vec![schema], SchemaMatchPolicy::default());
        let options = RequestOptions::new().with_params(Params::positional(["5"]));
        let err = plugin.init("/user/:id".to_string(), options).await.unwrap_err();
        // "5" arrives as a string and the schema wants a number
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_prefix_rewrites_to_base_url() {
        let schema = Schema::new()
            .route("/signin", FetchSchema::new())
            .with_config(SchemaConfig {
                prefix: Some("/auth".into()),
                base_url: Some("http://auth.test".into()),
                ..Default::default()
            });
        let plugin = SchemaPlugin::new(vec![schema], SchemaMatchPolicy::default());
        let init = plugin
            .init("/auth/signin".to_string(), RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(init.url, "/signin");
        assert_eq!(init.options.base_url.as_deref(), Some("http://auth.test"));
    }

    #[tokio::test]
    async fn test_match_policy() {
        let scoped = |prefix: &str, method: MethodModifier| {
            Schema::new()
                .route("/users/list", FetchSchema::new().method(method))
                .with_config(SchemaConfig {
                    prefix: Some(prefix.into()),
                    ..Default::default()
                })
        };
        let tables = vec![
            scoped("/api", MethodModifier::Get),
            scoped("/api/v2", MethodModifier::Put),
        ];

        let first = SchemaPlugin::new(tables.clone(), SchemaMatchPolicy::FirstRegistered);
        let init = first
            .init("/api/v2/users/list".into(), RequestOptions::new())
            .await
            .unwrap();
        // "/api" matched first, leaving "/v2/users/list" which it does not declare
        assert_eq!(init.options.method, None);

        let specific = SchemaPlugin::new(tables, SchemaMatchPolicy::MostSpecific);
        let init = specific
            .init("/api/v2/users/list".into(), RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(init.options.method, Some(http::Method::PUT));
    }

    #[tokio::test]
    async fn test_strict_rejects_undeclared_route() {
        let schema = Schema::new().with_config(SchemaConfig {
            strict: true,
            base_url: Some("http://x.test".into()),
            ..Default::default()
        });
        let plugin = SchemaPlugin::new(vec![schema], SchemaMatchPolicy::default());
        let options = RequestOptions::new().with_base_url("http://x.test/");
        let err = plugin.init("/missing".into(), options).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_prefix_matches_only_at_path_boundary() {
        let schema = Schema::new()
            .route("/users", FetchSchema::new().method(MethodModifier::Put))
            .with_config(SchemaConfig {
                strict: true,
                prefix: Some("/admin".into()),
                ..Default::default()
            });
        let plugin = SchemaPlugin::new(vec![schema], SchemaMatchPolicy::default());

        let init = plugin
            .init("/administrators".into(), RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(init.url, "/administrators");
        assert_eq!(init.options.method, None);

        let init = plugin
            .init("/admin/users".into(), RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(init.options.method, Some(http::Method::PUT));
    }

    fn reject_all() -> SchemaRef {
        FnSchema::shared(|_| Validated::Issues(vec![Issue::new("rejected")]))
    }

    #[tokio::test]
    async fn test_text_and_form_bodies_are_validated() {
        let mut text = RequestOptions::new().with_body(Body::from("not validated"));
        let err = validate_request_inputs(Some(reject_all().as_ref()), None, None, &mut text, "/x")
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let upper = FnSchema::new(|v: Value| match v {
            Value::String(s) => Validated::Value(Value::String(s.to_uppercase())),
            other => Validated::Value(other),
        });
        let mut text = RequestOptions::new().with_body(Body::from("hi"));
        validate_request_inputs(Some(&upper), None, None, &mut text, "/x")
            .await
            .unwrap();
        assert_eq!(text.body, Some(Body::Text("HI".into())));

        let mut form = RequestOptions::new().with_body(Body::Form(vec![("id".into(), "1".into())]));
        let err = validate_request_inputs(Some(&SerdeSchema::<Id>::new()), None, None, &mut form, "/x")
            .await
            .unwrap_err();
        // form values arrive as strings
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_binary_body_cannot_be_validated() {
        let mut options = RequestOptions::new().with_body(Body::Bytes(bytes::Bytes::from_static(b"\x00")));
        let err = validate_request_inputs(Some(reject_all().as_ref()), None, None, &mut options, "/x")
            .await
            .unwrap_err();
        match err {
            Error::Validation(err) => assert!(err.message().contains("binary")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_validation_keeps_order() {
        let passthrough = FnSchema::new(Validated::Value);
        let mut options = RequestOptions::new()
            .with_query("zeta", "1")
            .with_query("alpha", "2")
            .with_query("mid", json!(["a", "b"]));
        validate_request_inputs(None, Some(&passthrough), None, &mut options, "/x")
            .await
            .unwrap();
        let keys: Vec<&str> = options.query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }
}
