//! URL construction.
//!
//! Turns a path template (or an absolute URL) plus a base URL, path
//! parameters and query parameters into the URL handed to the transport.

use crate::{Error, Result};
use http::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use std::fmt;
use url::{form_urlencoded, Url};

/// Characters left unescaped in a substituted param value. Matches the unreserved set of
/// `encodeURIComponent`.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Query parameters, in insertion order.
///
/// Strings pass through verbatim, arrays expand into one pair per element,
/// objects and other scalars are JSON-encoded, and `null` is omitted.
pub type Query = Vec<(String, Value)>;

/// A route-level method declaration written as a URL prefix, e.g. `@post/users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodModifier {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl MethodModifier {
    /// Parses a lowercase modifier token. Any other spelling is not a modifier.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "get" => Some(MethodModifier::Get),
            "post" => Some(MethodModifier::Post),
            "put" => Some(MethodModifier::Put),
            "patch" => Some(MethodModifier::Patch),
            "delete" => Some(MethodModifier::Delete),
            _ => None,
        }
    }

    /// Extracts the modifier from the start of `url`, if present.
    pub fn from_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix('@')?;
        let token = rest.split('/').next()?;
        Self::parse(token)
    }

    /// The HTTP method this modifier stands for.
    pub fn method(self) -> Method {
        match self {
            MethodModifier::Get => Method::GET,
            MethodModifier::Post => Method::POST,
            MethodModifier::Put => Method::PUT,
            MethodModifier::Patch => Method::PATCH,
            MethodModifier::Delete => Method::DELETE,
        }
    }

    fn token(self) -> &'static str {
        match self {
            MethodModifier::Get => "get",
            MethodModifier::Post => "post",
            MethodModifier::Put => "put",
            MethodModifier::Patch => "patch",
            MethodModifier::Delete => "delete",
        }
    }
}

/// Removes a leading `@<method>/` marker, returning the modifier and the
/// remaining path (which keeps its leading `/`).
pub fn strip_method_modifier(url: &str) -> (Option<MethodModifier>, &str) {
    match MethodModifier::from_url(url) {
        Some(modifier) => {
            let marker_len = 1 + modifier.token().len();
            (Some(modifier), &url[marker_len..])
        }
        None => (None, url),
    }
}

/// Dynamic path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Params {
    /// Substituted into successive `:name` segments, left to right.
    Positional(Vec<String>),
    /// Substituted by exact `:name` match anywhere in the path.
    Named(Vec<(String, String)>),
}

impl Params {
    /// Builds positional params from anything string-like.
    pub fn positional<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Builds named params from `(name, value)` pairs.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// The URL produced by [`build_url`].
///
/// Relative base URLs cannot be resolved into a [`Url`], so they are kept as
/// a string; transports must accept either form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestUrl {
    Absolute(Url),
    Relative(String),
}

impl RequestUrl {
    /// Returns the URL as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            RequestUrl::Absolute(url) => url.as_str(),
            RequestUrl::Relative(url) => url,
        }
    }

    /// Resolves to an absolute [`Url`], failing for relative URLs.
    pub fn to_absolute(&self) -> Result<Url> {
        match self {
            RequestUrl::Absolute(url) => Ok(url.clone()),
            RequestUrl::Relative(url) => Err(Error::Configuration(format!(
                "Invalid URL {}. Are you passing in a relative url but not setting the baseURL?",
                url
            ))),
        }
    }
}

impl fmt::Display for RequestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to [`build_url`] besides the path itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlParts<'a> {
    pub base_url: Option<&'a str>,
    pub params: Option<&'a Params>,
    pub query: &'a [(String, Value)],
    /// Leave unmatched `:name` tokens in place instead of failing.
    pub allow_unmatched_params: bool,
}

/// Builds the request URL.
///
/// A leading method modifier is stripped. Absolute inputs (`http://` or
/// `https://`) ignore the base URL. The base URL always gains a trailing
/// slash before the path is appended.
///
/// # Errors
///
/// Returns [`Error::Configuration`] when a `:name` token has no matching
/// parameter (unless `allow_unmatched_params` is set) or when the base URL
/// cannot be parsed.
///
/// # Examples
///
/// ```
/// use typed_fetch::url::{build_url, Params, UrlParts};
///
/// let params = Params::positional(["2"]);
/// let url = build_url(
///     "/param/:id",
///     UrlParts {
///         base_url: Some("http://localhost:4001"),
///         params: Some(&params),
///         ..Default::default()
///     },
/// )
/// .unwrap();
/// assert_eq!(url.as_str(), "http://localhost:4001/param/2");
/// ```
pub fn build_url(input: &str, parts: UrlParts<'_>) -> Result<RequestUrl> {
    let (_, input) = strip_method_modifier(input);

    let (mut base, rest) = match split_absolute(input) {
        Some((origin, rest)) => (origin.to_string(), rest),
        None => (parts.base_url.unwrap_or_default().to_string(), input),
    };
    if !base.ends_with('/') {
        base.push('/');
    }

    let (path, inline_query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };

    let path = substitute_params(path, parts.params, parts.allow_unmatched_params)?;
    let path = path.strip_prefix('/').unwrap_or(&path);

    let query = serialize_query(inline_query, parts.query);

    if !is_absolute(&base) {
        return Ok(RequestUrl::Relative(format!("{}{}{}", base, path, query)));
    }

    let base_url = Url::parse(&base).map_err(|e| {
        tracing::debug!(error = %e, base = %base, "Base URL failed to parse");
        let hint = if parts.base_url.is_some() {
            "Please validate that you are passing the correct input."
        } else {
            "Are you passing in a relative url but not setting the baseURL?"
        };
        Error::Configuration(format!("Invalid URL {}. {}", input, hint))
    })?;
    // `./` keeps a first segment like `items:batchGet` from parsing as a scheme.
    Ok(RequestUrl::Absolute(
        base_url.join(&format!("./{}{}", path, query))?,
    ))
}

fn is_absolute(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Splits an absolute URL into `scheme://authority` and the rest.
fn split_absolute(url: &str) -> Option<(&str, &str)> {
    if !is_absolute(url) {
        return None;
    }
    let authority_start = url.find("://")? + 3;
    match url[authority_start..].find(['/', '?']) {
        Some(offset) => Some(url.split_at(authority_start + offset)),
        None => Some((url, "")),
    }
}

/// Returns the names of `:name` segments in a path template, in order.
pub fn param_names(path: &str) -> Vec<&str> {
    path.split('/').filter_map(segment_param).collect()
}

fn segment_param(segment: &str) -> Option<&str> {
    let name = segment.strip_prefix(':')?;
    (!name.is_empty()).then_some(name)
}

fn substitute_params(path: &str, params: Option<&Params>, allow_unmatched: bool) -> Result<String> {
    let mut unmatched = Vec::new();
    let substituted = match params {
        Some(Params::Positional(values)) => {
            let mut values = values.iter();
            path.split('/')
                .map(|segment| match segment_param(segment) {
                    Some(name) => match values.next() {
                        Some(value) => encode_param(value),
                        None => {
                            unmatched.push(name.to_string());
                            segment.to_string()
                        }
                    },
                    None => segment.to_string(),
                })
                .collect::<Vec<_>>()
                .join("/")
        }
        Some(Params::Named(pairs)) => {
            for name in param_names(path) {
                if !pairs.iter().any(|(key, _)| key == name) {
                    unmatched.push(name.to_string());
                }
            }
            replace_named(path, pairs)
        }
        None => {
            unmatched.extend(param_names(path).into_iter().map(str::to_string));
            path.to_string()
        }
    };

    if !unmatched.is_empty() && !allow_unmatched {
        return Err(Error::Configuration(format!(
            "Missing path parameter(s) {} for {}",
            unmatched
                .iter()
                .map(|name| format!(":{}", name))
                .collect::<Vec<_>>()
                .join(", "),
            path
        )));
    }
    Ok(substituted)
}

/// Percent-encodes a substituted value. Template text is never re-encoded.
fn encode_param(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// Replaces every `:name` token whose name is in `pairs`. A token ends at the
/// first character that is not alphanumeric or `_`.
fn replace_named(path: &str, pairs: &[(String, String)]) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(pos) = rest.find(':') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..len];
        match pairs.iter().find(|(key, _)| key == name) {
            Some((_, value)) if !name.is_empty() => out.push_str(&encode_param(value)),
            _ => {
                out.push(':');
                out.push_str(name);
            }
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}

fn query_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn serialize_query(inline: Option<&str>, query: &[(String, Value)]) -> String {
    let mut pairs: Vec<(String, String)> = inline
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    for (key, value) in query {
        match value {
            Value::Null => continue,
            Value::Array(items) => {
                pairs.extend(items.iter().map(|item| (key.clone(), query_scalar(item))));
            }
            scalar => {
                pairs.retain(|(k, _)| k != key);
                pairs.push((key.clone(), query_scalar(scalar)));
            }
        }
    }

    if pairs.is_empty() {
        return String::new();
    }
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    // Spaces are `%20`, never `+`. Literal pluses were already escaped as %2B.
    format!("?{}", encoded.replace('+', "%20"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(input: &str, base: Option<&str>, params: Option<&Params>, query: &Query) -> String {
        build_url(
            input,
            UrlParts {
                base_url: base,
                params,
                query,
                allow_unmatched_params: false,
            },
        )
        .unwrap()
        .to_string()
    }

    #[test]
    fn test_positional_params_left_to_right() {
        let params = Params::positional(["7", "42"]);
        let url = build(
            "/users/:user/posts/:post",
            Some("http://localhost:4001"),
            Some(&params),
            &vec![],
        );
        assert_eq!(url, "http://localhost:4001/users/7/posts/42");
    }

    #[test]
    fn test_named_params_exact_match() {
        let params = Params::named([("id", "1"), ("idx", "2")]);
        let url = build("/a/:idx/b/:id", Some("http://x.test"), Some(&params), &vec![]);
        assert_eq!(url, "http://x.test/a/2/b/1");
    }

    #[test]
    fn test_unmatched_param_is_configuration_error() {
        let params = Params::positional(["1"]);
        let err = build_url(
            "/a/:one/:two",
            UrlParts {
                base_url: Some("http://x.test"),
                params: Some(&params),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains(":two")));
    }

    #[test]
    fn test_unmatched_param_left_literal_when_allowed() {
        let url = build_url(
            "/a/:id",
            UrlParts {
                base_url: Some("http://x.test"),
                allow_unmatched_params: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://x.test/a/:id");
    }

    #[test]
    fn test_query_serialization_rules() {
        let query: Query = vec![
            ("term".into(), json!("hello world")),
            ("tag".into(), json!(["a", "b"])),
            ("filter".into(), json!({"x": 1})),
            ("skip".into(), Value::Null),
            ("page".into(), json!(2)),
        ];
        let url = build("/search", Some("http://x.test"), None, &query);
        assert_eq!(
            url,
            "http://x.test/search?term=hello%20world&tag=a&tag=b&filter=%7B%22x%22%3A1%7D&page=2"
        );
    }

    #[test]
    fn test_absolute_input_ignores_base() {
        let query: Query = vec![("q".into(), json!("1"))];
        let url = build("https://other.test/v1/items", Some("http://x.test"), None, &query);
        assert_eq!(url, "https://other.test/v1/items?q=1");
    }

    #[test]
    fn test_inline_query_is_kept_and_overridden() {
        let query: Query = vec![("b".into(), json!("3"))];
        let url = build("/p?a=1&b=2", Some("http://x.test"), None, &query);
        assert_eq!(url, "http://x.test/p?a=1&b=3");
    }

    #[test]
    fn test_method_modifier_is_stripped() {
        let url = build("@post/signin", Some("http://x.test"), None, &vec![]);
        assert_eq!(url, "http://x.test/signin");
        assert_eq!(MethodModifier::from_url("@post/signin"), Some(MethodModifier::Post));
        assert_eq!(MethodModifier::from_url("@POST/signin"), None);
        assert_eq!(MethodModifier::from_url("@head/x"), None);
    }

    #[test]
    fn test_base_url_path_is_preserved() {
        let url = build("/todos/1", Some("http://x.test/api"), None, &vec![]);
        assert_eq!(url, "http://x.test/api/todos/1");
    }

    #[test]
    fn test_relative_base_returns_string() {
        let url = build_url("/todos", UrlParts::default()).unwrap();
        assert_eq!(url, RequestUrl::Relative("/todos".to_string()));
        assert!(url.to_absolute().is_err());

        let url = build("todos", Some("/api"), None, &vec![]);
        assert_eq!(url, "/api/todos");
    }

    #[test]
    fn test_path_segments_are_percent_encoded() {
        let params = Params::named([("name", "a b"), ("ext", "é")]);
        let url = build("/files/:name/:ext", Some("http://x.test"), Some(&params), &vec![]);
        assert_eq!(url, "http://x.test/files/a%20b/%C3%A9");
    }

    #[test]
    fn test_literal_path_text_is_not_reencoded() {
        let url = build("/search/caf%C3%A9", Some("http://x.test"), None, &vec![]);
        assert_eq!(url, "http://x.test/search/caf%C3%A9");

        let url = build("/v1/items:batchGet", Some("http://x.test"), None, &vec![]);
        assert_eq!(url, "http://x.test/v1/items:batchGet");

        let url = build("items:batchGet", Some("http://x.test/v1"), None, &vec![]);
        assert_eq!(url, "http://x.test/v1/items:batchGet");

        let url = build("https://h.test/a%2Fb/x", None, None, &vec![]);
        assert_eq!(url, "https://h.test/a%2Fb/x");
    }

    #[test]
    fn test_param_values_are_encoded_as_components() {
        let params = Params::positional(["a/b", "x@y"]);
        let url = build("/files/:dir/:owner", Some("http://x.test"), Some(&params), &vec![]);
        assert_eq!(url, "http://x.test/files/a%2Fb/x%40y");
    }

    #[test]
    fn test_build_is_idempotent() {
        let params = Params::positional(["9"]);
        let query: Query = vec![("k".into(), json!(["1", "2"]))];
        let first = build("/x/:id", Some("http://x.test"), Some(&params), &query);
        let second = build("/x/:id", Some("http://x.test"), Some(&params), &query);
        assert_eq!(first, second);
    }
}
