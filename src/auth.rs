//! Authorization header contract.
//!
//! Each credential field is either a literal or a resolver invoked on every
//! attempt, so tokens can be refreshed between retries. A credential that
//! resolves to nothing produces no header at all.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

type Resolver = Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// A credential value: a literal or a deferred lookup.
#[derive(Clone)]
pub enum Credential {
    Value(Option<String>),
    Resolver(Resolver),
}

impl Credential {
    /// A credential computed on demand, possibly asynchronously.
    ///
    /// # Examples
    ///
    /// ```
    /// use typed_fetch::auth::Credential;
    ///
    /// let token = Credential::resolve(|| async { Some("fresh-token".to_string()) });
    /// ```
    pub fn resolve<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Option<String>> + Send + 'static,
    {
        Credential::Resolver(Arc::new(move || Box::pin(f())))
    }

    async fn get(&self) -> Option<String> {
        let value = match self {
            Credential::Value(value) => value.clone(),
            Credential::Resolver(resolve) => resolve().await,
        };
        value.filter(|v| !v.is_empty())
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Credential::Value(Some(value.to_string()))
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Credential::Value(Some(value))
    }
}

impl From<Option<String>> for Credential {
    fn from(value: Option<String>) -> Self {
        Credential::Value(value)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Value(Some(_)) => f.write_str("Credential(<redacted>)"),
            Credential::Value(None) => f.write_str("Credential(None)"),
            Credential::Resolver(_) => f.write_str("Credential(<resolver>)"),
        }
    }
}

/// How the `authorization` header is built.
#[derive(Debug, Clone)]
pub enum Auth {
    /// `authorization: Bearer <token>`
    Bearer { token: Credential },
    /// `authorization: Basic <base64(username:password)>`
    Basic {
        username: Credential,
        password: Credential,
    },
    /// `authorization: <prefix> <value>`
    Custom { prefix: Credential, value: Credential },
}

impl Auth {
    pub fn bearer(token: impl Into<Credential>) -> Self {
        Auth::Bearer {
            token: token.into(),
        }
    }

    pub fn basic(username: impl Into<Credential>, password: impl Into<Credential>) -> Self {
        Auth::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn custom(prefix: impl Into<Credential>, value: impl Into<Credential>) -> Self {
        Auth::Custom {
            prefix: prefix.into(),
            value: value.into(),
        }
    }

    /// Resolves the `authorization` header value, or `None` when the primary
    /// credential is absent or empty.
    pub async fn header_value(&self) -> Option<String> {
        match self {
            Auth::Bearer { token } => {
                let token = token.get().await?;
                Some(format!("Bearer {}", token))
            }
            Auth::Basic { username, password } => {
                let username = username.get().await?;
                let password = password.get().await.unwrap_or_default();
                let encoded = STANDARD.encode(format!("{}:{}", username, password));
                Some(format!("Basic {}", encoded))
            }
            Auth::Custom { prefix, value } => {
                let value = value.get().await?;
                match prefix.get().await {
                    Some(prefix) => Some(format!("{} {}", prefix, value)),
                    None => Some(value),
                }
            }
        }
    }
}
