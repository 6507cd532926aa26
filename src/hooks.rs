//! Lifecycle hooks.
//!
//! Hooks run at five points of a request: after the request is built, after
//! the response arrives, on success, on error and before a retry. Hooks of
//! one kind run in registration order, top-level hooks first. A hook that
//! fails aborts the whole request.

use crate::error::ErrorPayload;
use crate::request::RequestContext;
use crate::response::{Response, ResponseData};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// What a hook did with the value it was shown.
#[derive(Debug, Clone)]
pub enum HookOutcome<T> {
    /// Leave the value as it is.
    NoChange,
    /// Use this value from now on.
    Replace(T),
}

/// A replacement produced by an `on_response` hook.
#[derive(Debug, Clone)]
pub enum ResponseReplacement {
    /// Swap only the response.
    Response(Response),
    /// Swap the response and the request it is paired with.
    Context(ResponseContext),
}

/// A response paired with the request that produced it.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub response: Response,
    pub request: RequestContext,
}

impl ResponseContext {
    /// An independent copy of the response whose body can be read freely.
    pub fn cloned_response(&self) -> Response {
        self.response.clone()
    }
}

/// Passed to `on_success` hooks.
#[derive(Debug, Clone)]
pub struct SuccessContext {
    /// The parsed and, if a schema was set, validated data.
    pub data: ResponseData,
    pub response: Response,
    pub request: RequestContext,
}

impl SuccessContext {
    pub fn cloned_response(&self) -> Response {
        self.response.clone()
    }
}

/// Passed to `on_error` hooks.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub response: Response,
    /// The response body as text.
    pub response_text: String,
    pub request: RequestContext,
    pub error: ErrorPayload,
}

/// Callbacks invoked during a request's lifecycle.
///
/// Every method has a no-op default; implement only the ones you need.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use typed_fetch::hooks::{FetchHooks, HookOutcome};
/// use typed_fetch::request::RequestContext;
/// use typed_fetch::Result;
///
/// struct RequestId;
///
/// #[async_trait]
/// impl FetchHooks for RequestId {
///     async fn on_request(&self, ctx: &RequestContext) -> Result<HookOutcome<RequestContext>> {
///         let mut ctx = ctx.clone();
///         ctx.headers.insert("x-request-id", http::HeaderValue::from_static("abc"));
///         Ok(HookOutcome::Replace(ctx))
///     }
/// }
/// ```
#[async_trait]
pub trait FetchHooks: Send + Sync {
    async fn on_request(&self, _ctx: &RequestContext) -> Result<HookOutcome<RequestContext>> {
        Ok(HookOutcome::NoChange)
    }

    async fn on_response(&self, _ctx: &ResponseContext) -> Result<HookOutcome<ResponseReplacement>> {
        Ok(HookOutcome::NoChange)
    }

    async fn on_success(&self, _ctx: &SuccessContext) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _ctx: &ErrorContext) -> Result<()> {
        Ok(())
    }

    /// Runs after a retry has been decided and before the delay.
    async fn on_retry(&self, _ctx: &ResponseContext) -> Result<()> {
        Ok(())
    }
}

/// Hooks collected for one request, in execution order.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn FetchHooks>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hooks: Arc<dyn FetchHooks>) {
        self.hooks.push(hooks);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn run_on_request(&self, mut ctx: RequestContext) -> Result<RequestContext> {
        for hooks in &self.hooks {
            if let HookOutcome::Replace(replaced) = hooks.on_request(&ctx).await? {
                ctx = replaced;
            }
        }
        Ok(ctx)
    }

    pub async fn run_on_response(&self, mut ctx: ResponseContext) -> Result<ResponseContext> {
        for hooks in &self.hooks {
            match hooks.on_response(&ctx).await? {
                HookOutcome::NoChange => {}
                HookOutcome::Replace(ResponseReplacement::Response(response)) => ctx.response = response,
                HookOutcome::Replace(ResponseReplacement::Context(replaced)) => ctx = replaced,
            }
        }
        Ok(ctx)
    }

    pub async fn run_on_success(&self, ctx: &SuccessContext) -> Result<()> {
        for hooks in &self.hooks {
            hooks.on_success(ctx).await?;
        }
        Ok(())
    }

    pub async fn run_on_error(&self, ctx: &ErrorContext) -> Result<()> {
        for hooks in &self.hooks {
            hooks.on_error(ctx).await?;
        }
        Ok(())
    }

    pub async fn run_on_retry(&self, ctx: &ResponseContext) -> Result<()> {
        for hooks in &self.hooks {
            hooks.on_retry(ctx).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain").field("len", &self.hooks.len()).finish()
    }
}
