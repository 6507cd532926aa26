//! Example demonstrating retry strategies, lifecycle hooks and plugins.
//!
//! This example shows how to:
//! - Configure exponential backoff with a retry condition
//! - Observe every attempt through hooks
//! - Rewrite outgoing requests from a plugin
//! - Cancel an in-flight request
//!
//! Run with: `cargo run --example retry_and_hooks`

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use typed_fetch::hooks::{ErrorContext, ResponseContext};
use typed_fetch::request::RequestContext;
use typed_fetch::response::Response;
use typed_fetch::{Client, Error, FetchHooks, HookOutcome, Plugin, RequestOptions, Result, RetryStrategy};

/// Logs every lifecycle event.
struct Logger;

#[async_trait]
impl FetchHooks for Logger {
    async fn on_request(&self, ctx: &RequestContext) -> Result<HookOutcome<RequestContext>> {
        println!("-> {} {} (attempt {})", ctx.method, ctx.url, ctx.attempt);
        Ok(HookOutcome::NoChange)
    }

    async fn on_error(&self, ctx: &ErrorContext) -> Result<()> {
        println!("<- error {:?}", ctx.error.status());
        Ok(())
    }

    async fn on_retry(&self, ctx: &ResponseContext) -> Result<()> {
        println!("   retrying after {}", ctx.response.status());
        Ok(())
    }
}

/// Tags every request with a client identifier.
struct ClientTag;

#[async_trait]
impl Plugin for ClientTag {
    fn id(&self) -> &str {
        "client-tag"
    }

    fn name(&self) -> &str {
        "Client Tag"
    }

    fn hooks(&self) -> Option<Arc<dyn FetchHooks>> {
        Some(Arc::new(TagHooks))
    }
}

struct TagHooks;

#[async_trait]
impl FetchHooks for TagHooks {
    async fn on_request(&self, ctx: &RequestContext) -> Result<HookOutcome<RequestContext>> {
        let mut ctx = ctx.clone();
        ctx.headers
            .insert("x-client", http::HeaderValue::from_static("retry-and-hooks-demo"));
        Ok(HookOutcome::Replace(ctx))
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("typed_fetch=debug,retry_and_hooks=info")
        .init();

    let strategy = RetryStrategy::exponential(3, Duration::from_millis(100), Duration::from_secs(2))
        .with_jitter(true)
        .retry_if(|response: Option<&Response>| {
            response.is_some_and(|r| r.status().is_server_error() || r.status().as_u16() == 429)
        });

    let client = Client::builder()
        .base_url("https://httpbin.org")?
        .timeout(Duration::from_secs(10))
        .retry(strategy)
        .hooks(Arc::new(Logger))
        .plugin(Arc::new(ClientTag))
        .build()?;

    println!("=== Retry Example ===");
    let result = client.get("/status/503", RequestOptions::new()).await?;
    println!("Final error payload: {:?}", result.error());
    println!();

    println!("=== Hooks Example ===");
    if let Some(response) = client.get("/headers", RequestOptions::new()).await?.into_response() {
        println!("Attempts: {}", response.attempts);
        println!("Echoed headers: {:?}", response.data);
    }
    println!();

    println!("=== Cancellation Example ===");
    let signal = CancellationToken::new();
    let cancel = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });
    match client.get("/delay/5", RequestOptions::new().with_signal(signal)).await {
        Err(e) if e.is_abort() => println!("Cancelled: {}", e),
        other => println!("Unexpected outcome: {:?}", other.map(|r| r.is_success())),
    }

    Ok(())
}
