//! # typed-fetch - a typed HTTP request pipeline
//!
//! typed-fetch wraps an HTTP transport (by default `reqwest`) with schema
//! validation, retry policies, lifecycle hooks and route-based plugins.
//! Failures come back as values you can branch on, or as errors in throw
//! mode.
//!
//! ## Quick Start
//!
//! ```no_run
//! use serde::Deserialize;
//! use std::time::Duration;
//! use typed_fetch::url::Params;
//! use typed_fetch::{Client, FetchResult, RequestOptions, RetryStrategy};
//!
//! #[derive(Deserialize)]
//! struct Todo {
//!     id: u64,
//!     title: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), typed_fetch::Error> {
//!     let client = Client::builder()
//!         .base_url("https://jsonplaceholder.typicode.com")?
//!         .timeout(Duration::from_secs(10))
//!         .retry(RetryStrategy::exponential(
//!             3,
//!             Duration::from_millis(100),
//!             Duration::from_secs(5),
//!         ))
//!         .build()?;
//!
//!     let options = RequestOptions::new().with_params(Params::positional(["1"]));
//!     match client.fetch("/todos/:id", options).await? {
//!         FetchResult::Success(response) => {
//!             let todo = response.json::<Todo>()?;
//!             println!("#{} {} ({:?})", todo.id, todo.title, todo.latency);
//!         }
//!         FetchResult::Failure(error) => eprintln!("failed: {:?}", error),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **URL building** - path templates with `:name` params, query serialization, `@method/` modifiers
//! - **Schema validation** - body, query, params and output validated through [`schema::StandardSchema`]
//! - **Route schemas** - per-path declarations matched by prefix or base URL
//! - **Retry strategies** - linear and exponential, with optional conditions
//! - **Hooks and plugins** - rewrite requests, observe responses, react to errors and retries
//! - **Errors as values** - HTTP failures return a tagged [`ErrorPayload`] unless throw mode is on
//! - **Cancellation** - caller signals and timeouts through `CancellationToken`
//!
//! ## Error Handling
//!
//! ```no_run
//! use typed_fetch::{Client, Error, FetchResult, RequestOptions};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! match client.fetch("/endpoint", RequestOptions::new()).await {
//!     Ok(FetchResult::Success(response)) => println!("Success: {:?}", response.data),
//!     Ok(FetchResult::Failure(error)) => eprintln!("HTTP {:?}: {:?}", error.status(), error),
//!     Err(Error::Validation(err)) => eprintln!("Schema mismatch: {}", err),
//!     Err(e) if e.is_abort() => eprintln!("Cancelled: {}", e),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod client;
mod error;
pub mod hooks;
mod options;
pub mod plugin;
pub mod request;
pub mod response;
pub mod retry;
pub mod schema;
pub mod transport;
pub mod url;

pub use auth::Auth;
pub use client::{fetch, Client, ClientBuilder};
pub use error::{BoxError, Error, ErrorBody, ErrorPayload, HttpErrorPayload, Result, ValidationErrorPayload};
pub use hooks::{FetchHooks, HookOutcome};
pub use options::RequestOptions;
pub use plugin::Plugin;
pub use request::Body;
pub use response::{FetchResponse, FetchResult, ResponseData};
pub use retry::RetryStrategy;
pub use schema::{FetchSchema, Schema, SchemaConfig, SchemaMatchPolicy, SerdeSchema, StandardSchema};
pub use transport::{ReqwestTransport, Transport};
