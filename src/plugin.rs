//! Plugins and the plugin pipeline.
//!
//! A plugin may rewrite the outgoing URL and options, contribute hooks, and
//! contribute a route [`Schema`]. Plugins run sequentially: each one sees the
//! output of the previous one.

use crate::hooks::{FetchHooks, HookChain};
use crate::options::RequestOptions;
use crate::schema::Schema;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// The URL and options produced by a plugin's `init`.
#[derive(Debug, Clone)]
pub struct PluginInit {
    pub url: String,
    pub options: RequestOptions,
}

/// A composable unit of request rewriting, hooks and route schemas.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use typed_fetch::plugin::{Plugin, PluginInit};
/// use typed_fetch::{RequestOptions, Result};
///
/// /// Sends every request to the v2 API.
/// struct ApiV2;
///
/// #[async_trait]
/// impl Plugin for ApiV2 {
///     fn id(&self) -> &str {
///         "api-v2"
///     }
///
///     fn name(&self) -> &str {
///         "API v2"
///     }
///
///     async fn init(&self, url: String, options: RequestOptions) -> Result<PluginInit> {
///         Ok(PluginInit {
///             url: format!("/v2{}", url),
///             options,
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn version(&self) -> Option<&str> {
        None
    }

    /// Rewrites the URL and options before the request is built. Runs again
    /// on every retry.
    async fn init(&self, url: String, options: RequestOptions) -> Result<PluginInit> {
        Ok(PluginInit { url, options })
    }

    fn hooks(&self) -> Option<Arc<dyn FetchHooks>> {
        None
    }

    /// Route table this plugin contributes to schema matching.
    fn schema(&self) -> Option<&Schema> {
        None
    }

    /// Names of extra option fields this plugin reads from
    /// [`RequestOptions::extra`]. Informational only.
    fn extra_options(&self) -> &[&str] {
        &[]
    }
}

/// Output of the plugin pipeline.
#[derive(Debug)]
pub struct Prepared {
    pub url: String,
    pub options: RequestOptions,
    pub hooks: HookChain,
}

/// Runs every plugin in `options.plugins` in order and collects hooks.
///
/// Top-level hooks from `options.hooks` come first, then each plugin's hooks
/// in plugin order.
///
/// # Errors
///
/// Returns the first error raised by a plugin's `init`.
pub async fn apply_plugins(mut url: String, mut options: RequestOptions) -> Result<Prepared> {
    let plugins = options.plugins.clone();
    let mut hooks = HookChain::new();
    if let Some(top_level) = &options.hooks {
        hooks.push(top_level.clone());
    }

    for plugin in &plugins {
        let init = plugin.init(url, options).await?;
        url = init.url;
        options = init.options;
        if let Some(plugin_hooks) = plugin.hooks() {
            hooks.push(plugin_hooks);
        }
        tracing::trace!(plugin = plugin.id(), url = %url, "Applied plugin");
    }

    Ok(Prepared { url, options, hooks })
}
