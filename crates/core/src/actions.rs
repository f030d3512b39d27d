//! Action registry: the tool surface exposed to the external agent.
//!
//! The registry is built once at startup and shared read-only across
//! sessions; handlers must be safe to invoke concurrently from different
//! sessions. Handler failures are converted into failed [`ActionResult`]s
//! the agent can reason about, never process-level faults.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::SessionContext;

/// Outcome of one action invocation.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Extracted text content for the agent.
    pub content: String,
    /// Whether the agent should retain this result in working memory.
    pub include_in_memory: bool,
    /// False when the handler failed; the content then carries the error.
    pub ok: bool,
}

impl ActionResult {
    pub fn ok(content: impl Into<String>, include_in_memory: bool) -> Self {
        Self {
            content: content.into(),
            include_in_memory,
            ok: true,
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            include_in_memory: false,
            ok: false,
        }
    }
}

/// A capability the agent can invoke against the active page.
///
/// Handlers must not block past the caller's step timeout; the registry
/// performs no retries.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(&self, ctx: &SessionContext, args: &Value) -> anyhow::Result<ActionResult>;
}

#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in capabilities.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("navigate", Arc::new(Navigate));
        registry.register("attach_observers", Arc::new(AttachObservers));
        registry.register(
            "set_origin_header",
            Arc::new(SetOriginHeader { origin: None }),
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Invoke a named action against the session's active page.
    ///
    /// Unknown names and handler errors both come back as failed results;
    /// the error never propagates as a fault.
    pub async fn invoke(&self, name: &str, ctx: &SessionContext, args: &Value) -> Result<ActionResult> {
        let Some(handler) = self.handlers.get(name) else {
            warn!(target = "wf.actions", action = %name, "unknown action");
            return Ok(ActionResult::failed(format!("unknown action: {name}")));
        };

        debug!(target = "wf.actions", action = %name, session = %ctx.session().id(), "invoke");
        match handler.run(ctx, args).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(target = "wf.actions", action = %name, error = %e, "action failed");
                Ok(ActionResult::failed(format!("action {name} failed: {e:#}")))
            }
        }
    }
}

/// Navigate the active page to `args.url` and refresh the snapshot.
pub struct Navigate;

#[async_trait]
impl ActionHandler for Navigate {
    async fn run(&self, ctx: &SessionContext, args: &Value) -> anyhow::Result<ActionResult> {
        let url = args["url"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("navigate requires a url argument"))?;
        ctx.goto(url).await?;
        ctx.refresh_snapshot().await?;
        Ok(ActionResult::ok(format!("navigated to {url}"), true))
    }
}

/// Attach passive console and network observers to the active page.
pub struct AttachObservers;

#[async_trait]
impl ActionHandler for AttachObservers {
    async fn run(&self, ctx: &SessionContext, _args: &Value) -> anyhow::Result<ActionResult> {
        let page = ctx.active_page()?;
        page.observe_console().await?;
        page.observe_network().await?;
        Ok(ActionResult::ok(
            "console and network observers attached",
            false,
        ))
    }
}

/// Fixed `Origin` override for pages whose target dapp rejects requests
/// from origins outside its allow-list.
pub struct SetOriginHeader {
    /// `None` derives the origin from the active page's own URL.
    pub origin: Option<String>,
}

#[async_trait]
impl ActionHandler for SetOriginHeader {
    async fn run(&self, ctx: &SessionContext, args: &Value) -> anyhow::Result<ActionResult> {
        let page = ctx.active_page()?;
        let explicit = args["origin"].as_str().map(str::to_string).or_else(|| self.origin.clone());
        let origin = match explicit {
            Some(origin) => origin,
            None => {
                let url = page.url().await?;
                origin_of(&url)
                    .ok_or_else(|| anyhow::anyhow!("cannot derive origin from {url}"))?
            }
        };
        page.set_extra_http_headers(&[("Origin".to_string(), origin.clone())])
            .await?;
        Ok(ActionResult::ok(format!("Origin header set to {origin}"), true))
    }
}

fn origin_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}://{host}:{port}", parsed.scheme())),
        None => Some(format!("{}://{host}", parsed.scheme())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_derivation() {
        assert_eq!(
            origin_of("https://app.example.com/connect?x=1").as_deref(),
            Some("https://app.example.com")
        );
        assert_eq!(
            origin_of("http://localhost:3000/page").as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(origin_of("not a url"), None);
    }
}
