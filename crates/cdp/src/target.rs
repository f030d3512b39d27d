//! Command session bound to a single attached target.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use crate::Result;
use crate::client::ClientInner;
use crate::error::CdpError;
use crate::protocol::CdpEvent;

pub struct TargetSession {
    inner: Arc<ClientInner>,
    target_id: String,
    session_id: String,
}

impl TargetSession {
    pub(crate) fn new(inner: Arc<ClientInner>, target_id: String, session_id: String) -> Self {
        Self {
            inner,
            target_id,
            session_id,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send a command scoped to this target.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.inner.call(method, params, Some(&self.session_id)).await
    }

    /// Subscribe to events emitted by this target.
    pub fn events(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        self.inner.subscribe(Some(&self.session_id))
    }

    /// Enable the domains walletflow relies on.
    pub async fn enable_domains(&self) -> Result<()> {
        self.call("Page.enable", None).await?;
        self.call("Runtime.enable", None).await?;
        debug!(target = "wf.cdp", session = %self.session_id, "domains enabled");
        Ok(())
    }

    /// Install a script that runs on every subsequent document in this
    /// target before any page-authored script.
    pub async fn add_init_script(&self, source: &str) -> Result<String> {
        let result = self
            .call(
                "Page.addScriptToEvaluateOnNewDocument",
                Some(json!({"source": source})),
            )
            .await?;
        result["identifier"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CdpError::InvalidResponse("missing script identifier".into()))
    }

    /// Resume a target that was created paused (`waitForDebuggerOnStart`).
    pub async fn resume_if_waiting(&self) -> Result<()> {
        self.call("Runtime.runIfWaitingForDebugger", None).await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let result = self.call("Page.navigate", Some(json!({"url": url}))).await?;
        if let Some(error_text) = result["errorText"].as_str() {
            if !error_text.is_empty() {
                return Err(CdpError::NavigationFailed(format!("{url}: {error_text}")));
            }
        }
        Ok(())
    }

    /// Wait for the next load event, up to `timeout`.
    pub async fn wait_for_load(&self, timeout: Duration) -> Result<()> {
        let mut events = self.events();
        let wait = async {
            while let Some(event) = events.recv().await {
                if event.method == "Page.loadEventFired" {
                    return Ok(());
                }
            }
            Err(CdpError::ConnectionClosed)
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CdpError::Timeout("load event".into()))?
    }

    /// Evaluate an expression and return its value by value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let text = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("evaluation failed");
            return Err(CdpError::JavaScript(text.to_string()));
        }
        Ok(result["result"]["value"].clone())
    }

    /// Override outbound HTTP headers for this target.
    pub async fn set_extra_http_headers(&self, headers: &Value) -> Result<()> {
        self.call("Network.enable", None).await?;
        self.call(
            "Network.setExtraHTTPHeaders",
            Some(json!({"headers": headers})),
        )
        .await?;
        Ok(())
    }

    /// Enable network event delivery (observe via [`TargetSession::events`]).
    pub async fn enable_network_events(&self) -> Result<()> {
        self.call("Network.enable", None).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.inner
            .call(
                "Target.closeTarget",
                Some(json!({"targetId": self.target_id})),
                None,
            )
            .await?;
        Ok(())
    }
}
