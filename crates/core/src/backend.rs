//! Browser backend seam.
//!
//! The session manager talks to the browser through these traits rather
//! than a concrete engine, mirroring how commands elsewhere in the stack
//! are written against page/session abstractions. The production
//! implementation lives in [`crate::cdp_backend`]; tests use
//! [`crate::testing::MockBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

pub type PageRef = Arc<dyn PageBackend>;

/// Page-lifecycle notification for one browsing context.
///
/// Observers run on the same cooperative task as the event dispatch, never
/// concurrently with each other for the same context.
#[derive(Clone)]
pub enum PageEvent {
    Created(PageRef),
    Closed(String),
}

/// One live browser connection.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Create an isolated browsing context; returns its id.
    async fn new_context(&self) -> Result<String>;

    /// Install an init script in the context. Scripts run in every page of
    /// the context before any page-authored script, in the order this
    /// method was called.
    async fn add_init_script(&self, context_id: &str, source: &str) -> Result<()>;

    /// Pages currently open in the context, oldest first.
    async fn pages(&self, context_id: &str) -> Result<Vec<PageRef>>;

    /// Open a new page in the context.
    async fn new_page(&self, context_id: &str) -> Result<PageRef>;

    /// Subscribe to page-lifecycle events for the context.
    fn subscribe_pages(&self, context_id: &str) -> mpsc::UnboundedReceiver<PageEvent>;

    /// Release the context. Must be safe to call more than once.
    async fn close_context(&self, context_id: &str) -> Result<()>;

    /// Release the browser connection. Must be safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// One page owned by the browser engine. Held weakly by the session
/// manager: dropping a [`PageRef`] never closes the underlying page.
#[async_trait]
pub trait PageBackend: Send + Sync {
    /// Engine identifier for the page (CDP target id).
    fn id(&self) -> &str;

    async fn url(&self) -> Result<String>;

    async fn navigate(&self, url: &str) -> Result<()>;

    /// Evaluate an expression in the page, returning its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Override outbound HTTP headers for requests from this page.
    async fn set_extra_http_headers(&self, headers: &[(String, String)]) -> Result<()>;

    /// Start surfacing the page's console output to the process log.
    async fn observe_console(&self) -> Result<()>;

    /// Start surfacing request/response traffic to the process log.
    async fn observe_network(&self) -> Result<()>;
}
