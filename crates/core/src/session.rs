//! Session-scoped browsing contexts.
//!
//! A [`SessionContext`] owns exactly one browsing context for the lifetime
//! of a logical session: it injects the ordered bootstrap scripts, keeps the
//! active-page pointer current across new-page events, and caches a DOM
//! snapshot for the agent's first observation. Opening a session creates
//! the context, so initialization cannot run twice for the same context
//! instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BrowserBackend, PageEvent, PageRef};
use crate::error::{FlowError, Result};
use crate::scripts::{ScriptStore, relay_endpoint_script, session_identity_script};

/// How a session's browser was provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Local,
    Remote,
}

/// Immutable session identity and endpoints. Created at request start,
/// destroyed with its context and browser.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    kind: SessionKind,
    /// Token of the remote provisioning session, when one exists.
    remote_session_id: Option<String>,
    relay_base_url: String,
}

impl Session {
    /// Bind a session identity. A caller-supplied id wins; otherwise a
    /// fresh uuid keeps the identity unique and stable for the session's
    /// lifetime.
    pub fn new(id: Option<String>, kind: SessionKind, relay_base_url: impl Into<String>) -> Self {
        let id = id
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id,
            kind,
            remote_session_id: None,
            relay_base_url: relay_base_url.into(),
        }
    }

    pub fn with_remote_session_id(mut self, remote_session_id: Option<String>) -> Self {
        self.remote_session_id = remote_session_id;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn remote_session_id(&self) -> Option<&str> {
        self.remote_session_id.as_deref()
    }

    pub fn relay_base_url(&self) -> &str {
        &self.relay_base_url
    }
}

/// Caller-tunable context behavior.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound for settle waits after navigation.
    pub wait_for_idle: Option<Duration>,
    /// Outline interactive elements in the snapshot pass.
    pub highlight_elements: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            wait_for_idle: Some(Duration::from_secs(10)),
            highlight_elements: true,
        }
    }
}

/// A session-bound browsing context with an active-page pointer.
pub struct SessionContext {
    session: Session,
    options: SessionOptions,
    backend: Arc<dyn BrowserBackend>,
    context_id: String,
    /// Live pages, oldest first; the active page is the newest.
    pages: Arc<Mutex<Vec<PageRef>>>,
    snapshot: Mutex<Option<String>>,
    watcher: tokio::task::JoinHandle<()>,
    closed: AtomicBool,
}

/// Open a session: fresh context, ordered bootstrap injection, active-page
/// tracking, initial snapshot.
///
/// Injection order is part of the contract: the wallet-provider payload may
/// read the globals bound by the identity and relay scripts.
pub async fn open_session(
    backend: Arc<dyn BrowserBackend>,
    session: Session,
    store: &ScriptStore,
    options: SessionOptions,
) -> Result<SessionContext> {
    // Missing scripts are fatal before any context exists.
    let wallet_script = store.wallet_provider()?;

    let context_id = backend.new_context().await?;
    info!(target = "wf.session", session = %session.id(), context = %context_id, "context opened");

    backend
        .add_init_script(&context_id, &session_identity_script(session.id()))
        .await?;
    backend
        .add_init_script(&context_id, &relay_endpoint_script(session.relay_base_url()))
        .await?;
    backend.add_init_script(&context_id, &wallet_script).await?;

    // Track page lifecycle before selecting a page so nothing is missed.
    let mut events = backend.subscribe_pages(&context_id);
    let pages: Arc<Mutex<Vec<PageRef>>> = Arc::new(Mutex::new(Vec::new()));
    let watcher = {
        let pages = Arc::clone(&pages);
        let session_id = session.id().to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PageEvent::Created(page) => {
                        debug!(target = "wf.session", session = %session_id, page = %page.id(), "active page reassigned");
                        push_page(&pages, page);
                    }
                    PageEvent::Closed(id) => {
                        pages.lock().retain(|p| p.id() != id);
                    }
                }
            }
        })
    };

    // Reuse an already-open page when one exists, otherwise open one.
    let active = async {
        let existing = backend.pages(&context_id).await?;
        match existing.into_iter().next_back() {
            Some(page) => Ok(page),
            None => backend.new_page(&context_id).await,
        }
    }
    .await;
    let active = match active {
        Ok(page) => page,
        Err(e) => {
            watcher.abort();
            return Err(e);
        }
    };
    push_page(&pages, active);

    let ctx = SessionContext {
        session,
        options,
        backend,
        context_id,
        pages,
        snapshot: Mutex::new(None),
        watcher,
        closed: AtomicBool::new(false),
    };

    // First observation for the agent.
    ctx.refresh_snapshot().await?;
    Ok(ctx)
}

fn push_page(pages: &Mutex<Vec<PageRef>>, page: PageRef) {
    let mut pages = pages.lock();
    if !pages.iter().any(|p| p.id() == page.id()) {
        pages.push(page);
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

impl SessionContext {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// The most recently created page that has not closed.
    pub fn active_page(&self) -> Result<PageRef> {
        self.pages
            .lock()
            .last()
            .cloned()
            .ok_or_else(|| FlowError::Session("no active page".to_string()))
    }

    /// Cached DOM summary of the active page.
    pub async fn snapshot(&self) -> Result<String> {
        if let Some(snapshot) = self.snapshot.lock().clone() {
            return Ok(snapshot);
        }
        self.refresh_snapshot().await
    }

    /// Recompute and cache the active page's state summary.
    pub async fn refresh_snapshot(&self) -> Result<String> {
        let page = self.active_page()?;
        let value = page
            .evaluate(&crate::scripts::snapshot_script(
                self.options.highlight_elements,
            ))
            .await?;
        let snapshot = value
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string());
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Navigate the active page and give it the configured settle time.
    pub async fn goto(&self, url: &str) -> Result<()> {
        let page = self.active_page()?;
        page.navigate(url).await?;
        if let Some(limit) = self.options.wait_for_idle {
            // Settle bound, not a correctness wait: a page that keeps the
            // network busy must not wedge the session.
            let deadline = tokio::time::Instant::now() + limit;
            loop {
                let ready = page
                    .evaluate("document.readyState")
                    .await
                    .map(|v| v.as_str() == Some("complete"))
                    .unwrap_or(false);
                if ready || tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the browsing context. Idempotent; errors are logged, never
    /// raised, so teardown always completes.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watcher.abort();
        if let Err(e) = self.backend.close_context(&self.context_id).await {
            warn!(target = "wf.session", session = %self.session.id(), error = %e, "context release failed");
        }
        info!(target = "wf.session", session = %self.session.id(), "context closed");
    }
}
