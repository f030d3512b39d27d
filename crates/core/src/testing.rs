//! In-memory backend and agent doubles.
//!
//! [`MockBackend`] implements the [`BrowserBackend`] seam entirely in
//! memory: contexts record their init scripts in insertion order, pages
//! resolve the well-known globals those scripts bind, and page-lifecycle
//! events can be injected to simulate popups and closures. Everything is
//! inspectable after the fact so lifecycle assertions stay cheap.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::agent::{AgentStep, Observation, TaskAgent};
use crate::backend::{BrowserBackend, PageBackend, PageEvent, PageRef};
use crate::error::{FlowError, Result};

#[derive(Default)]
struct ContextState {
    scripts: Arc<Mutex<Vec<String>>>,
    pages: Vec<Arc<MockPage>>,
    subscribers: Vec<mpsc::UnboundedSender<PageEvent>>,
    next_page: usize,
}

#[derive(Default)]
struct BackendState {
    next_context: usize,
    contexts: HashMap<String, ContextState>,
    close_context_calls: Vec<String>,
    close_calls: usize,
    fail_close_context: bool,
}

/// In-memory [`BrowserBackend`].
#[derive(Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `close_context` call fail. Used to prove
    /// teardown swallows release errors.
    pub fn fail_close_context(&self) {
        self.state.lock().fail_close_context = true;
    }

    /// Init scripts installed in the context, in insertion order.
    pub fn context_scripts(&self, context_id: &str) -> Vec<String> {
        self.state
            .lock()
            .contexts
            .get(context_id)
            .map(|ctx| ctx.scripts.lock().clone())
            .unwrap_or_default()
    }

    pub fn close_context_calls(&self, context_id: &str) -> usize {
        self.state
            .lock()
            .close_context_calls
            .iter()
            .filter(|id| id.as_str() == context_id)
            .count()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Simulate the engine opening a page in the context (a popup or a
    /// target="_blank" navigation).
    pub fn emit_page(&self, context_id: &str) -> Result<PageRef> {
        let mut state = self.state.lock();
        let ctx = state
            .contexts
            .get_mut(context_id)
            .ok_or_else(|| FlowError::Session(format!("unknown context {context_id}")))?;
        let page = new_page_in(ctx);
        notify(ctx, PageEvent::Created(page.clone()));
        Ok(page)
    }

    /// Simulate the engine closing a page.
    pub fn emit_page_closed(&self, context_id: &str, page_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let ctx = state
            .contexts
            .get_mut(context_id)
            .ok_or_else(|| FlowError::Session(format!("unknown context {context_id}")))?;
        ctx.pages.retain(|p| p.id() != page_id);
        notify(ctx, PageEvent::Closed(page_id.to_string()));
        Ok(())
    }
}

fn new_page_in(ctx: &mut ContextState) -> Arc<MockPage> {
    ctx.next_page += 1;
    let page = Arc::new(MockPage::new(
        format!("page-{}", ctx.next_page),
        Arc::clone(&ctx.scripts),
    ));
    ctx.pages.push(Arc::clone(&page));
    page
}

fn notify(ctx: &mut ContextState, event: PageEvent) {
    ctx.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
}

#[async_trait]
impl BrowserBackend for MockBackend {
    async fn new_context(&self) -> Result<String> {
        let mut state = self.state.lock();
        state.next_context += 1;
        let id = format!("ctx-{}", state.next_context);
        state.contexts.insert(id.clone(), ContextState::default());
        Ok(id)
    }

    async fn add_init_script(&self, context_id: &str, source: &str) -> Result<()> {
        let state = self.state.lock();
        let ctx = state
            .contexts
            .get(context_id)
            .ok_or_else(|| FlowError::Session(format!("unknown context {context_id}")))?;
        ctx.scripts.lock().push(source.to_string());
        Ok(())
    }

    async fn pages(&self, context_id: &str) -> Result<Vec<PageRef>> {
        let state = self.state.lock();
        let ctx = state
            .contexts
            .get(context_id)
            .ok_or_else(|| FlowError::Session(format!("unknown context {context_id}")))?;
        Ok(ctx.pages.iter().map(|p| Arc::clone(p) as PageRef).collect())
    }

    async fn new_page(&self, context_id: &str) -> Result<PageRef> {
        let mut state = self.state.lock();
        let ctx = state
            .contexts
            .get_mut(context_id)
            .ok_or_else(|| FlowError::Session(format!("unknown context {context_id}")))?;
        let page = new_page_in(ctx);
        notify(ctx, PageEvent::Created(page.clone()));
        Ok(page)
    }

    fn subscribe_pages(&self, context_id: &str) -> mpsc::UnboundedReceiver<PageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(ctx) = self.state.lock().contexts.get_mut(context_id) {
            ctx.subscribers.push(tx);
        }
        rx
    }

    async fn close_context(&self, context_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.close_context_calls.push(context_id.to_string());
        if state.fail_close_context {
            return Err(FlowError::Session("context release refused".to_string()));
        }
        if let Some(ctx) = state.contexts.get_mut(context_id) {
            ctx.pages.clear();
            ctx.subscribers.clear();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().close_calls += 1;
        Ok(())
    }
}

/// In-memory [`PageBackend`].
///
/// `evaluate` understands just enough JavaScript for the session manager:
/// `document.readyState`, `location.href`, the snapshot expression, and
/// reads of `window.*` globals bound by the context's init scripts.
pub struct MockPage {
    id: String,
    url: Mutex<String>,
    scripts: Arc<Mutex<Vec<String>>>,
    headers: Mutex<Vec<(String, String)>>,
    console_observed: AtomicBool,
    network_observed: AtomicBool,
}

impl MockPage {
    fn new(id: String, scripts: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            id,
            url: Mutex::new("about:blank".to_string()),
            scripts,
            headers: Mutex::new(Vec::new()),
            console_observed: AtomicBool::new(false),
            network_observed: AtomicBool::new(false),
        }
    }

    pub fn extra_headers(&self) -> Vec<(String, String)> {
        self.headers.lock().clone()
    }

    pub fn console_observed(&self) -> bool {
        self.console_observed.load(Ordering::SeqCst)
    }

    pub fn network_observed(&self) -> bool {
        self.network_observed.load(Ordering::SeqCst)
    }

    /// Resolve a `window.<name> = <json>;` binding from the context's init
    /// scripts, last write wins.
    fn lookup_global(&self, name: &str) -> Option<Value> {
        let prefix = format!("window.{name} = ");
        let scripts = self.scripts.lock();
        scripts.iter().rev().find_map(|script| {
            let rest = script.strip_prefix(&prefix)?;
            let literal = rest.trim_end().strip_suffix(';')?;
            serde_json::from_str(literal).ok()
        })
    }
}

#[async_trait]
impl PageBackend for MockPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn url(&self) -> Result<String> {
        Ok(self.url.lock().clone())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        *self.url.lock() = url.to_string();
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        if expression == "document.readyState" {
            return Ok(json!("complete"));
        }
        if expression == "location.href" {
            return Ok(json!(self.url.lock().clone()));
        }
        if expression.contains("JSON.stringify") {
            let snapshot = json!({
                "url": self.url.lock().clone(),
                "title": "mock page",
                "elements": [],
            });
            return Ok(Value::String(snapshot.to_string()));
        }
        if let Some(name) = expression.strip_prefix("window.") {
            return Ok(self.lookup_global(name.trim()).unwrap_or(Value::Null));
        }
        Ok(Value::Null)
    }

    async fn set_extra_http_headers(&self, headers: &[(String, String)]) -> Result<()> {
        self.headers.lock().extend_from_slice(headers);
        Ok(())
    }

    async fn observe_console(&self) -> Result<()> {
        self.console_observed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn observe_network(&self) -> Result<()> {
        self.network_observed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Agent double that replays a fixed sequence of steps and records every
/// observation it was shown.
#[derive(Default)]
pub struct ScriptedAgent {
    steps: Mutex<Vec<AgentStep>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(steps: Vec<AgentStep>) -> Self {
        let mut steps = steps;
        steps.reverse();
        Self {
            steps: Mutex::new(steps),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Snapshots shown to the agent, in step order.
    pub fn observed_snapshots(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl TaskAgent for ScriptedAgent {
    async fn next_step(&self, observation: Observation<'_>) -> anyhow::Result<AgentStep> {
        self.seen.lock().push(observation.snapshot.to_string());
        self.steps
            .lock()
            .pop()
            .ok_or_else(|| anyhow::anyhow!("scripted agent has no step left"))
    }
}
