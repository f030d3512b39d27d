//! [`BrowserBackend`] implementation over the CDP client.
//!
//! Context-level init scripts are realized with browser-wide auto-attach:
//! every new target arrives paused (`waitForDebuggerOnStart`), the scripts
//! recorded for its browsing context are installed in order, and only then
//! is the target resumed. That sequencing is what guarantees bootstrap
//! scripts execute before any page-authored script.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp::{CdpClient, CdpEvent, TargetSession};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{BrowserBackend, PageBackend, PageEvent, PageRef};
use crate::error::{FlowError, Result};

const NEW_PAGE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Default)]
struct ContextState {
    /// Init scripts in injection order.
    scripts: Vec<String>,
    /// Live pages, oldest first.
    pages: Vec<Arc<CdpPage>>,
    subscribers: Vec<mpsc::UnboundedSender<PageEvent>>,
}

#[derive(Default)]
struct BackendState {
    contexts: HashMap<String, ContextState>,
}

impl BackendState {
    fn context_of_target(&self, target_id: &str) -> Option<&String> {
        self.contexts.iter().find_map(|(id, state)| {
            state
                .pages
                .iter()
                .any(|p| p.target_id == target_id)
                .then_some(id)
        })
    }
}

pub struct CdpBackend {
    client: Arc<CdpClient>,
    state: Arc<Mutex<BackendState>>,
    watcher: tokio::task::JoinHandle<()>,
}

impl CdpBackend {
    /// Wrap a connected client and start watching target lifecycle events.
    pub async fn new(client: CdpClient) -> Result<Self> {
        let events = client.browser_events();
        client.set_discover_targets(true).await?;
        client.set_auto_attach(true).await?;

        let client = Arc::new(client);
        let state = Arc::new(Mutex::new(BackendState::default()));

        let watcher = tokio::spawn(watch_targets(
            Arc::clone(&client),
            Arc::clone(&state),
            events,
        ));

        Ok(Self {
            client,
            state,
            watcher,
        })
    }

    pub fn client(&self) -> &CdpClient {
        &self.client
    }
}

impl Drop for CdpBackend {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[async_trait]
impl BrowserBackend for CdpBackend {
    async fn new_context(&self) -> Result<String> {
        let context_id = self.client.create_browser_context().await?;
        self.state
            .lock()
            .contexts
            .insert(context_id.clone(), ContextState::default());
        debug!(target = "wf.cdp", context = %context_id, "browser context created");
        Ok(context_id)
    }

    async fn add_init_script(&self, context_id: &str, source: &str) -> Result<()> {
        let pages: Vec<Arc<CdpPage>> = {
            let mut state = self.state.lock();
            let ctx = state
                .contexts
                .get_mut(context_id)
                .ok_or_else(|| FlowError::Session(format!("unknown context {context_id}")))?;
            ctx.scripts.push(source.to_string());
            ctx.pages.clone()
        };

        // Pages attached before this call pick the script up on their next
        // document as well.
        for page in pages {
            page.session.add_init_script(source).await?;
        }
        Ok(())
    }

    async fn pages(&self, context_id: &str) -> Result<Vec<PageRef>> {
        let state = self.state.lock();
        let ctx = state
            .contexts
            .get(context_id)
            .ok_or_else(|| FlowError::Session(format!("unknown context {context_id}")))?;
        Ok(ctx.pages.iter().cloned().map(|p| p as PageRef).collect())
    }

    async fn new_page(&self, context_id: &str) -> Result<PageRef> {
        if !self.state.lock().contexts.contains_key(context_id) {
            return Err(FlowError::Session(format!("unknown context {context_id}")));
        }

        // The watcher attaches, injects, and resumes the target; wait for it
        // to surface here rather than racing it.
        let mut events = self.subscribe_pages(context_id);
        let target_id = self.client.create_target("about:blank", Some(context_id)).await?;

        let wait = async {
            while let Some(event) = events.recv().await {
                if let PageEvent::Created(page) = event {
                    if page.id() == target_id {
                        return Ok(page);
                    }
                }
            }
            Err(FlowError::Session("page watcher stopped".to_string()))
        };
        tokio::time::timeout(NEW_PAGE_TIMEOUT, wait)
            .await
            .map_err(|_| FlowError::Session(format!("page {target_id} never attached")))?
    }

    fn subscribe_pages(&self, context_id: &str) -> mpsc::UnboundedReceiver<PageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if let Some(ctx) = state.contexts.get_mut(context_id) {
            ctx.subscribers.push(tx);
        }
        rx
    }

    async fn close_context(&self, context_id: &str) -> Result<()> {
        let known = self.state.lock().contexts.remove(context_id).is_some();
        if !known {
            return Ok(());
        }
        self.client.dispose_browser_context(context_id).await?;
        debug!(target = "wf.cdp", context = %context_id, "browser context disposed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().contexts.clear();
        self.client.close_browser().await?;
        Ok(())
    }
}

async fn watch_targets(
    client: Arc<CdpClient>,
    state: Arc<Mutex<BackendState>>,
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
) {
    while let Some(event) = events.recv().await {
        match event.method.as_str() {
            "Target.attachedToTarget" => {
                if let Err(e) = handle_attached(&client, &state, &event.params).await {
                    warn!(target = "wf.cdp", error = %e, "target attach handling failed");
                }
            }
            "Target.targetDestroyed" => {
                let Some(target_id) = event.params["targetId"].as_str() else {
                    continue;
                };
                handle_destroyed(&state, target_id);
            }
            _ => {}
        }
    }
}

async fn handle_attached(
    client: &CdpClient,
    state: &Mutex<BackendState>,
    params: &Value,
) -> Result<()> {
    let session_id = params["sessionId"]
        .as_str()
        .ok_or_else(|| FlowError::Session("attach event without sessionId".to_string()))?;
    let info = &params["targetInfo"];
    let target_id = info["targetId"].as_str().unwrap_or_default().to_string();
    let target_type = info["type"].as_str().unwrap_or_default();
    let context_id = info["browserContextId"].as_str().map(str::to_string);

    let session = client.adopt_session(&target_id, session_id);

    let managed = target_type == "page"
        && context_id
            .as_deref()
            .is_some_and(|id| state.lock().contexts.contains_key(id));

    if !managed {
        // Not ours (browser default context, workers, devtools). Resume so
        // it does not hang under waitForDebuggerOnStart.
        let _ = session.resume_if_waiting().await;
        return Ok(());
    }
    let context_id = context_id.unwrap_or_default();

    session.enable_domains().await?;
    let scripts = state
        .lock()
        .contexts
        .get(&context_id)
        .map(|ctx| ctx.scripts.clone())
        .unwrap_or_default();
    for source in &scripts {
        session.add_init_script(source).await?;
    }
    session.resume_if_waiting().await?;

    let page = Arc::new(CdpPage {
        target_id: target_id.clone(),
        session,
    });

    let mut state = state.lock();
    if let Some(ctx) = state.contexts.get_mut(&context_id) {
        ctx.pages.push(Arc::clone(&page));
        let event = PageEvent::Created(page as PageRef);
        ctx.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
    info!(target = "wf.cdp", target = %target_id, context = %context_id, "page attached");
    Ok(())
}

fn handle_destroyed(state: &Mutex<BackendState>, target_id: &str) {
    let mut state = state.lock();
    let Some(context_id) = state.context_of_target(target_id).cloned() else {
        return;
    };
    if let Some(ctx) = state.contexts.get_mut(&context_id) {
        ctx.pages.retain(|p| p.target_id != target_id);
        let event = PageEvent::Closed(target_id.to_string());
        ctx.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
    debug!(target = "wf.cdp", target = %target_id, "page destroyed");
}

/// [`PageBackend`] over an attached CDP target.
pub struct CdpPage {
    target_id: String,
    session: TargetSession,
}

#[async_trait]
impl PageBackend for CdpPage {
    fn id(&self) -> &str {
        &self.target_id
    }

    async fn url(&self) -> Result<String> {
        let value = self.session.evaluate("location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.session.navigate(url).await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        Ok(self.session.evaluate(expression).await?)
    }

    async fn set_extra_http_headers(&self, headers: &[(String, String)]) -> Result<()> {
        let map: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.session.set_extra_http_headers(&Value::Object(map)).await?;
        Ok(())
    }

    async fn observe_console(&self) -> Result<()> {
        let mut events = self.session.events();
        let target_id = self.target_id.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.method != "Runtime.consoleAPICalled" {
                    continue;
                }
                let kind = event.params["type"].as_str().unwrap_or("log");
                let text = event.params["args"]
                    .as_array()
                    .map(|args| {
                        args.iter()
                            .map(|a| {
                                a["value"]
                                    .as_str()
                                    .map(str::to_string)
                                    .unwrap_or_else(|| a["value"].to_string())
                            })
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default();
                info!(target = "wf.browser.console", page = %target_id, kind, %text, "browser console");
            }
        });
        Ok(())
    }

    async fn observe_network(&self) -> Result<()> {
        self.session.enable_network_events().await?;
        let mut events = self.session.events();
        let target_id = self.target_id.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event.method.as_str() {
                    "Network.requestWillBeSent" => {
                        info!(
                            target = "wf.browser.network",
                            page = %target_id,
                            method = %event.params["request"]["method"].as_str().unwrap_or(""),
                            url = %event.params["request"]["url"].as_str().unwrap_or(""),
                            "request"
                        );
                    }
                    "Network.responseReceived" => {
                        info!(
                            target = "wf.browser.network",
                            page = %target_id,
                            status = event.params["response"]["status"].as_u64().unwrap_or(0),
                            url = %event.params["response"]["url"].as_str().unwrap_or(""),
                            "response"
                        );
                    }
                    _ => {}
                }
            }
        });
        Ok(())
    }
}
