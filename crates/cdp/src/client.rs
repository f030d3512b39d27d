//! CDP websocket client.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

use crate::error::CdpError;
use crate::protocol::{BrowserVersion, CdpEvent, CdpRequest, CdpResponse, TargetInfo};
use crate::target::TargetSession;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Key under which browser-level events (no CDP session id) are fanned out.
const BROWSER_EVENTS: &str = "";

struct PendingRequest {
    tx: oneshot::Sender<Result<Value>>,
}

/// State shared between the client and its target sessions.
pub(crate) struct ClientInner {
    ws_tx: tokio::sync::Mutex<WsSink>,
    request_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<CdpEvent>>>>,
}

impl ClientInner {
    /// Send a command and wait for the matching response.
    pub(crate) async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        };

        let text = serde_json::to_string(&request)?;
        trace!(target = "wf.cdp", %text, "send");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, PendingRequest { tx });

        {
            let mut ws = self.ws_tx.lock().await;
            ws.send(Message::Text(text.into())).await?;
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(CdpError::Timeout(format!("{method} timed out")))
            }
        }
    }

    /// Register an event receiver for a CDP session id (or browser-level
    /// events when `session_id` is `None`).
    pub(crate) fn subscribe(&self, session_id: Option<&str>) -> mpsc::UnboundedReceiver<CdpEvent> {
        let key = session_id.unwrap_or(BROWSER_EVENTS).to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().entry(key).or_default().push(tx);
        rx
    }

    fn dispatch_event(&self, event: CdpEvent) {
        let key = event.session_id.clone().unwrap_or_default();
        let mut subscribers = self.subscribers.lock();
        if let Some(senders) = subscribers.get_mut(&key) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn fail_pending(&self) {
        for (_, req) in self.pending.lock().drain() {
            let _ = req.tx.send(Err(CdpError::ConnectionClosed));
        }
    }
}

/// Client for one browser connection.
///
/// Owns the websocket and a background receive task that correlates command
/// responses by id and fans events out to subscribers.
pub struct CdpClient {
    inner: Arc<ClientInner>,
    ws_url: String,
    recv_task: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect directly to a debugger websocket URL.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| CdpError::ConnectionFailed(format!("{ws_url}: {e}")))?;
        let (ws_sink, ws_source) = ws_stream.split();

        let inner = Arc::new(ClientInner {
            ws_tx: tokio::sync::Mutex::new(ws_sink),
            request_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
        });

        let recv_task = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                receive_loop(ws_source, inner).await;
            })
        };

        debug!(target = "wf.cdp", url = %ws_url, "connected");
        Ok(Self {
            inner,
            ws_url: ws_url.to_string(),
            recv_task,
        })
    }

    /// Resolve the browser websocket URL behind an HTTP debugging endpoint
    /// (`http://host:port`) via `/json/version`.
    pub async fn discover_ws_url(http_endpoint: &str) -> Result<String> {
        let version_url = format!("{}/json/version", http_endpoint.trim_end_matches('/'));
        let version: BrowserVersion = reqwest::get(&version_url)
            .await
            .map_err(|e| CdpError::BrowserNotAvailable(format!("{http_endpoint}: {e}")))?
            .json()
            .await
            .map_err(|e| CdpError::InvalidResponse(e.to_string()))?;
        debug!(target = "wf.cdp", browser = %version.browser, "discovered debugger");
        Ok(version.web_socket_debugger_url)
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Send a browser-level command.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.inner.call(method, params, None).await
    }

    /// Subscribe to browser-level events (`Target.*` lifecycle).
    pub fn browser_events(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        self.inner.subscribe(None)
    }

    /// Create an isolated browser context; returns its id.
    pub async fn create_browser_context(&self) -> Result<String> {
        let result = self.call("Target.createBrowserContext", None).await?;
        result["browserContextId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CdpError::InvalidResponse("missing browserContextId".into()))
    }

    pub async fn dispose_browser_context(&self, context_id: &str) -> Result<()> {
        self.call(
            "Target.disposeBrowserContext",
            Some(json!({"browserContextId": context_id})),
        )
        .await?;
        Ok(())
    }

    /// Create a page target inside a browser context; returns the target id.
    pub async fn create_target(&self, url: &str, context_id: Option<&str>) -> Result<String> {
        let mut params = json!({"url": url});
        if let Some(ctx) = context_id {
            params["browserContextId"] = json!(ctx);
        }
        let result = self.call("Target.createTarget", Some(params)).await?;
        result["targetId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CdpError::InvalidResponse("missing targetId".into()))
    }

    /// Attach to a target with a flat session and return a command session
    /// bound to it.
    pub async fn attach_to_target(&self, target_id: &str) -> Result<TargetSession> {
        let result = self
            .call(
                "Target.attachToTarget",
                Some(json!({"targetId": target_id, "flatten": true})),
            )
            .await?;
        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("missing sessionId".into()))?
            .to_string();

        Ok(TargetSession::new(
            Arc::clone(&self.inner),
            target_id.to_string(),
            session_id,
        ))
    }

    /// Build a command session from an already-established attachment
    /// (e.g. a `Target.attachedToTarget` event under auto-attach).
    pub fn adopt_session(&self, target_id: &str, session_id: &str) -> TargetSession {
        TargetSession::new(
            Arc::clone(&self.inner),
            target_id.to_string(),
            session_id.to_string(),
        )
    }

    /// Enable `Target.targetCreated`/`targetDestroyed` delivery.
    pub async fn set_discover_targets(&self, discover: bool) -> Result<()> {
        self.call(
            "Target.setDiscoverTargets",
            Some(json!({"discover": discover})),
        )
        .await?;
        Ok(())
    }

    /// Auto-attach to new targets, paused before their first script runs.
    ///
    /// `waitForDebuggerOnStart` is what lets callers install init scripts
    /// ahead of any page-authored code; they must resume the target with
    /// [`TargetSession::resume_if_waiting`].
    pub async fn set_auto_attach(&self, auto_attach: bool) -> Result<()> {
        self.call(
            "Target.setAutoAttach",
            Some(json!({
                "autoAttach": auto_attach,
                "waitForDebuggerOnStart": true,
                "flatten": true,
            })),
        )
        .await?;
        Ok(())
    }

    pub async fn get_targets(&self) -> Result<Vec<TargetInfo>> {
        let result = self.call("Target.getTargets", None).await?;
        let targets: Vec<TargetInfo> = serde_json::from_value(result["targetInfos"].clone())?;
        Ok(targets)
    }

    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.call("Target.closeTarget", Some(json!({"targetId": target_id})))
            .await?;
        Ok(())
    }

    /// Ask the browser to shut down. Best-effort; the websocket usually
    /// drops before a response arrives.
    pub async fn close_browser(&self) -> Result<()> {
        match self.call("Browser.close", None).await {
            Ok(_) | Err(CdpError::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.inner.fail_pending();
    }
}

async fn receive_loop(mut ws_source: WsSource, inner: Arc<ClientInner>) {
    while let Some(message) = ws_source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                trace!(target = "wf.cdp", %text, "recv");
                let response: CdpResponse = match serde_json::from_str(&text) {
                    Ok(resp) => resp,
                    Err(e) => {
                        warn!(target = "wf.cdp", error = %e, "unparseable message");
                        continue;
                    }
                };

                if let Some(id) = response.id {
                    let pending = inner.pending.lock().remove(&id);
                    if let Some(req) = pending {
                        let result = match response.error {
                            Some(err) => Err(CdpError::Protocol {
                                code: err.code,
                                message: err.message,
                            }),
                            None => Ok(response.result.unwrap_or(Value::Null)),
                        };
                        let _ = req.tx.send(result);
                    }
                } else if let Some(method) = response.method {
                    inner.dispatch_event(CdpEvent {
                        method,
                        params: response.params.unwrap_or(Value::Null),
                        session_id: response.session_id,
                    });
                }
            }
            Ok(Message::Close(_)) => {
                debug!(target = "wf.cdp", "websocket closed");
                break;
            }
            Err(e) => {
                error!(target = "wf.cdp", error = %e, "websocket error");
                break;
            }
            _ => {}
        }
    }
    inner.fail_pending();
}
