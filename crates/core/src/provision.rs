//! Browser provisioning.
//!
//! Two modes: launch a local chromium with a debugging port, or create a
//! session on a remote CDP service and connect to the websocket it hands
//! back. Remote sessions are billable, so the returned [`BrowserHandle`] is
//! released explicitly by the orchestrator, never implicitly.

use std::net::TcpListener as StdTcpListener;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cdp::CdpClient;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::backend::BrowserBackend;
use crate::cdp_backend::CdpBackend;
use crate::error::{FlowError, Result};

const PORT_RANGE_START: u16 = 9222;
const PORT_RANGE_END: u16 = 9322;
const LAUNCH_DEADLINE: Duration = Duration::from_secs(20);

const CHROMIUM_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

#[derive(Debug, Clone)]
pub enum ProvisioningMode {
    Local(LocalParams),
    Remote(RemoteParams),
}

#[derive(Debug, Clone)]
pub struct LocalParams {
    pub headless: bool,
    pub viewport: (u32, u32),
    pub executable: Option<PathBuf>,
}

impl Default for LocalParams {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: (1280, 800),
            executable: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteParams {
    /// Required; checked before any network call.
    pub api_key: Option<String>,
    /// Session-creation API base.
    pub api_url: String,
    /// Websocket connect base, parameterized by api key and session id.
    pub connect_url: String,
    pub headless: bool,
    pub recording: bool,
}

impl Default for RemoteParams {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://api.anchorbrowser.io/api".to_string(),
            connect_url: "wss://connect.anchorbrowser.io".to_string(),
            headless: true,
            recording: true,
        }
    }
}

/// Remote provisioning response worth keeping around.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    pub session_id: String,
    /// Live-view/recording URL, surfaced for observability only.
    pub live_view_url: Option<String>,
}

/// Live connection to a browser engine, plus whatever owns its lifetime
/// (a local child process or a remote billable session).
pub struct BrowserHandle {
    backend: Arc<dyn BrowserBackend>,
    process: Mutex<Option<Child>>,
    remote: Option<RemoteSession>,
    closed: AtomicBool,
}

impl std::fmt::Debug for BrowserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserHandle")
            .field("remote", &self.remote)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl BrowserHandle {
    /// Wrap an already-connected backend. Used by tests and embedders that
    /// manage the engine themselves.
    pub fn from_backend(backend: Arc<dyn BrowserBackend>) -> Self {
        Self {
            backend,
            process: Mutex::new(None),
            remote: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> Arc<dyn BrowserBackend> {
        Arc::clone(&self.backend)
    }

    pub fn remote_session(&self) -> Option<&RemoteSession> {
        self.remote.as_ref()
    }

    pub fn live_view_url(&self) -> Option<&str> {
        self.remote.as_ref().and_then(|r| r.live_view_url.as_deref())
    }

    /// Release the connection and, for local launches, the process.
    /// Idempotent; errors are logged, never raised.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.backend.close().await {
            warn!(target = "wf.provision", error = %e, "browser close failed");
        }
        let child = self.process.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                warn!(target = "wf.provision", error = %e, "browser process kill failed");
            }
        }
        info!(target = "wf.provision", "browser released");
    }
}

/// Produces live browser connections.
pub struct Provisioner {
    http: reqwest::Client,
}

impl Default for Provisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Provisioner {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn provision(&self, mode: ProvisioningMode) -> Result<BrowserHandle> {
        match mode {
            ProvisioningMode::Local(params) => self.provision_local(params).await,
            ProvisioningMode::Remote(params) => self.provision_remote(params).await,
        }
    }

    async fn provision_local(&self, params: LocalParams) -> Result<BrowserHandle> {
        let port = find_available_port().ok_or_else(|| {
            FlowError::Provisioning("no free debugging port in range".to_string())
        })?;

        let mut child = spawn_chromium(&params, port)?;
        let endpoint = format!("http://127.0.0.1:{port}");

        let ws_url = match wait_for_debugger(&endpoint).await {
            Ok(url) => url,
            Err(e) => {
                let _ = child.start_kill();
                return Err(e);
            }
        };

        let client = CdpClient::connect(&ws_url)
            .await
            .map_err(|e| FlowError::Provisioning(e.to_string()))?;
        let backend = CdpBackend::new(client)
            .await
            .map_err(|e| FlowError::Provisioning(e.to_string()))?;

        info!(target = "wf.provision", port, headless = params.headless, "local browser ready");
        Ok(BrowserHandle {
            backend: Arc::new(backend),
            process: Mutex::new(Some(child)),
            remote: None,
            closed: AtomicBool::new(false),
        })
    }

    async fn provision_remote(&self, params: RemoteParams) -> Result<BrowserHandle> {
        // Key check comes first: no network traffic without credentials.
        let api_key = params.api_key.clone().ok_or_else(|| {
            FlowError::Configuration("remote provisioning requires an API key".to_string())
        })?;

        let remote = self.create_remote_session(&params).await?;
        let ws_url = format!(
            "{}?apiKey={}&sessionId={}",
            params.connect_url, api_key, remote.session_id
        );

        let client = CdpClient::connect(&ws_url)
            .await
            .map_err(|e| FlowError::Provisioning(e.to_string()))?;
        let backend = CdpBackend::new(client)
            .await
            .map_err(|e| FlowError::Provisioning(e.to_string()))?;

        info!(
            target = "wf.provision",
            session = %remote.session_id,
            live_view = remote.live_view_url.as_deref().unwrap_or("-"),
            "remote browser ready"
        );
        Ok(BrowserHandle {
            backend: Arc::new(backend),
            process: Mutex::new(None),
            remote: Some(remote),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a session on the remote provisioning service and extract the
    /// connection identity from its response.
    pub async fn create_remote_session(&self, params: &RemoteParams) -> Result<RemoteSession> {
        let api_key = params.api_key.as_deref().ok_or_else(|| {
            FlowError::Configuration("remote provisioning requires an API key".to_string())
        })?;

        let url = format!("{}/sessions", params.api_url.trim_end_matches('/'));
        debug!(target = "wf.provision", %url, "creating remote session");

        let response = self
            .http
            .post(&url)
            .header("anchor-api-key", api_key)
            .json(&json!({
                "headless": params.headless,
                "recording": {"active": params.recording},
            }))
            .send()
            .await
            .map_err(|e| FlowError::Provisioning(format!("session create failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlowError::Provisioning(format!(
                "session create answered {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FlowError::Provisioning(format!("unreadable response: {e}")))?;
        parse_remote_session(&body)
    }
}

/// Pull the session id and live-view URL out of a session-creation
/// response, tolerating the payload being nested under `data`.
fn parse_remote_session(body: &Value) -> Result<RemoteSession> {
    let data = if body.get("data").is_some_and(Value::is_object) {
        &body["data"]
    } else {
        body
    };

    let session_id = data["id"]
        .as_str()
        .or_else(|| data["session_id"].as_str())
        .ok_or_else(|| {
            FlowError::Provisioning("session create response is missing an id".to_string())
        })?
        .to_string();

    let live_view_url = data["live_view_url"]
        .as_str()
        .or_else(|| data["liveViewUrl"].as_str())
        .map(str::to_string);

    Ok(RemoteSession {
        session_id,
        live_view_url,
    })
}

fn spawn_chromium(params: &LocalParams, port: u16) -> Result<Child> {
    let (width, height) = params.viewport;
    let mut args = vec![
        format!("--remote-debugging-port={port}"),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        format!("--window-size={width},{height}"),
        "about:blank".to_string(),
    ];
    if params.headless {
        args.insert(0, "--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }

    let candidates: Vec<PathBuf> = match &params.executable {
        Some(path) => vec![path.clone()],
        None => CHROMIUM_CANDIDATES.iter().map(PathBuf::from).collect(),
    };

    let mut last_error = None;
    for candidate in &candidates {
        let mut cmd = Command::new(candidate);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        match cmd.spawn() {
            Ok(child) => {
                debug!(target = "wf.provision", exe = %candidate.display(), port, "chromium spawned");
                return Ok(child);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(FlowError::Provisioning(format!(
        "browser engine could not start: {}",
        last_error.map(|e| e.to_string()).unwrap_or_else(|| "no candidates".to_string())
    )))
}

async fn wait_for_debugger(endpoint: &str) -> Result<String> {
    let deadline = tokio::time::Instant::now() + LAUNCH_DEADLINE;
    loop {
        match CdpClient::discover_ws_url(endpoint).await {
            Ok(url) => return Ok(url),
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Err(e) => {
                return Err(FlowError::Provisioning(format!(
                    "debugger never came up at {endpoint}: {e}"
                )));
            }
        }
    }
}

fn find_available_port() -> Option<u16> {
    (PORT_RANGE_START..=PORT_RANGE_END).find(|port| port_available(*port))
}

fn port_available(port: u16) -> bool {
    StdTcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn remote_without_key_fails_before_any_network_call() {
        let provisioner = Provisioner::new();
        // An unroutable api_url proves no request is attempted: a network
        // error would surface as Provisioning, not Configuration.
        let params = RemoteParams {
            api_key: None,
            api_url: "http://192.0.2.1:1/api".to_string(),
            ..RemoteParams::default()
        };

        let err = provisioner
            .provision(ProvisioningMode::Remote(params))
            .await
            .unwrap_err();
        assert!(err.is_configuration(), "got {err}");
    }

    #[test]
    fn remote_session_parsing() {
        let session = parse_remote_session(&json!({
            "data": {"id": "abc-123", "live_view_url": "https://live.example/abc-123"}
        }))
        .unwrap();
        assert_eq!(session.session_id, "abc-123");
        assert_eq!(
            session.live_view_url.as_deref(),
            Some("https://live.example/abc-123")
        );

        // Flat payloads and missing live view are fine.
        let session = parse_remote_session(&json!({"id": "xyz"})).unwrap();
        assert_eq!(session.session_id, "xyz");
        assert!(session.live_view_url.is_none());

        // Missing id is a provisioning error.
        let err = parse_remote_session(&json!({"data": {"status": "ok"}})).unwrap_err();
        assert!(matches!(err, FlowError::Provisioning(_)), "got {err}");
    }

    #[test]
    fn port_scan_finds_a_port() {
        assert!(find_available_port().is_some());
    }
}
