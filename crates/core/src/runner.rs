//! Task orchestration.
//!
//! [`run_task`] owns the full lifecycle of one request: provision a browser,
//! open the session context, drive the agent loop with per-step telemetry,
//! and tear everything down. Teardown runs on every exit path, including
//! task cancellation, so billable remote sessions are never leaked.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::actions::ActionRegistry;
use crate::agent::{AgentOutcome, Observation, TaskAgent};
use crate::config::FlowConfig;
use crate::error::{FlowError, Result};
use crate::provision::{BrowserHandle, Provisioner};
use crate::relay::RelayClient;
use crate::scripts::ScriptStore;
use crate::session::{Session, SessionContext, SessionKind, SessionOptions, open_session};

/// One automation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Caller-supplied session identity; generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Natural-language task for the agent.
    pub task: String,
    /// Correlation token of a pre-provisioned remote session, pass-through
    /// metadata only.
    #[serde(default)]
    pub anchor_session_id: Option<String>,
}

/// Terminal report for one task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub session_id: String,
    pub success: bool,
    pub output: String,
    pub steps: usize,
    /// Correlation token of the remote session, echoed when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_view_url: Option<String>,
}

/// Run one task end to end.
pub async fn run_task(
    config: &FlowConfig,
    registry: &ActionRegistry,
    agent: &dyn TaskAgent,
    request: TaskRequest,
) -> Result<TaskOutcome> {
    let provisioner = Provisioner::new();
    let handle = Arc::new(provisioner.provision(config.provisioning_mode()).await?);
    run_task_with_handle(config, registry, agent, request, handle).await
}

/// Run one task against an already-provisioned browser.
///
/// The handle is released on every exit path. The guard is armed before the
/// first suspension point, so a task cancelled while the session is still
/// opening already releases the browser; once the context exists the guard
/// covers it too.
pub async fn run_task_with_handle(
    config: &FlowConfig,
    registry: &ActionRegistry,
    agent: &dyn TaskAgent,
    request: TaskRequest,
    handle: Arc<BrowserHandle>,
) -> Result<TaskOutcome> {
    let mut guard = TeardownGuard::new(Arc::clone(&handle));

    let kind = if config.remote {
        SessionKind::Remote
    } else {
        SessionKind::Local
    };
    let remote_session_id = request
        .anchor_session_id
        .clone()
        .or_else(|| handle.remote_session().map(|r| r.session_id.clone()));
    let session = Session::new(request.session_id.clone(), kind, &config.relay_base_url)
        .with_remote_session_id(remote_session_id.clone());
    let session_id = session.id().to_string();
    let live_view_url = handle.live_view_url().map(str::to_string);

    let store = ScriptStore::new(&config.scripts_dir);
    let ctx = match open_session(handle.backend(), session, &store, SessionOptions::default())
        .await
    {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            guard.disarm();
            handle.close().await;
            return Err(e);
        }
    };
    guard.set_context(Arc::clone(&ctx));

    let result = drive_agent(config, registry, agent, &ctx, &request.task).await;
    guard.disarm();
    close_session(&ctx, &handle).await;

    let (outcome, steps) = result?;
    info!(
        target = "wf.runner",
        session = %session_id,
        success = outcome.success,
        steps,
        "task finished"
    );
    Ok(TaskOutcome {
        session_id,
        success: outcome.success,
        output: outcome.summary,
        steps,
        anchor_session_id: remote_session_id,
        live_view_url,
    })
}

/// The agent loop: observe, decide, act, relay.
async fn drive_agent(
    config: &FlowConfig,
    registry: &ActionRegistry,
    agent: &dyn TaskAgent,
    ctx: &SessionContext,
    task: &str,
) -> Result<(AgentOutcome, usize)> {
    let relay = RelayClient::new(ctx.session().relay_base_url());
    let mut memory: Vec<String> = Vec::new();

    for step_index in 0..config.max_steps {
        let snapshot = ctx.snapshot().await?;
        let step = agent
            .next_step(Observation {
                task,
                step_index,
                snapshot: &snapshot,
                memory: &memory,
            })
            .await
            .map_err(|e| FlowError::Agent(format!("{e:#}")))?;

        relay.on_step(ctx.session().id(), step_index, &step.output);

        if let Some(call) = &step.action {
            let result = registry.invoke(&call.name, ctx, &call.args).await?;
            if result.include_in_memory {
                memory.push(result.content.clone());
            }
            if let Err(e) = ctx.refresh_snapshot().await {
                warn!(target = "wf.runner", session = %ctx.session().id(), error = %e, "snapshot refresh failed");
            }
        }

        if let Some(done) = step.done {
            return Ok((done, step_index + 1));
        }
    }

    Ok((
        AgentOutcome {
            success: false,
            summary: format!("step budget of {} exhausted", config.max_steps),
        },
        config.max_steps,
    ))
}

/// Tear down a session and its browser. Total: each half swallows and logs
/// its own failures, so both always run.
pub async fn close_session(ctx: &SessionContext, handle: &BrowserHandle) {
    ctx.close().await;
    handle.close().await;
}

/// Drop-armed teardown for the cancellation path. When the task future is
/// dropped mid-flight, the guard spawns the same teardown [`run_task`] would
/// have performed: the browsing context when one was opened, then the
/// browser handle.
struct TeardownGuard {
    handle: Arc<BrowserHandle>,
    ctx: Option<Arc<SessionContext>>,
    armed: bool,
}

impl TeardownGuard {
    fn new(handle: Arc<BrowserHandle>) -> Self {
        Self {
            handle,
            ctx: None,
            armed: true,
        }
    }

    fn set_context(&mut self, ctx: Arc<SessionContext>) {
        self.ctx = Some(ctx);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let handle = Arc::clone(&self.handle);
        let ctx = self.ctx.take();
        warn!(target = "wf.runner", "task dropped, releasing session");
        tokio::spawn(async move {
            if let Some(ctx) = ctx {
                ctx.close().await;
            }
            handle.close().await;
        });
    }
}
