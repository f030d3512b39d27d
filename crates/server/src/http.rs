//! HTTP surface: one task endpoint and a health probe.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{error, info};
use walletflow::{
    ActionRegistry, FlowConfig, FlowError, TaskAgent, TaskOutcome, TaskRequest, run_task,
};

/// Seam between the HTTP layer and task execution, so handlers can be
/// exercised without a browser.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, request: TaskRequest) -> walletflow::Result<TaskOutcome>;
}

/// Production executor: one full task lifecycle per request.
pub struct FlowExecutor {
    config: FlowConfig,
    registry: ActionRegistry,
    agent: Box<dyn TaskAgent>,
}

impl FlowExecutor {
    pub fn new(config: FlowConfig, registry: ActionRegistry, agent: Box<dyn TaskAgent>) -> Self {
        Self {
            config,
            registry,
            agent,
        }
    }
}

#[async_trait]
impl TaskExecutor for FlowExecutor {
    async fn execute(&self, request: TaskRequest) -> walletflow::Result<TaskOutcome> {
        run_task(&self.config, &self.registry, self.agent.as_ref(), request).await
    }
}

type SharedExecutor = Arc<dyn TaskExecutor>;

pub fn router(executor: SharedExecutor) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/tasks", post(handle_task))
        .with_state(executor)
}

async fn handle_task(
    State(executor): State<SharedExecutor>,
    Json(request): Json<TaskRequest>,
) -> (StatusCode, Json<Value>) {
    match executor.execute(request).await {
        Ok(outcome) => match serde_json::to_value(&outcome) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(e) => {
                error!(target = "wf.http", error = %e, "outcome serialization failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": e.to_string()})),
                )
            }
        },
        Err(e) => {
            error!(target = "wf.http", error = %e, "task failed");
            (status_for(&e), Json(json!({"error": e.to_string()})))
        }
    }
}

fn status_for(error: &FlowError) -> StatusCode {
    match error {
        FlowError::Configuration(_) => StatusCode::BAD_REQUEST,
        FlowError::Provisioning(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn serve(addr: SocketAddr, executor: SharedExecutor) -> Result<()> {
    let app = router(executor);

    info!(target = "wf.http", %addr, "starting task server");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind task server to {addr}"))?;

    axum::serve(listener, app.into_make_service())
        .await
        .context("Task server error")
}
