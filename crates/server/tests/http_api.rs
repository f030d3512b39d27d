//! Handler behavior with a stubbed task executor.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use walletflow::{FlowError, TaskOutcome, TaskRequest};
use walletflow_server::http::{TaskExecutor, router};

struct StubExecutor {
    response: fn(TaskRequest) -> walletflow::Result<TaskOutcome>,
}

#[async_trait]
impl TaskExecutor for StubExecutor {
    async fn execute(&self, request: TaskRequest) -> walletflow::Result<TaskOutcome> {
        (self.response)(request)
    }
}

async fn spawn(executor: StubExecutor) -> String {
    let app = router(Arc::new(executor));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn task_request_round_trips_to_outcome() {
    let base = spawn(StubExecutor {
        response: |request| {
            Ok(TaskOutcome {
                session_id: request.session_id.unwrap_or_default(),
                success: true,
                output: format!("did: {}", request.task),
                steps: 2,
                anchor_session_id: request.anchor_session_id,
                live_view_url: Some("https://live.example/s1".to_string()),
            })
        },
    })
    .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/tasks"))
        .json(&json!({
            "sessionId": "s1",
            "task": "open https://dapp.example/",
            "anchorSessionId": "anchor-9",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["sessionId"], "s1");
    assert_eq!(body["success"], true);
    assert_eq!(body["steps"], 2);
    assert_eq!(body["anchorSessionId"], "anchor-9");
    assert_eq!(body["liveViewUrl"], "https://live.example/s1");
}

#[tokio::test]
async fn configuration_errors_map_to_bad_request() {
    let base = spawn(StubExecutor {
        response: |_| Err(FlowError::Configuration("API key missing".to_string())),
    })
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base}/tasks"))
        .json(&json!({"task": "anything"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("API key"));
}

#[tokio::test]
async fn provisioning_errors_map_to_bad_gateway() {
    let base = spawn(StubExecutor {
        response: |_| Err(FlowError::Provisioning("engine unreachable".to_string())),
    })
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base}/tasks"))
        .json(&json!({"task": "anything"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 502);
}

#[tokio::test]
async fn health_probe_answers() {
    let base = spawn(StubExecutor {
        response: |_| Err(FlowError::Session("unused".to_string())),
    })
    .await;

    let response = reqwest::Client::new()
        .get(format!("{base}/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}
