//! Relay delivery against a live HTTP endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use walletflow::relay::{RelayClient, RelayDeliveryError, StepRecord, StepValue};

type Received = Arc<Mutex<Vec<(String, Value)>>>;

async fn spawn_relay(status: StatusCode) -> (String, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let state = (status, Arc::clone(&received));

    async fn log(
        Path(session_id): Path<String>,
        State((status, received)): State<(StatusCode, Received)>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        received.lock().push((session_id, body));
        status
    }

    let app = Router::new()
        .route("/{session_id}/log", post(log))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), received)
}

fn record(session_id: &str, step: usize) -> StepRecord {
    StepRecord {
        session_id: session_id.to_string(),
        step,
        output: StepValue::Map(vec![(
            "next_goal".into(),
            StepValue::Text("connect wallet".into()),
        )])
        .to_json(),
    }
}

#[tokio::test]
async fn delivers_to_per_session_endpoint() {
    let (base, received) = spawn_relay(StatusCode::OK).await;
    let relay = RelayClient::new(&base);

    relay.deliver(&record("s1", 3)).await.unwrap();

    let received = received.lock();
    assert_eq!(received.len(), 1);
    let (session_id, body) = &received[0];
    assert_eq!(session_id, "s1");
    assert_eq!(body["session_id"], "s1");
    assert_eq!(body["step"], 3);
    assert_eq!(body["output"]["next_goal"], "connect wallet");
}

#[tokio::test]
async fn server_error_surfaces_from_deliver() {
    let (base, _received) = spawn_relay(StatusCode::INTERNAL_SERVER_ERROR).await;
    let relay = RelayClient::new(&base);

    let err = relay.deliver(&record("s1", 0)).await.unwrap_err();
    assert!(matches!(err, RelayDeliveryError::Status(500)), "got {err}");
}

#[tokio::test]
async fn on_step_swallows_server_errors() {
    let (base, received) = spawn_relay(StatusCode::INTERNAL_SERVER_ERROR).await;
    let relay = RelayClient::new(&base);

    // Fire-and-forget must neither fail nor panic on a 500.
    relay.on_step("s1", 0, &StepValue::Text("observing".into()));

    // The request itself still went out.
    for _ in 0..50 {
        if !received.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received.lock().len(), 1);
}

#[tokio::test]
async fn unreachable_relay_is_swallowed() {
    // TEST-NET-1 address, nothing listens there.
    let relay = RelayClient::new("http://192.0.2.1:1/relayer");
    relay.on_step("s1", 0, &StepValue::Null);
    tokio::time::sleep(Duration::from_millis(20)).await;
}
