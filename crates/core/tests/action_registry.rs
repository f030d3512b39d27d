//! Built-in actions against the in-memory backend.

use std::fs;
use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;
use walletflow::testing::MockBackend;
use walletflow::{
    ActionRegistry, ScriptStore, Session, SessionContext, SessionKind, SessionOptions,
    open_session,
};

async fn open(backend: Arc<MockBackend>) -> (TempDir, SessionContext) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("wallet-provider.js"), "void 0;\n").unwrap();
    let store = ScriptStore::new(dir.path());
    let ctx = open_session(
        backend,
        Session::new(
            Some("s1".into()),
            SessionKind::Local,
            "http://localhost:3000/relayer",
        ),
        &store,
        SessionOptions::default(),
    )
    .await
    .unwrap();
    (dir, ctx)
}

#[tokio::test]
async fn navigate_moves_the_active_page() {
    let backend = Arc::new(MockBackend::new());
    let (_dir, ctx) = open(backend).await;
    let registry = ActionRegistry::with_builtins();

    let result = registry
        .invoke("navigate", &ctx, &json!({"url": "https://dapp.example/"}))
        .await
        .unwrap();
    assert!(result.ok, "{}", result.content);
    assert!(result.include_in_memory);

    let url = ctx.active_page().unwrap().url().await.unwrap();
    assert_eq!(url, "https://dapp.example/");

    // Missing argument is a failed result, not a fault.
    let result = registry.invoke("navigate", &ctx, &Value::Null).await.unwrap();
    assert!(!result.ok);
    assert!(result.content.contains("url"));

    ctx.close().await;
}

#[tokio::test]
async fn unknown_action_is_a_failed_result() {
    let backend = Arc::new(MockBackend::new());
    let (_dir, ctx) = open(backend).await;
    let registry = ActionRegistry::with_builtins();

    let result = registry.invoke("teleport", &ctx, &Value::Null).await.unwrap();
    assert!(!result.ok);
    assert!(result.content.contains("teleport"));

    ctx.close().await;
}

#[tokio::test]
async fn origin_header_derives_from_page_url() {
    let backend = Arc::new(MockBackend::new());
    let (_dir, ctx) = open(backend).await;
    let registry = ActionRegistry::with_builtins();

    ctx.goto("https://dapp.example/connect?step=2").await.unwrap();
    let result = registry
        .invoke("set_origin_header", &ctx, &Value::Null)
        .await
        .unwrap();
    assert!(result.ok, "{}", result.content);
    assert!(result.content.contains("https://dapp.example"));

    // Explicit argument wins over derivation.
    let result = registry
        .invoke(
            "set_origin_header",
            &ctx,
            &json!({"origin": "https://override.example"}),
        )
        .await
        .unwrap();
    assert!(result.ok);
    assert!(result.content.contains("https://override.example"));

    ctx.close().await;
}

#[tokio::test]
async fn attach_observers_enables_both_feeds() {
    let backend = Arc::new(MockBackend::new());
    let (_dir, ctx) = open(backend).await;
    let registry = ActionRegistry::with_builtins();

    let result = registry
        .invoke("attach_observers", &ctx, &Value::Null)
        .await
        .unwrap();
    assert!(result.ok);
    assert!(!result.include_in_memory);

    ctx.close().await;
}
