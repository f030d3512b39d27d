//! Session lifecycle against the in-memory backend: bootstrap ordering,
//! active-page tracking, and teardown behavior.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use walletflow::scripts::{relay_endpoint_script, session_identity_script};
use walletflow::testing::MockBackend;
use walletflow::{ScriptStore, Session, SessionKind, SessionOptions, open_session};

const WALLET_SCRIPT: &str =
    "window.__WALLET_PROVIDER = { session: window.__WALLET_SESSION_ID };\n";
const RELAY_BASE: &str = "http://localhost:3000/relayer";

fn script_store() -> (TempDir, ScriptStore) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("wallet-provider.js"), WALLET_SCRIPT).unwrap();
    let store = ScriptStore::new(dir.path());
    (dir, store)
}

fn session(id: &str) -> Session {
    Session::new(Some(id.to_string()), SessionKind::Local, RELAY_BASE)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn bootstrap_scripts_install_once_in_order() {
    let backend = Arc::new(MockBackend::new());
    let (_dir, store) = script_store();

    let ctx = open_session(
        backend.clone(),
        session("s1"),
        &store,
        SessionOptions::default(),
    )
    .await
    .unwrap();

    let scripts = backend.context_scripts(ctx.context_id());
    assert_eq!(
        scripts,
        vec![
            session_identity_script("s1"),
            relay_endpoint_script(RELAY_BASE),
            WALLET_SCRIPT.to_string(),
        ]
    );

    // Navigation must not re-run installation.
    ctx.goto("https://dapp.example/connect").await.unwrap();
    assert_eq!(backend.context_scripts(ctx.context_id()).len(), 3);

    // The identity global stays bound after navigation.
    let page = ctx.active_page().unwrap();
    let value = page.evaluate("window.__WALLET_SESSION_ID").await.unwrap();
    assert_eq!(value, serde_json::json!("s1"));

    ctx.close().await;
}

#[tokio::test]
async fn active_page_follows_newest_open_page() {
    let backend = Arc::new(MockBackend::new());
    let (_dir, store) = script_store();

    let ctx = open_session(
        backend.clone(),
        session("s1"),
        &store,
        SessionOptions::default(),
    )
    .await
    .unwrap();
    let first = ctx.active_page().unwrap().id().to_string();

    // A popup becomes the active page.
    let popup = backend.emit_page(ctx.context_id()).unwrap();
    settle().await;
    assert_eq!(ctx.active_page().unwrap().id(), popup.id());

    // Closing it falls back to the previous page.
    backend
        .emit_page_closed(ctx.context_id(), popup.id())
        .unwrap();
    settle().await;
    assert_eq!(ctx.active_page().unwrap().id(), first);

    ctx.close().await;
}

#[tokio::test]
async fn sessions_share_no_page_or_script_state() {
    let backend = Arc::new(MockBackend::new());
    let (_dir, store) = script_store();

    let ctx_a = open_session(
        backend.clone(),
        session("session-a"),
        &store,
        SessionOptions::default(),
    )
    .await
    .unwrap();
    let ctx_b = open_session(
        backend.clone(),
        session("session-b"),
        &store,
        SessionOptions::default(),
    )
    .await
    .unwrap();

    assert_ne!(ctx_a.context_id(), ctx_b.context_id());

    // Each context carries its own identity binding.
    let id_a = ctx_a
        .active_page()
        .unwrap()
        .evaluate("window.__WALLET_SESSION_ID")
        .await
        .unwrap();
    let id_b = ctx_b
        .active_page()
        .unwrap()
        .evaluate("window.__WALLET_SESSION_ID")
        .await
        .unwrap();
    assert_eq!(id_a, serde_json::json!("session-a"));
    assert_eq!(id_b, serde_json::json!("session-b"));

    // A page opening in one context never reassigns the other's pointer.
    let active_a = ctx_a.active_page().unwrap().id().to_string();
    backend.emit_page(ctx_b.context_id()).unwrap();
    settle().await;
    assert_eq!(ctx_a.active_page().unwrap().id(), active_a);

    ctx_a.close().await;
    ctx_b.close().await;
}

#[tokio::test]
async fn close_is_idempotent() {
    let backend = Arc::new(MockBackend::new());
    let (_dir, store) = script_store();

    let ctx = open_session(
        backend.clone(),
        session("s1"),
        &store,
        SessionOptions::default(),
    )
    .await
    .unwrap();

    ctx.close().await;
    ctx.close().await;
    assert!(ctx.is_closed());
    assert_eq!(backend.close_context_calls(ctx.context_id()), 1);
}

#[tokio::test]
async fn close_completes_when_context_release_fails() {
    let backend = Arc::new(MockBackend::new());
    let (_dir, store) = script_store();

    let ctx = open_session(
        backend.clone(),
        session("s1"),
        &store,
        SessionOptions::default(),
    )
    .await
    .unwrap();

    backend.fail_close_context();
    ctx.close().await;
    assert!(ctx.is_closed());
}

#[tokio::test]
async fn generated_session_ids_are_unique_and_stable() {
    let a = Session::new(None, SessionKind::Local, RELAY_BASE);
    let b = Session::new(Some(String::new()), SessionKind::Local, RELAY_BASE);
    assert!(!a.id().is_empty());
    assert_ne!(a.id(), b.id());

    let explicit = Session::new(Some("s1".into()), SessionKind::Remote, RELAY_BASE);
    assert_eq!(explicit.id(), "s1");
    assert_eq!(explicit.kind(), SessionKind::Remote);
}
