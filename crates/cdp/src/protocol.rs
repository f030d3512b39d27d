//! CDP wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing CDP command.
#[derive(Debug, Serialize)]
pub struct CdpRequest {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Incoming CDP message: either a command response (has `id`) or an event
/// (has `method`).
#[derive(Debug, Deserialize)]
pub struct CdpResponse {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<CdpErrorBody>,
    pub method: Option<String>,
    pub params: Option<Value>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CdpErrorBody {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
}

/// Event delivered to subscribers.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Target description from `Target.*` events and responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub title: String,
    pub url: String,
    pub attached: Option<bool>,
    pub browser_context_id: Option<String>,
}

/// `/json/version` payload. Chrome returns PascalCase names here.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_skips_absent_fields() {
        let req = CdpRequest {
            id: 7,
            method: "Target.getTargets".into(),
            params: None,
            session_id: None,
        };
        let text = serde_json::to_string(&req).unwrap();
        assert_eq!(text, r#"{"id":7,"method":"Target.getTargets"}"#);
    }

    #[test]
    fn request_carries_session_id() {
        let req = CdpRequest {
            id: 1,
            method: "Runtime.evaluate".into(),
            params: Some(json!({"expression": "1+1"})),
            session_id: Some("abc".into()),
        };
        let value: Value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["sessionId"], "abc");
        assert_eq!(value["params"]["expression"], "1+1");
    }

    #[test]
    fn response_parses_command_result() {
        let resp: CdpResponse =
            serde_json::from_str(r#"{"id":3,"result":{"ok":true}}"#).unwrap();
        assert_eq!(resp.id, Some(3));
        assert!(resp.method.is_none());
        assert_eq!(resp.result.unwrap()["ok"], true);
    }

    #[test]
    fn response_parses_event() {
        let resp: CdpResponse = serde_json::from_str(
            r#"{"method":"Target.targetCreated","params":{"targetInfo":{"targetId":"t1","type":"page","title":"","url":"about:blank"}},"sessionId":"s9"}"#,
        )
        .unwrap();
        assert!(resp.id.is_none());
        assert_eq!(resp.method.as_deref(), Some("Target.targetCreated"));
        assert_eq!(resp.session_id.as_deref(), Some("s9"));

        let info: TargetInfo =
            serde_json::from_value(resp.params.unwrap()["targetInfo"].clone()).unwrap();
        assert_eq!(info.target_id, "t1");
        assert_eq!(info.target_type, "page");
    }

    #[test]
    fn browser_version_pascal_case() {
        let v: BrowserVersion = serde_json::from_str(
            r#"{"Browser":"Chrome/131.0.0.0","Protocol-Version":"1.3","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/x"}"#,
        )
        .unwrap();
        assert_eq!(v.protocol_version, "1.3");
        assert!(v.web_socket_debugger_url.starts_with("ws://"));
    }
}
