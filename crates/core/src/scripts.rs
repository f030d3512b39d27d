//! Bootstrap script sources.
//!
//! Three scripts are injected into every session context, in this order:
//! session identity, relay endpoint, wallet provider. The first two are
//! generated (they bind runtime values into well-known globals); the wallet
//! provider is an opaque payload loaded verbatim from disk. The wallet
//! script may read the globals set by the prior two, so injection order is
//! part of the contract.

use std::path::{Path, PathBuf};

use crate::error::{FlowError, Result};

/// Global the served page and later scripts read the session id from.
pub const SESSION_ID_GLOBAL: &str = "__WALLET_SESSION_ID";
/// Global holding the relay base URL.
pub const RELAY_URL_GLOBAL: &str = "__WALLET_RELAY_URL";

/// File name of the wallet-provider payload under the script root.
pub const WALLET_PROVIDER_SOURCE: &str = "wallet-provider.js";

/// Script binding the session identifier into [`SESSION_ID_GLOBAL`].
pub fn session_identity_script(session_id: &str) -> String {
    format!(
        "window.{SESSION_ID_GLOBAL} = {};",
        js_string(session_id)
    )
}

/// Script binding the relay base URL into [`RELAY_URL_GLOBAL`].
pub fn relay_endpoint_script(relay_base_url: &str) -> String {
    format!(
        "window.{RELAY_URL_GLOBAL} = {};",
        js_string(relay_base_url)
    )
}

/// Expression summarizing the active page for the agent: url, title, and
/// visible interactive elements, optionally outlined.
pub fn snapshot_script(highlight_elements: bool) -> String {
    format!(
        r#"(() => {{
            const interactive = Array.from(
                document.querySelectorAll('a, button, input, select, textarea, [role="button"]')
            ).filter(el => el.offsetParent !== null);
            {highlight}
            return JSON.stringify({{
                url: location.href,
                title: document.title,
                elements: interactive.slice(0, 100).map((el, index) => ({{
                    index,
                    tag: el.tagName.toLowerCase(),
                    text: (el.innerText || el.value || '').trim().substring(0, 80),
                    href: el.getAttribute('href'),
                }})),
            }});
        }})()"#,
        highlight = if highlight_elements {
            "interactive.forEach(el => { el.style.outline = '1px solid rgba(66,133,244,0.8)'; });"
        } else {
            ""
        }
    )
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Loads named script payloads from a fixed root directory.
#[derive(Debug, Clone)]
pub struct ScriptStore {
    root: PathBuf,
}

impl ScriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the contents of `name` verbatim.
    ///
    /// Scripts are required preconditions, so a missing or unreadable source
    /// is a [`FlowError::Configuration`], not an optional enhancement.
    pub fn load(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        std::fs::read_to_string(&path).map_err(|e| {
            FlowError::Configuration(format!(
                "required script {} could not be read: {e}",
                path.display()
            ))
        })
    }

    /// The wallet-provider bootstrap payload.
    pub fn wallet_provider(&self) -> Result<String> {
        self.load(WALLET_PROVIDER_SOURCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn identity_script_binds_escaped_value() {
        let script = session_identity_script("s1");
        assert_eq!(script, r#"window.__WALLET_SESSION_ID = "s1";"#);

        // Values with quotes must stay a single valid JS string.
        let script = session_identity_script(r#"a"b"#);
        assert_eq!(script, r#"window.__WALLET_SESSION_ID = "a\"b";"#);
    }

    #[test]
    fn relay_script_binds_url() {
        let script = relay_endpoint_script("http://localhost:3000/relayer");
        assert_eq!(
            script,
            r#"window.__WALLET_RELAY_URL = "http://localhost:3000/relayer";"#
        );
    }

    #[test]
    fn store_returns_contents_verbatim() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("wallet-provider.js"), "console.log(1);\n").unwrap();

        let store = ScriptStore::new(dir.path());
        assert_eq!(store.wallet_provider().unwrap(), "console.log(1);\n");
    }

    #[test]
    fn missing_script_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let store = ScriptStore::new(dir.path());

        let err = store.wallet_provider().unwrap_err();
        assert!(err.is_configuration(), "got {err}");
    }
}
