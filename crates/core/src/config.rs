//! Runtime configuration.
//!
//! Everything the provisioner and session manager need is carried in an
//! explicit [`FlowConfig`] constructed once at startup; nothing reads the
//! environment after that point.

use std::path::PathBuf;

use crate::error::{FlowError, Result};
use crate::provision::{LocalParams, ProvisioningMode, RemoteParams};

pub const DEFAULT_MAX_STEPS: usize = 25;
pub const DEFAULT_SCRIPTS_DIR: &str = "scripts";

#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Local launch vs remote CDP service.
    pub remote: bool,
    /// API key for the remote provisioning service.
    pub api_key: Option<String>,
    /// Base URL step records are posted under (`{base}/{session}/log`).
    pub relay_base_url: String,
    /// Directory holding named script payloads (wallet provider).
    pub scripts_dir: PathBuf,
    pub headless: bool,
    /// Sole external bound on automation duration.
    pub max_steps: usize,
}

impl FlowConfig {
    /// Read configuration from the process environment.
    ///
    /// `WALLETFLOW_RELAY_URL` is required; the rest have defaults. The API
    /// key is only validated when remote provisioning is actually requested.
    pub fn from_env() -> Result<Self> {
        let relay_base_url = std::env::var("WALLETFLOW_RELAY_URL").map_err(|_| {
            FlowError::Configuration("WALLETFLOW_RELAY_URL is not set".to_string())
        })?;

        Ok(Self {
            remote: env_flag("WALLETFLOW_REMOTE", false),
            api_key: std::env::var("WALLETFLOW_API_KEY").ok().filter(|k| !k.is_empty()),
            relay_base_url,
            scripts_dir: std::env::var("WALLETFLOW_SCRIPTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SCRIPTS_DIR)),
            headless: env_flag("WALLETFLOW_HEADLESS", true),
            max_steps: std::env::var("WALLETFLOW_MAX_STEPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_STEPS),
        })
    }

    /// Provisioning mode derived from this configuration.
    pub fn provisioning_mode(&self) -> ProvisioningMode {
        if self.remote {
            ProvisioningMode::Remote(RemoteParams {
                api_key: self.api_key.clone(),
                headless: self.headless,
                ..RemoteParams::default()
            })
        } else {
            ProvisioningMode::Local(LocalParams {
                headless: self.headless,
                ..LocalParams::default()
            })
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_requires_remote_flag() {
        let config = FlowConfig {
            remote: false,
            api_key: None,
            relay_base_url: "http://localhost:3000/relayer".into(),
            scripts_dir: PathBuf::from("scripts"),
            headless: true,
            max_steps: 10,
        };
        assert!(matches!(
            config.provisioning_mode(),
            ProvisioningMode::Local(_)
        ));

        let config = FlowConfig {
            remote: true,
            api_key: Some("key".into()),
            ..config
        };
        match config.provisioning_mode() {
            ProvisioningMode::Remote(params) => {
                assert_eq!(params.api_key.as_deref(), Some("key"));
                assert!(params.headless);
            }
            other => panic!("expected remote mode, got {other:?}"),
        }
    }
}
