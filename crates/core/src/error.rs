use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

/// Error taxonomy for the session pipeline.
///
/// `Configuration` and `Provisioning` are fatal for a session and surface to
/// the caller; relay delivery failures never leave the relay module; action
/// handler failures are converted into agent-visible results rather than
/// raised (see [`crate::actions::ActionRegistry::invoke`]).
#[derive(Debug, Error)]
pub enum FlowError {
    /// A required secret, script, or setting is missing. No retry.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The browser could not be started or connected.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// The session context could not be initialized or driven.
    #[error("session failed: {0}")]
    Session(String),

    /// A registered action capability failed.
    #[error("action '{name}' failed")]
    Action {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The external agent reported an unrecoverable fault.
    #[error("agent failed: {0}")]
    Agent(String),

    #[error(transparent)]
    Cdp(#[from] cdp::CdpError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// True for errors a caller should treat as bad input/setup rather than
    /// a transient runtime fault.
    pub fn is_configuration(&self) -> bool {
        matches!(self, FlowError::Configuration(_))
    }
}
