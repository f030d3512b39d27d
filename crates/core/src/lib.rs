//! Session-scoped browser contexts for wallet-connection flows.
//!
//! The crate provisions a browser (local launch or remote CDP service),
//! opens one browsing context per logical session with an ordered bootstrap
//! of init scripts, tracks the active page across navigations and popups,
//! exposes an action registry to an external agent, and relays per-step
//! telemetry. [`runner::run_task`] is the top-level entry point.

pub mod actions;
pub mod agent;
pub mod backend;
pub mod cdp_backend;
pub mod config;
pub mod error;
pub mod provision;
pub mod relay;
pub mod runner;
pub mod scripts;
pub mod session;
pub mod testing;

pub use actions::{ActionHandler, ActionRegistry, ActionResult};
pub use agent::{ActionCall, AgentOutcome, AgentStep, Observation, TaskAgent};
pub use backend::{BrowserBackend, PageBackend, PageEvent, PageRef};
pub use cdp_backend::CdpBackend;
pub use config::FlowConfig;
pub use error::{FlowError, Result};
pub use provision::{
    BrowserHandle, LocalParams, Provisioner, ProvisioningMode, RemoteParams, RemoteSession,
};
pub use relay::{RelayClient, StepRecord, StepValue};
pub use runner::{TaskOutcome, TaskRequest, close_session, run_task, run_task_with_handle};
pub use scripts::ScriptStore;
pub use session::{Session, SessionContext, SessionKind, SessionOptions, open_session};
