//! Error taxonomy for loading, dispatching and fanning out

use std::path::PathBuf;

use thiserror::Error;

/// Boxed underlying failure carried by [`DispatchError::HandlerExecutionError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures while building the registry. None of these reach callers of
/// `load_all`; they are logged and collected into the load report.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("manifest not found at {0}")]
    ManifestMissing(PathBuf),

    #[error("manifest {path} is invalid: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("failed to resolve agent '{name}': {reason}")]
    AgentResolutionFailed { name: String, reason: String },
}

impl RegistryError {
    pub fn resolution(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::AgentResolutionFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures surfaced to the immediate caller of a dispatch
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("agent '{name}' not found. Available: {available:?}")]
    UnknownAgentName { name: String, available: Vec<String> },

    #[error("agent '{agent}' exposes no supported invocation shape")]
    UnsupportedHandlerKind { agent: String },

    #[error("agent '{agent}' failed: {source}")]
    HandlerExecutionError {
        agent: String,
        #[source]
        source: BoxError,
    },
}

impl DispatchError {
    /// Name of the agent the error concerns
    pub fn agent(&self) -> &str {
        match self {
            Self::UnknownAgentName { name, .. } => name,
            Self::UnsupportedHandlerKind { agent } => agent,
            Self::HandlerExecutionError { agent, .. } => agent,
        }
    }
}

/// Precondition violations of a fan-out request, reported before any agent runs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FanOutError {
    #[error("fan-out requires at least one agent")]
    EmptyAgentList,

    #[error("agent '{0}' listed more than once")]
    DuplicateAgentName(String),

    #[error("agents not found: {0:?}")]
    UnknownAgentName(Vec<String>),
}

/// The rewrite/route service could not be reached or answered with a failure.
/// Always recovered locally by the router.
#[derive(Debug, Error)]
#[error("upstream service unavailable: {reason}")]
pub struct UpstreamServiceUnavailable {
    pub reason: String,
}

impl UpstreamServiceUnavailable {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}
