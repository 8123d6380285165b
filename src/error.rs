//! Crate-level error type.
//!
//! Component errors ([`AgentError`], [`RouterError`], [`ConfigError`]) stay
//! concrete at their own boundaries; [`MeshError`] unifies them at the
//! network-facing API surface.

use crate::agents::AgentError;
use crate::config::ConfigError;
use crate::router::RouterError;

pub type MeshResult<T> = Result<T, MeshError>;

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent {agent_id} is busy")]
    AgentBusy { agent_id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
