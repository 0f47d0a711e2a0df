//! Core types and error definitions for the Maestro orchestration system.
//!
//! This crate provides the foundation shared by the orchestration engine and
//! its embedding process: the unified error enum, the message envelope
//! exchanged over the agent bus, agent identity records, and the collaborator
//! traits the engine is constructed with.
//!
//! # Main types
//!
//! - [`MaestroError`] — Unified error enum for all orchestration subsystems.
//! - [`MaestroResult`] — Convenience alias for `Result<T, MaestroError>`.
//! - [`Envelope`] / [`Payload`] — Typed messages routed between agents.
//! - [`AgentIdentity`] — Addressable, capability-tagged worker description.
//! - [`Transport`] / [`AgentRegistry`] / [`IdGenerator`] — Injected
//!   collaborator seams.

/// Collaborator traits injected into the engine (transport, registry, ids).
pub mod bus;
/// Agent identity, type, status, and heartbeat metadata.
pub mod identity;
/// Message envelope and payload sum types for the agent bus.
pub mod message;

use serde::{Deserialize, Serialize};

pub use bus::{AgentRegistry, IdGenerator, Transport, UuidGenerator};
pub use identity::{AgentIdentity, AgentMetadata, AgentStatus, AgentType};
pub use message::{
    Action, Envelope, Payload, Priority, QueryKind, Recipient, WorkflowCommand, PROTOCOL_VERSION,
};

// --- Error types ---

/// Top-level error type for the orchestration system.
///
/// Per-task variants (`NoAgentFound`, `DispatchTimeout`, `Transport`,
/// `AgentUnavailable`) are recovered locally into the owning workflow's error
/// map; `WorkflowFault` is terminal for its workflow. Nothing here is
/// process-fatal.
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    /// The selector found no viable agent for a task.
    #[error("no suitable agent found for task '{0}'")]
    NoAgentFound(String),

    /// A dispatched request's response never arrived before the task timeout.
    #[error("request '{0}' timed out waiting for a response")]
    DispatchTimeout(String),

    /// The underlying message send failed synchronously.
    #[error("transport failure: {0}")]
    Transport(String),

    /// An agent went offline or errored while executing a task.
    #[error("agent '{0}' became unavailable mid-execution")]
    AgentUnavailable(String),

    /// An agent answered a request with an error result.
    #[error("agent reported failure: {0}")]
    AgentFailure(String),

    /// A request carried an action the engine does not recognize.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// A request or query was missing or mistyped a required parameter.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A command message carried an unrecognized command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A query message carried an unrecognized query.
    #[error("unknown query: {0}")]
    UnknownQuery(String),

    /// An uncaught fault during a scheduling generation.
    #[error("workflow '{workflow_id}' fault: {message}")]
    WorkflowFault {
        /// The workflow that was forced to `Failed`.
        workflow_id: String,
        /// Human-readable fault description.
        message: String,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaestroError {
    /// The serializable classification of this error, recorded in workflow
    /// error maps.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MaestroError::NoAgentFound(_) => ErrorKind::NoAgentFound,
            MaestroError::DispatchTimeout(_) => ErrorKind::Timeout,
            MaestroError::Transport(_) => ErrorKind::Transport,
            MaestroError::AgentUnavailable(_) => ErrorKind::AgentUnavailable,
            MaestroError::AgentFailure(_) => ErrorKind::AgentFailure,
            MaestroError::UnknownAction(_)
            | MaestroError::InvalidParams(_)
            | MaestroError::UnknownCommand(_)
            | MaestroError::UnknownQuery(_) => ErrorKind::UnknownMessage,
            MaestroError::WorkflowFault { .. } => ErrorKind::WorkflowFault,
            MaestroError::Json(_) | MaestroError::Io(_) => ErrorKind::Internal,
        }
    }
}

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Serializable error classification stored alongside failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No viable agent for the task.
    NoAgentFound,
    /// Response never arrived before the deadline.
    Timeout,
    /// Message send failed.
    Transport,
    /// Assigned agent went offline or errored.
    AgentUnavailable,
    /// Agent answered with an error result.
    AgentFailure,
    /// Unrecognized action, command, or query.
    UnknownMessage,
    /// Uncaught fault in a scheduling generation.
    WorkflowFault,
    /// Serialization or I/O failure inside the engine.
    Internal,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MaestroError::NoAgentFound("task-1".into());
        assert_eq!(err.to_string(), "no suitable agent found for task 'task-1'");

        let err = MaestroError::DispatchTimeout("req-9".into());
        assert!(err.to_string().contains("req-9"));
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            MaestroError::DispatchTimeout("r".into()).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            MaestroError::UnknownCommand("c".into()).kind(),
            ErrorKind::UnknownMessage
        );
        assert_eq!(
            MaestroError::WorkflowFault {
                workflow_id: "wf".into(),
                message: "boom".into()
            }
            .kind(),
            ErrorKind::WorkflowFault
        );
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::AgentUnavailable).unwrap();
        assert_eq!(json, "\"agent_unavailable\"");
    }
}
