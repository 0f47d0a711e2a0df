use crate::{MaestroError, MaestroResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Wire protocol version stamped on every envelope.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message priority hint. Also used for task prioritization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Must be handled ahead of normal traffic.
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Destination of an envelope: a single agent id or every agent on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    /// Every agent on the bus (`"*"` on the wire).
    Broadcast,
    /// A single agent id.
    Agent(String),
}

impl From<String> for Recipient {
    fn from(s: String) -> Self {
        if s == "*" {
            Recipient::Broadcast
        } else {
            Recipient::Agent(s)
        }
    }
}

impl From<Recipient> for String {
    fn from(r: Recipient) -> Self {
        match r {
            Recipient::Broadcast => "*".to_string(),
            Recipient::Agent(id) => id,
        }
    }
}

impl From<&str> for Recipient {
    fn from(s: &str) -> Self {
        Recipient::from(s.to_string())
    }
}

/// Request actions the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Decompose a goal into a workflow and run it.
    Orchestrate,
    /// Run a single goal, promoting to a workflow only if needed.
    ExecuteTask,
    /// Run a pre-built task on the best available executor.
    Delegate,
    /// Report engine status.
    Monitor,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Orchestrate => write!(f, "orchestrate"),
            Action::ExecuteTask => write!(f, "execute-task"),
            Action::Delegate => write!(f, "delegate"),
            Action::Monitor => write!(f, "monitor"),
        }
    }
}

impl FromStr for Action {
    type Err = MaestroError;

    fn from_str(s: &str) -> MaestroResult<Self> {
        match s {
            "orchestrate" => Ok(Action::Orchestrate),
            "execute-task" => Ok(Action::ExecuteTask),
            "delegate" => Ok(Action::Delegate),
            "monitor" => Ok(Action::Monitor),
            other => Err(MaestroError::UnknownAction(other.to_string())),
        }
    }
}

/// Workflow control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowCommand {
    /// Force-fail all live executions and the workflow.
    CancelWorkflow,
    /// Suspend scheduling between generations.
    PauseWorkflow,
    /// Resume a paused workflow.
    ResumeWorkflow,
}

impl FromStr for WorkflowCommand {
    type Err = MaestroError;

    fn from_str(s: &str) -> MaestroResult<Self> {
        match s {
            "cancel-workflow" => Ok(WorkflowCommand::CancelWorkflow),
            "pause-workflow" => Ok(WorkflowCommand::PauseWorkflow),
            "resume-workflow" => Ok(WorkflowCommand::ResumeWorkflow),
            other => Err(MaestroError::UnknownCommand(other.to_string())),
        }
    }
}

/// Read-only queries against engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryKind {
    /// Summaries of all known workflows.
    Workflows,
    /// Status of one workflow (`filters.workflow_id`).
    WorkflowStatus,
    /// Count of running executions per agent.
    AgentLoad,
}

impl FromStr for QueryKind {
    type Err = MaestroError;

    fn from_str(s: &str) -> MaestroResult<Self> {
        match s {
            "workflows" => Ok(QueryKind::Workflows),
            "workflow-status" => Ok(QueryKind::WorkflowStatus),
            "agent-load" => Ok(QueryKind::AgentLoad),
            other => Err(MaestroError::UnknownQuery(other.to_string())),
        }
    }
}

/// Type-specific payload of an [`Envelope`].
///
/// `action`, `command`, and `query` stay strings on the wire so an
/// unrecognized value deserializes cleanly and can be answered with a typed
/// error response instead of a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Payload {
    /// Ask an agent to perform an action; expects a correlated response.
    Request {
        /// Action name (see [`Action`]).
        action: String,
        /// Action-specific parameters.
        params: Value,
        /// How long the sender will wait for a response, in milliseconds.
        timeout_ms: u64,
    },
    /// Answer to a request, matched by `correlation_id`.
    Response {
        /// Successful result, if any.
        result: Option<Value>,
        /// Error description, if the request failed.
        error: Option<String>,
    },
    /// Fire-and-forget control instruction.
    Command {
        /// Command name (see [`WorkflowCommand`]).
        command: String,
        /// Command arguments.
        args: Value,
    },
    /// Read-only state query; expects a correlated response.
    Query {
        /// Query name (see [`QueryKind`]).
        query: String,
        /// Optional filters (e.g., `{"workflow_id": "..."}`).
        #[serde(default)]
        filters: Option<Value>,
    },
    /// Broadcast notification.
    Event {
        /// Event type tag (e.g., `agent:status:changed`).
        event_type: String,
        /// Event data.
        data: Value,
        /// Id of the agent that emitted the event.
        source: String,
    },
    /// Liveness ping.
    Heartbeat,
}

/// A typed message routed between named agent identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id; doubles as the correlation key for requests.
    pub id: String,
    /// When the envelope was created.
    pub timestamp: DateTime<Utc>,
    /// Wire protocol version.
    pub version: String,
    /// Sender agent id.
    pub from: String,
    /// Destination agent id or broadcast.
    pub to: Recipient,
    /// Typed payload.
    #[serde(flatten)]
    pub payload: Payload,
    /// Priority hint.
    #[serde(default)]
    pub priority: Priority,
    /// For responses: the id of the request being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Create an envelope with an explicit id (ids come from the engine's
    /// injected generator, never minted here).
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<Recipient>,
        payload: Payload,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            version: PROTOCOL_VERSION.to_string(),
            from: from.into(),
            to: to.into(),
            payload,
            priority: Priority::default(),
            correlation_id: None,
        }
    }

    /// Build a request envelope.
    pub fn request(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<Recipient>,
        action: Action,
        params: Value,
        timeout_ms: u64,
    ) -> Self {
        Self::new(
            id,
            from,
            to,
            Payload::Request {
                action: action.to_string(),
                params,
                timeout_ms,
            },
        )
    }

    /// Build a successful response correlated to `request`.
    pub fn response_to(
        request: &Envelope,
        id: impl Into<String>,
        from: impl Into<String>,
        result: Value,
    ) -> Self {
        let mut envelope = Self::new(
            id,
            from,
            Recipient::Agent(request.from.clone()),
            Payload::Response {
                result: Some(result),
                error: None,
            },
        );
        envelope.correlation_id = Some(request.id.clone());
        envelope
    }

    /// Build an error response correlated to `request`.
    pub fn error_response_to(
        request: &Envelope,
        id: impl Into<String>,
        from: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::new(
            id,
            from,
            Recipient::Agent(request.from.clone()),
            Payload::Response {
                result: None,
                error: Some(error.into()),
            },
        );
        envelope.correlation_id = Some(request.id.clone());
        envelope
    }

    /// Set the priority hint.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
