use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Role class of an agent on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Owns workflows and dispatches tasks (the engine itself).
    Coordinator,
    /// Executes atomic tasks (shell, file, code actions).
    Executor,
    /// Produces plans and decompositions.
    Planner,
    /// Narrow-domain worker (e.g., a database specialist).
    Specialist,
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::Coordinator => write!(f, "coordinator"),
            AgentType::Executor => write!(f, "executor"),
            AgentType::Planner => write!(f, "planner"),
            AgentType::Specialist => write!(f, "specialist"),
        }
    }
}

/// Liveness status reported by an agent's heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Ready for new work.
    Idle,
    /// Currently executing at least one task.
    Busy,
    /// Reported an internal failure; may still recover.
    Error,
    /// No longer reachable on the bus.
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Registration and heartbeat metadata for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Semantic version string reported by the agent.
    pub version: String,
    /// When the agent registered with the bus.
    pub created: DateTime<Utc>,
    /// Last heartbeat or message seen from the agent.
    pub last_active: DateTime<Utc>,
}

/// The addressable, capability-tagged description of a worker agent.
///
/// Owned by the registry collaborator; the engine and selector only read it.
/// `status` and `metadata.last_active` change as heartbeats arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique bus address of the agent.
    pub id: String,
    /// Role class.
    pub agent_type: AgentType,
    /// Backing provider (e.g., `claude`, `openai`, `local`).
    pub provider: String,
    /// Capability tags the agent advertises (e.g., `file:write`).
    pub capabilities: HashSet<String>,
    /// Current liveness status.
    pub status: AgentStatus,
    /// Registration and heartbeat metadata.
    pub metadata: AgentMetadata,
}

impl AgentIdentity {
    /// Create a new idle agent registered now.
    pub fn new(id: impl Into<String>, agent_type: AgentType, provider: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_type,
            provider: provider.into(),
            capabilities: HashSet::new(),
            status: AgentStatus::Idle,
            metadata: AgentMetadata {
                version: "0.1.0".to_string(),
                created: now,
                last_active: now,
            },
        }
    }

    /// Replace the advertised capability set.
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the liveness status.
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the reported version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    /// Record a heartbeat: refresh `last_active` and the reported status.
    pub fn touch(&mut self, status: AgentStatus) {
        self.status = status;
        self.metadata.last_active = Utc::now();
    }

    /// Whether the agent can accept work at all (not offline).
    pub fn is_reachable(&self) -> bool {
        self.status != AgentStatus::Offline
    }
}
