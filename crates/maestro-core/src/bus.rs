use crate::identity::{AgentIdentity, AgentType};
use crate::message::Envelope;
use crate::MaestroResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Message-send primitive of the bus collaborator.
///
/// A synchronous rejection here surfaces as
/// [`MaestroError::Transport`](crate::MaestroError::Transport) and removes any
/// pending correlation entry for the envelope immediately.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver an envelope to its recipient(s).
    async fn route_message(&self, envelope: Envelope) -> MaestroResult<()>;
}

/// Read access to the agent registry owned by the bus.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// All agents of the given type, in registration order.
    async fn find_agents_by_type(&self, agent_type: AgentType) -> Vec<AgentIdentity>;

    /// All registered agents.
    async fn get_agents(&self) -> Vec<AgentIdentity>;
}

/// Unique-id mint shared by workflows, tasks, and requests.
///
/// Injected so tests can substitute a sequential generator and make whole
/// orchestrations reproducible.
pub trait IdGenerator: Send + Sync {
    /// Produce the next unique id.
    fn next_id(&self) -> String;
}

/// Default [`IdGenerator`] backed by random v4 UUIDs.
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
