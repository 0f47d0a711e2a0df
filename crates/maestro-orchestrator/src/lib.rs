//! Workflow orchestration engine: goal decomposition, agent selection, and
//! dependency-respecting task scheduling over a message bus.
//!
//! The engine turns a free-text goal into a workflow of dependent tasks,
//! picks the best available executor agent for each one, dispatches
//! request envelopes under a concurrency cap, and correlates the responses
//! back into workflow results.
//!
//! # Main types
//!
//! - [`WorkflowEngine`] — Scheduling loop, message dispatch, and lifecycle control.
//! - [`TaskDecomposer`] — Goal-to-task decomposition with domain and complexity heuristics.
//! - [`ScoringSelector`] — Capability/availability/affinity scoring over candidate agents.
//! - [`PendingResponses`] — Request/response correlation with per-request timeouts.
//! - [`RetentionSweeper`] — Background eviction of settled workflows past their TTL.

/// Goal decomposition into domain-specific task templates.
pub mod decomposer;
/// The scheduling and dispatch engine.
pub mod engine;
/// Request/response correlation table.
pub mod pending;
/// Retention sweep loop for terminal records.
pub mod retention;
/// Agent selection strategies.
pub mod selector;
/// Shared orchestration types (Task, Workflow, TaskExecution, etc.).
pub mod types;

pub use decomposer::TaskDecomposer;
pub use engine::{WorkflowEngine, WorkflowEvent};
pub use pending::PendingResponses;
pub use retention::RetentionSweeper;
pub use selector::{AgentSelector, RoundRobinSelector, ScoringSelector};
pub use types::{
    Complexity, EngineConfig, ExecutionStatus, Task, TaskDependency, TaskDomain, TaskError,
    TaskExecution, Workflow, WorkflowStatus,
};
