use chrono::{DateTime, Utc};
use maestro_core::{AgentIdentity, ErrorKind, MaestroError, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

/// Problem domain a task belongs to, inferred by the decomposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskDomain {
    /// UI components, styling, client-side work.
    Frontend,
    /// APIs, services, server-side work.
    Backend,
    /// Schemas, migrations, queries.
    Database,
    /// Shell, deployment, environment work.
    System,
    /// Anything that matches no other domain.
    General,
}

impl std::fmt::Display for TaskDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskDomain::Frontend => write!(f, "frontend"),
            TaskDomain::Backend => write!(f, "backend"),
            TaskDomain::Database => write!(f, "database"),
            TaskDomain::System => write!(f, "system"),
            TaskDomain::General => write!(f, "general"),
        }
    }
}

impl FromStr for TaskDomain {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "frontend" => Ok(TaskDomain::Frontend),
            "backend" => Ok(TaskDomain::Backend),
            "database" => Ok(TaskDomain::Database),
            "system" => Ok(TaskDomain::System),
            "general" => Ok(TaskDomain::General),
            _ => Err(()),
        }
    }
}

/// Complexity tier of a goal, from keyword-density heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Single focused change.
    Simple,
    /// Default tier; classification ties land here.
    Moderate,
    /// Multi-part or architectural work.
    Complex,
}

impl Complexity {
    /// Rough wall-clock estimate used as the request timeout payload.
    pub fn estimated_duration(self) -> Duration {
        match self {
            Complexity::Simple => Duration::from_secs(60),
            Complexity::Moderate => Duration::from_secs(300),
            Complexity::Complex => Duration::from_secs(900),
        }
    }
}

/// One atomic unit of work produced by the decomposer.
///
/// Immutable once created; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id from the injected id generator.
    pub id: String,
    /// Short human-readable name; dependency wiring matches on it.
    pub name: String,
    /// Longer description shown to the executing agent.
    pub description: String,
    /// Machine-readable action tag (e.g., `create-component`).
    pub action: String,
    /// Action-specific parameters, always carrying the originating goal.
    pub params: Value,
    /// Inferred domain.
    pub domain: TaskDomain,
    /// Inferred complexity tier.
    pub complexity: Complexity,
    /// Scheduling priority.
    pub priority: Priority,
    /// Ids of tasks that must land in the result map first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Capability tags an executing agent should advertise.
    #[serde(default)]
    pub required_capabilities: HashSet<String>,
    /// Estimated duration in milliseconds.
    pub estimated_duration_ms: u64,
}

impl Task {
    /// Create a task with empty dependency and capability sets.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        action: impl Into<String>,
        domain: TaskDomain,
        complexity: Complexity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            action: action.into(),
            params: Value::Null,
            domain,
            complexity,
            priority: Priority::Normal,
            dependencies: Vec::new(),
            required_capabilities: HashSet::new(),
            estimated_duration_ms: complexity.estimated_duration().as_millis() as u64,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the action parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependency list.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set the required capability tags.
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }
}

/// Denormalized adjacency entry derived once from [`Task::dependencies`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    /// The dependent task.
    pub task_id: String,
    /// Tasks it waits on.
    pub depends_on: Vec<String>,
}

/// Lifecycle state of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Created but not started, or paused between generations.
    Pending,
    /// Scheduling loop is active.
    Running,
    /// Every task settled with zero errors.
    Completed,
    /// At least one task error after a full settle pass, or a fault.
    Failed,
}

impl WorkflowStatus {
    /// Whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

/// Error recorded against a failed task in a workflow's error map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    /// Classification from the engine error taxonomy.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// When the failure was recorded.
    pub occurred_at: DateTime<Utc>,
}

impl TaskError {
    /// Capture an engine error as a task-level record.
    pub fn from_error(err: &MaestroError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// A decomposed goal: tasks, dependency edges, and aggregate status.
///
/// Mutated only by the engine's scheduling loop; evicted by the retention
/// sweeper once terminal and past the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow id.
    pub id: String,
    /// Short name derived from the goal.
    pub name: String,
    /// The original goal text.
    pub description: String,
    /// Tasks in decomposition order; this order drives generation launch order.
    pub tasks: Vec<Task>,
    /// Adjacency entries derived from the task list.
    pub dependencies: Vec<TaskDependency>,
    /// Lifecycle state.
    pub status: WorkflowStatus,
    /// When the scheduling loop first ran.
    pub started_at: Option<DateTime<Utc>>,
    /// When the workflow reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Successful task payloads by task id.
    pub results: HashMap<String, Value>,
    /// Task failures by task id. Disjoint from `results` by construction.
    pub errors: HashMap<String, TaskError>,
}

impl Workflow {
    /// Build a workflow from decomposed tasks, deriving the adjacency list.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        tasks: Vec<Task>,
    ) -> Self {
        let dependencies = tasks
            .iter()
            .filter(|t| !t.dependencies.is_empty())
            .map(|t| TaskDependency {
                task_id: t.id.clone(),
                depends_on: t.dependencies.clone(),
            })
            .collect();
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            tasks,
            dependencies,
            status: WorkflowStatus::Pending,
            started_at: None,
            completed_at: None,
            results: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    /// Whether the task already has an outcome recorded.
    pub fn is_settled(&self, task_id: &str) -> bool {
        self.results.contains_key(task_id) || self.errors.contains_key(task_id)
    }

    /// Number of tasks with an outcome.
    pub fn settled_count(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    /// Tasks ready to launch: unsettled, not in `running`, all dependencies
    /// present in `results`. Returned in task-list order.
    pub fn ready_tasks(&self, running: &HashSet<String>) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| {
                !self.is_settled(&t.id)
                    && !running.contains(&t.id)
                    && t.dependencies
                        .iter()
                        .all(|dep| self.results.contains_key(dep))
            })
            .collect()
    }

    /// Record a successful result. Ignored if the task already failed, so a
    /// task id never appears in both maps.
    pub fn record_result(&mut self, task_id: &str, result: Value) {
        if !self.errors.contains_key(task_id) {
            self.results.insert(task_id.to_string(), result);
        }
    }

    /// Record a task failure. Ignored if the task already succeeded.
    pub fn record_error(&mut self, task_id: &str, error: TaskError) {
        if !self.results.contains_key(task_id) {
            self.errors.insert(task_id.to_string(), error);
        }
    }

    /// Compact status view answered to `workflows` / `workflow-status` queries.
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "status": self.status,
            "total_tasks": self.tasks.len(),
            "completed_tasks": self.results.len(),
            "failed_tasks": self.errors.len(),
            "started_at": self.started_at,
            "completed_at": self.completed_at,
        })
    }
}

/// Lifecycle state of a single dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Built but not yet dispatched.
    Pending,
    /// Request sent; awaiting the correlated response.
    Running,
    /// Response arrived with a result.
    Completed,
    /// Timed out, transport-failed, agent-failed, or force-failed.
    Failed,
}

/// Runtime record of one attempt to run a task on a specific agent.
///
/// Looked up by `request_id` for correlation and by `task.id` for in-flight
/// checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    /// The task being executed.
    pub task: Task,
    /// The agent the request was dispatched to.
    pub agent: AgentIdentity,
    /// Correlation id of the outgoing request.
    pub request_id: String,
    /// Owning workflow, or `None` for standalone executions.
    pub workflow_id: Option<String>,
    /// Lifecycle state.
    pub status: ExecutionStatus,
    /// When the request was dispatched.
    pub started_at: DateTime<Utc>,
    /// When the execution settled.
    pub completed_at: Option<DateTime<Utc>>,
    /// Successful response payload.
    pub result: Option<Value>,
    /// Failure description.
    pub error: Option<String>,
}

impl TaskExecution {
    /// Create a running execution record for a dispatch about to happen.
    pub fn new(
        task: Task,
        agent: AgentIdentity,
        request_id: impl Into<String>,
        workflow_id: Option<String>,
    ) -> Self {
        Self {
            task,
            agent,
            request_id: request_id.into(),
            workflow_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Settle the execution with a successful result.
    pub fn complete(&mut self, result: Value) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Settle the execution with a failure.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-workflow cap on simultaneously in-flight executions.
    pub max_concurrent_tasks: usize,
    /// How long a dispatched request may wait for its response.
    pub task_timeout: Duration,
    /// TTL past `completed_at` before terminal records are evicted.
    pub retention_window: Duration,
    /// How often the retention sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            task_timeout: Duration::from_millis(300_000),
            retention_window: Duration::from_secs(3_600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}
