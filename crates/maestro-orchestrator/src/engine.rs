use crate::decomposer::TaskDecomposer;
use crate::pending::PendingResponses;
use crate::selector::{AgentSelector, ScoringSelector};
use crate::types::{
    EngineConfig, ExecutionStatus, Task, TaskError, TaskExecution, Workflow, WorkflowStatus,
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use maestro_core::{
    Action, AgentIdentity, AgentRegistry, AgentType, Envelope, ErrorKind, IdGenerator,
    MaestroError, MaestroResult, Payload, QueryKind, Transport, WorkflowCommand,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// Event type tag for agent status changes consumed from the bus.
const AGENT_STATUS_CHANGED: &str = "agent:status:changed";

/// Lifecycle notification pushed to the injected event sink.
///
/// The sink keeps the engine free of transport concerns; forwarding events
/// onto the bus as envelopes is up to the embedding process.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A task settled, successfully or not.
    TaskCompleted {
        /// Owning workflow.
        workflow_id: String,
        /// The settled task.
        task_id: String,
        /// `Completed` or `Failed`.
        status: ExecutionStatus,
        /// Result payload or error description.
        payload: Value,
    },
    /// Every task settled with zero errors.
    WorkflowCompleted {
        /// The finished workflow.
        workflow_id: String,
    },
    /// The workflow reached `Failed`, by task errors or a fault.
    WorkflowFailed {
        /// The failed workflow.
        workflow_id: String,
        /// Full error map at failure time.
        errors: HashMap<String, TaskError>,
    },
    /// The workflow was cancelled by command.
    WorkflowCancelled {
        /// The cancelled workflow.
        workflow_id: String,
    },
    /// Scheduling suspended between generations.
    WorkflowPaused {
        /// The paused workflow.
        workflow_id: String,
    },
    /// Scheduling resumed.
    WorkflowResumed {
        /// The resumed workflow.
        workflow_id: String,
    },
}

impl WorkflowEvent {
    /// Wire-level event type tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::TaskCompleted { .. } => "workflow:task:completed",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow:completed",
            WorkflowEvent::WorkflowFailed { .. } => "workflow:failed",
            WorkflowEvent::WorkflowCancelled { .. } => "workflow:cancelled",
            WorkflowEvent::WorkflowPaused { .. } => "workflow:paused",
            WorkflowEvent::WorkflowResumed { .. } => "workflow:resumed",
        }
    }

    /// The workflow the event belongs to.
    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowEvent::TaskCompleted { workflow_id, .. }
            | WorkflowEvent::WorkflowCompleted { workflow_id }
            | WorkflowEvent::WorkflowFailed { workflow_id, .. }
            | WorkflowEvent::WorkflowCancelled { workflow_id }
            | WorkflowEvent::WorkflowPaused { workflow_id }
            | WorkflowEvent::WorkflowResumed { workflow_id } => workflow_id,
        }
    }
}

/// What a single scheduling generation decided.
enum GenerationOutcome {
    /// Tasks were launched and settled; compute the next ready set.
    Continue,
    /// The workflow reached a terminal state.
    Terminal(WorkflowStatus),
    /// The workflow is paused; wait for a resume before the next generation.
    Paused,
}

/// The workflow orchestration engine.
///
/// Owns the workflow and execution arenas, runs the scheduling loop, and
/// talks to the outside world only through its injected collaborators.
pub struct WorkflowEngine {
    config: EngineConfig,
    agent_id: String,
    registry: Arc<dyn AgentRegistry>,
    transport: Arc<dyn Transport>,
    ids: Arc<dyn IdGenerator>,
    selector: Arc<dyn AgentSelector>,
    decomposer: TaskDecomposer,
    workflows: RwLock<HashMap<String, Workflow>>,
    /// Executions keyed by request id; the correlation and in-flight index.
    executions: RwLock<HashMap<String, TaskExecution>>,
    pending: PendingResponses,
    events: mpsc::UnboundedSender<WorkflowEvent>,
    resume: Notify,
}

impl WorkflowEngine {
    /// Construct an engine with the default scoring selector.
    pub fn new(
        config: EngineConfig,
        registry: Arc<dyn AgentRegistry>,
        transport: Arc<dyn Transport>,
        ids: Arc<dyn IdGenerator>,
        events: mpsc::UnboundedSender<WorkflowEvent>,
    ) -> Self {
        Self {
            config,
            agent_id: "orchestrator".to_string(),
            registry,
            transport,
            decomposer: TaskDecomposer::new(Arc::clone(&ids)),
            ids,
            selector: Arc::new(ScoringSelector),
            workflows: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            pending: PendingResponses::new(),
            events,
            resume: Notify::new(),
        }
    }

    /// Substitute the selection strategy.
    pub fn with_selector(mut self, selector: Arc<dyn AgentSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Set the engine's own bus identity (default `orchestrator`).
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- Workflow lifecycle ---

    /// Decompose a goal and store a pending workflow. Returns its id.
    pub async fn orchestrate(&self, goal: &str, context: Option<&Value>) -> String {
        let tasks = self.decomposer.decompose(goal, context);
        self.store_workflow(goal, tasks).await
    }

    async fn store_workflow(&self, goal: &str, tasks: Vec<Task>) -> String {
        let id = self.ids.next_id();
        let name: String = goal.chars().take(48).collect();
        let task_count = tasks.len();
        let workflow = Workflow::new(&id, name, goal, tasks);
        self.workflows.write().await.insert(id.clone(), workflow);
        info!(workflow_id = %id, tasks = task_count, goal, "workflow created");
        id
    }

    /// Drive a workflow to a terminal state, one generation at a time.
    pub async fn run_workflow(self: &Arc<Self>, workflow_id: &str) -> MaestroResult<WorkflowStatus> {
        {
            let mut workflows = self.workflows.write().await;
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| unknown_workflow(workflow_id))?;
            if workflow.status.is_terminal() {
                return Ok(workflow.status);
            }
            workflow.status = WorkflowStatus::Running;
            workflow.started_at.get_or_insert_with(Utc::now);
        }
        info!(workflow_id, "workflow started");

        // One semaphore per workflow: the concurrency cap is global across
        // generations, not per task type.
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));

        let status = loop {
            match self.run_generation(workflow_id, &semaphore).await {
                Ok(GenerationOutcome::Terminal(status)) => break status,
                Ok(GenerationOutcome::Continue) => {}
                Ok(GenerationOutcome::Paused) => self.wait_for_resume(workflow_id).await,
                Err(err) => break self.fail_workflow(workflow_id, &err).await,
            }
        };
        info!(workflow_id, ?status, "workflow finished");
        Ok(status)
    }

    /// Block until the workflow leaves `Pending` (resume or cancel).
    async fn wait_for_resume(&self, workflow_id: &str) {
        loop {
            // Arm the waiter before re-reading status so a concurrent resume
            // cannot slip between the check and the await.
            let notified = self.resume.notified();
            let paused = {
                let workflows = self.workflows.read().await;
                workflows
                    .get(workflow_id)
                    .is_some_and(|w| w.status == WorkflowStatus::Pending)
            };
            if !paused {
                return;
            }
            notified.await;
        }
    }

    /// Run one scheduling generation: compute the ready set, launch it under
    /// the concurrency cap, and settle.
    async fn run_generation(
        self: &Arc<Self>,
        workflow_id: &str,
        semaphore: &Arc<Semaphore>,
    ) -> MaestroResult<GenerationOutcome> {
        let ready: Vec<Task> = {
            let workflows = self.workflows.read().await;
            let workflow = workflows
                .get(workflow_id)
                .ok_or_else(|| unknown_workflow(workflow_id))?;
            if workflow.status.is_terminal() {
                return Ok(GenerationOutcome::Terminal(workflow.status));
            }
            if workflow.status == WorkflowStatus::Pending {
                return Ok(GenerationOutcome::Paused);
            }
            let running = self.running_task_ids(workflow_id).await;
            workflow
                .ready_tasks(&running)
                .into_iter()
                .cloned()
                .collect()
        };

        if ready.is_empty() {
            let mut workflows = self.workflows.write().await;
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| unknown_workflow(workflow_id))?;
            if workflow.status.is_terminal() {
                return Ok(GenerationOutcome::Terminal(workflow.status));
            }
            if workflow.settled_count() == workflow.tasks.len() || !workflow.errors.is_empty() {
                // Settled, or blocked behind failed dependencies.
                let status = self.finalize(workflow);
                return Ok(GenerationOutcome::Terminal(status));
            }
            // No errors, nothing ready, nothing running: a dependency cycle
            // or dangling edge.
            return Err(MaestroError::WorkflowFault {
                workflow_id: workflow_id.to_string(),
                message: "no ready tasks and none in flight; unresolvable dependencies".to_string(),
            });
        }

        debug!(workflow_id, generation_size = ready.len(), "launching generation");
        let launches = ready.into_iter().map(|task| {
            let engine = Arc::clone(self);
            let semaphore = Arc::clone(semaphore);
            let workflow_id = workflow_id.to_string();
            async move {
                engine.run_task(&workflow_id, task, &semaphore).await;
            }
        });
        join_all(launches).await;
        Ok(GenerationOutcome::Continue)
    }

    /// Terminal-state bookkeeping; caller holds the workflow write lock.
    fn finalize(&self, workflow: &mut Workflow) -> WorkflowStatus {
        let status = if workflow.errors.is_empty() {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };
        workflow.status = status;
        workflow.completed_at = Some(Utc::now());
        match status {
            WorkflowStatus::Completed => self.emit(WorkflowEvent::WorkflowCompleted {
                workflow_id: workflow.id.clone(),
            }),
            _ => self.emit(WorkflowEvent::WorkflowFailed {
                workflow_id: workflow.id.clone(),
                errors: workflow.errors.clone(),
            }),
        }
        status
    }

    /// Force a workflow to `Failed` after an uncaught generation fault.
    async fn fail_workflow(&self, workflow_id: &str, err: &MaestroError) -> WorkflowStatus {
        error!(workflow_id, error = %err, "workflow fault");
        let mut workflows = self.workflows.write().await;
        if let Some(workflow) = workflows.get_mut(workflow_id) {
            workflow.status = WorkflowStatus::Failed;
            workflow.completed_at = Some(Utc::now());
            self.emit(WorkflowEvent::WorkflowFailed {
                workflow_id: workflow_id.to_string(),
                errors: workflow.errors.clone(),
            });
        }
        WorkflowStatus::Failed
    }

    /// Select, dispatch, and settle one task within a workflow generation.
    async fn run_task(self: &Arc<Self>, workflow_id: &str, task: Task, semaphore: &Arc<Semaphore>) {
        {
            let workflows = self.workflows.read().await;
            let live = workflows
                .get(workflow_id)
                .is_some_and(|w| w.status == WorkflowStatus::Running && !w.is_settled(&task.id));
            if !live {
                return;
            }
        }

        let candidates = self.registry.find_agents_by_type(AgentType::Executor).await;
        let selected = if candidates.is_empty() {
            None
        } else {
            self.selector.select(&task, &candidates)
        };
        let Some(agent) = selected else {
            // Synthetic error, no request sent; siblings keep going.
            let err = MaestroError::NoAgentFound(task.id.clone());
            warn!(workflow_id, task = %task.id, "no agent found");
            self.record_task_error(workflow_id, &task.id, &err).await;
            return;
        };

        let request_id = self.ids.next_id();
        {
            let mut executions = self.executions.write().await;
            let mut execution = TaskExecution::new(
                task.clone(),
                agent.clone(),
                &request_id,
                Some(workflow_id.to_string()),
            );
            execution.status = ExecutionStatus::Pending;
            executions.insert(request_id.clone(), execution);
        }

        // The cap bounds dispatched requests; waiting here leaves the
        // execution in `Pending`, visible to cancellation.
        let Ok(_permit) = semaphore.acquire().await else {
            return;
        };
        if !self.mark_execution_running(&request_id).await {
            // Force-failed (cancel or agent loss) while waiting for a slot.
            return;
        }

        let outcome = self.dispatch(&agent, &task, &request_id).await;
        if !self.settle_execution(&request_id, &outcome).await {
            // Something else already settled it; its outcome stands.
            return;
        }
        match outcome {
            Ok(value) => self.record_task_result(workflow_id, &task.id, value).await,
            Err(err) => self.record_task_error(workflow_id, &task.id, &err).await,
        }
    }

    /// Flip an execution from `Pending` to `Running`. Returns `false` if it
    /// was settled in the meantime.
    async fn mark_execution_running(&self, request_id: &str) -> bool {
        let mut executions = self.executions.write().await;
        match executions.get_mut(request_id) {
            Some(execution) if execution.status == ExecutionStatus::Pending => {
                execution.status = ExecutionStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Settle an execution that is still `Running`. Returns `false` when it
    /// was already settled elsewhere (force-fail paths).
    async fn settle_execution(&self, request_id: &str, outcome: &MaestroResult<Value>) -> bool {
        let mut executions = self.executions.write().await;
        match executions.get_mut(request_id) {
            Some(execution) if execution.status == ExecutionStatus::Running => {
                match outcome {
                    Ok(value) => execution.complete(value.clone()),
                    Err(err) => execution.fail(err.to_string()),
                }
                true
            }
            _ => false,
        }
    }

    async fn record_task_result(&self, workflow_id: &str, task_id: &str, value: Value) {
        let mut workflows = self.workflows.write().await;
        if let Some(workflow) = workflows.get_mut(workflow_id) {
            workflow.record_result(task_id, value.clone());
            info!(workflow_id, task_id, "task completed");
            self.emit(WorkflowEvent::TaskCompleted {
                workflow_id: workflow_id.to_string(),
                task_id: task_id.to_string(),
                status: ExecutionStatus::Completed,
                payload: value,
            });
        }
    }

    async fn record_task_error(&self, workflow_id: &str, task_id: &str, err: &MaestroError) {
        let mut workflows = self.workflows.write().await;
        if let Some(workflow) = workflows.get_mut(workflow_id) {
            workflow.record_error(task_id, TaskError::from_error(err));
            warn!(workflow_id, task_id, error = %err, "task failed");
            self.emit(WorkflowEvent::TaskCompleted {
                workflow_id: workflow_id.to_string(),
                task_id: task_id.to_string(),
                status: ExecutionStatus::Failed,
                payload: json!({ "error": err.to_string() }),
            });
        }
    }

    /// Task ids of this workflow's unsettled executions.
    async fn running_task_ids(&self, workflow_id: &str) -> HashSet<String> {
        let executions = self.executions.read().await;
        executions
            .values()
            .filter(|e| {
                e.workflow_id.as_deref() == Some(workflow_id)
                    && matches!(e.status, ExecutionStatus::Pending | ExecutionStatus::Running)
            })
            .map(|e| e.task.id.clone())
            .collect()
    }

    // --- Dispatch & correlation ---

    /// Send an `execute-task` request to `agent` and await the correlated
    /// response. A synchronous send failure removes the pending entry
    /// immediately; silence becomes `DispatchTimeout` after `task_timeout`.
    async fn dispatch(
        &self,
        agent: &AgentIdentity,
        task: &Task,
        request_id: &str,
    ) -> MaestroResult<Value> {
        let rx = self.pending.register(request_id).await;
        let envelope = Envelope::request(
            request_id,
            self.agent_id.clone(),
            agent.id.clone(),
            Action::ExecuteTask,
            json!({ "task": task }),
            self.config.task_timeout.as_millis() as u64,
        )
        .with_priority(task.priority);

        debug!(request_id, agent = %agent.id, task = %task.id, "dispatching task");
        if let Err(err) = self.transport.route_message(envelope).await {
            self.pending.remove(request_id).await;
            return Err(err);
        }
        self.pending
            .await_response(request_id, rx, self.config.task_timeout)
            .await
    }

    // --- Standalone execution ---

    /// Execute a goal outside any pre-existing workflow. A single-task
    /// decomposition dispatches directly; a multi-task one is promoted to a
    /// workflow whose completion is awaited (no polling).
    pub async fn execute_goal(
        self: &Arc<Self>,
        goal: &str,
        context: Option<&Value>,
    ) -> MaestroResult<Value> {
        let mut tasks = self.decomposer.decompose(goal, context);
        if tasks.len() == 1 {
            let task = tasks.remove(0);
            let task_id = task.id.clone();
            let result = self.execute_single(task).await?;
            return Ok(json!({ "task_id": task_id, "result": result }));
        }

        let workflow_id = self.store_workflow(goal, tasks).await;
        let status = self.run_workflow(&workflow_id).await?;
        let workflows = self.workflows.read().await;
        let workflow = workflows
            .get(&workflow_id)
            .ok_or_else(|| unknown_workflow(&workflow_id))?;
        Ok(json!({
            "workflow_id": workflow_id,
            "status": status,
            "results": &workflow.results,
            "errors": &workflow.errors,
        }))
    }

    /// Select an executor and dispatch one pre-built task.
    pub async fn execute_single(&self, task: Task) -> MaestroResult<Value> {
        let candidates = self.registry.find_agents_by_type(AgentType::Executor).await;
        let selected = if candidates.is_empty() {
            None
        } else {
            self.selector.select(&task, &candidates)
        };
        let agent = selected.ok_or_else(|| MaestroError::NoAgentFound(task.id.clone()))?;

        let request_id = self.ids.next_id();
        {
            let mut executions = self.executions.write().await;
            executions.insert(
                request_id.clone(),
                TaskExecution::new(task.clone(), agent.clone(), &request_id, None),
            );
        }
        let outcome = self.dispatch(&agent, &task, &request_id).await;
        self.settle_execution(&request_id, &outcome).await;
        outcome
    }

    // --- Message dispatch ---

    /// Handle one inbound envelope. Returns the response envelope to send
    /// back, if the message warrants one.
    pub async fn handle_message(
        self: &Arc<Self>,
        envelope: Envelope,
    ) -> MaestroResult<Option<Envelope>> {
        match envelope.payload.clone() {
            Payload::Response { result, error } => {
                let key = envelope
                    .correlation_id
                    .clone()
                    .unwrap_or_else(|| envelope.id.clone());
                let outcome = match error {
                    Some(message) => Err(message),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                self.pending.resolve(&key, outcome).await;
                Ok(None)
            }
            Payload::Heartbeat => Ok(None),
            Payload::Event {
                event_type,
                data,
                source,
            } => {
                if event_type == AGENT_STATUS_CHANGED {
                    let agent_id = data
                        .get("agent_id")
                        .and_then(Value::as_str)
                        .unwrap_or(&source)
                        .to_string();
                    if matches!(
                        data.get("status").and_then(Value::as_str),
                        Some("offline" | "error")
                    ) {
                        self.on_agent_unavailable(&agent_id).await;
                    }
                }
                Ok(None)
            }
            Payload::Request { action, params, .. } => {
                let reply = match action.parse::<Action>() {
                    Ok(Action::Orchestrate) => self.handle_orchestrate(&params).await,
                    Ok(Action::ExecuteTask) => self.handle_execute_task(&params).await,
                    Ok(Action::Delegate) => self.handle_delegate(&params).await,
                    Ok(Action::Monitor) => Ok(self.monitor_snapshot().await),
                    Err(err) => Err(err),
                };
                Ok(Some(self.reply_envelope(&envelope, reply)))
            }
            Payload::Command { command, args } => {
                let result = match (
                    command.parse::<WorkflowCommand>(),
                    args.get("workflow_id").and_then(Value::as_str),
                ) {
                    (Ok(command), Some(workflow_id)) => match command {
                        WorkflowCommand::CancelWorkflow => self.cancel_workflow(workflow_id).await,
                        WorkflowCommand::PauseWorkflow => self.pause_workflow(workflow_id).await,
                        WorkflowCommand::ResumeWorkflow => self.resume_workflow(workflow_id).await,
                    },
                    (Ok(_), None) => Err(MaestroError::InvalidParams(
                        "missing args.workflow_id".to_string(),
                    )),
                    (Err(err), _) => Err(err),
                };
                match result {
                    Ok(()) => Ok(None),
                    Err(err) => Ok(Some(Envelope::error_response_to(
                        &envelope,
                        self.ids.next_id(),
                        &self.agent_id,
                        err.to_string(),
                    ))),
                }
            }
            Payload::Query { query, filters } => {
                let reply = match query.parse::<QueryKind>() {
                    Ok(QueryKind::Workflows) => Ok(self.list_workflows().await),
                    Ok(QueryKind::WorkflowStatus) => {
                        match filters
                            .as_ref()
                            .and_then(|f| f.get("workflow_id"))
                            .and_then(Value::as_str)
                        {
                            Some(id) => match self.workflow(id).await {
                                Some(workflow) => Ok(workflow.summary()),
                                None => Err(unknown_workflow(id)),
                            },
                            None => Err(MaestroError::InvalidParams(
                                "workflow-status requires filters.workflow_id".to_string(),
                            )),
                        }
                    }
                    Ok(QueryKind::AgentLoad) => {
                        let load = self.agent_load().await;
                        Ok(serde_json::to_value(load)?)
                    }
                    Err(err) => Err(err),
                };
                Ok(Some(self.reply_envelope(&envelope, reply)))
            }
        }
    }

    fn reply_envelope(&self, request: &Envelope, reply: MaestroResult<Value>) -> Envelope {
        match reply {
            Ok(result) => {
                Envelope::response_to(request, self.ids.next_id(), &self.agent_id, result)
            }
            Err(err) => Envelope::error_response_to(
                request,
                self.ids.next_id(),
                &self.agent_id,
                err.to_string(),
            ),
        }
    }

    async fn handle_orchestrate(self: &Arc<Self>, params: &Value) -> MaestroResult<Value> {
        let goal = required_str(params, "goal")?;
        let workflow_id = self.orchestrate(goal, params.get("context")).await;
        let engine = Arc::clone(self);
        let spawned_id = workflow_id.clone();
        tokio::spawn(async move {
            // Faults are already recorded against the workflow and emitted.
            let _ = engine.run_workflow(&spawned_id).await;
        });
        // The spawned run has not started yet; report the stored state so an
        // immediate workflow-status query cannot contradict this reply.
        Ok(json!({ "workflow_id": workflow_id, "status": WorkflowStatus::Pending }))
    }

    async fn handle_execute_task(self: &Arc<Self>, params: &Value) -> MaestroResult<Value> {
        let goal = required_str(params, "goal")?;
        self.execute_goal(goal, params.get("context")).await
    }

    async fn handle_delegate(&self, params: &Value) -> MaestroResult<Value> {
        let task: Task = serde_json::from_value(
            params
                .get("task")
                .cloned()
                .ok_or_else(|| MaestroError::InvalidParams("missing params.task".to_string()))?,
        )?;
        let task_id = task.id.clone();
        let result = self.execute_single(task).await?;
        Ok(json!({ "task_id": task_id, "result": result }))
    }

    async fn monitor_snapshot(&self) -> Value {
        let workflows = self.workflows.read().await;
        let executions = self.executions.read().await;
        let running = executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .count();
        json!({
            "workflows": workflows.len(),
            "running_executions": running,
            "pending_responses": self.pending.len().await,
        })
    }

    // --- Control commands ---

    /// Force-fail all live executions of a workflow and the workflow itself.
    /// Emits exactly one `workflow:cancelled` event. In-flight transport
    /// calls are not interrupted; their late responses are dropped.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> MaestroResult<()> {
        let cancelled_requests = {
            let mut workflows = self.workflows.write().await;
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| unknown_workflow(workflow_id))?;
            if workflow.status.is_terminal() {
                return Ok(());
            }
            workflow.status = WorkflowStatus::Failed;
            workflow.completed_at = Some(Utc::now());

            let mut executions = self.executions.write().await;
            let mut requests = Vec::new();
            for execution in executions.values_mut().filter(|e| {
                e.workflow_id.as_deref() == Some(workflow_id)
                    && matches!(e.status, ExecutionStatus::Pending | ExecutionStatus::Running)
            }) {
                execution.fail("workflow cancelled");
                workflow.record_error(
                    &execution.task.id,
                    TaskError {
                        kind: ErrorKind::WorkflowFault,
                        message: "workflow cancelled".to_string(),
                        occurred_at: Utc::now(),
                    },
                );
                requests.push(execution.request_id.clone());
            }
            self.emit(WorkflowEvent::WorkflowCancelled {
                workflow_id: workflow_id.to_string(),
            });
            requests
        };
        for request_id in cancelled_requests {
            self.pending.remove(&request_id).await;
        }
        // Unblock a paused run loop so it can observe the terminal state.
        self.resume.notify_waiters();
        info!(workflow_id, "workflow cancelled");
        Ok(())
    }

    /// Suspend scheduling between generations. In-flight tasks finish.
    pub async fn pause_workflow(&self, workflow_id: &str) -> MaestroResult<()> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| unknown_workflow(workflow_id))?;
        if workflow.status == WorkflowStatus::Running {
            workflow.status = WorkflowStatus::Pending;
            info!(workflow_id, "workflow paused");
            self.emit(WorkflowEvent::WorkflowPaused {
                workflow_id: workflow_id.to_string(),
            });
        }
        Ok(())
    }

    /// Resume a paused workflow.
    pub async fn resume_workflow(&self, workflow_id: &str) -> MaestroResult<()> {
        let resumed = {
            let mut workflows = self.workflows.write().await;
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| unknown_workflow(workflow_id))?;
            if workflow.status == WorkflowStatus::Pending && workflow.started_at.is_some() {
                workflow.status = WorkflowStatus::Running;
                self.emit(WorkflowEvent::WorkflowResumed {
                    workflow_id: workflow_id.to_string(),
                });
                true
            } else {
                false
            }
        };
        if resumed {
            info!(workflow_id, "workflow resumed");
            self.resume.notify_waiters();
        }
        Ok(())
    }

    // --- Agent-failure reaction ---

    /// Fail every live execution assigned to a lost agent. Terminal: the
    /// affected tasks stay in their workflows' error maps and are not
    /// re-dispatched.
    async fn on_agent_unavailable(&self, agent_id: &str) {
        let failed: Vec<(String, Option<String>, String)> = {
            let mut executions = self.executions.write().await;
            executions
                .values_mut()
                .filter(|e| {
                    e.agent.id == agent_id
                        && matches!(e.status, ExecutionStatus::Pending | ExecutionStatus::Running)
                })
                .map(|e| {
                    e.fail(format!("agent '{agent_id}' unavailable"));
                    (e.request_id.clone(), e.workflow_id.clone(), e.task.id.clone())
                })
                .collect()
        };
        if failed.is_empty() {
            return;
        }
        warn!(agent_id, executions = failed.len(), "agent lost with live executions");
        let err = MaestroError::AgentUnavailable(agent_id.to_string());
        for (request_id, workflow_id, task_id) in failed {
            self.pending.remove(&request_id).await;
            if let Some(workflow_id) = workflow_id {
                self.record_task_error(&workflow_id, &task_id, &err).await;
            }
        }
    }

    // --- Snapshots & retention ---

    /// Clone of one workflow's current state.
    pub async fn workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// Clone of one execution record, by request id.
    pub async fn execution(&self, request_id: &str) -> Option<TaskExecution> {
        self.executions.read().await.get(request_id).cloned()
    }

    /// Execution records belonging to one workflow.
    pub async fn executions_for(&self, workflow_id: &str) -> Vec<TaskExecution> {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| e.workflow_id.as_deref() == Some(workflow_id))
            .cloned()
            .collect()
    }

    /// Summaries of all known workflows.
    pub async fn list_workflows(&self) -> Value {
        let workflows = self.workflows.read().await;
        let mut summaries: Vec<Value> = workflows.values().map(Workflow::summary).collect();
        summaries.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
        Value::Array(summaries)
    }

    /// Count of running executions per agent id.
    pub async fn agent_load(&self) -> HashMap<String, usize> {
        let executions = self.executions.read().await;
        let mut load: HashMap<String, usize> = HashMap::new();
        for execution in executions.values() {
            if execution.status == ExecutionStatus::Running {
                *load.entry(execution.agent.id.clone()).or_default() += 1;
            }
        }
        load
    }

    /// Evict terminal workflows and executions whose `completed_at` predates
    /// the retention window. Returns the number of evicted workflows.
    pub async fn sweep_expired(&self) -> usize {
        let window = chrono::Duration::from_std(self.config.retention_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        self.sweep_expired_before(Utc::now() - window).await
    }

    /// Evict terminal records that settled before `cutoff`.
    pub async fn sweep_expired_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        {
            let mut workflows = self.workflows.write().await;
            workflows.retain(|_, w| {
                let expired = w.status.is_terminal() && w.completed_at.is_some_and(|t| t < cutoff);
                if expired {
                    evicted += 1;
                }
                !expired
            });
        }
        {
            let mut executions = self.executions.write().await;
            executions.retain(|_, e| {
                !(matches!(
                    e.status,
                    ExecutionStatus::Completed | ExecutionStatus::Failed
                ) && e.completed_at.is_some_and(|t| t < cutoff))
            });
        }
        if evicted > 0 {
            info!(evicted, "retention sweep evicted terminal workflows");
        }
        evicted
    }

    fn emit(&self, event: WorkflowEvent) {
        debug!(
            event = event.event_type(),
            workflow_id = event.workflow_id(),
            "emitting event"
        );
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }
}

fn unknown_workflow(workflow_id: &str) -> MaestroError {
    MaestroError::WorkflowFault {
        workflow_id: workflow_id.to_string(),
        message: "unknown workflow".to_string(),
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> MaestroResult<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| MaestroError::InvalidParams(format!("missing params.{key}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct SeqIds(AtomicU64);

    impl IdGenerator for SeqIds {
        fn next_id(&self) -> String {
            format!("id-{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    struct EmptyRegistry;

    #[async_trait]
    impl AgentRegistry for EmptyRegistry {
        async fn find_agents_by_type(&self, _agent_type: AgentType) -> Vec<AgentIdentity> {
            Vec::new()
        }

        async fn get_agents(&self) -> Vec<AgentIdentity> {
            Vec::new()
        }
    }

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn route_message(&self, _envelope: Envelope) -> MaestroResult<()> {
            Ok(())
        }
    }

    fn engine() -> (Arc<WorkflowEngine>, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = WorkflowEngine::new(
            EngineConfig::default(),
            Arc::new(EmptyRegistry),
            Arc::new(NullTransport),
            Arc::new(SeqIds(AtomicU64::new(0))),
            tx,
        );
        (Arc::new(engine), rx)
    }

    #[tokio::test]
    async fn test_orchestrate_stores_pending_workflow() {
        let (engine, _rx) = engine();
        let id = engine.orchestrate("Create a login form with validation", None).await;
        let workflow = engine.workflow(&id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Pending);
        assert!(workflow.tasks.len() >= 2);
        assert!(workflow.started_at.is_none());
    }

    #[tokio::test]
    async fn test_empty_registry_fails_every_task() {
        let (engine, mut rx) = engine();
        let id = engine.orchestrate("tweak the button label", None).await;
        let status = engine.run_workflow(&id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Failed);

        let workflow = engine.workflow(&id).await.unwrap();
        assert_eq!(workflow.errors.len(), workflow.tasks.len());
        assert!(workflow
            .errors
            .values()
            .all(|e| e.kind == ErrorKind::NoAgentFound));

        let mut saw_failed = false;
        while let Ok(event) = rx.try_recv() {
            if event.event_type() == "workflow:failed" {
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn test_unknown_action_yields_error_response() {
        let (engine, _rx) = engine();
        let request = Envelope::new(
            "req-1",
            "caller",
            "orchestrator",
            Payload::Request {
                action: "self-destruct".to_string(),
                params: json!({}),
                timeout_ms: 1_000,
            },
        );
        let reply = engine.handle_message(request).await.unwrap().unwrap();
        match reply.payload {
            Payload::Response { result, error } => {
                assert!(result.is_none());
                assert!(error.unwrap().contains("unknown action"));
            }
            other => panic!("expected response, got {other:?}"),
        }
        assert_eq!(reply.correlation_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_unknown_query_yields_error_response() {
        let (engine, _rx) = engine();
        let request = Envelope::new(
            "req-2",
            "caller",
            "orchestrator",
            Payload::Query {
                query: "uptime".to_string(),
                filters: None,
            },
        );
        let reply = engine.handle_message(request).await.unwrap().unwrap();
        match reply.payload {
            Payload::Response { error, .. } => {
                assert!(error.unwrap().contains("unknown query"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_command_yields_error_response() {
        let (engine, _rx) = engine();
        let command = Envelope::new(
            "cmd-1",
            "caller",
            "orchestrator",
            Payload::Command {
                command: "reboot".to_string(),
                args: json!({"workflow_id": "wf-0"}),
            },
        );
        let reply = engine.handle_message(command).await.unwrap().unwrap();
        match reply.payload {
            Payload::Response { error, .. } => {
                assert!(error.unwrap().contains("unknown command"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_response_is_dropped_silently() {
        let (engine, _rx) = engine();
        let response = Envelope::new(
            "resp-1",
            "exec-1",
            "orchestrator",
            Payload::Response {
                result: Some(json!("late")),
                error: None,
            },
        );
        // No pending entry exists; the engine must not fault.
        assert!(engine.handle_message(response).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pause_and_resume_transitions() {
        let (engine, mut rx) = engine();
        let id = engine.orchestrate("do the thing", None).await;
        {
            let mut workflows = engine.workflows.write().await;
            let workflow = workflows.get_mut(&id).unwrap();
            workflow.status = WorkflowStatus::Running;
            workflow.started_at = Some(Utc::now());
        }

        engine.pause_workflow(&id).await.unwrap();
        assert_eq!(engine.workflow(&id).await.unwrap().status, WorkflowStatus::Pending);

        engine.resume_workflow(&id).await.unwrap();
        assert_eq!(engine.workflow(&id).await.unwrap().status, WorkflowStatus::Running);

        let types: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type())
            .collect();
        assert_eq!(types, vec!["workflow:paused", "workflow:resumed"]);
    }

    #[tokio::test]
    async fn test_cancel_unknown_workflow_errors() {
        let (engine, _rx) = engine();
        let err = engine.cancel_workflow("nope").await.unwrap_err();
        assert!(matches!(err, MaestroError::WorkflowFault { .. }));
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_terminal_records() {
        let (engine, _rx) = engine();
        let done = engine.orchestrate("tweak the button label", None).await;
        engine.run_workflow(&done).await.unwrap();
        let live = engine.orchestrate("do the thing", None).await;

        let evicted = engine
            .sweep_expired_before(Utc::now() + chrono::Duration::seconds(1))
            .await;
        assert_eq!(evicted, 1);
        assert!(engine.workflow(&done).await.is_none());
        assert!(engine.workflow(&live).await.is_some());
    }

    #[tokio::test]
    async fn test_monitor_snapshot_shape() {
        let (engine, _rx) = engine();
        engine.orchestrate("do the thing", None).await;
        let snapshot = engine.monitor_snapshot().await;
        assert_eq!(snapshot["workflows"], 1);
        assert_eq!(snapshot["running_executions"], 0);
        assert_eq!(snapshot["pending_responses"], 0);
    }
}
