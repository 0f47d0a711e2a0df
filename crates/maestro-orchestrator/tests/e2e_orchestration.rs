//! End-to-end orchestration tests.
//!
//! Drive the engine against mock transports and registries: full
//! goal-to-completion runs, dependency ordering under a concurrency cap,
//! cancellation of in-flight work, agent-loss reaction, timeouts, and the
//! message-dispatch surface.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use maestro_orchestrator::types::{EngineConfig, ExecutionStatus, WorkflowStatus};
use maestro_orchestrator::{RoundRobinSelector, WorkflowEngine, WorkflowEvent};
use maestro_core::{
    Action, AgentIdentity, AgentRegistry, AgentStatus, AgentType, Envelope, ErrorKind,
    IdGenerator, MaestroResult, Payload, Transport,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Deterministic sequential ids so assertions can name things.
struct SeqIds(AtomicU64);

impl SeqIds {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

impl IdGenerator for SeqIds {
    fn next_id(&self) -> String {
        format!("id-{}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// Registry serving a fixed agent list.
struct FixedRegistry {
    agents: Vec<AgentIdentity>,
}

#[async_trait]
impl AgentRegistry for FixedRegistry {
    async fn find_agents_by_type(&self, agent_type: AgentType) -> Vec<AgentIdentity> {
        self.agents
            .iter()
            .filter(|a| a.agent_type == agent_type)
            .cloned()
            .collect()
    }

    async fn get_agents(&self) -> Vec<AgentIdentity> {
        self.agents.clone()
    }
}

fn executor(id: &str) -> AgentIdentity {
    AgentIdentity::new(id, AgentType::Executor, "local")
        .with_capabilities(["file:write", "code:generate", "style:css", "test:run", "http:request"])
        .with_status(AgentStatus::Idle)
}

/// How the mock executor behind the transport answers a request.
#[derive(Clone, Copy, PartialEq)]
enum Reply {
    /// Respond with `{"done": <task name>}`.
    Echo,
    /// Like `Echo`, but each response waits for a permit from
    /// [`MockExecutorTransport::release`].
    Gated,
    /// Respond with an error payload.
    Fail,
    /// Never respond; the dispatch must time out.
    Silence,
}

/// Transport that plays the executor side: every `execute-task` request is
/// answered by feeding a response envelope back into the engine, as the bus
/// would.
struct MockExecutorTransport {
    engine: Mutex<Option<Arc<WorkflowEngine>>>,
    reply: Reply,
    /// Task names in dispatch order.
    dispatched: Mutex<Vec<String>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    gate: Arc<tokio::sync::Semaphore>,
    response_ids: AtomicU64,
}

impl MockExecutorTransport {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            engine: Mutex::new(None),
            reply,
            dispatched: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            gate: Arc::new(tokio::sync::Semaphore::new(0)),
            response_ids: AtomicU64::new(0),
        })
    }

    /// Let one gated response through.
    fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Wire the engine in after construction; transport and engine
    /// reference each other.
    fn connect(&self, engine: &Arc<WorkflowEngine>) {
        *self.engine.lock().unwrap() = Some(Arc::clone(engine));
    }

    fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockExecutorTransport {
    async fn route_message(&self, envelope: Envelope) -> MaestroResult<()> {
        let Payload::Request { ref params, .. } = envelope.payload else {
            return Ok(());
        };
        let task_name = params["task"]["name"].as_str().unwrap_or("?").to_string();
        self.dispatched.lock().unwrap().push(task_name.clone());

        if self.reply == Reply::Silence {
            return Ok(());
        }

        let engine = {
            let guard = self.engine.lock().unwrap();
            guard.clone().expect("transport not connected")
        };
        let response_id = format!("resp-{}", self.response_ids.fetch_add(1, Ordering::SeqCst));
        let response = match self.reply {
            Reply::Echo | Reply::Gated => Envelope::response_to(
                &envelope,
                response_id,
                "mock-executor",
                json!({ "done": task_name }),
            ),
            Reply::Fail => Envelope::error_response_to(
                &envelope,
                response_id,
                "mock-executor",
                "executor exploded",
            ),
            Reply::Silence => unreachable!(),
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let in_flight = Arc::clone(&self.in_flight);
        let gate = (self.reply == Reply::Gated).then(|| Arc::clone(&self.gate));
        // Yield before answering so sibling dispatches overlap and the
        // in-flight peak is observable.
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if let Some(gate) = gate {
                let permit = gate.acquire().await.expect("gate closed");
                permit.forget();
            }
            let _ = engine.handle_message(response).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }
}

fn event_types(rx: &mut mpsc::UnboundedReceiver<WorkflowEvent>) -> Vec<&'static str> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|e| e.event_type())
        .collect()
}

fn build_engine(
    config: EngineConfig,
    agents: Vec<AgentIdentity>,
    transport: Arc<MockExecutorTransport>,
) -> (Arc<WorkflowEngine>, mpsc::UnboundedReceiver<WorkflowEvent>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Arc::new(WorkflowEngine::new(
        config,
        Arc::new(FixedRegistry { agents }),
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::new(SeqIds::new()),
        tx,
    ));
    transport.connect(&engine);
    (engine, rx)
}

// ---------------------------------------------------------------------------
// Full runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_workflow_completes_with_all_results() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, mut rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    let id = engine
        .orchestrate("Create a login form with validation", None)
        .await;
    let status = engine.run_workflow(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let workflow = engine.workflow(&id).await.unwrap();
    assert_eq!(workflow.results.len(), workflow.tasks.len());
    assert!(workflow.errors.is_empty());
    assert!(workflow.completed_at.is_some());

    let events = event_types(&mut rx);
    assert_eq!(
        events.iter().filter(|e| **e == "workflow:task:completed").count(),
        workflow.tasks.len()
    );
    assert_eq!(events.last(), Some(&"workflow:completed"));

    // Every execution settled and is attributed to the workflow.
    let executions = engine.executions_for(&id).await;
    assert_eq!(executions.len(), workflow.tasks.len());
    assert!(executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Completed && e.agent.id == "exec-1"));
}

#[tokio::test]
async fn test_dependencies_dispatch_in_order() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, _rx) = build_engine(
        EngineConfig {
            max_concurrent_tasks: 1,
            ..EngineConfig::default()
        },
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    // Database goals produce Design Schema -> Write Migration.
    let id = engine.orchestrate("create the users database schema", None).await;
    let status = engine.run_workflow(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let order = transport.dispatched();
    let schema = order.iter().position(|n| n == "Design Schema").unwrap();
    let migration = order.iter().position(|n| n == "Write Migration").unwrap();
    assert!(schema < migration, "schema must dispatch before migration: {order:?}");
}

#[tokio::test]
async fn test_concurrency_cap_respected() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, _rx) = build_engine(
        EngineConfig {
            max_concurrent_tasks: 2,
            ..EngineConfig::default()
        },
        vec![executor("exec-1"), executor("exec-2")],
        Arc::clone(&transport),
    );

    // Complex frontend goal yields a generation with several parallel tasks.
    let id = engine
        .orchestrate(
            "Refactor the realtime dashboard ui architecture with authentication and \
             input validation across every page, component, and view in the product",
            None,
        )
        .await;
    let status = engine.run_workflow(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);
    assert!(
        transport.max_in_flight() <= 2,
        "cap of 2 exceeded: {}",
        transport.max_in_flight()
    );
    let workflow = engine.workflow(&id).await.unwrap();
    assert!(workflow.tasks.len() >= 3);
}

#[tokio::test]
async fn test_failed_task_blocks_dependents_and_fails_workflow() {
    let transport = MockExecutorTransport::new(Reply::Fail);
    let (engine, mut rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    let id = engine.orchestrate("create the users database schema", None).await;
    let status = engine.run_workflow(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Failed);

    let workflow = engine.workflow(&id).await.unwrap();
    // Design Schema failed; Write Migration never became ready.
    let schema = workflow.tasks.iter().find(|t| t.name == "Design Schema").unwrap();
    let migration = workflow.tasks.iter().find(|t| t.name == "Write Migration").unwrap();
    assert_eq!(workflow.errors[&schema.id].kind, ErrorKind::AgentFailure);
    assert!(!workflow.is_settled(&migration.id));
    assert!(!transport.dispatched().contains(&"Write Migration".to_string()));

    assert_eq!(event_types(&mut rx).last(), Some(&"workflow:failed"));
}

#[tokio::test]
async fn test_no_viable_agents_records_no_agent_found() {
    let offline = executor("exec-1").with_status(AgentStatus::Offline);
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, _rx) = build_engine(
        EngineConfig::default(),
        vec![offline],
        Arc::clone(&transport),
    );

    let id = engine.orchestrate("tweak the button label", None).await;
    let status = engine.run_workflow(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Failed);

    let workflow = engine.workflow(&id).await.unwrap();
    assert!(workflow
        .errors
        .values()
        .all(|e| e.kind == ErrorKind::NoAgentFound));
    // Nothing was ever dispatched.
    assert!(transport.dispatched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_silent_executor_times_out() {
    let transport = MockExecutorTransport::new(Reply::Silence);
    let (engine, _rx) = build_engine(
        EngineConfig {
            task_timeout: Duration::from_millis(5_000),
            ..EngineConfig::default()
        },
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    let id = engine.orchestrate("tweak the button label", None).await;
    let status = engine.run_workflow(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Failed);

    let workflow = engine.workflow(&id).await.unwrap();
    assert!(workflow.errors.values().all(|e| e.kind == ErrorKind::Timeout));
    let executions = engine.executions_for(&id).await;
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Failed));
}

// ---------------------------------------------------------------------------
// Control commands
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_cancel_fails_running_and_queued_executions() {
    let transport = MockExecutorTransport::new(Reply::Silence);
    let (engine, mut rx) = build_engine(
        EngineConfig {
            max_concurrent_tasks: 1,
            task_timeout: Duration::from_secs(600),
            ..EngineConfig::default()
        },
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    // Complex system goal yields parallel root tasks; with a cap of 1 the
    // second stays queued behind the semaphore in `Pending`.
    let id = engine
        .orchestrate("provision and deploy the distributed build environment", None)
        .await;
    let runner = {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        tokio::spawn(async move { engine.run_workflow(&id).await })
    };
    // Let the first dispatch land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = engine.executions_for(&id).await;
    assert!(!before.is_empty());
    assert!(before.iter().any(|e| e.status == ExecutionStatus::Running));

    engine.cancel_workflow(&id).await.unwrap();
    let status = runner.await.unwrap().unwrap();
    assert_eq!(status, WorkflowStatus::Failed);

    let after = engine.executions_for(&id).await;
    assert!(after.iter().all(|e| e.status == ExecutionStatus::Failed));
    let cancelled = event_types(&mut rx)
        .into_iter()
        .filter(|e| *e == "workflow:cancelled")
        .count();
    assert_eq!(cancelled, 1);

    // Cancelling again is a no-op.
    engine.cancel_workflow(&id).await.unwrap();
    assert!(event_types(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pause_suspends_between_generations() {
    let transport = MockExecutorTransport::new(Reply::Gated);
    let (engine, mut rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    // Two sequential generations: Design Schema, then Write Migration.
    let id = engine.orchestrate("create the users database schema", None).await;
    let runner = {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        tokio::spawn(async move { engine.run_workflow(&id).await })
    };
    // First dispatch goes out and blocks on the gate.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.dispatched(), vec!["Design Schema".to_string()]);

    // Pause, then let the in-flight task finish; the next generation must
    // not be dispatched while paused.
    engine.pause_workflow(&id).await.unwrap();
    transport.release();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!runner.is_finished());
    assert_eq!(transport.dispatched().len(), 1);

    engine.resume_workflow(&id).await.unwrap();
    transport.release();
    let status = runner.await.unwrap().unwrap();
    assert_eq!(status, WorkflowStatus::Completed);
    assert_eq!(transport.dispatched().len(), 2);

    let events = event_types(&mut rx);
    assert!(events.contains(&"workflow:paused"));
    assert!(events.contains(&"workflow:resumed"));
    assert_eq!(events.last(), Some(&"workflow:completed"));
}

// ---------------------------------------------------------------------------
// Agent loss
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_agent_status_event_fails_live_executions() {
    let transport = MockExecutorTransport::new(Reply::Silence);
    let (engine, _rx) = build_engine(
        EngineConfig {
            task_timeout: Duration::from_secs(600),
            ..EngineConfig::default()
        },
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    let id = engine.orchestrate("tweak the button label", None).await;
    let runner = {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        tokio::spawn(async move { engine.run_workflow(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let event = Envelope::new(
        "evt-1",
        "registry",
        "orchestrator",
        Payload::Event {
            event_type: "agent:status:changed".to_string(),
            data: json!({ "agent_id": "exec-1", "status": "offline" }),
            source: "registry".to_string(),
        },
    );
    assert!(engine.handle_message(event).await.unwrap().is_none());

    let status = runner.await.unwrap().unwrap();
    assert_eq!(status, WorkflowStatus::Failed);
    let workflow = engine.workflow(&id).await.unwrap();
    assert!(workflow
        .errors
        .values()
        .all(|e| e.kind == ErrorKind::AgentUnavailable));
}

// ---------------------------------------------------------------------------
// Message dispatch surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_execute_task_request_awaits_workflow_completion() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, _rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    let request = Envelope::new(
        "req-1",
        "caller",
        "orchestrator",
        Payload::Request {
            action: Action::ExecuteTask.to_string(),
            params: json!({ "goal": "create the users database schema" }),
            timeout_ms: 60_000,
        },
    );
    let reply = engine.handle_message(request).await.unwrap().unwrap();
    let Payload::Response { result, error } = reply.payload else {
        panic!("expected response payload");
    };
    assert!(error.is_none());
    let result = result.unwrap();
    assert_eq!(result["status"], json!(WorkflowStatus::Completed));
    assert!(result["workflow_id"].is_string());
    assert!(!result["results"].as_object().unwrap().is_empty());
    assert_eq!(reply.correlation_id.as_deref(), Some("req-1"));
}

#[tokio::test]
async fn test_single_task_goal_skips_workflow_promotion() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, _rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    let result = engine.execute_goal("tweak the button label", None).await.unwrap();
    assert!(result["task_id"].is_string());
    assert_eq!(result["result"]["done"], "Create Component");
    // No workflow was created for the single-task path.
    assert_eq!(engine.list_workflows().await.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_orchestrate_request_reports_stored_state_and_spawns() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, mut rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    let request = Envelope::new(
        "req-1",
        "caller",
        "orchestrator",
        Payload::Request {
            action: Action::Orchestrate.to_string(),
            params: json!({ "goal": "tweak the button label" }),
            timeout_ms: 60_000,
        },
    );
    let reply = engine.handle_message(request).await.unwrap().unwrap();
    let Payload::Response { result, .. } = reply.payload else {
        panic!("expected response payload");
    };
    let result = result.unwrap();
    // The reply reflects the stored state; the spawned run has not flipped
    // the workflow to running yet, so an immediate status query agrees.
    assert_eq!(result["status"], json!(WorkflowStatus::Pending));
    let workflow_id = result["workflow_id"].as_str().unwrap().to_string();

    // The spawned run finishes on its own; wait for the terminal event.
    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(event) = rx.recv().await {
                if event.event_type() == "workflow:completed" {
                    break event.workflow_id().to_string();
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(completed, workflow_id);
    assert_eq!(
        engine.workflow(&workflow_id).await.unwrap().status,
        WorkflowStatus::Completed
    );
}

#[tokio::test]
async fn test_queries_over_the_bus() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, _rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );
    let id = engine.orchestrate("tweak the button label", None).await;
    engine.run_workflow(&id).await.unwrap();

    let list = Envelope::new(
        "q-1",
        "caller",
        "orchestrator",
        Payload::Query {
            query: "workflows".to_string(),
            filters: None,
        },
    );
    let reply = engine.handle_message(list).await.unwrap().unwrap();
    let Payload::Response { result, .. } = reply.payload else {
        panic!("expected response payload");
    };
    let summaries = result.unwrap();
    assert_eq!(summaries.as_array().unwrap().len(), 1);
    assert_eq!(summaries[0]["id"], json!(id));

    let status = Envelope::new(
        "q-2",
        "caller",
        "orchestrator",
        Payload::Query {
            query: "workflow-status".to_string(),
            filters: Some(json!({ "workflow_id": id })),
        },
    );
    let reply = engine.handle_message(status).await.unwrap().unwrap();
    let Payload::Response { result, .. } = reply.payload else {
        panic!("expected response payload");
    };
    assert_eq!(result.unwrap()["status"], json!(WorkflowStatus::Completed));

    let missing = Envelope::new(
        "q-3",
        "caller",
        "orchestrator",
        Payload::Query {
            query: "workflow-status".to_string(),
            filters: None,
        },
    );
    let reply = engine.handle_message(missing).await.unwrap().unwrap();
    let Payload::Response { error, .. } = reply.payload else {
        panic!("expected response payload");
    };
    assert!(error.unwrap().contains("workflow_id"));
}

#[tokio::test]
async fn test_command_without_workflow_id_gets_error_response() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, _rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    let command = Envelope::new(
        "cmd-1",
        "caller",
        "orchestrator",
        Payload::Command {
            command: "cancel-workflow".to_string(),
            args: json!({}),
        },
    );
    let reply = engine.handle_message(command).await.unwrap().unwrap();
    let Payload::Response { error, .. } = reply.payload else {
        panic!("expected response payload");
    };
    assert!(error.unwrap().contains("workflow_id"));
}

#[tokio::test]
async fn test_cancel_command_over_the_bus_returns_no_reply() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, _rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );
    let id = engine.orchestrate("create the users database schema", None).await;

    let command = Envelope::new(
        "cmd-1",
        "caller",
        "orchestrator",
        Payload::Command {
            command: "cancel-workflow".to_string(),
            args: json!({ "workflow_id": id }),
        },
    );
    assert!(engine.handle_message(command).await.unwrap().is_none());
    assert_eq!(
        engine.workflow(&id).await.unwrap().status,
        WorkflowStatus::Failed
    );
}

// ---------------------------------------------------------------------------
// Selection strategies in the loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_round_robin_spreads_across_executors() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (tx, _rx) = mpsc::unbounded_channel();
    let engine = Arc::new(
        WorkflowEngine::new(
            EngineConfig::default(),
            Arc::new(FixedRegistry {
                agents: vec![executor("exec-1"), executor("exec-2")],
            }),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(SeqIds::new()),
            tx,
        )
        .with_selector(Arc::new(RoundRobinSelector::default())),
    );
    transport.connect(&engine);

    let id = engine
        .orchestrate("build the orders api service with validation and tests", None)
        .await;
    let status = engine.run_workflow(&id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let used: HashSet<String> = engine
        .executions_for(&id)
        .await
        .into_iter()
        .map(|e| e.agent.id)
        .collect();
    assert_eq!(used.len(), 2, "both executors should receive work");
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sweep_preserves_unsettled_work() {
    let transport = MockExecutorTransport::new(Reply::Echo);
    let (engine, _rx) = build_engine(
        EngineConfig::default(),
        vec![executor("exec-1")],
        Arc::clone(&transport),
    );

    let finished = engine.orchestrate("tweak the button label", None).await;
    engine.run_workflow(&finished).await.unwrap();
    let pending = engine.orchestrate("create the users database schema", None).await;

    let evicted = engine
        .sweep_expired_before(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await;
    assert_eq!(evicted, 1);
    assert!(engine.workflow(&finished).await.is_none());
    assert!(engine.executions_for(&finished).await.is_empty());
    assert!(engine.workflow(&pending).await.is_some());

    // Inside the retention window nothing is evicted.
    let finished = engine.orchestrate("tweak the button label", None).await;
    engine.run_workflow(&finished).await.unwrap();
    let evicted = engine
        .sweep_expired_before(chrono::Utc::now() - chrono::Duration::hours(1))
        .await;
    assert_eq!(evicted, 0);
    assert!(engine.workflow(&finished).await.is_some());
}
