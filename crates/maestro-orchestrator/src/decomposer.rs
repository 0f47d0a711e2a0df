use crate::types::{Complexity, Task, TaskDomain};
use maestro_core::{IdGenerator, Priority};
use regex::Regex;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Keywords whose presence pushes a goal toward the `Complex` tier.
const COMPLEX_KEYWORDS: &[&str] = &[
    "architecture",
    "authentication",
    "concurrent",
    "distributed",
    "integrate",
    "migrate",
    "orchestrate",
    "pipeline",
    "realtime",
    "refactor",
    "scale",
];

/// Keywords whose presence pushes a goal toward the `Simple` tier.
const SIMPLE_KEYWORDS: &[&str] = &[
    "bump", "comment", "label", "readme", "rename", "tweak", "typo",
];

/// Goal length thresholds feeding the complexity score alongside keywords.
const LONG_GOAL_CHARS: usize = 160;
const SHORT_GOAL_CHARS: usize = 40;

/// Turns a free-text goal into an ordered list of tasks with coarse
/// dependency edges.
///
/// Deterministic: identical goal/context plus an identically-seeded id
/// generator yields byte-identical task lists.
pub struct TaskDecomposer {
    ids: Arc<dyn IdGenerator>,
    domain_patterns: Vec<(TaskDomain, Regex)>,
    auth_pattern: Regex,
    validation_pattern: Regex,
}

impl TaskDecomposer {
    /// Build a decomposer minting task ids from `ids`.
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        // First match wins, so order is part of the contract.
        let domain_patterns = vec![
            (
                TaskDomain::Frontend,
                compiled(r"(?i)\b(component|ui|form|page|button|styles?|css|login|frontend|view)\b"),
            ),
            (
                TaskDomain::Backend,
                compiled(r"(?i)\b(api|endpoint|server|service|backend|route|handler|auth)\b"),
            ),
            (
                TaskDomain::Database,
                compiled(r"(?i)\b(database|schema|migrations?|sql|table|query|index)\b"),
            ),
            (
                TaskDomain::System,
                compiled(r"(?i)\b(deploy|install|configure|shell|scripts?|docker|system)\b"),
            ),
        ];
        Self {
            ids,
            domain_patterns,
            auth_pattern: compiled(r"(?i)\b(login|auth\w*|sign[ -]?in)\b"),
            validation_pattern: compiled(r"(?i)\bvalidat\w*\b"),
        }
    }

    /// Decompose a goal into tasks. Never returns an empty list for a
    /// non-empty goal: if no template applies, a single generic task carries
    /// the literal goal text.
    pub fn decompose(&self, goal: &str, context: Option<&Value>) -> Vec<Task> {
        let complexity = self.classify_complexity(goal);
        let domain = self.classify_domain(goal, context);
        let priority = context
            .and_then(|c| c.get("priority"))
            .and_then(Value::as_str)
            .and_then(|p| match p {
                "low" => Some(Priority::Low),
                "normal" => Some(Priority::Normal),
                "high" => Some(Priority::High),
                _ => None,
            })
            .unwrap_or_default();

        debug!(%domain, ?complexity, %priority, goal, "decomposed goal classification");

        let mut tasks = match domain {
            TaskDomain::Frontend => self.frontend_tasks(goal, complexity, priority),
            TaskDomain::Backend => self.backend_tasks(goal, complexity, priority),
            TaskDomain::Database => self.database_tasks(goal, complexity, priority),
            TaskDomain::System => self.system_tasks(goal, complexity, priority),
            TaskDomain::General => Vec::new(),
        };

        if tasks.is_empty() {
            tasks.push(self.generic_task(goal, complexity, priority));
        }

        wire_dependencies(&mut tasks);
        tasks
    }

    /// Classify complexity from keyword density plus raw length. Ties favor
    /// `Moderate`.
    fn classify_complexity(&self, goal: &str) -> Complexity {
        let lowered = goal.to_lowercase();
        let mut complex_hits = COMPLEX_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(*kw))
            .count();
        let mut simple_hits = SIMPLE_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(*kw))
            .count();
        if goal.len() >= LONG_GOAL_CHARS {
            complex_hits += 1;
        }
        if goal.len() < SHORT_GOAL_CHARS {
            simple_hits += 1;
        }
        match complex_hits.cmp(&simple_hits) {
            std::cmp::Ordering::Greater => Complexity::Complex,
            std::cmp::Ordering::Less => Complexity::Simple,
            std::cmp::Ordering::Equal => Complexity::Moderate,
        }
    }

    /// Classify domain from an explicit context hint, then the ordered
    /// pattern list; first match wins.
    fn classify_domain(&self, goal: &str, context: Option<&Value>) -> TaskDomain {
        if let Some(hint) = context
            .and_then(|c| c.get("domain"))
            .and_then(Value::as_str)
            .and_then(|d| TaskDomain::from_str(d).ok())
        {
            return hint;
        }
        for (domain, pattern) in &self.domain_patterns {
            if pattern.is_match(goal) {
                return *domain;
            }
        }
        TaskDomain::General
    }

    fn frontend_tasks(&self, goal: &str, complexity: Complexity, priority: Priority) -> Vec<Task> {
        let mut tasks = vec![self
            .task("Create Component", "create-component", TaskDomain::Frontend, complexity, goal)
            .with_priority(priority)
            .with_capabilities(["file:write", "code:generate"])];

        if self.auth_pattern.is_match(goal) {
            tasks.push(
                self.task(
                    "Implement Authentication Flow",
                    "implement-auth",
                    TaskDomain::Frontend,
                    complexity,
                    goal,
                )
                .with_priority(Priority::High)
                .with_capabilities(["file:write", "code:generate", "http:request"]),
            );
        }
        if self.validation_pattern.is_match(goal) {
            tasks.push(
                self.task(
                    "Add Input Validation",
                    "add-validation",
                    TaskDomain::Frontend,
                    complexity,
                    goal,
                )
                .with_priority(priority)
                .with_capabilities(["file:write", "code:generate"]),
            );
        }
        if complexity != Complexity::Simple {
            tasks.push(
                self.task("Add Component Styles", "add-styles", TaskDomain::Frontend, complexity, goal)
                    .with_priority(priority)
                    .with_capabilities(["file:write", "style:css"]),
            );
            tasks.push(
                self.task("Add Component Tests", "write-tests", TaskDomain::Frontend, complexity, goal)
                    .with_priority(priority)
                    .with_capabilities(["file:write", "test:run"]),
            );
        }
        tasks
    }

    fn backend_tasks(&self, goal: &str, complexity: Complexity, priority: Priority) -> Vec<Task> {
        let mut tasks = vec![self
            .task("Implement Service Endpoint", "create-endpoint", TaskDomain::Backend, complexity, goal)
            .with_priority(priority)
            .with_capabilities(["file:write", "code:generate", "api:design"])];

        if self.auth_pattern.is_match(goal) {
            tasks.push(
                self.task(
                    "Implement Authentication Flow",
                    "implement-auth",
                    TaskDomain::Backend,
                    complexity,
                    goal,
                )
                .with_priority(Priority::High)
                .with_capabilities(["file:write", "code:generate", "http:request"]),
            );
        }
        if complexity != Complexity::Simple {
            tasks.push(
                self.task("Add Endpoint Tests", "write-tests", TaskDomain::Backend, complexity, goal)
                    .with_priority(priority)
                    .with_capabilities(["file:write", "test:run"]),
            );
        }
        tasks
    }

    fn database_tasks(&self, goal: &str, complexity: Complexity, priority: Priority) -> Vec<Task> {
        let mut tasks = vec![
            self.task("Design Schema", "design-schema", TaskDomain::Database, complexity, goal)
                .with_priority(priority)
                .with_capabilities(["db:query", "file:write"]),
            self.task("Write Migration", "write-migration", TaskDomain::Database, complexity, goal)
                .with_priority(priority)
                .with_capabilities(["db:migrate", "file:write"]),
        ];
        if complexity != Complexity::Simple {
            tasks.push(
                self.task("Add Schema Tests", "write-tests", TaskDomain::Database, complexity, goal)
                    .with_priority(priority)
                    .with_capabilities(["db:query", "test:run"]),
            );
        }
        tasks
    }

    fn system_tasks(&self, goal: &str, complexity: Complexity, priority: Priority) -> Vec<Task> {
        let mut tasks = vec![
            self.task("Prepare Environment", "configure-env", TaskDomain::System, complexity, goal)
                .with_priority(priority)
                .with_capabilities(["shell:exec"]),
            self.task("Run System Task", "run-command", TaskDomain::System, complexity, goal)
                .with_priority(priority)
                .with_capabilities(["shell:exec", "process:manage"]),
        ];
        if complexity != Complexity::Simple {
            tasks.push(
                self.task("Verify System Tests", "write-tests", TaskDomain::System, complexity, goal)
                    .with_priority(priority)
                    .with_capabilities(["shell:exec", "test:run"]),
            );
        }
        tasks
    }

    fn generic_task(&self, goal: &str, complexity: Complexity, priority: Priority) -> Task {
        self.task("Execute Goal", "execute", TaskDomain::General, complexity, goal)
            .with_priority(priority)
    }

    fn task(
        &self,
        name: &str,
        action: &str,
        domain: TaskDomain,
        complexity: Complexity,
        goal: &str,
    ) -> Task {
        Task::new(self.ids.next_id(), name, action, domain, complexity)
            .with_description(format!("{name} for goal: {goal}"))
            .with_params(json!({ "goal": goal }))
    }
}

fn compiled(pattern: &str) -> Regex {
    // Patterns are compile-time constants; a failure here is a programmer
    // error caught by the unit tests.
    #[allow(clippy::expect_used)]
    Regex::new(pattern).expect("invalid built-in pattern")
}

/// Best-effort dependency wiring from name patterns: tests depend on the
/// first same-domain non-test sibling, styles on the component task, and
/// migrations on the schema task.
fn wire_dependencies(tasks: &mut [Task]) {
    let index: Vec<(String, String, TaskDomain)> = tasks
        .iter()
        .map(|t| (t.id.clone(), t.name.clone(), t.domain))
        .collect();

    for task in tasks.iter_mut() {
        let mut deps = Vec::new();
        if task.name.contains("Tests") {
            if let Some((dep_id, _, _)) = index
                .iter()
                .find(|(id, name, domain)| *id != task.id && *domain == task.domain && !name.contains("Tests"))
            {
                deps.push(dep_id.clone());
            }
        }
        if task.name.contains("Styles") {
            if let Some((dep_id, _, _)) = index.iter().find(|(_, name, _)| name.contains("Component") && !name.contains("Styles") && !name.contains("Tests")) {
                deps.push(dep_id.clone());
            }
        }
        if task.name.contains("Migration") {
            if let Some((dep_id, _, _)) = index.iter().find(|(_, name, _)| name.contains("Schema") && !name.contains("Tests")) {
                deps.push(dep_id.clone());
            }
        }
        if !deps.is_empty() {
            deps.sort();
            deps.dedup();
            task.dependencies = deps;
        }
    }
}
