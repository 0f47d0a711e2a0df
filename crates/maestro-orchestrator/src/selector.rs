use crate::types::{Task, TaskDomain};
use chrono::{Duration, Utc};
use maestro_core::{AgentIdentity, AgentStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Strategy seam for picking an agent for a task.
///
/// The primary strategy is the deterministic [`ScoringSelector`];
/// [`RoundRobinSelector`] is a simpler rotating fallback.
pub trait AgentSelector: Send + Sync {
    /// Pick the best candidate for `task`, or `None` when no candidate is
    /// viable (empty list, or every score at or below zero).
    fn select(&self, task: &Task, candidates: &[AgentIdentity]) -> Option<AgentIdentity>;
}

/// Capabilities worth bonus credit per domain, beyond what a task requires.
fn relevant_capabilities(domain: TaskDomain) -> &'static [&'static str] {
    match domain {
        TaskDomain::Frontend => &["ui:design", "style:css", "code:generate", "file:write"],
        TaskDomain::Backend => &["api:design", "code:generate", "http:request", "file:write"],
        TaskDomain::Database => &["db:query", "db:migrate", "file:write"],
        TaskDomain::System => &["shell:exec", "process:manage", "file:read"],
        TaskDomain::General => &["code:generate", "file:write"],
    }
}

/// One capability per domain that marks an agent as a specialist.
fn specialism_capability(domain: TaskDomain) -> Option<&'static str> {
    match domain {
        TaskDomain::Frontend => Some("ui:design"),
        TaskDomain::Backend => Some("api:design"),
        TaskDomain::Database => Some("db:migrate"),
        TaskDomain::System => Some("process:manage"),
        TaskDomain::General => None,
    }
}

/// Static provider-by-domain affinity, default 10 for unlisted combinations.
fn provider_affinity(provider: &str, domain: TaskDomain) -> f64 {
    match (provider, domain) {
        ("claude", TaskDomain::Frontend) => 20.0,
        ("claude", TaskDomain::Backend) => 20.0,
        ("claude", TaskDomain::General) => 15.0,
        ("openai", TaskDomain::Backend) => 18.0,
        ("openai", TaskDomain::Database) => 15.0,
        ("local", TaskDomain::System) => 25.0,
        ("local", TaskDomain::Database) => 12.0,
        _ => 10.0,
    }
}

/// Deterministic additive scorer over four weighted factors.
///
/// Side-effect-free aside from tracing; identical `(task, candidates)` input
/// always yields the same choice, with ties broken by candidate order.
#[derive(Debug, Default)]
pub struct ScoringSelector;

impl ScoringSelector {
    /// Total score for one candidate.
    pub fn score(&self, task: &Task, agent: &AgentIdentity) -> f64 {
        let capability = self.capability_score(task, agent);
        let availability = self.availability_score(agent);
        let affinity = self.affinity_score(task, agent);
        let performance = self.performance_score(agent);
        let total = capability + availability + affinity + performance;
        trace!(
            agent = %agent.id,
            capability,
            availability,
            affinity,
            performance,
            total,
            "scored candidate"
        );
        total
    }

    /// 0-40 proportional credit for required capabilities (flat 20 when the
    /// task requires none), plus up to 10 bonus for extra domain-relevant
    /// capabilities.
    fn capability_score(&self, task: &Task, agent: &AgentIdentity) -> f64 {
        let base = if task.required_capabilities.is_empty() {
            20.0
        } else {
            let matched = task
                .required_capabilities
                .iter()
                .filter(|cap| agent.capabilities.contains(*cap))
                .count();
            40.0 * matched as f64 / task.required_capabilities.len() as f64
        };

        let extras = relevant_capabilities(task.domain)
            .iter()
            .filter(|cap| {
                agent.capabilities.contains(**cap) && !task.required_capabilities.contains(**cap)
            })
            .count();
        base + (extras as f64 * 2.5).min(10.0)
    }

    /// Status credit (offline is an effective disqualification, not a hard
    /// filter) with a small heartbeat-recency adjustment.
    fn availability_score(&self, agent: &AgentIdentity) -> f64 {
        let base = match agent.status {
            AgentStatus::Idle => 30.0,
            AgentStatus::Busy => 10.0,
            AgentStatus::Error => 0.0,
            AgentStatus::Offline => -100.0,
        };
        let since_heartbeat = Utc::now() - agent.metadata.last_active;
        let recency = if since_heartbeat <= Duration::seconds(120) {
            5.0
        } else if since_heartbeat >= Duration::hours(1) {
            -5.0
        } else {
            0.0
        };
        base + recency
    }

    /// 0-25: provider-by-domain table plus a specialism bonus, capped.
    fn affinity_score(&self, task: &Task, agent: &AgentIdentity) -> f64 {
        let mut score = provider_affinity(&agent.provider, task.domain);
        if let Some(cap) = specialism_capability(task.domain) {
            if agent.capabilities.contains(cap) {
                score += 5.0;
            }
        }
        score.min(25.0)
    }

    /// 0-10 placeholder for a real performance history: uptime plus a
    /// stable-version check.
    fn performance_score(&self, agent: &AgentIdentity) -> f64 {
        let uptime = Utc::now() - agent.metadata.created;
        let uptime_credit: f64 = if uptime >= Duration::hours(1) {
            5.0
        } else if uptime >= Duration::minutes(5) {
            3.0
        } else {
            1.0
        };
        let version = agent.metadata.version.to_lowercase();
        let stable = !["alpha", "beta", "rc", "dev"]
            .iter()
            .any(|tag| version.contains(tag));
        let version_credit = if stable { 5.0 } else { 0.0 };
        (uptime_credit + version_credit).min(10.0)
    }
}

impl AgentSelector for ScoringSelector {
    fn select(&self, task: &Task, candidates: &[AgentIdentity]) -> Option<AgentIdentity> {
        if candidates.is_empty() {
            return None;
        }

        let mut best: Option<(&AgentIdentity, f64)> = None;
        for candidate in candidates {
            let score = self.score(task, candidate);
            match best {
                // Strictly greater keeps the earliest candidate on ties.
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((candidate, score)),
            }
        }

        match best {
            Some((agent, score)) if score > 0.0 => {
                debug!(task = %task.id, agent = %agent.id, score, "selected agent");
                Some(agent.clone())
            }
            Some((agent, score)) => {
                debug!(task = %task.id, agent = %agent.id, score, "best score not viable");
                None
            }
            None => None,
        }
    }
}

/// Rotating fallback strategy: skips offline candidates, otherwise picks the
/// next one in turn. Selection depends on call order across workflows.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    cursor: AtomicUsize,
}

impl AgentSelector for RoundRobinSelector {
    fn select(&self, _task: &Task, candidates: &[AgentIdentity]) -> Option<AgentIdentity> {
        let reachable: Vec<&AgentIdentity> =
            candidates.iter().filter(|a| a.is_reachable()).collect();
        if reachable.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % reachable.len();
        Some(reachable[idx].clone())
    }
}
