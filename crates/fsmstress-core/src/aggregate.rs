//! Failure aggregation and the final execution result.
//!
//! [`aggregate_outcomes`] folds setup, per-agent and teardown outcomes into a
//! single [`Aggregate`]. Every individual failure is kept; the printable form
//! of [`RunFailure`] lists each one with the agent, state and iteration needed
//! to replay it.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{AgentFailure, AgentOutcome, AgentReport};
use crate::error::{RunError, RunResult};

/// Outcome of a global setup or teardown hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum HookOutcome {
    /// The workload registered no hook.
    Absent,
    Succeeded,
    Failed(String),
    /// Never attempted (teardown after a failed setup).
    NotRun,
}

impl HookOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, HookOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            HookOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// A per-agent teardown hook failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTeardownFailure {
    pub agent: usize,
    pub error: String,
}

/// Composite failure of one run. Nothing in here is ever deduplicated away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub workload: String,
    pub seed: u64,
    pub total_agents: usize,
    /// Set only when global setup failed; then nothing else is populated.
    pub setup: Option<String>,
    pub agents: Vec<AgentFailure>,
    pub agent_teardowns: Vec<AgentTeardownFailure>,
    pub teardown: Option<String>,
}

impl RunFailure {
    /// Number of individual failures carried.
    pub fn failure_count(&self) -> usize {
        usize::from(self.setup.is_some())
            + self.agents.len()
            + self.agent_teardowns.len()
            + usize::from(self.teardown.is_some())
    }

    /// Agent failures grouped by identical error text, in order of first
    /// appearance, with the indices of the agents that raised each.
    pub fn distinct_errors(&self) -> Vec<(&str, Vec<usize>)> {
        let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
        for failure in &self.agents {
            match groups.iter_mut().find(|(err, _)| *err == failure.error) {
                Some((_, agents)) => agents.push(failure.agent),
                None => groups.push((failure.error.as_str(), vec![failure.agent])),
            }
        }
        groups
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workload '{}' failed (seed {})", self.workload, self.seed)?;
        if let Some(err) = &self.setup {
            return write!(f, ": setup failed: {err}");
        }

        let failed_agents: BTreeSet<usize> = self
            .agents
            .iter()
            .map(|a| a.agent)
            .chain(self.agent_teardowns.iter().map(|a| a.agent))
            .collect();
        write!(
            f,
            ": {} of {} agents failed",
            failed_agents.len(),
            self.total_agents
        )?;
        if self.teardown.is_some() {
            f.write_str(", teardown failed")?;
        }

        for failure in &self.agents {
            write!(f, "\n  {failure}")?;
        }
        for failure in &self.agent_teardowns {
            write!(
                f,
                "\n  agent {} teardown failed: {}",
                failure.agent, failure.error
            )?;
        }
        if let Some(err) = &self.teardown {
            write!(f, "\n  teardown failed: {err}")?;
        }

        let groups = self.distinct_errors();
        if groups.iter().any(|(_, agents)| agents.len() > 1) {
            f.write_str("\n  distinct errors:")?;
            for (err, agents) in groups {
                let ids: Vec<String> = agents.iter().map(usize::to_string).collect();
                write!(
                    f,
                    "\n    {} agent(s) [{}]: {}",
                    agents.len(),
                    ids.join(", "),
                    err
                )?;
            }
        }
        Ok(())
    }
}

/// Verdict of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Aggregate {
    Success,
    Failure(RunFailure),
}

impl Aggregate {
    pub fn is_success(&self) -> bool {
        matches!(self, Aggregate::Success)
    }
}

/// Fold every outcome of a run into one verdict.
///
/// A failed setup short-circuits: the verdict carries only the setup error.
/// Otherwise the run succeeds only if every agent succeeded, no agent
/// teardown failed and global teardown did not fail. Agents stopped by the
/// stop-on-first-failure policy are not failures by themselves.
pub fn aggregate_outcomes(
    workload: &str,
    seed: u64,
    total_agents: usize,
    setup: &HookOutcome,
    agents: &[AgentReport],
    teardown: &HookOutcome,
) -> Aggregate {
    let mut failure = RunFailure {
        workload: workload.to_string(),
        seed,
        total_agents,
        setup: None,
        agents: Vec::new(),
        agent_teardowns: Vec::new(),
        teardown: None,
    };

    if let Some(err) = setup.error() {
        failure.setup = Some(err.to_string());
        return Aggregate::Failure(failure);
    }

    for report in agents {
        if let AgentOutcome::Failure(agent_failure) = &report.outcome {
            failure.agents.push(agent_failure.clone());
        }
        if let Some(err) = &report.teardown_error {
            failure.agent_teardowns.push(AgentTeardownFailure {
                agent: report.index,
                error: err.clone(),
            });
        }
    }
    failure.teardown = teardown.error().map(str::to_string);

    if failure.failure_count() == 0 {
        Aggregate::Success
    } else {
        Aggregate::Failure(failure)
    }
}

/// Everything one run produced. Built once, after teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub workload: String,
    pub seed: u64,
    /// Digest of the transition graph that was walked.
    pub graph_digest: String,
    pub concurrency: usize,
    pub iterations: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub setup: HookOutcome,
    /// Ordered by agent index. Empty when setup failed.
    pub agents: Vec<AgentReport>,
    pub teardown: HookOutcome,
    pub aggregate: Aggregate,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.aggregate.is_success()
    }

    /// Number of agents that completed successfully.
    pub fn passed_count(&self) -> usize {
        self.agents.iter().filter(|a| a.succeeded()).count()
    }

    /// Number of agents whose walk failed.
    pub fn failed_count(&self) -> usize {
        self.agents.iter().filter(|a| a.failure().is_some()).count()
    }

    /// Number of agents stopped early by a sibling's failure.
    pub fn stopped_count(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| matches!(a.outcome, AgentOutcome::Stopped { .. }))
            .count()
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match &self.aggregate {
            Aggregate::Failure(failure) => Some(failure),
            Aggregate::Success => None,
        }
    }

    /// `Ok(self)` on full success, otherwise the composite failure as an error.
    pub fn into_result(self) -> RunResult<Self> {
        match self.aggregate {
            Aggregate::Success => Ok(self),
            Aggregate::Failure(failure) => Err(RunError::Failed(Box::new(failure))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Completion;

    fn ok(index: usize) -> AgentReport {
        AgentReport {
            index,
            outcome: AgentOutcome::Success {
                completion: Completion::BudgetExhausted,
            },
            iterations_completed: 5,
            final_state: "init".to_string(),
            teardown_error: None,
            duration_ms: 1,
            path: None,
        }
    }

    fn failed(index: usize, iteration: u64, error: &str) -> AgentReport {
        AgentReport {
            outcome: AgentOutcome::Failure(AgentFailure {
                agent: index,
                state: "update".to_string(),
                iteration,
                error: error.to_string(),
            }),
            ..ok(index)
        }
    }

    #[test]
    fn test_all_success_is_success() {
        let agg = aggregate_outcomes(
            "w",
            1,
            3,
            &HookOutcome::Succeeded,
            &[ok(0), ok(1), ok(2)],
            &HookOutcome::Absent,
        );
        assert!(agg.is_success());
    }

    #[test]
    fn test_setup_failure_carries_only_setup_error() {
        let agg = aggregate_outcomes(
            "w",
            1,
            3,
            &HookOutcome::Failed("no connection".to_string()),
            &[],
            &HookOutcome::NotRun,
        );
        let Aggregate::Failure(failure) = agg else {
            panic!("expected failure");
        };
        assert_eq!(failure.setup.as_deref(), Some("no connection"));
        assert!(failure.agents.is_empty());
        assert!(failure.teardown.is_none());
        assert_eq!(failure.failure_count(), 1);
        assert!(failure.to_string().contains("setup failed: no connection"));
    }

    #[test]
    fn test_every_failure_is_kept() {
        let agg = aggregate_outcomes(
            "w",
            9,
            4,
            &HookOutcome::Absent,
            &[
                ok(0),
                failed(1, 2, "dup key"),
                failed(2, 0, "timeout"),
                failed(3, 7, "dup key"),
            ],
            &HookOutcome::Failed("drop failed".to_string()),
        );
        let Aggregate::Failure(failure) = agg else {
            panic!("expected failure");
        };
        assert_eq!(failure.agents.len(), 3);
        assert_eq!(failure.teardown.as_deref(), Some("drop failed"));
        assert_eq!(failure.failure_count(), 4);

        let msg = failure.to_string();
        assert!(msg.contains("3 of 4 agents failed"));
        assert!(msg.contains("agent 1 failed in state 'update' at iteration 2: dup key"));
        assert!(msg.contains("agent 2 failed in state 'update' at iteration 0: timeout"));
        assert!(msg.contains("agent 3 failed in state 'update' at iteration 7: dup key"));
        assert!(msg.contains("teardown failed: drop failed"));
        assert!(msg.contains("2 agent(s) [1, 3]: dup key"));
    }

    #[test]
    fn test_teardown_failure_alone_fails_run() {
        let agg = aggregate_outcomes(
            "w",
            1,
            2,
            &HookOutcome::Absent,
            &[ok(0), ok(1)],
            &HookOutcome::Failed("boom".to_string()),
        );
        assert!(!agg.is_success());
    }

    #[test]
    fn test_agent_teardown_failure_is_reported() {
        let mut report = ok(1);
        report.teardown_error = Some("leaked cursor".to_string());
        let agg = aggregate_outcomes(
            "w",
            1,
            2,
            &HookOutcome::Absent,
            &[ok(0), report],
            &HookOutcome::Succeeded,
        );
        let Aggregate::Failure(failure) = agg else {
            panic!("expected failure");
        };
        assert_eq!(failure.agent_teardowns.len(), 1);
        assert!(failure.agents.is_empty());
        assert!(failure
            .to_string()
            .contains("agent 1 teardown failed: leaked cursor"));
    }

    #[test]
    fn test_distinct_errors_groups_in_first_seen_order() {
        let failure = RunFailure {
            workload: "w".to_string(),
            seed: 0,
            total_agents: 3,
            setup: None,
            agents: vec![
                failed(0, 1, "b").failure().unwrap().clone(),
                failed(1, 1, "a").failure().unwrap().clone(),
                failed(2, 1, "b").failure().unwrap().clone(),
            ],
            agent_teardowns: vec![],
            teardown: None,
        };
        let groups = failure.distinct_errors();
        assert_eq!(groups, vec![("b", vec![0, 2]), ("a", vec![1])]);
    }
}
