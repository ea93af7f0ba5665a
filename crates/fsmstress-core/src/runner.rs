//! Run orchestration: validate, set up, spawn agents, tear down, aggregate.
//!
//! Each agent is its own tokio task on the multi-threaded runtime, so agents
//! interleave freely against the target. The runner guarantees only that
//! setup finishes before any agent starts and that teardown starts after every
//! agent has finished.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Barrier;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::agent::{
    panic_message, run_agent, AgentFailure, AgentOutcome, AgentReport, AgentTask, StopSignal,
};
use crate::aggregate::{aggregate_outcomes, ExecutionResult, HookOutcome};
use crate::config::Config;
use crate::error::{ConfigResult, RunResult};
use crate::fixture::SharedFixture;
use crate::obs;
use crate::options::RunOptions;
use crate::transition::TransitionTable;

/// Executes workloads under a fixed set of [`RunOptions`].
#[derive(Debug, Clone, Default)]
pub struct Runner {
    options: RunOptions,
}

impl Runner {
    pub fn new(options: RunOptions) -> ConfigResult<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// The config as it will actually run: counts adjusted by the options, validated.
    pub fn resolve<T>(&self, config: &Config<T>) -> ConfigResult<Config<T>> {
        let (concurrency, iterations) = self
            .options
            .resolve_counts(config.concurrency(), config.iterations());
        let resolved = config.with_counts(concurrency, iterations);
        resolved.validate()?;
        Ok(resolved)
    }

    /// Run one workload and return everything it produced.
    ///
    /// Only configuration problems are returned as `Err`; setup, agent and
    /// teardown failures are captured in [`ExecutionResult::aggregate`].
    pub async fn execute<T>(&self, config: &Config<T>, target: Arc<T>) -> ConfigResult<ExecutionResult>
    where
        T: Send + Sync + 'static,
    {
        let config = Arc::new(self.resolve(config)?);
        let run_id = Uuid::new_v4();
        let span = obs::run_span(&run_id.to_string(), config.name());
        Ok(self.execute_resolved(run_id, config, target).instrument(span).await)
    }

    /// Like [`Runner::execute`], but any failure becomes `Err(RunError::Failed)`.
    pub async fn run<T>(&self, config: &Config<T>, target: Arc<T>) -> RunResult<ExecutionResult>
    where
        T: Send + Sync + 'static,
    {
        self.execute(config, target).await?.into_result()
    }

    /// Run several workloads one after another against the same target.
    ///
    /// Every config is validated before the first one starts. A failing
    /// workload does not prevent the next one from running.
    pub async fn execute_serially<T>(
        &self,
        configs: &[Config<T>],
        target: Arc<T>,
    ) -> ConfigResult<Vec<ExecutionResult>>
    where
        T: Send + Sync + 'static,
    {
        let resolved = configs
            .iter()
            .map(|config| self.resolve(config).map(Arc::new))
            .collect::<ConfigResult<Vec<_>>>()?;

        let mut results = Vec::with_capacity(resolved.len());
        for (position, config) in resolved.into_iter().enumerate() {
            info!(workload = %config.name(), position = position, total = configs.len(), "Running workload");
            let run_id = Uuid::new_v4();
            let span = obs::run_span(&run_id.to_string(), config.name());
            let result = self
                .execute_resolved(run_id, config, Arc::clone(&target))
                .instrument(span)
                .await;
            results.push(result);
        }
        Ok(results)
    }

    async fn execute_resolved<T>(
        &self,
        run_id: Uuid,
        config: Arc<Config<T>>,
        target: Arc<T>,
    ) -> ExecutionResult
    where
        T: Send + Sync + 'static,
    {
        let run_id_str = run_id.to_string();
        let started_at = Utc::now();
        let started = Instant::now();
        let seed = self.options.resolve_seed();
        let concurrency = config.concurrency();
        let table = Arc::new(TransitionTable::build(&config));

        obs::emit_run_started(&run_id_str, config.name(), concurrency, config.iterations(), seed);

        let mut fixture = SharedFixture::new();
        let setup = match config.setup() {
            None => HookOutcome::Absent,
            Some(hook) => {
                match AssertUnwindSafe(hook(target.as_ref(), &mut fixture))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => HookOutcome::Succeeded,
                    Ok(Err(err)) => HookOutcome::Failed(format!("{err:#}")),
                    Err(panic) => {
                        HookOutcome::Failed(format!("setup panicked: {}", panic_message(&*panic)))
                    }
                }
            }
        };

        if let Some(err) = setup.error() {
            obs::emit_setup_failed(&run_id_str, err);
            let teardown = HookOutcome::NotRun;
            let aggregate =
                aggregate_outcomes(config.name(), seed, concurrency, &setup, &[], &teardown);
            let duration_ms = started.elapsed().as_millis() as u64;
            obs::emit_run_finished(&run_id_str, duration_ms, 0, 0, false);
            return ExecutionResult {
                run_id,
                workload: config.name().to_string(),
                seed,
                graph_digest: table.digest().to_string(),
                concurrency,
                iterations: config.iterations(),
                started_at,
                duration_ms,
                setup,
                agents: Vec::new(),
                teardown,
                aggregate,
            };
        }

        let fixture = Arc::new(fixture);
        let start = Arc::new(Barrier::new(concurrency));
        let stop = self.options.stop_on_first_failure.then(StopSignal::new);

        let mut handles = Vec::with_capacity(concurrency);
        for index in 0..concurrency {
            let task = AgentTask {
                index,
                config: Arc::clone(&config),
                table: Arc::clone(&table),
                target: Arc::clone(&target),
                fixture: Arc::clone(&fixture),
                seed,
                start: Arc::clone(&start),
                stop: stop.clone(),
                trace_states: self.options.trace_states,
            };
            handles.push(tokio::spawn(run_agent(task).in_current_span()));
        }

        let mut agents = Vec::with_capacity(concurrency);
        for (index, handle) in handles.into_iter().enumerate() {
            let report = match handle.await {
                Ok(report) => report,
                Err(err) => {
                    let failure = AgentFailure {
                        agent: index,
                        state: "<agent task>".to_string(),
                        iteration: 0,
                        error: format!("agent task aborted: {err}"),
                    };
                    obs::emit_agent_failed(&failure);
                    AgentReport {
                        index,
                        outcome: AgentOutcome::Failure(failure),
                        iterations_completed: 0,
                        final_state: String::new(),
                        teardown_error: None,
                        duration_ms: 0,
                        path: None,
                    }
                }
            };
            agents.push(report);
        }

        let teardown = match config.teardown() {
            None => HookOutcome::Absent,
            Some(hook) => {
                match AssertUnwindSafe(hook(target.as_ref(), fixture.as_ref()))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => HookOutcome::Succeeded,
                    Ok(Err(err)) => HookOutcome::Failed(format!("{err:#}")),
                    Err(panic) => HookOutcome::Failed(format!(
                        "teardown panicked: {}",
                        panic_message(&*panic)
                    )),
                }
            }
        };
        if let Some(err) = teardown.error() {
            obs::emit_teardown_failed(&run_id_str, err);
        }

        let aggregate =
            aggregate_outcomes(config.name(), seed, concurrency, &setup, &agents, &teardown);
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = ExecutionResult {
            run_id,
            workload: config.name().to_string(),
            seed,
            graph_digest: table.digest().to_string(),
            concurrency,
            iterations: config.iterations(),
            started_at,
            duration_ms,
            setup,
            agents,
            teardown,
            aggregate,
        };
        obs::emit_run_finished(
            &run_id_str,
            duration_ms,
            result.passed_count(),
            result.failed_count(),
            result.is_success(),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentContext;
    use crate::config::{HandlerResult, Step};
    use crate::error::ConfigError;
    use futures::future::BoxFuture;

    fn noop<'a>(_: &'a (), _: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async { Ok(Step::Continue) })
    }

    fn looping(concurrency: usize, iterations: u64) -> Config<()> {
        let mut draft = Config::<()>::builder("loop");
        draft
            .concurrency(concurrency)
            .iterations(iterations)
            .state("init", noop)
            .transition("init", "init", 1.0);
        draft.build().unwrap()
    }

    #[test]
    fn test_resolve_applies_options() {
        let runner = Runner::new(RunOptions {
            concurrency_multiplier: 2.0,
            iterations: Some(3),
            ..RunOptions::default()
        })
        .unwrap();
        let resolved = runner.resolve(&looping(4, 100)).unwrap();
        assert_eq!(resolved.concurrency(), 8);
        assert_eq!(resolved.iterations(), 3);
    }

    #[test]
    fn test_runner_rejects_invalid_options() {
        let err = Runner::new(RunOptions {
            concurrency_multiplier: -1.0,
            ..RunOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOptions(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_result_is_ordered_by_agent_index() {
        let runner = Runner::new(RunOptions::default().with_seed(5)).unwrap();
        let result = runner.execute(&looping(6, 3), Arc::new(())).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.seed, 5);
        let indices: Vec<_> = result.agents.iter().map(|a| a.index).collect();
        assert_eq!(indices, (0..6).collect::<Vec<_>>());
        assert_eq!(result.setup, HookOutcome::Absent);
        assert_eq!(result.teardown, HookOutcome::Absent);
        assert!(!result.graph_digest.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serial_execution_continues_after_failed_workload() {
        let mut failing = Config::<()>::builder("failing");
        failing
            .concurrency(2)
            .iterations(3)
            .state("init", |_, _| Box::pin(async { Err(anyhow::anyhow!("broken")) }))
            .transition("init", "init", 1.0);
        let failing = failing.build().unwrap();

        let runner = Runner::default();
        let results = runner
            .execute_serially(&[failing, looping(2, 2)], Arc::new(()))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].workload, "failing");
        assert!(!results[0].is_success());
        assert_eq!(results[0].failed_count(), 2);
        assert_eq!(results[1].workload, "loop");
        assert!(results[1].is_success());
    }
}
