//! Worker agents: one independent random walk over the state graph.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Barrier};
use tracing::trace;

use crate::config::{Config, SeedData, Step};
use crate::fixture::SharedFixture;
use crate::obs;
use crate::transition::TransitionTable;

/// Identity and private state of one agent, handed to every handler call.
///
/// Owned exclusively by its agent. The fixture is the only thing shared, and
/// only by reference.
#[derive(Debug)]
pub struct AgentContext {
    index: usize,
    concurrency: usize,
    iteration: u64,
    state: String,
    data: SeedData,
    fixture: Arc<SharedFixture>,
}

impl AgentContext {
    pub fn new(
        index: usize,
        concurrency: usize,
        seed: &SeedData,
        fixture: Arc<SharedFixture>,
    ) -> Self {
        Self {
            index,
            concurrency,
            iteration: 0,
            state: String::new(),
            data: seed.tagged(index),
            fixture,
        }
    }

    /// Agent index in `[0, concurrency)`.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of agents in this run.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Zero-based index of the handler call in progress.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// State whose handler is running.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn data(&self) -> &SeedData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SeedData {
        &mut self.data
    }

    pub fn fixture(&self) -> &SharedFixture {
        &self.fixture
    }
}

/// Why a successful agent stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Completion {
    /// Ran every iteration it was given.
    BudgetExhausted,
    /// Advanced into a state with no positive-weight outgoing transitions.
    /// That state's handler is never called.
    TerminalState { state: String },
    /// A handler returned [`Step::Halt`].
    Halted { state: String },
}

/// A handler failure, pinned to where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent: usize,
    pub state: String,
    pub iteration: u64,
    /// Full error chain, outermost context first.
    pub error: String,
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "agent {} failed in state '{}' at iteration {}: {}",
            self.agent, self.state, self.iteration, self.error
        )
    }
}

/// Terminal outcome of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success { completion: Completion },
    Failure(AgentFailure),
    /// Stopped between iterations because a sibling failed and the run
    /// asked to stop on first failure.
    Stopped { iteration: u64 },
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AgentOutcome::Success { .. })
    }
}

/// Everything the runner learns about one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    pub index: usize,
    pub outcome: AgentOutcome,
    /// Handler calls that returned successfully.
    pub iterations_completed: u64,
    pub final_state: String,
    /// Failure of the per-agent teardown hook. Never replaces `outcome`.
    pub teardown_error: Option<String>,
    pub duration_ms: u64,
    /// Visited states in order, when state tracing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
}

impl AgentReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn failure(&self) -> Option<&AgentFailure> {
        match &self.outcome {
            AgentOutcome::Failure(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Cooperative stop flag for the stop-on-first-failure policy.
///
/// Only checked between iterations; a handler in flight always finishes.
#[derive(Debug, Clone)]
pub(crate) struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Inputs for one spawned agent.
pub(crate) struct AgentTask<T> {
    pub index: usize,
    pub config: Arc<Config<T>>,
    pub table: Arc<TransitionTable>,
    pub target: Arc<T>,
    pub fixture: Arc<SharedFixture>,
    pub seed: u64,
    pub start: Arc<Barrier>,
    pub stop: Option<StopSignal>,
    pub trace_states: bool,
}

/// Per-agent RNG: one ChaCha stream per agent index under the run seed.
pub(crate) fn agent_rng(seed: u64, index: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(index as u64);
    rng
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Walk the graph until the budget runs out, a terminal state or halt is
/// reached, a handler fails, or the stop signal is raised. Then run the
/// per-agent teardown hook. Always yields exactly one report.
pub(crate) async fn run_agent<T>(task: AgentTask<T>) -> AgentReport
where
    T: Send + Sync + 'static,
{
    let AgentTask {
        index,
        config,
        table,
        target,
        fixture,
        seed,
        start,
        stop,
        trace_states,
    } = task;

    let mut ctx = AgentContext::new(index, config.concurrency(), config.data(), fixture);
    let mut rng = agent_rng(seed, index);
    let mut path = trace_states.then(Vec::new);
    let mut state = config.start_state().to_string();
    let mut completed = 0u64;

    start.wait().await;
    let started = Instant::now();

    let outcome = loop {
        if completed >= config.iterations() {
            break AgentOutcome::Success {
                completion: Completion::BudgetExhausted,
            };
        }
        if stop.as_ref().is_some_and(StopSignal::is_raised) {
            break AgentOutcome::Stopped {
                iteration: completed,
            };
        }

        let handler = match config.states.get(&state) {
            Some(handler) => handler.clone(),
            None => {
                break AgentOutcome::Failure(AgentFailure {
                    agent: index,
                    state: state.clone(),
                    iteration: completed,
                    error: "no handler registered for state".to_string(),
                })
            }
        };

        ctx.iteration = completed;
        ctx.state.clone_from(&state);
        if let Some(path) = path.as_mut() {
            path.push(state.clone());
        }
        trace!(agent = index, state = %state, iteration = completed, "invoking state handler");

        let result = AssertUnwindSafe(handler.call(target.as_ref(), &mut ctx))
            .catch_unwind()
            .await;
        let step = match result {
            Ok(Ok(step)) => step,
            Ok(Err(err)) => {
                break AgentOutcome::Failure(AgentFailure {
                    agent: index,
                    state: state.clone(),
                    iteration: completed,
                    error: format!("{err:#}"),
                })
            }
            Err(panic) => {
                break AgentOutcome::Failure(AgentFailure {
                    agent: index,
                    state: state.clone(),
                    iteration: completed,
                    error: format!("handler panicked: {}", panic_message(&*panic)),
                })
            }
        };
        completed += 1;

        if step == Step::Halt {
            break AgentOutcome::Success {
                completion: Completion::Halted {
                    state: state.clone(),
                },
            };
        }

        let draw: f64 = rng.gen();
        match table.select(&state, draw) {
            Some(next) if table.is_terminal(next) => {
                state = next.to_string();
                break AgentOutcome::Success {
                    completion: Completion::TerminalState {
                        state: state.clone(),
                    },
                };
            }
            Some(next) => state = next.to_string(),
            // Only reachable when the start state itself is terminal.
            None => {
                break AgentOutcome::Success {
                    completion: Completion::TerminalState {
                        state: state.clone(),
                    },
                }
            }
        }
    };

    if let AgentOutcome::Failure(failure) = &outcome {
        obs::emit_agent_failed(failure);
        if let Some(stop) = &stop {
            stop.raise();
        }
    }

    let teardown_error = match config.agent_teardown() {
        Some(hook) => {
            match AssertUnwindSafe(hook(target.as_ref(), &mut ctx))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(panic) => Some(format!(
                    "agent teardown panicked: {}",
                    panic_message(&*panic)
                )),
            }
        }
        None => None,
    };
    if let Some(err) = &teardown_error {
        obs::emit_agent_teardown_failed(index, err);
    }

    let report = AgentReport {
        index,
        outcome,
        iterations_completed: completed,
        final_state: state,
        teardown_error,
        duration_ms: started.elapsed().as_millis() as u64,
        path,
    };
    obs::emit_agent_finished(&report);
    report
}
