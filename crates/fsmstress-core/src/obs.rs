//! Structured observability hooks for workload run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`], attached with `Instrument`
//!   so agent tasks spawned inside the run inherit `run_id` and `workload`
//! - Emission functions for key lifecycle events: run start, setup/teardown
//!   failure, agent completion, run finish
//!
//! Events are emitted at `info!` level (agent-level detail at `debug!`).
//! Configure with `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{debug, info, warn, Span};

use crate::agent::{AgentFailure, AgentOutcome, AgentReport};

/// Span tagging every event of one run with its run_id and workload name.
///
/// # Example
///
/// ```ignore
/// runner_future.instrument(run_span("run-12345", "counter_increment")).await;
/// ```
pub fn run_span(run_id: &str, workload: &str) -> Span {
    tracing::info_span!("fsmstress.run", run_id = %run_id, workload = %workload)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, workload: &str, concurrency: usize, iterations: u64, seed: u64) {
    info!(
        event = "run.started",
        run_id = %run_id,
        workload = %workload,
        concurrency = concurrency,
        iterations = iterations,
        seed = seed,
    );
}

/// Emit event: global setup failed; no agent will be spawned.
pub fn emit_setup_failed(run_id: &str, error: &str) {
    warn!(event = "setup.failed", run_id = %run_id, error = %error);
}

/// Emit event: a handler failed inside an agent.
pub fn emit_agent_failed(failure: &AgentFailure) {
    warn!(
        event = "agent.failed",
        agent = failure.agent,
        state = %failure.state,
        iteration = failure.iteration,
        error = %failure.error,
    );
}

/// Emit event: the per-agent teardown hook failed.
pub fn emit_agent_teardown_failed(agent: usize, error: &str) {
    warn!(event = "agent.teardown_failed", agent = agent, error = %error);
}

/// Emit event: one agent reached its terminal outcome.
pub fn emit_agent_finished(report: &AgentReport) {
    let status = match &report.outcome {
        AgentOutcome::Success { .. } => "success",
        AgentOutcome::Failure(_) => "failure",
        AgentOutcome::Stopped { .. } => "stopped",
    };
    debug!(
        event = "agent.finished",
        agent = report.index,
        status = status,
        iterations = report.iterations_completed,
        final_state = %report.final_state,
        duration_ms = report.duration_ms,
    );
}

/// Emit event: global teardown failed.
pub fn emit_teardown_failed(run_id: &str, error: &str) {
    warn!(event = "teardown.failed", run_id = %run_id, error = %error);
}

/// Emit event: run finished with duration, agent tallies, and verdict.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, passed: usize, failed: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        passed = passed,
        failed = failed,
        success = success,
    );
}
