//! fsmstress Core Library
//!
//! Concurrent probabilistic state-machine workloads for stress-testing a
//! stateful service. A workload is a set of named async state handlers plus a
//! weighted transition table; the [`Runner`] spawns a pool of agents that each
//! walk the graph independently against a shared target, then folds every
//! agent's outcome into one [`ExecutionResult`].
//!
//! ```ignore
//! let mut draft = Config::<Store>::builder("counter");
//! draft
//!     .concurrency(8)
//!     .iterations(100)
//!     .state("init", |store, agent| Box::pin(async move { ... }))
//!     .transition("init", "init", 1.0);
//! let config = draft.build()?;
//! let result = Runner::default().run(&config, Arc::new(store)).await?;
//! ```

pub mod agent;
pub mod aggregate;
pub mod compose;
pub mod config;
pub mod error;
pub mod fixture;
pub mod manifest;
pub mod obs;
pub mod options;
pub mod runner;
pub mod telemetry;
pub mod transition;
pub mod workload;

pub use agent::{AgentContext, AgentFailure, AgentOutcome, AgentReport, Completion};
pub use aggregate::{
    aggregate_outcomes, Aggregate, AgentTeardownFailure, ExecutionResult, HookOutcome, RunFailure,
};
pub use compose::{compose, identity};
pub use config::{
    AgentHook, Config, ConfigDraft, Edges, Handler, HandlerResult, HookResult, SeedData,
    SetupHook, Step, TeardownHook, AGENT_INDEX_KEY, DEFAULT_START_STATE,
};
pub use error::{ConfigError, ConfigResult, RunError, RunResult};
pub use fixture::SharedFixture;
pub use manifest::WorkloadManifest;
pub use options::RunOptions;
pub use runner::Runner;
pub use telemetry::init_tracing;
pub use transition::TransitionTable;
pub use workload::{Workload, WorkloadRegistry};

/// Boxed handler future, re-exported so workloads need not depend on `futures`.
pub use futures::future::BoxFuture;

/// fsmstress version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
