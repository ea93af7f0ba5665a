//! Workload configuration model.
//!
//! A [`Config`] is the resolved, validated description of one workload: how
//! many agents run, how many steps each may take, the state handlers, the
//! weighted transitions between them, the seed data every agent starts from,
//! and the optional lifecycle hooks. Configs are built with a [`ConfigDraft`]
//! (see [`Config::builder`] and [`crate::compose::compose`]) and are read-only
//! afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentContext;
use crate::error::{ConfigError, ConfigResult};
use crate::fixture::SharedFixture;

/// Start state used when a workload does not name one.
pub const DEFAULT_START_STATE: &str = "init";

/// Seed-data key holding the agent index in every agent's local copy.
pub const AGENT_INDEX_KEY: &str = "tid";

/// What a state handler asks the agent to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Pick the next state from the transition table.
    Continue,
    /// Stop this agent now. Counts as a successful completion.
    Halt,
}

/// Return type of every state handler.
pub type HandlerResult = anyhow::Result<Step>;

/// Return type of setup/teardown hooks.
pub type HookResult = anyhow::Result<()>;

type StateFn<T> =
    dyn for<'a> Fn(&'a T, &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> + Send + Sync;

type SetupFn<T> =
    dyn for<'a> Fn(&'a T, &'a mut SharedFixture) -> BoxFuture<'a, HookResult> + Send + Sync;

type TeardownFn<T> =
    dyn for<'a> Fn(&'a T, &'a SharedFixture) -> BoxFuture<'a, HookResult> + Send + Sync;

type AgentHookFn<T> =
    dyn for<'a> Fn(&'a T, &'a mut AgentContext) -> BoxFuture<'a, HookResult> + Send + Sync;

/// Global setup hook: runs once before any agent, populating the fixture.
pub type SetupHook<T> = Arc<SetupFn<T>>;

/// Global teardown hook: runs once after every agent is done.
pub type TeardownHook<T> = Arc<TeardownFn<T>>;

/// Per-agent teardown hook: runs once at the end of each agent's walk.
pub type AgentHook<T> = Arc<AgentHookFn<T>>;

/// A state handler. Cheap to clone; clones share the same closure, which is
/// what lets a derived workload wrap and call through to a base handler.
pub struct Handler<T> {
    inner: Arc<StateFn<T>>,
}

impl<T> Handler<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a T, &'a mut AgentContext) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Invoke the handler against the target on behalf of one agent.
    pub fn call<'a>(&self, target: &'a T, agent: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
        (self.inner)(target, agent)
    }

    /// Whether two handlers share the same underlying closure.
    pub fn same_as(&self, other: &Handler<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

/// Outgoing edges of one state, in insertion order.
///
/// Order is part of the contract: the transition table lays out its
/// cumulative distribution in this order, so the same draws always pick the
/// same successors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Edges(Vec<(String, f64)>);

impl Edges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge, or overwrite the weight of an existing one in place.
    pub fn set(&mut self, to: impl Into<String>, weight: f64) {
        let to = to.into();
        match self.0.iter_mut().find(|(name, _)| *name == to) {
            Some(edge) => edge.1 = weight,
            None => self.0.push((to, weight)),
        }
    }

    pub fn remove(&mut self, to: &str) -> Option<f64> {
        let pos = self.0.iter().position(|(name, _)| name == to)?;
        Some(self.0.remove(pos).1)
    }

    pub fn weight(&self, to: &str) -> Option<f64> {
        self.0
            .iter()
            .find(|(name, _)| name == to)
            .map(|(_, weight)| *weight)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, weight)| (name.as_str(), *weight))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.0.iter().map(|(_, weight)| weight).sum()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Edges {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut edges = Edges::new();
        for (to, weight) in iter {
            edges.set(to, weight);
        }
        edges
    }
}

/// Key/value bag every agent receives a private copy of.
///
/// Workloads keep their bookkeeping here. The only key the engine writes is
/// [`AGENT_INDEX_KEY`], set on each agent's copy to the agent index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedData(BTreeMap<String, Value>);

impl SeedData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    /// Decode the value under `key`. `None` when the key is absent.
    pub fn get_as<D: DeserializeOwned>(&self, key: &str) -> Option<serde_json::Result<D>> {
        self.0.get(key).map(|v| serde_json::from_value(v.clone()))
    }

    /// Read an integer counter, treating a missing key as zero.
    pub fn counter(&self, key: &str) -> i64 {
        self.0.get(key).and_then(Value::as_i64).unwrap_or(0)
    }

    /// Add `by` to an integer counter and return the new value.
    pub fn bump(&mut self, key: &str, by: i64) -> i64 {
        let next = self.counter(key).saturating_add(by);
        self.0.insert(key.to_string(), Value::from(next));
        next
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlay `other` key by key; keys absent from `other` are kept.
    pub fn merge(&mut self, other: &SeedData) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// A fresh copy tagged with the owning agent's index.
    pub fn tagged(&self, index: usize) -> SeedData {
        let mut copy = self.clone();
        copy.set(AGENT_INDEX_KEY, index);
        copy
    }

    /// Agent index this copy was tagged with, if any.
    pub fn agent_index(&self) -> Option<usize> {
        self.0
            .get(AGENT_INDEX_KEY)
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }
}

/// A resolved workload definition. Immutable once built.
pub struct Config<T> {
    pub(crate) name: String,
    pub(crate) concurrency: usize,
    pub(crate) iterations: u64,
    pub(crate) start_state: String,
    pub(crate) states: BTreeMap<String, Handler<T>>,
    pub(crate) transitions: BTreeMap<String, Edges>,
    pub(crate) data: SeedData,
    pub(crate) setup: Option<SetupHook<T>>,
    pub(crate) teardown: Option<TeardownHook<T>>,
    pub(crate) agent_teardown: Option<AgentHook<T>>,
}

impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            concurrency: self.concurrency,
            iterations: self.iterations,
            start_state: self.start_state.clone(),
            states: self.states.clone(),
            transitions: self.transitions.clone(),
            data: self.data.clone(),
            setup: self.setup.clone(),
            teardown: self.teardown.clone(),
            agent_teardown: self.agent_teardown.clone(),
        }
    }
}

impl<T> fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.name)
            .field("concurrency", &self.concurrency)
            .field("iterations", &self.iterations)
            .field("start_state", &self.start_state)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions)
            .field("data", &self.data)
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .field("agent_teardown", &self.agent_teardown.is_some())
            .finish()
    }
}

impl<T> Config<T> {
    /// Start an empty draft for a new workload.
    pub fn builder(name: impl Into<String>) -> ConfigDraft<T> {
        ConfigDraft::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn start_state(&self) -> &str {
        &self.start_state
    }

    pub fn data(&self) -> &SeedData {
        &self.data
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    /// Handler registered for `name`, for wrapping in a derived workload.
    pub fn handler(&self, name: &str) -> ConfigResult<Handler<T>> {
        self.states
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownState {
                state: name.to_string(),
            })
    }

    pub fn transitions(&self) -> &BTreeMap<String, Edges> {
        &self.transitions
    }

    pub fn transitions_from(&self, state: &str) -> Option<&Edges> {
        self.transitions.get(state)
    }

    /// A state with no positive-weight outgoing transition ends the walk.
    pub fn is_terminal(&self, state: &str) -> bool {
        self.transitions
            .get(state)
            .map_or(true, |edges| edges.iter().all(|(_, weight)| weight <= 0.0))
    }

    pub fn setup(&self) -> Option<&SetupHook<T>> {
        self.setup.as_ref()
    }

    pub fn teardown(&self) -> Option<&TeardownHook<T>> {
        self.teardown.as_ref()
    }

    pub fn agent_teardown(&self) -> Option<&AgentHook<T>> {
        self.agent_teardown.as_ref()
    }

    /// Check every structural invariant, reporting the first violation.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.concurrency == 0 {
            return Err(ConfigError::NonPositiveConcurrency);
        }
        if self.states.is_empty() {
            return Err(ConfigError::MissingStates {
                workload: self.name.clone(),
            });
        }
        if self.transitions.is_empty() {
            return Err(ConfigError::MissingTransitions {
                workload: self.name.clone(),
            });
        }
        if !self.states.contains_key(&self.start_state) {
            return Err(ConfigError::UnknownStartState {
                state: self.start_state.clone(),
            });
        }
        for (from, edges) in &self.transitions {
            if !self.states.contains_key(from) {
                return Err(ConfigError::UnknownTransitionSource {
                    state: from.clone(),
                });
            }
            for (to, weight) in edges.iter() {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(ConfigError::InvalidWeight {
                        from: from.clone(),
                        to: to.to_string(),
                        weight,
                    });
                }
                if !self.states.contains_key(to) {
                    return Err(ConfigError::DanglingTransition {
                        from: from.clone(),
                        to: to.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Copy with different agent/iteration counts. Used by run options.
    pub(crate) fn with_counts(&self, concurrency: usize, iterations: u64) -> Config<T> {
        let mut resized = self.clone();
        resized.concurrency = concurrency;
        resized.iterations = iterations;
        resized
    }
}

/// Mutable workload definition, either fresh or seeded from a base config.
///
/// Map-valued fields are edited entry by entry: adding a state, an edge or a
/// seed key never drops the other entries inherited from the base.
pub struct ConfigDraft<T> {
    name: String,
    concurrency: usize,
    iterations: u64,
    start_state: String,
    states: BTreeMap<String, Handler<T>>,
    transitions: BTreeMap<String, Edges>,
    data: SeedData,
    setup: Option<SetupHook<T>>,
    teardown: Option<TeardownHook<T>>,
    agent_teardown: Option<AgentHook<T>>,
}

impl<T> ConfigDraft<T> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: 1,
            iterations: 0,
            start_state: DEFAULT_START_STATE.to_string(),
            states: BTreeMap::new(),
            transitions: BTreeMap::new(),
            data: SeedData::new(),
            setup: None,
            teardown: None,
            agent_teardown: None,
        }
    }

    pub(crate) fn from_config(base: &Config<T>) -> Self {
        let base = base.clone();
        Self {
            name: base.name,
            concurrency: base.concurrency,
            iterations: base.iterations,
            start_state: base.start_state,
            states: base.states,
            transitions: base.transitions,
            data: base.data,
            setup: base.setup,
            teardown: base.teardown,
            agent_teardown: base.agent_teardown,
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn concurrency(&mut self, concurrency: usize) -> &mut Self {
        self.concurrency = concurrency;
        self
    }

    pub fn iterations(&mut self, iterations: u64) -> &mut Self {
        self.iterations = iterations;
        self
    }

    pub fn start_state(&mut self, state: impl Into<String>) -> &mut Self {
        self.start_state = state.into();
        self
    }

    /// Add or replace the handler for `name`.
    pub fn state<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a T, &'a mut AgentContext) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.states.insert(name.into(), Handler::new(f));
        self
    }

    /// Add or replace the handler for `name` with an existing [`Handler`].
    pub fn state_handler(&mut self, name: impl Into<String>, handler: Handler<T>) -> &mut Self {
        self.states.insert(name.into(), handler);
        self
    }

    /// Drop a state together with its outgoing transitions.
    pub fn remove_state(&mut self, name: &str) -> &mut Self {
        self.states.remove(name);
        self.transitions.remove(name);
        self
    }

    /// Current handler for `name` in this draft.
    pub fn handler(&self, name: &str) -> Option<Handler<T>> {
        self.states.get(name).cloned()
    }

    /// Add one edge, or reweight it if it already exists.
    pub fn transition(&mut self, from: impl Into<String>, to: impl Into<String>, weight: f64) -> &mut Self {
        self.transitions
            .entry(from.into())
            .or_default()
            .set(to, weight);
        self
    }

    /// Merge edges into `from`'s outgoing set, key by key.
    pub fn transitions<S, I>(&mut self, from: impl Into<String>, edges: I) -> &mut Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, f64)>,
    {
        let entry = self.transitions.entry(from.into()).or_default();
        for (to, weight) in edges {
            entry.set(to, weight);
        }
        self
    }

    /// Replace `from`'s outgoing set wholesale.
    pub fn replace_transitions<S, I>(&mut self, from: impl Into<String>, edges: I) -> &mut Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, f64)>,
    {
        self.transitions
            .insert(from.into(), edges.into_iter().collect());
        self
    }

    /// Declare `state` terminal by giving it an empty outgoing set.
    pub fn terminal(&mut self, state: impl Into<String>) -> &mut Self {
        self.transitions.insert(state.into(), Edges::new());
        self
    }

    pub fn remove_transition(&mut self, from: &str, to: &str) -> &mut Self {
        if let Some(edges) = self.transitions.get_mut(from) {
            edges.remove(to);
        }
        self
    }

    /// Set one seed-data key.
    pub fn data(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.data.set(key, value);
        self
    }

    pub fn data_mut(&mut self) -> &mut SeedData {
        &mut self.data
    }

    pub fn setup<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a T, &'a mut SharedFixture) -> BoxFuture<'a, HookResult>
            + Send
            + Sync
            + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    pub fn teardown<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a T, &'a SharedFixture) -> BoxFuture<'a, HookResult>
            + Send
            + Sync
            + 'static,
    {
        self.teardown = Some(Arc::new(f));
        self
    }

    pub fn agent_teardown<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a T, &'a mut AgentContext) -> BoxFuture<'a, HookResult>
            + Send
            + Sync
            + 'static,
    {
        self.agent_teardown = Some(Arc::new(f));
        self
    }

    /// Current setup hook, for wrapping.
    pub fn current_setup(&self) -> Option<SetupHook<T>> {
        self.setup.clone()
    }

    /// Current teardown hook, for wrapping.
    pub fn current_teardown(&self) -> Option<TeardownHook<T>> {
        self.teardown.clone()
    }

    /// Freeze the draft. Fails with the first violated invariant.
    pub fn build(self) -> ConfigResult<Config<T>> {
        let config = Config {
            name: self.name,
            concurrency: self.concurrency,
            iterations: self.iterations,
            start_state: self.start_state,
            states: self.states,
            transitions: self.transitions,
            data: self.data,
            setup: self.setup,
            teardown: self.teardown,
            agent_teardown: self.agent_teardown,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop<'a>(_: &'a (), _: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async { Ok(Step::Continue) })
    }

    fn two_state() -> ConfigDraft<()> {
        let mut draft = Config::<()>::builder("two-state");
        draft
            .concurrency(2)
            .iterations(5)
            .state("init", noop)
            .state("done", noop)
            .transition("init", "done", 1.0)
            .terminal("done");
        draft
    }

    #[test]
    fn test_builder_defaults_start_state_to_init() {
        let config = two_state().build().unwrap();
        assert_eq!(config.start_state(), DEFAULT_START_STATE);
        assert_eq!(config.concurrency(), 2);
        assert_eq!(config.iterations(), 5);
        assert!(config.is_terminal("done"));
        assert!(!config.is_terminal("init"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut draft = two_state();
        draft.concurrency(0);
        assert!(matches!(
            draft.build(),
            Err(ConfigError::NonPositiveConcurrency)
        ));
    }

    #[test]
    fn test_dangling_target_rejected() {
        let mut draft = two_state();
        draft.transition("init", "nowhere", 0.5);
        match draft.build() {
            Err(ConfigError::DanglingTransition { from, to }) => {
                assert_eq!(from, "init");
                assert_eq!(to, "nowhere");
            }
            other => panic!("expected dangling transition, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_start_state_rejected() {
        let mut draft = two_state();
        draft.start_state("warmup");
        assert!(matches!(
            draft.build(),
            Err(ConfigError::UnknownStartState { .. })
        ));
    }

    #[test]
    fn test_negative_and_nan_weights_rejected() {
        let mut draft = two_state();
        draft.transition("init", "done", -1.0);
        assert!(matches!(
            draft.build(),
            Err(ConfigError::InvalidWeight { .. })
        ));

        let mut draft = two_state();
        draft.transition("init", "done", f64::NAN);
        assert!(matches!(
            draft.build(),
            Err(ConfigError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_zero_weight_edge_is_valid() {
        let mut draft = two_state();
        draft.state("never", noop).transition("init", "never", 0.0);
        assert!(draft.build().is_ok());
    }

    #[test]
    fn test_zero_weight_only_row_is_terminal() {
        let mut draft = two_state();
        draft
            .state("stuck", noop)
            .transition("init", "stuck", 0.5)
            .transition("stuck", "init", 0.0);
        let config = draft.build().unwrap();
        assert!(config.is_terminal("stuck"));
        assert!(!config.is_terminal("init"));
    }

    #[test]
    fn test_missing_states_and_transitions_rejected() {
        let draft = Config::<()>::builder("empty");
        assert!(matches!(
            draft.build(),
            Err(ConfigError::MissingStates { .. })
        ));

        let mut draft = Config::<()>::builder("no-edges");
        draft.state("init", noop);
        assert!(matches!(
            draft.build(),
            Err(ConfigError::MissingTransitions { .. })
        ));
    }

    #[test]
    fn test_transition_source_must_be_a_state() {
        let mut draft = two_state();
        draft.transition("ghost", "done", 1.0);
        assert!(matches!(
            draft.build(),
            Err(ConfigError::UnknownTransitionSource { .. })
        ));
    }

    #[test]
    fn test_edges_keep_insertion_order_and_reweight_in_place() {
        let mut edges = Edges::new();
        edges.set("b", 0.5);
        edges.set("a", 0.25);
        edges.set("b", 0.75);
        let order: Vec<_> = edges.iter().collect();
        assert_eq!(order, vec![("b", 0.75), ("a", 0.25)]);
        assert_eq!(edges.total_weight(), 1.0);
        assert_eq!(edges.remove("b"), Some(0.75));
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_seed_data_tagging_does_not_touch_original() {
        let mut data = SeedData::new();
        data.set("collection", "fsm");
        let tagged = data.tagged(3);
        assert_eq!(tagged.agent_index(), Some(3));
        assert!(data.agent_index().is_none());
        assert_eq!(tagged.get("collection"), data.get("collection"));
    }

    #[test]
    fn test_seed_data_counters() {
        let mut data = SeedData::new();
        assert_eq!(data.counter("hits"), 0);
        assert_eq!(data.bump("hits", 2), 2);
        assert_eq!(data.bump("hits", 3), 5);
        let hits: i64 = data.get_as("hits").unwrap().unwrap();
        assert_eq!(hits, 5);
    }

    #[test]
    fn test_seed_data_counter_saturates() {
        let mut data = SeedData::new();
        data.set("hits", i64::MAX - 1);
        assert_eq!(data.bump("hits", 5), i64::MAX);
        assert_eq!(data.bump("hits", 1), i64::MAX);
        data.set("misses", i64::MIN);
        assert_eq!(data.bump("misses", -1), i64::MIN);
    }

    #[test]
    fn test_handler_lookup_reports_unknown_state() {
        let config = two_state().build().unwrap();
        assert!(config.handler("init").is_ok());
        assert!(matches!(
            config.handler("missing"),
            Err(ConfigError::UnknownState { .. })
        ));
    }
}
