//! Built-in workloads against [`DocumentStore`].
//!
//! Each workload checks its own invariants as it goes: a handler that sees
//! the store disagree with the agent's private bookkeeping fails with an
//! error naming both values.

use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{anyhow, ensure, Context};
use fsmstress_core::{
    compose, AgentContext, BoxFuture, Config, ConfigResult, HandlerResult, HookResult,
    SharedFixture, Step, Workload, WorkloadRegistry,
};
use serde_json::{json, Value};

use crate::store::DocumentStore;

/// Fixture key holding the collection created by setup.
pub const COLLECTION_KEY: &str = "collection";

/// Id of the single shared document in `counter_increment`.
const COUNTER_DOC: i64 = 0;

/// Ids owned by agent `i` start at `i * ID_SPACE`.
const ID_SPACE: i64 = 1_000_000;

/// Every built-in workload, by name.
pub fn registry() -> ConfigResult<WorkloadRegistry<DocumentStore>> {
    let mut registry = WorkloadRegistry::new();
    registry.register(CounterIncrement)?;
    registry.register(InsertRemove)?;
    registry.register(InsertRemoveLedger)?;
    Ok(registry)
}

fn collection(fixture: &SharedFixture) -> anyhow::Result<String> {
    fixture
        .get(COLLECTION_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("fixture has no '{COLLECTION_KEY}'"))
}

/// Setup shared by the built-ins: a fresh collection, optionally seeded.
fn create_collection<'a>(
    store: &'a DocumentStore,
    fixture: &'a mut SharedFixture,
    name: &'static str,
    seed_docs: Vec<(i64, Value)>,
) -> BoxFuture<'a, HookResult> {
    Box::pin(async move {
        store
            .create_collection(name)
            .await
            .with_context(|| format!("creating collection {name}"))?;
        for (id, doc) in seed_docs {
            store.insert(name, id, doc).await?;
        }
        fixture.set(COLLECTION_KEY, name);
        Ok(())
    })
}

fn drop_collection<'a>(store: &'a DocumentStore, fixture: &'a SharedFixture) -> BoxFuture<'a, HookResult> {
    Box::pin(async move {
        let name = collection(fixture)?;
        ensure!(store.drop_collection(&name).await, "collection {name} vanished during run");
        Ok(())
    })
}

fn noop<'a>(_: &'a DocumentStore, _: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async { Ok(Step::Continue) })
}

// ---------------------------------------------------------------------------
// counter_increment
// ---------------------------------------------------------------------------

/// Every agent increments its own field on one shared document and checks
/// the stored value always equals the number of increments it made.
pub struct CounterIncrement;

fn counter_field(agent: &AgentContext) -> String {
    format!("t{}", agent.index())
}

fn counter_update<'a>(store: &'a DocumentStore, agent: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let name = collection(agent.fixture())?;
        let field = counter_field(agent);
        let stored = store
            .increment(&name, COUNTER_DOC, &field, 1)
            .await?
            .ok_or_else(|| anyhow!("counter document missing"))?;
        let expected = agent.data_mut().bump("expected", 1);
        ensure!(
            stored == expected,
            "field {field} is {stored} after increment, expected {expected}"
        );
        Ok(Step::Continue)
    })
}

fn counter_find<'a>(store: &'a DocumentStore, agent: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let name = collection(agent.fixture())?;
        let field = counter_field(agent);
        let doc = store
            .find(&name, COUNTER_DOC)
            .await?
            .ok_or_else(|| anyhow!("counter document missing"))?;
        let stored = doc.get(&field).and_then(Value::as_i64).unwrap_or(0);
        let expected = agent.data().counter("expected");
        ensure!(stored == expected, "field {field} reads {stored}, expected {expected}");
        Ok(Step::Continue)
    })
}

impl Workload<DocumentStore> for CounterIncrement {
    fn name(&self) -> &str {
        "counter_increment"
    }

    fn description(&self) -> &str {
        "agents increment private fields of one shared document and read them back"
    }

    fn config(&self) -> ConfigResult<Config<DocumentStore>> {
        let mut draft = Config::<DocumentStore>::builder(self.name());
        draft
            .concurrency(8)
            .iterations(200)
            .state("init", noop)
            .state("update", counter_update)
            .state("find", counter_find)
            .transition("init", "update", 1.0)
            .transitions("update", [("update", 0.5), ("find", 0.5)])
            .transition("find", "update", 1.0)
            .data("expected", 0)
            .setup(|store, fixture| {
                create_collection(
                    store,
                    fixture,
                    "counter_increment",
                    vec![(COUNTER_DOC, json!({}))],
                )
            })
            .teardown(drop_collection);
        draft.build()
    }
}

// ---------------------------------------------------------------------------
// insert_remove
// ---------------------------------------------------------------------------

/// Agents insert documents into their own id range and remove the most
/// recent one; each agent's surviving documents must still be there at the end.
pub struct InsertRemove;

const LIVE_KEY: &str = "live";

fn live_ids(agent: &AgentContext) -> Vec<i64> {
    agent
        .data()
        .get(LIVE_KEY)
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

fn store_live_ids(agent: &mut AgentContext, ids: Vec<i64>) {
    agent.data_mut().set(LIVE_KEY, ids);
}

fn insert_doc<'a>(store: &'a DocumentStore, agent: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let name = collection(agent.fixture())?;
        let sequence = agent.data_mut().bump("next", 1);
        let id = agent.index() as i64 * ID_SPACE + sequence;
        store
            .insert(&name, id, json!({ "owner": agent.index(), "seq": sequence }))
            .await?;
        let mut live = live_ids(agent);
        live.push(id);
        store_live_ids(agent, live);
        Ok(Step::Continue)
    })
}

fn remove_doc<'a>(store: &'a DocumentStore, agent: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let name = collection(agent.fixture())?;
        let mut live = live_ids(agent);
        let Some(id) = live.pop() else {
            return Ok(Step::Continue);
        };
        ensure!(store.remove(&name, id).await?, "document {id} vanished before removal");
        store_live_ids(agent, live);
        Ok(Step::Continue)
    })
}

fn count_docs<'a>(store: &'a DocumentStore, agent: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let name = collection(agent.fixture())?;
        let count = store.count(&name).await?;
        let own = live_ids(agent).len();
        ensure!(count >= own, "collection holds {count} documents, agent alone owns {own}");
        Ok(Step::Continue)
    })
}

fn verify_own_docs<'a>(store: &'a DocumentStore, agent: &'a mut AgentContext) -> BoxFuture<'a, HookResult> {
    Box::pin(async move {
        let name = collection(agent.fixture())?;
        for id in live_ids(agent) {
            ensure!(
                store.find(&name, id).await?.is_some(),
                "document {id} lost"
            );
        }
        Ok(())
    })
}

impl Workload<DocumentStore> for InsertRemove {
    fn name(&self) -> &str {
        "insert_remove"
    }

    fn description(&self) -> &str {
        "agents insert and remove documents in private id ranges of one collection"
    }

    fn config(&self) -> ConfigResult<Config<DocumentStore>> {
        let mut draft = Config::<DocumentStore>::builder(self.name());
        draft
            .concurrency(10)
            .iterations(150)
            .state("init", noop)
            .state("insert", insert_doc)
            .state("remove", remove_doc)
            .state("count", count_docs)
            .transition("init", "insert", 1.0)
            .transitions("insert", [("insert", 0.4), ("remove", 0.4), ("count", 0.2)])
            .transitions("remove", [("insert", 0.7), ("count", 0.3)])
            .transition("count", "insert", 1.0)
            .data("next", 0)
            .data(LIVE_KEY, Value::Array(Vec::new()))
            .setup(|store, fixture| create_collection(store, fixture, "insert_remove", Vec::new()))
            .agent_teardown(verify_own_docs)
            .teardown(drop_collection);
        draft.build()
    }
}

// ---------------------------------------------------------------------------
// insert_remove_ledger
// ---------------------------------------------------------------------------

/// `insert_remove` plus a run-wide ledger of net inserts kept in the shared
/// fixture; teardown checks the collection size against it.
pub struct InsertRemoveLedger;

/// Net documents inserted by all agents.
#[derive(Debug, Default)]
pub struct Ledger(AtomicI64);

fn ledger(fixture: &SharedFixture) -> anyhow::Result<&Ledger> {
    fixture
        .capability::<Ledger>()
        .ok_or_else(|| anyhow!("fixture has no ledger"))
}

impl Workload<DocumentStore> for InsertRemoveLedger {
    fn name(&self) -> &str {
        "insert_remove_ledger"
    }

    fn description(&self) -> &str {
        "insert_remove with a shared net-insert ledger checked at teardown"
    }

    fn config(&self) -> ConfigResult<Config<DocumentStore>> {
        let base = InsertRemove.config()?;
        compose(&base, |draft, base| {
            let insert = base.handler("insert")?;
            let remove = base.handler("remove")?;

            draft.name(self.name());
            draft.state("insert", move |store, agent| {
                let insert = insert.clone();
                Box::pin(async move {
                    let step = insert.call(store, agent).await?;
                    ledger(agent.fixture())?.0.fetch_add(1, Ordering::SeqCst);
                    Ok(step)
                })
            });
            draft.state("remove", move |store, agent| {
                let remove = remove.clone();
                Box::pin(async move {
                    let before = live_ids(agent).len();
                    let step = remove.call(store, agent).await?;
                    let removed = before - live_ids(agent).len();
                    ledger(agent.fixture())?
                        .0
                        .fetch_sub(removed as i64, Ordering::SeqCst);
                    Ok(step)
                })
            });

            let setup = draft.current_setup();
            draft.setup(move |store, fixture| {
                let setup = setup.clone();
                Box::pin(async move {
                    if let Some(setup) = setup {
                        setup(store, &mut *fixture).await?;
                    }
                    fixture.insert(Ledger::default());
                    Ok(())
                })
            });

            let teardown = draft.current_teardown();
            draft.teardown(move |store, fixture| {
                let teardown = teardown.clone();
                Box::pin(async move {
                    let name = collection(fixture)?;
                    let count = store.count(&name).await? as i64;
                    let net = ledger(fixture)?.0.load(Ordering::SeqCst);
                    ensure!(count == net, "collection holds {count} documents, ledger says {net}");
                    if let Some(teardown) = teardown {
                        teardown(store, fixture).await?;
                    }
                    Ok(())
                })
            });
            Ok(())
        })
    }
}
