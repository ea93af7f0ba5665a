use std::sync::Arc;

use fsmstress_cli::workloads::{CounterIncrement, InsertRemove, InsertRemoveLedger};
use fsmstress_cli::{registry, DocumentStore};
use fsmstress_core::{
    compose, ExecutionResult, HookOutcome, RunOptions, Runner, Step, Workload,
};

fn runner(seed: u64) -> Runner {
    Runner::new(RunOptions {
        concurrency: Some(4),
        iterations: Some(60),
        ..RunOptions::default().with_seed(seed)
    })
    .unwrap()
}

fn assert_clean(result: &ExecutionResult) {
    assert!(result.is_success(), "{}", result.failure().unwrap());
    assert_eq!(result.passed_count(), 4);
    assert_eq!(result.setup, HookOutcome::Succeeded);
    assert_eq!(result.teardown, HookOutcome::Succeeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counter_increment_runs_clean() {
    let store = Arc::new(DocumentStore::new());
    let config = CounterIncrement.config().unwrap();
    let result = runner(1).execute(&config, Arc::clone(&store)).await.unwrap();

    assert_clean(&result);
    assert!(store.collection_names().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_insert_remove_runs_clean() {
    let store = Arc::new(DocumentStore::new());
    let config = InsertRemove.config().unwrap();
    let result = runner(2).execute(&config, Arc::clone(&store)).await.unwrap();

    assert_clean(&result);
    for report in &result.agents {
        assert!(report.teardown_error.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ledger_matches_collection_size() {
    let store = Arc::new(DocumentStore::new());
    let config = InsertRemoveLedger.config().unwrap();
    let result = runner(3).execute(&config, Arc::clone(&store)).await.unwrap();

    assert_clean(&result);
    assert!(store.collection_names().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_all_builtins_run_serially_on_one_store() {
    let registry = registry().unwrap();
    let configs: Vec<_> = registry.iter().map(|w| w.config().unwrap()).collect();

    let store = Arc::new(DocumentStore::new());
    let results = runner(4)
        .execute_serially(&configs, Arc::clone(&store))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    for result in &results {
        assert_clean(result);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_occupied_collection_fails_setup() {
    let store = Arc::new(DocumentStore::new());
    store.create_collection("insert_remove").await.unwrap();

    let config = InsertRemove.config().unwrap();
    let result = runner(5).execute(&config, Arc::clone(&store)).await.unwrap();

    assert!(result.agents.is_empty());
    assert_eq!(result.teardown, HookOutcome::NotRun);
    let failure = result.failure().unwrap();
    assert!(failure
        .setup
        .as_deref()
        .unwrap()
        .contains("creating collection insert_remove"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sabotaged_counter_is_detected() {
    let base = CounterIncrement.config().unwrap();
    let sabotaged = compose(&base, |draft, base| {
        let update = base.handler("update")?;
        draft.state("update", move |store, agent| {
            let update = update.clone();
            Box::pin(async move {
                update.call(store, agent).await?;
                if agent.index() == 0
                    && agent.iteration() >= 5
                    && !agent.data().contains_key("sabotaged")
                {
                    agent.data_mut().set("sabotaged", true);
                    // Undo behind the agent's back.
                    store
                        .increment("counter_increment", 0, "t0", -1)
                        .await?;
                }
                Ok(Step::Continue)
            })
        });
        Ok(())
    })
    .unwrap();

    let result = runner(6)
        .execute(&sabotaged, Arc::new(DocumentStore::new()))
        .await
        .unwrap();

    let failure = result.failure().expect("lost increment must be caught");
    assert_eq!(failure.agents.len(), 1);
    assert_eq!(failure.agents[0].agent, 0);
    assert!(failure.agents[0].iteration > 5);
    assert!(failure.agents[0].error.contains("field t0"));
}
