use std::sync::Arc;

use nl_ledger::agent::{CommandPipeline, PipelineStatus, SubmitOutcome};
use nl_ledger::core::config::{AppConfig, EngineKind};
use nl_ledger::core::ledger::{EntryFilter, LedgerStore};
use nl_ledger::engine::create_engine;
use nl_ledger::storage::{Database, SettingsStore};

async fn setup(replies: &[&str]) -> (tempfile::TempDir, CommandPipeline, Arc<dyn LedgerStore>) {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = AppConfig {
        working_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    config.engine.kind = EngineKind::Scripted;
    config.engine.scripted_replies = replies.iter().map(|r| r.to_string()).collect();

    let db = Database::open(&config).await.unwrap();
    db.run_migrations().await.unwrap();
    let store: Arc<dyn LedgerStore> = Arc::new(db.entries());

    let engine = create_engine(&config).unwrap();
    let pipeline = CommandPipeline::new(config.clone(), engine, Arc::clone(&store))
        .with_settings(SettingsStore::new(&config.data_path()));
    (tmp, pipeline, store)
}

#[tokio::test]
async fn natural_language_insert_lands_in_sqlite() {
    let (tmp, pipeline, store) = setup(&[
        r#"{"action": "insert_expense", "data": {"itemName": "mango", "quantity": 4, "pricePerUnit": 20}}"#,
    ])
    .await;
    let revision = store.subscribe();

    let model = tmp.path().join("model.gguf");
    pipeline.load_model(&model).await.unwrap();
    let outcome = pipeline.submit("add 4kg mango of 20").await;
    assert!(matches!(outcome, SubmitOutcome::Executed { .. }));

    assert!(revision.has_changed().unwrap());

    let entries = store.list(&EntryFilter::All).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].item_name, "mango");
    assert_eq!(entries[0].category, "General");
    assert_eq!(entries[0].quantity, 4);
    assert_eq!(entries[0].price_per_unit, 20.0);
    assert_eq!(entries[0].total_price, 80.0);

    let settings = SettingsStore::new(&tmp.path().join(".nl-ledger")).load().unwrap();
    assert_eq!(settings.last_model_path, Some(model));
}

#[tokio::test]
async fn read_intents_do_not_filter_or_mutate() {
    let (tmp, pipeline, store) = setup(&[
        r#"{"action":"insert_multiple_expenses","data":{"items":[{"itemName":"tea","pricePerUnit":5,"category":"Beverages"},{"itemName":"rice","quantity":2,"pricePerUnit":60}]}}"#,
        r#"{"action":"get_expenses_by_category","data":{"category":"Beverages"}}"#,
    ])
    .await;
    pipeline.load_model(&tmp.path().join("m.gguf")).await.unwrap();

    pipeline.submit("tea 5 and two rice at 60").await;
    let SubmitOutcome::Executed { result, .. } = pipeline.submit("show drinks").await else {
        panic!("expected execution");
    };
    assert!(result.detail.contains("Beverages"));
    assert_eq!(pipeline.status(), PipelineStatus::Idle);

    // The ledger itself still holds everything; explicit listing filters.
    assert_eq!(store.list(&EntryFilter::All).await.unwrap().len(), 2);
    let drinks = store
        .list(&EntryFilter::Category("Beverages".into()))
        .await
        .unwrap();
    assert_eq!(drinks.len(), 1);
    assert_eq!(drinks[0].item_name, "tea");
}

#[tokio::test]
async fn malformed_reply_changes_nothing() {
    let (tmp, pipeline, store) = setup(&[r#"{"action": "insert_expense", "data": {"#]).await;
    pipeline.load_model(&tmp.path().join("m.gguf")).await.unwrap();

    let outcome = pipeline.submit("add something").await;
    let SubmitOutcome::Executed { command, .. } = outcome else {
        panic!("expected execution");
    };
    assert_eq!(command.name(), "other_question");
    assert!(store.list(&EntryFilter::All).await.unwrap().is_empty());
    assert!(matches!(pipeline.status(), PipelineStatus::Message(_)));
}
