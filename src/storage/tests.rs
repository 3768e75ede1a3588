use super::*;
use crate::core::config::AppConfig;
use crate::core::ledger::{EntryFilter, LedgerStore, NewEntry};

async fn test_db() -> (Database, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = AppConfig {
        working_dir: tmp.path().to_path_buf(),
        data_dir: "data".into(),
        ..Default::default()
    };
    let db = Database::open(&config).await.unwrap();
    db.run_migrations().await.unwrap();
    (db, tmp)
}

fn entry(name: &str, category: &str, quantity: u32, price: f64) -> NewEntry {
    NewEntry::new(name.into(), category.into(), quantity, price)
}

#[tokio::test]
async fn test_insert_and_get() {
    let (db, _tmp) = test_db().await;
    let repo = db.entries();

    let stored = repo.insert(entry("mango", "General", 4, 20.0)).await.unwrap();
    assert!(!stored.id.is_empty());
    assert_eq!(stored.total_price, 80.0);

    let fetched = repo.get(&stored.id).await.unwrap();
    assert_eq!(fetched, stored);
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let (db, _tmp) = test_db().await;
    let repo = db.entries();

    repo.insert(entry("first", "General", 1, 1.0)).await.unwrap();
    repo.insert(entry("second", "General", 1, 2.0)).await.unwrap();
    repo.insert(entry("third", "General", 1, 3.0)).await.unwrap();

    let all = repo.list(&EntryFilter::All).await.unwrap();
    let names: Vec<&str> = all.iter().map(|e| e.item_name.as_str()).collect();
    assert_eq!(names, vec!["third", "second", "first"]);
    assert!(all[0].created_at > all[1].created_at);
    assert!(all[1].created_at > all[2].created_at);
}

#[tokio::test]
async fn test_list_filters() {
    let (db, _tmp) = test_db().await;
    let repo = db.entries();

    repo.insert(entry("Green Apple", "Fruit", 2, 10.0)).await.unwrap();
    repo.insert(entry("coffee", "Beverages", 1, 75.2)).await.unwrap();
    repo.insert(entry("apple pie", "Bakery", 1, 5.0)).await.unwrap();

    let fruit = repo
        .list(&EntryFilter::Category("Fruit".into()))
        .await
        .unwrap();
    assert_eq!(fruit.len(), 1);
    assert_eq!(fruit[0].item_name, "Green Apple");

    let pricey = repo.list(&EntryFilter::AbovePrice(20.0)).await.unwrap();
    let names: Vec<&str> = pricey.iter().map(|e| e.item_name.as_str()).collect();
    assert_eq!(names, vec!["coffee", "Green Apple"]);

    let apples = repo
        .list(&EntryFilter::NameContains("apple".into()))
        .await
        .unwrap();
    assert_eq!(apples.len(), 2);
}

#[tokio::test]
async fn test_update_recomputes_total() {
    let (db, _tmp) = test_db().await;
    let repo = db.entries();

    let mut stored = repo.insert(entry("rice", "Groceries", 1, 50.0)).await.unwrap();
    stored.quantity = 3;
    stored.total_price = 0.0;

    let updated = repo.update(&stored).await.unwrap();
    assert_eq!(updated.total_price, 150.0);

    let fetched = repo.get(&stored.id).await.unwrap();
    assert_eq!(fetched.quantity, 3);
    assert_eq!(fetched.total_price, 150.0);
}

#[tokio::test]
async fn test_update_missing_entry() {
    let (db, _tmp) = test_db().await;
    let repo = db.entries();

    let mut stored = repo.insert(entry("tea", "General", 1, 5.0)).await.unwrap();
    stored.id = "does-not-exist".into();
    let err = repo.update(&stored).await.unwrap_err();
    assert!(matches!(err, crate::core::error::StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_change_notification() {
    let (db, _tmp) = test_db().await;
    let repo = db.entries();
    let mut rx = db.subscribe();
    let before = *rx.borrow_and_update();

    repo.insert(entry("bread", "Bakery", 1, 3.0)).await.unwrap();

    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), before + 1);

    // Reads do not notify
    repo.list(&EntryFilter::All).await.unwrap();
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (db, _tmp) = test_db().await;
    db.entries()
        .insert(entry("salt", "General", 1, 1.0))
        .await
        .unwrap();
    db.run_migrations().await.unwrap();
    assert_eq!(db.entries().list(&EntryFilter::All).await.unwrap().len(), 1);
}

#[test]
fn test_settings_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let store = SettingsStore::new(tmp.path());
    assert_eq!(store.load().unwrap(), Settings::default());

    store
        .remember_model(std::path::Path::new("/models/qwen.gguf"))
        .unwrap();
    let loaded = store.load().unwrap();
    assert_eq!(
        loaded.last_model_path.as_deref(),
        Some(std::path::Path::new("/models/qwen.gguf"))
    );
}

#[test]
fn test_settings_corrupt_file() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("settings.json"), "{not json").unwrap();
    let store = SettingsStore::new(tmp.path());
    assert!(store.load().is_err());
}
