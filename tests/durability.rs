//! Recovery of a segmented store across reopen

use bitemporal_store::config::StorageConfig;
use bitemporal_store::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

fn ts(s: &str) -> Timestamp {
    Timestamp::parse(s).unwrap()
}

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        storage: StorageConfig::Segmented {
            dir: dir.path().to_path_buf(),
            wal: true,
        },
        ..StoreConfig::default()
    }
}

fn salaries(store: &BitemporalStore) -> Repository<Value> {
    store.repository(EntityKind::bi_temporal("salary"))
}

#[tokio::test]
async fn test_unflushed_mutations_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = BitemporalStore::from_config(&config(&dir)).unwrap();
        let repo = salaries(&store);
        let record = repo
            .insert(None, json!({"amount": 5_000_000}), Some(ts("2024-01-01")))
            .await
            .unwrap();
        repo.update_as_of(record.id(), json!({"amount": 5_500_000}), ts("2024-07-01"))
            .await
            .unwrap();
        record.id().clone()
    };

    let store = BitemporalStore::from_config(&config(&dir)).unwrap();
    let repo = salaries(&store);
    let history = repo.history(&id).await.unwrap();
    assert_eq!(history.len(), 3);
    let july = repo
        .find_by_id_as_of(&id, ts("2024-08-01"), Bound::Infinity)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(july.attributes()["amount"], 5_500_000);
    assert_eq!(repo.timeline(&id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_flushed_store_reopens_from_segments() {
    let dir = TempDir::new().unwrap();
    {
        let store = BitemporalStore::from_config(&config(&dir)).unwrap();
        let repo = salaries(&store);
        for amount in [100, 200, 300] {
            repo.insert(None, json!({ "amount": amount }), Some(ts("2024-01-01")))
                .await
                .unwrap();
        }
        store.flush().await.unwrap();
    }
    assert_eq!(std::fs::metadata(dir.path().join("wal.log")).unwrap().len(), 0);

    let store = BitemporalStore::from_config(&config(&dir)).unwrap();
    let repo = salaries(&store);
    assert_eq!(repo.find_all().await.unwrap().len(), 3);
    assert_eq!(repo.max_numeric_id().await.unwrap(), Some(1002));

    // A fresh allocator must not hand out a stored identity again
    repo.seed_allocator().await.unwrap();
    let next = repo
        .insert(None, json!({"amount": 400}), Some(ts("2024-01-01")))
        .await
        .unwrap();
    assert_eq!(next.id(), &EntityId::Numeric(1003));
}

#[tokio::test]
async fn test_rejected_mutation_leaves_storage_untouched() {
    let dir = TempDir::new().unwrap();
    let id = EntityId::Numeric(42);
    {
        let store = BitemporalStore::from_config(&config(&dir)).unwrap();
        let repo = salaries(&store);
        repo.insert(Some(id.clone()), json!({"amount": 1}), Some(ts("2024-01-01")))
            .await
            .unwrap();
        let err = repo
            .insert(Some(id.clone()), json!({"amount": 2}), Some(ts("2024-03-01")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentityConflict(_)));
        store.flush().await.unwrap();
    }

    let store = BitemporalStore::from_config(&config(&dir)).unwrap();
    let history = salaries(&store).history(&id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].attributes()["amount"], 1);
}
