//! Registry persistence tests
//!
//! Registration idempotence, save/load fidelity across fresh instances, and
//! rejection of tampered blobs.

use proptest::prelude::*;
use serde_json::{Value, json};
use shadow::runtime::error::RegistryError;
use shadow::{ActorConfig, Essence, Registry, TaskCatalog, TaskList, TaskOutcome};
use std::collections::BTreeSet;
use tempfile::TempDir;

proptest! {
    #[test]
    fn sew_twice_keeps_one_entry(names in proptest::collection::vec("[a-z]{1,8}", 1..20)) {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new(temp.path().join("needles.json"));

        for name in &names {
            registry.sew(Essence::new(name.clone(), TaskList::new()));
            registry.sew(Essence::new(name.clone(), TaskList::new().with("t", "true", vec![])));
        }

        let unique: BTreeSet<&String> = names.iter().collect();
        prop_assert_eq!(registry.len(), unique.len());
        for name in unique {
            // The first registration wins.
            prop_assert!(registry.get(name).unwrap().tasks.is_empty());
        }
    }
}

#[test]
fn sum_bot_scenario() {
    let temp = TempDir::new().unwrap();
    let registry = Registry::new(temp.path().join("needles.json"));
    let catalog = TaskCatalog::with_builtins();

    let essence: Essence = serde_json::from_value(json!({
        "name": "T",
        "tasks": [{"signal": "sum", "task": "sum", "args": [1, 1]}]
    }))
    .unwrap();
    assert!(registry.sew(essence));

    let stored = registry.get("T").unwrap();
    let sum = catalog.bind(stored.tasks.get("sum").unwrap()).unwrap();
    assert_eq!(sum.invoke().unwrap(), json!(2));

    assert!(registry.retract("T").is_some());
    assert!(!registry.check("T"));
}

#[tokio::test]
async fn round_trip_preserves_history() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("cache").join("needles.json");
    let catalog = TaskCatalog::with_builtins();

    let registry = Registry::new(&path);
    registry.sew(Essence::new(
        "Worker",
        TaskList::new()
            .with("sum", "sum", vec![json!(3), json!(4)])
            .with("echo", "echo", vec![json!("hi")]),
    ));
    registry.sew(Essence::new("Empty", TaskList::new()));

    let actor = registry
        .revive("Worker", &catalog, ActorConfig::default())
        .unwrap();
    actor.start().unwrap();
    actor.jutsu("sum").await.unwrap();
    actor.stop().await.unwrap();
    registry.replace(actor.essence().await.unwrap());
    registry.save().unwrap();

    let fresh = Registry::new(&path);
    assert!(fresh.can_load());
    assert_eq!(fresh.load().unwrap(), 2);
    assert_eq!(fresh.essences(), registry.essences());
    assert_eq!(
        fresh.get("Worker").unwrap().history.get("sum"),
        Some(&TaskOutcome::Completed { value: json!(7) })
    );

    // A revived bot picks up the stored history.
    let revived = fresh.revive("Worker", &catalog, ActorConfig::default()).unwrap();
    assert_eq!(revived.essence().await.unwrap().history.len(), 1);
}

#[test]
fn tampered_blob_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("needles.json");

    let registry = Registry::new(&path);
    registry.sew(Essence::new("T", TaskList::new().with("sum", "sum", vec![json!(1), json!(1)])));
    registry.save().unwrap();

    let mut blob: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(blob["version"], 1);
    assert_eq!(blob["checksum"].as_str().unwrap().len(), 64);
    blob["pool"]["T"]["name"] = json!("Impostor");
    std::fs::write(&path, serde_json::to_vec(&blob).unwrap()).unwrap();

    let fresh = Registry::new(&path);
    assert!(matches!(fresh.load(), Err(RegistryError::Corrupted(_))));
    assert!(fresh.is_empty());

    std::fs::write(&path, b"not json").unwrap();
    assert!(matches!(fresh.load(), Err(RegistryError::Corrupted(_))));

    fresh.reset().unwrap();
    assert!(!fresh.can_load());
    assert!(Registry::open(&path).unwrap().is_empty());
}
