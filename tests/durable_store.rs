//! Durable store environment: reopen, crash recovery and locking.
//!
//! Run with `cargo test --features persistent`.

#![cfg(feature = "persistent")]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use episodic::{
    AbstractionDefinition, CancellationToken, DerivationEngine, DerivationTracker, DurableConfig, EngineConfig,
    ExtendedPropositionDefinition, InMemoryKnowledgeSource, Interval, KeyedStore, KnowledgeBase, Proposition,
    PropositionDefinition, PropositionId, PropositionKind, StorageError, StoreEnvironment, StoreFlavor, Subject,
};
use tempfile::tempdir;

fn config() -> DurableConfig {
    DurableConfig {
        sync_on_write: false,
        ..DurableConfig::default()
    }
}

fn open_env(dir: &Path) -> StoreEnvironment {
    StoreEnvironment::durable(dir, config()).unwrap()
}

#[test]
fn values_survive_environment_restart() {
    let dir = tempdir().unwrap();
    {
        let env = open_env(dir.path());
        assert_eq!(env.flavor(), StoreFlavor::Durable);
        let store = env.open_store("derivations").unwrap();
        store.put("K1", b"one".to_vec()).unwrap();
        store.put("K2", b"two".to_vec()).unwrap();
        assert!(store.remove("K2").unwrap());
        store.shutdown().unwrap();
        assert!(env.is_closed());
    }

    let env = open_env(dir.path());
    let store = env.open_store("derivations").unwrap();
    assert_eq!(store.get("K1").unwrap().as_deref(), Some(&b"one"[..]));
    assert_eq!(store.get("K2").unwrap(), None);
}

#[test]
fn torn_tail_is_dropped_on_reopen() {
    let dir = tempdir().unwrap();
    {
        let env = open_env(dir.path());
        let store = env.open_store("derivations").unwrap();
        store.put("K1", b"kept".to_vec()).unwrap();
        env.shutdown().unwrap();
    }

    // A record header cut off mid-length, as a crash during append leaves it.
    let mut log = OpenOptions::new()
        .append(true)
        .open(dir.path().join("derivations.wal"))
        .unwrap();
    log.write_all(&[1, 0xff, 0x00, 0x00]).unwrap();
    drop(log);

    let env = open_env(dir.path());
    let store = env.open_store("derivations").unwrap();
    assert_eq!(store.get("K1").unwrap().as_deref(), Some(&b"kept"[..]));
    store.put("K2", b"after".to_vec()).unwrap();
    store.shutdown().unwrap();
    drop(store);

    let env = open_env(dir.path());
    let store = env.open_store("derivations").unwrap();
    assert_eq!(store.get("K2").unwrap().as_deref(), Some(&b"after"[..]));
}

#[test]
fn open_store_is_exclusive_across_environments() {
    let dir = tempdir().unwrap();
    let first = open_env(dir.path());
    let _held = first.open_store("derivations").unwrap();

    let second = open_env(dir.path());
    let err = second.open_store("derivations").unwrap_err();
    assert!(matches!(err, StorageError::Locked { .. }));
    // Other names are independent.
    assert!(second.open_store("results").is_ok());
}

#[test]
fn tracker_flushed_by_engine_loads_after_restart() {
    let dir = tempdir().unwrap();
    let source = InMemoryKnowledgeSource::new()
        .with_proposition(PropositionDefinition::new("Fever", PropositionKind::Event))
        .with_abstraction(
            AbstractionDefinition::builder("Febrile")
                .abstracted_from(ExtendedPropositionDefinition::new("fever", "Fever"))
                .build()
                .unwrap(),
        );
    let kb = Arc::new(KnowledgeBase::load(&source).unwrap());
    let fever = Proposition::builder()
        .kind_id("Fever")
        .kind(PropositionKind::Event)
        .interval(Interval::precise(0, 3_600_000).unwrap())
        .build()
        .unwrap();
    let fever_id: PropositionId = fever.id;

    let expected = {
        let env = open_env(dir.path());
        let store = Arc::new(env.open_store("derivations").unwrap());
        let engine = DerivationEngine::new(Arc::clone(&kb), EngineConfig::default())
            .unwrap()
            .with_store(store.clone());
        let result = engine
            .process_subject(Subject::new("K1", vec![fever]), &CancellationToken::new())
            .unwrap();
        store.shutdown().unwrap();
        result.derivations
    };

    let env = open_env(dir.path());
    let store = env.open_store("derivations").unwrap();
    let loaded = DerivationTracker::load("K1", &store).unwrap().unwrap();
    assert_eq!(loaded, expected);
    assert_eq!(loaded.len(), 1);
    let (derived, sources) = loaded.backward_map().iter().next().unwrap();
    assert!(sources.contains(&fever_id));
    assert!(loaded.forward_derivations(&fever_id).any(|id| id == derived));
    assert!(DerivationTracker::load("K2", &store).unwrap().is_none());
}
