//! Derivation provenance.
//!
//! The tracker keeps two maps per subject: forward (source -> derived
//! propositions) and backward (derived -> source propositions). They are
//! always mutual inverses. Recording is a set union, so reconsidering the
//! same derivation changes nothing.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::proposition::PropositionId;
use crate::storage::{KeyedStore, KeyedStoreExt, StorageError};

/// Forward and backward derivation maps of one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivationTracker {
    forward: HashMap<PropositionId, BTreeSet<PropositionId>>,
    backward: HashMap<PropositionId, BTreeSet<PropositionId>>,
}

/// Persisted form: the backward map only, sorted for stable output. The
/// forward map is rebuilt on load.
#[derive(Debug, Serialize, Deserialize)]
struct DerivationSnapshot {
    derivations: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    derived: PropositionId,
    sources: Vec<PropositionId>,
}

impl DerivationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `derived` was produced from `sources`.
    ///
    /// Returns true if any link was new.
    pub fn record_derivation(&mut self, sources: &[PropositionId], derived: PropositionId) -> bool {
        let mut changed = false;
        for &source in sources {
            changed |= self.forward.entry(source).or_default().insert(derived);
            changed |= self.backward.entry(derived).or_default().insert(source);
        }
        changed
    }

    /// Propositions derived directly from `id`.
    pub fn forward_derivations(&self, id: &PropositionId) -> impl Iterator<Item = &PropositionId> + '_ {
        self.forward.get(id).into_iter().flatten()
    }

    /// Propositions `id` was directly derived from.
    pub fn backward_derivations(&self, id: &PropositionId) -> impl Iterator<Item = &PropositionId> + '_ {
        self.backward.get(id).into_iter().flatten()
    }

    #[must_use]
    pub fn forward_map(&self) -> &HashMap<PropositionId, BTreeSet<PropositionId>> {
        &self.forward
    }

    #[must_use]
    pub fn backward_map(&self) -> &HashMap<PropositionId, BTreeSet<PropositionId>> {
        &self.backward
    }

    /// Number of derived propositions with recorded sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backward.is_empty()
    }

    /// Returns true if the forward and backward maps are mutual inverses.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.forward.iter().all(|(source, derived)| {
            derived
                .iter()
                .all(|d| self.backward.get(d).is_some_and(|s| s.contains(source)))
        });
        let backward_ok = self.backward.iter().all(|(derived, sources)| {
            sources
                .iter()
                .all(|s| self.forward.get(s).is_some_and(|d| d.contains(derived)))
        });
        forward_ok && backward_ok
    }

    /// Writes the maps to `store` under `key`.
    pub fn flush(&self, key: &str, store: &dyn KeyedStore) -> Result<(), StorageError> {
        let mut derivations: Vec<SnapshotEntry> = self
            .backward
            .iter()
            .map(|(derived, sources)| SnapshotEntry {
                derived: *derived,
                sources: sources.iter().copied().collect(),
            })
            .collect();
        derivations.sort_by_key(|e| e.derived);
        store.put_json(key, &DerivationSnapshot { derivations })?;
        tracing::debug!(key, derived = self.len(), "derivations flushed");
        Ok(())
    }

    /// Reads the maps stored under `key`.
    ///
    /// `None` means nothing is stored. For a cache-flavored store that only
    /// says the subject has not been computed, not that it has no derivations.
    pub fn load(key: &str, store: &dyn KeyedStore) -> Result<Option<Self>, StorageError> {
        let Some(snapshot) = store.get_json::<DerivationSnapshot>(key)? else {
            return Ok(None);
        };
        let mut tracker = Self::new();
        for entry in snapshot.derivations {
            tracker.record_derivation(&entry.sources, entry.derived);
        }
        Ok(Some(tracker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CacheConfig, CacheStore};

    fn ids(n: usize) -> Vec<PropositionId> {
        (0..n).map(|_| PropositionId::new()).collect()
    }

    #[test]
    fn test_record_links_both_directions() {
        let p = ids(3);
        let mut tracker = DerivationTracker::new();
        assert!(tracker.record_derivation(&[p[0], p[1]], p[2]));

        let forward: Vec<_> = tracker.forward_derivations(&p[0]).collect();
        assert_eq!(forward, vec![&p[2]]);
        let backward: BTreeSet<_> = tracker.backward_derivations(&p[2]).copied().collect();
        assert_eq!(backward, BTreeSet::from([p[0], p[1]]));
        assert!(tracker.is_consistent());
    }

    #[test]
    fn test_repeated_record_is_idempotent() {
        let p = ids(3);
        let mut tracker = DerivationTracker::new();
        tracker.record_derivation(&[p[0], p[1]], p[2]);
        let snapshot = tracker.clone();
        assert!(!tracker.record_derivation(&[p[0], p[1]], p[2]));
        assert!(!tracker.record_derivation(&[p[1]], p[2]));
        assert_eq!(tracker, snapshot);
    }

    #[test]
    fn test_unknown_id_has_no_derivations() {
        let tracker = DerivationTracker::new();
        assert_eq!(tracker.forward_derivations(&PropositionId::new()).count(), 0);
        assert_eq!(tracker.backward_derivations(&PropositionId::new()).count(), 0);
        assert!(tracker.is_consistent());
    }

    #[test]
    fn test_flush_and_load_restore_both_maps() {
        let p = ids(5);
        let mut tracker = DerivationTracker::new();
        tracker.record_derivation(&[p[0], p[1]], p[2]);
        tracker.record_derivation(&[p[2], p[3]], p[4]);

        let store = CacheStore::new("derivations", CacheConfig::default());
        tracker.flush("K1", &store).unwrap();

        let loaded = DerivationTracker::load("K1", &store).unwrap().unwrap();
        assert_eq!(loaded, tracker);
        assert!(DerivationTracker::load("K2", &store).unwrap().is_none());
    }
}
