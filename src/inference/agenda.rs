//! Pending activations of one subject.

use std::collections::HashMap;

use crate::pattern::Match;
use crate::proposition::KindId;

use super::resolver::DerivationConflictResolver;

/// A pending firing of an abstraction on one tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    /// Agenda-assigned sequence number, unique per subject.
    pub seq: u64,
    /// Load-order index of the abstraction; also the load-order tie-break.
    pub abstraction: usize,
    /// Explicit priority copied from the abstraction definition.
    pub salience: i32,
    /// Propagation cycle in which the activation became eligible.
    pub propagation: u64,
    /// Arrival sequence of the most recently asserted bound proposition.
    pub recency: u64,
    /// The tuple and the proposition it would derive.
    pub found: Match,
}

impl Activation {
    #[must_use]
    pub fn abstraction_id(&self) -> &KindId {
        &self.found.derived.kind_id
    }
}

/// Unordered store of pending activations with per-abstraction counts.
///
/// Selection is a linear scan through the resolver; agendas hold one
/// subject's activations and stay small.
#[derive(Debug, Default)]
pub struct Agenda {
    pending: Vec<Activation>,
    per_abstraction: HashMap<usize, usize>,
    next_seq: u64,
}

impl Agenda {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an activation and returns its sequence number.
    pub fn push(&mut self, salience: i32, propagation: u64, recency: u64, found: Match) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        *self.per_abstraction.entry(found.abstraction).or_default() += 1;
        self.pending.push(Activation {
            seq,
            abstraction: found.abstraction,
            salience,
            propagation,
            recency,
            found,
        });
        seq
    }

    /// Removes and returns the activation the resolver selects.
    pub fn pop_next(&mut self, resolver: &DerivationConflictResolver<'_>) -> Option<Activation> {
        let index = resolver.select(&self.pending, |a| self.pending_for(a))?;
        let activation = self.pending.swap_remove(index);
        if let Some(count) = self.per_abstraction.get_mut(&activation.abstraction) {
            *count -= 1;
            if *count == 0 {
                self.per_abstraction.remove(&activation.abstraction);
            }
        }
        Some(activation)
    }

    /// Number of pending activations of an abstraction.
    #[must_use]
    pub fn pending_for(&self, abstraction: usize) -> usize {
        self.per_abstraction.get(&abstraction).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every pending activation.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.per_abstraction.clear();
    }
}
