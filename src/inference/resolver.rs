//! Firing order among the activations of one subject.

use std::cmp::Ordering;

use crate::inference::{Activation, DependencyPolicy};
use crate::knowledge::KnowledgeBase;

/// Orders competing activations of one subject.
///
/// Criteria, each consulted only when all earlier ones tie:
/// 1. higher salience;
/// 2. later propagation;
/// 3. higher recency of bound propositions;
/// 4. an activation whose abstraction does not depend on the other's;
/// 5. lower load order, then lower agenda sequence.
///
/// Under [`DependencyPolicy::TopologicalFirst`] an activation is not even
/// eligible while an abstraction it depends on still has pending activations.
#[derive(Debug, Clone, Copy)]
pub struct DerivationConflictResolver<'kb> {
    kb: &'kb KnowledgeBase,
    policy: DependencyPolicy,
}

impl<'kb> DerivationConflictResolver<'kb> {
    #[must_use]
    pub const fn new(kb: &'kb KnowledgeBase, policy: DependencyPolicy) -> Self {
        Self { kb, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> DependencyPolicy {
        self.policy
    }

    /// `Less` if `a` fires before `b`.
    #[must_use]
    pub fn compare(&self, a: &Activation, b: &Activation) -> Ordering {
        b.salience
            .cmp(&a.salience)
            .then_with(|| b.propagation.cmp(&a.propagation))
            .then_with(|| b.recency.cmp(&a.recency))
            .then_with(|| self.compare_dependency(a.abstraction, b.abstraction))
            .then_with(|| a.abstraction.cmp(&b.abstraction))
            .then_with(|| a.seq.cmp(&b.seq))
    }

    fn compare_dependency(&self, a: usize, b: usize) -> Ordering {
        if self.kb.depends_on_index(a, b) {
            Ordering::Greater
        } else if self.kb.depends_on_index(b, a) {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }

    /// Returns true if `activation` must wait for another abstraction's
    /// pending activations. `pending_for` counts pending activations per
    /// abstraction.
    pub fn is_deferred(&self, activation: &Activation, pending_for: impl Fn(usize) -> usize) -> bool {
        self.policy.defers_dependents()
            && self
                .kb
                .dependencies_of(activation.abstraction)
                .any(|dep| pending_for(dep) > 0)
    }

    /// Index of the activation to fire next, or `None` if `pending` is empty.
    ///
    /// The dependency graph is acyclic, so some pending activation is always
    /// eligible.
    pub fn select(&self, pending: &[Activation], pending_for: impl Fn(usize) -> usize) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, candidate) in pending.iter().enumerate() {
            if self.is_deferred(candidate, &pending_for) {
                continue;
            }
            best = match best {
                Some(b) if self.compare(candidate, &pending[b]) != Ordering::Less => Some(b),
                _ => Some(i),
            };
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AbstractionDefinition, ExtendedPropositionDefinition, PropositionDefinition};
    use crate::inference::Agenda;
    use crate::knowledge::InMemoryKnowledgeSource;
    use crate::pattern::Match;
    use crate::proposition::{Proposition, PropositionKind};
    use crate::time::Interval;

    /// `X` reads `Y`, which reads the raw kind `R`.
    fn kb() -> KnowledgeBase {
        let source = InMemoryKnowledgeSource::new()
            .with_proposition(PropositionDefinition::new("R", PropositionKind::Event))
            .with_abstraction(
                AbstractionDefinition::builder("X")
                    .abstracted_from(ExtendedPropositionDefinition::new("y", "Y"))
                    .build()
                    .unwrap(),
            )
            .with_abstraction(
                AbstractionDefinition::builder("Y")
                    .abstracted_from(ExtendedPropositionDefinition::new("r", "R"))
                    .build()
                    .unwrap(),
            );
        KnowledgeBase::load(&source).unwrap()
    }

    fn found(kb: &KnowledgeBase, id: &str) -> Match {
        let abstraction = kb.abstraction_index(&id.into()).unwrap();
        Match {
            abstraction,
            derived: Proposition::builder()
                .kind_id(id)
                .kind(PropositionKind::Abstraction)
                .interval(Interval::point(0))
                .build()
                .unwrap(),
            sources: Vec::new(),
        }
    }

    fn activation(kb: &KnowledgeBase, id: &str, seq: u64, salience: i32, propagation: u64, recency: u64) -> Activation {
        let found = found(kb, id);
        Activation {
            seq,
            abstraction: found.abstraction,
            salience,
            propagation,
            recency,
            found,
        }
    }

    #[test]
    fn test_dependency_orders_equal_activations() {
        let kb = kb();
        let resolver = DerivationConflictResolver::new(&kb, DependencyPolicy::Inherited);
        let x = activation(&kb, "X", 0, 0, 1, 1);
        let y = activation(&kb, "Y", 1, 0, 1, 1);
        assert_eq!(resolver.compare(&y, &x), Ordering::Less);
        assert_eq!(resolver.compare(&x, &y), Ordering::Greater);
        assert_eq!(resolver.select(&[x, y], |_| 1), Some(1));
    }

    #[test]
    fn test_tie_break_chain() {
        let kb = kb();
        let resolver = DerivationConflictResolver::new(&kb, DependencyPolicy::Inherited);
        let base = activation(&kb, "Y", 0, 0, 1, 1);

        let salient = activation(&kb, "Y", 1, 5, 0, 0);
        assert_eq!(resolver.compare(&salient, &base), Ordering::Less);

        let propagated = activation(&kb, "Y", 1, 0, 2, 0);
        assert_eq!(resolver.compare(&propagated, &base), Ordering::Less);

        let recent = activation(&kb, "Y", 1, 0, 1, 2);
        assert_eq!(resolver.compare(&recent, &base), Ordering::Less);

        let later = activation(&kb, "Y", 1, 0, 1, 1);
        assert_eq!(resolver.compare(&later, &base), Ordering::Greater);
    }

    #[test]
    fn test_inherited_lets_salience_override_dependency() {
        let kb = kb();
        let resolver = DerivationConflictResolver::new(&kb, DependencyPolicy::Inherited);
        let x = activation(&kb, "X", 0, 10, 1, 1);
        let y = activation(&kb, "Y", 1, 0, 1, 1);
        let pending = [x, y];
        assert_eq!(resolver.select(&pending, |_| 1), Some(0));
    }

    #[test]
    fn test_topological_first_defers_dependents() {
        let kb = kb();
        let resolver = DerivationConflictResolver::new(&kb, DependencyPolicy::TopologicalFirst);
        let mut agenda = Agenda::new();
        agenda.push(10, 1, 1, found(&kb, "X"));
        agenda.push(0, 1, 1, found(&kb, "Y"));

        let first = agenda.pop_next(&resolver).unwrap();
        assert_eq!(first.abstraction_id().as_str(), "Y");
        let second = agenda.pop_next(&resolver).unwrap();
        assert_eq!(second.abstraction_id().as_str(), "X");
        assert!(agenda.pop_next(&resolver).is_none());
    }

    #[test]
    fn test_agenda_counts_pending_per_abstraction() {
        let kb = kb();
        let resolver = DerivationConflictResolver::new(&kb, DependencyPolicy::TopologicalFirst);
        let y = kb.abstraction_index(&"Y".into()).unwrap();
        let mut agenda = Agenda::new();
        agenda.push(0, 1, 1, found(&kb, "Y"));
        agenda.push(0, 1, 2, found(&kb, "Y"));
        assert_eq!(agenda.pending_for(y), 2);
        agenda.pop_next(&resolver);
        assert_eq!(agenda.pending_for(y), 1);
        assert_eq!(agenda.len(), 1);
    }
}
