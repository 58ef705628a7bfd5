//! Tuple search for abstraction definitions.
//!
//! Given candidate propositions for each role of an abstraction, the finder
//! enumerates every assignment of one proposition per role such that no
//! proposition is bound twice and every declared relation holds. Roles are
//! bound in decreasing order of constraint degree, and a partial assignment
//! is abandoned as soon as a relation between two bound roles fails.

use std::fmt;

use crate::definition::{AbstractionDefinition, IntervalCombination};
use crate::error::{ArithmeticError, MatchingError};
use crate::knowledge::KnowledgeBase;
use crate::matcher::CompiledRelation;
use crate::proposition::{Proposition, PropositionId, PropositionKind};
use crate::time::Interval;

/// A derived proposition together with the tuple that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Load-order index of the abstraction.
    pub abstraction: usize,
    /// The proposition to commit. Its id is a function of the tuple.
    pub derived: Proposition,
    /// Bound propositions, in role order.
    pub sources: Vec<PropositionId>,
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- [", self.derived)?;
        for (i, id) in self.sources.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}")?;
        }
        f.write_str("]")
    }
}

/// Deterministic id of the proposition derived from `sources` by `abstraction`.
#[must_use]
pub fn derived_id(abstraction: &AbstractionDefinition, sources: &[PropositionId]) -> PropositionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(abstraction.id.as_str().as_bytes());
    hasher.update(&[0]);
    for id in sources {
        hasher.update(id.as_bytes());
    }
    PropositionId::derived(hasher.finalize().as_bytes())
}

/// Finds the tuples that satisfy an abstraction definition.
#[derive(Debug, Clone, Copy)]
pub struct AbstractionPatternFinder<'kb> {
    kb: &'kb KnowledgeBase,
}

impl<'kb> AbstractionPatternFinder<'kb> {
    #[must_use]
    pub const fn new(kb: &'kb KnowledgeBase) -> Self {
        Self { kb }
    }

    /// Every satisfying tuple over `candidates`, one slice per role.
    ///
    /// # Errors
    ///
    /// Returns `MatchingError::Arithmetic` if interval arithmetic fails.
    pub fn find(&self, abstraction: usize, candidates: &[Vec<&Proposition>]) -> Result<Vec<Match>, MatchingError> {
        self.search(abstraction, None, candidates)
    }

    /// Every satisfying tuple that binds `pinned` at role `role`.
    ///
    /// Candidates for `role` itself are ignored. Calling this once per role a
    /// newly committed proposition satisfies, with candidates drawn from the
    /// propositions committed before it, finds each tuple exactly once.
    ///
    /// # Errors
    ///
    /// Returns `MatchingError::Arithmetic` if interval arithmetic fails.
    pub fn find_with(
        &self,
        abstraction: usize,
        role: usize,
        pinned: &Proposition,
        candidates: &[Vec<&Proposition>],
    ) -> Result<Vec<Match>, MatchingError> {
        self.search(abstraction, Some((role, pinned)), candidates)
    }

    fn search(
        &self,
        abstraction: usize,
        pinned: Option<(usize, &Proposition)>,
        candidates: &[Vec<&Proposition>],
    ) -> Result<Vec<Match>, MatchingError> {
        let Some(def) = self.kb.abstractions().get(abstraction) else {
            return Ok(Vec::new());
        };
        let arity = def.arity();
        if candidates.len() < arity {
            return Ok(Vec::new());
        }

        let pinned_slot = pinned.map(|(_, p)| [p]);
        let pools: Vec<&[&Proposition]> = (0..arity)
            .map(|role| match (pinned, &pinned_slot) {
                (Some((r, _)), Some(slot)) if r == role => slot.as_slice(),
                _ => candidates[role].as_slice(),
            })
            .collect();
        if pools.iter().any(|p| p.is_empty()) {
            return Ok(Vec::new());
        }

        let relations = self.kb.relations(abstraction);
        let mut search = Search {
            relations,
            order: variable_order(arity, relations, pinned.map(|(r, _)| r)),
            pools,
            bound: vec![None; arity],
            tuples: Vec::new(),
        };
        search
            .descend(0)
            .map_err(|source| arithmetic(def, source))?;

        let mut matches = Vec::with_capacity(search.tuples.len());
        for tuple in search.tuples {
            if let Some(m) = build_match(abstraction, def, &tuple) {
                matches.push(m);
            }
        }
        Ok(matches)
    }
}

fn arithmetic(def: &AbstractionDefinition, source: ArithmeticError) -> MatchingError {
    MatchingError::Arithmetic {
        abstraction: def.id.clone(),
        source,
    }
}

/// Pinned role first, then by decreasing number of relations, then role index.
fn variable_order(arity: usize, relations: &[CompiledRelation], pinned: Option<usize>) -> Vec<usize> {
    let degree = |role: usize| relations.iter().filter(|r| r.involves(role)).count();
    let mut order: Vec<usize> = (0..arity).collect();
    order.sort_by_key(|&role| (Some(role) != pinned, std::cmp::Reverse(degree(role)), role));
    order
}

struct Search<'a> {
    relations: &'a [CompiledRelation],
    order: Vec<usize>,
    pools: Vec<&'a [&'a Proposition]>,
    bound: Vec<Option<&'a Proposition>>,
    tuples: Vec<Vec<&'a Proposition>>,
}

impl<'a> Search<'a> {
    fn descend(&mut self, depth: usize) -> Result<(), ArithmeticError> {
        let Some(&role) = self.order.get(depth) else {
            self.tuples.push(self.bound.iter().flatten().copied().collect());
            return Ok(());
        };
        let pool = self.pools[role];
        for &candidate in pool {
            if self.bound.iter().flatten().any(|b| b.id == candidate.id) {
                continue;
            }
            self.bound[role] = Some(candidate);
            if self.consistent(role)? {
                self.descend(depth + 1)?;
            }
            self.bound[role] = None;
        }
        Ok(())
    }

    /// Checks every relation between `role` and an already bound role.
    fn consistent(&self, role: usize) -> Result<bool, ArithmeticError> {
        for relation in self.relations.iter().filter(|r| r.involves(role)) {
            let (Some(lhs), Some(rhs)) = (self.bound[relation.lhs], self.bound[relation.rhs]) else {
                continue;
            };
            let (Some(li), Some(ri)) = (&lhs.interval, &rhs.interval) else {
                return Ok(false);
            };
            if !relation.matches(li, ri)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn combine(def: &AbstractionDefinition, tuple: &[&Proposition]) -> Option<Interval> {
    let mut intervals = tuple.iter().filter_map(|p| p.interval);
    let first = intervals.next()?;
    match def.combination {
        IntervalCombination::Union => Some(intervals.fold(first, |acc, i| acc.union(&i))),
        IntervalCombination::Intersection => intervals.try_fold(first, |acc, i| acc.intersection(&i)),
    }
}

/// Tuples with no temporal source, or an empty intersection, derive nothing.
fn build_match(abstraction: usize, def: &AbstractionDefinition, tuple: &[&Proposition]) -> Option<Match> {
    let interval = combine(def, tuple)?;
    let sources: Vec<PropositionId> = tuple.iter().map(|p| p.id).collect();
    let derived = Proposition {
        id: derived_id(def, &sources),
        kind_id: def.id.clone(),
        kind: PropositionKind::Abstraction,
        interval: Some(interval),
        value: def.derived_value.clone(),
        properties: Default::default(),
        references: Default::default(),
    };
    Some(Match {
        abstraction,
        derived,
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ExtendedPropositionDefinition, PropositionDefinition, Relation, TemporalRelation};
    use crate::knowledge::InMemoryKnowledgeSource;

    fn prop(kind: &str, start: i64, finish: i64) -> Proposition {
        Proposition::builder()
            .kind_id(kind)
            .interval(Interval::precise(start, finish).unwrap())
            .build()
            .unwrap()
    }

    fn kb_with(def: AbstractionDefinition) -> KnowledgeBase {
        let source = InMemoryKnowledgeSource::new()
            .with_proposition(PropositionDefinition::new("A", PropositionKind::Event))
            .with_proposition(PropositionDefinition::new("B", PropositionKind::Event))
            .with_abstraction(def);
        KnowledgeBase::load(&source).unwrap()
    }

    fn a_before_b() -> AbstractionDefinition {
        AbstractionDefinition::builder("AB")
            .abstracted_from(ExtendedPropositionDefinition::new("a", "A"))
            .abstracted_from(ExtendedPropositionDefinition::new("b", "B"))
            .relation("a", "b", Relation::new(TemporalRelation::Before))
            .derived_value("present")
            .build()
            .unwrap()
    }

    #[test]
    fn test_only_the_related_pair_matches() {
        let kb = kb_with(a_before_b());
        let finder = AbstractionPatternFinder::new(&kb);
        let p1 = prop("A", 0, 10);
        let p2 = prop("B", 20, 30);
        let p3 = prop("B", 5, 15);

        let matches = finder.find(0, &[vec![&p1], vec![&p2, &p3]]).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].sources, vec![p1.id, p2.id]);
        assert_eq!(matches[0].derived.kind_id.as_str(), "AB");
        assert_eq!(matches[0].derived.interval, Some(Interval::precise(0, 30).unwrap()));
        assert_eq!(matches[0].derived.value, Some("present".into()));
    }

    #[test]
    fn test_same_instance_is_never_bound_twice() {
        let def = AbstractionDefinition::builder("AA")
            .abstracted_from(ExtendedPropositionDefinition::new("first", "A"))
            .abstracted_from(ExtendedPropositionDefinition::new("second", "A"))
            .build()
            .unwrap();
        let kb = kb_with(def);
        let finder = AbstractionPatternFinder::new(&kb);
        let p1 = prop("A", 0, 10);
        assert!(finder.find(0, &[vec![&p1], vec![&p1]]).unwrap().is_empty());

        let p4 = prop("A", 20, 30);
        let matches = finder.find(0, &[vec![&p1, &p4], vec![&p1, &p4]]).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.sources[0] != m.sources[1]));
    }

    #[test]
    fn test_pinned_search_binds_the_new_proposition() {
        let kb = kb_with(a_before_b());
        let finder = AbstractionPatternFinder::new(&kb);
        let p1 = prop("A", 0, 10);
        let p1b = prop("A", 2, 12);
        let p2 = prop("B", 20, 30);

        let matches = finder.find_with(0, 1, &p2, &[vec![&p1, &p1b], vec![]]).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.sources[1] == p2.id));
    }

    #[test]
    fn test_derived_ids_are_stable_per_tuple() {
        let kb = kb_with(a_before_b());
        let finder = AbstractionPatternFinder::new(&kb);
        let p1 = prop("A", 0, 10);
        let p2 = prop("B", 20, 30);
        let first = finder.find(0, &[vec![&p1], vec![&p2]]).unwrap();
        let again = finder.find_with(0, 0, &p1, &[vec![], vec![&p2]]).unwrap();
        assert_eq!(first[0].derived.id, again[0].derived.id);
    }

    #[test]
    fn test_intersection_rejects_disjoint_tuples() {
        let def = AbstractionDefinition::builder("Both")
            .abstracted_from(ExtendedPropositionDefinition::new("a", "A"))
            .abstracted_from(ExtendedPropositionDefinition::new("b", "B"))
            .combination(IntervalCombination::Intersection)
            .build()
            .unwrap();
        let kb = kb_with(def);
        let finder = AbstractionPatternFinder::new(&kb);
        let a = prop("A", 0, 10);
        let b_overlap = prop("B", 5, 20);
        let b_later = prop("B", 15, 20);

        let matches = finder.find(0, &[vec![&a], vec![&b_overlap, &b_later]]).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].derived.interval, Some(Interval::precise(5, 10).unwrap()));
    }

    #[test]
    fn test_variable_order_prefers_constrained_roles() {
        let rel = |lhs, rhs| CompiledRelation {
            lhs,
            rhs,
            constraints: Vec::new(),
        };
        let relations = [rel(0, 2), rel(1, 2)];
        assert_eq!(variable_order(3, &relations, None), vec![2, 0, 1]);
        assert_eq!(variable_order(3, &relations, Some(1)), vec![1, 2, 0]);
    }
}
