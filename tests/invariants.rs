//! Property tests for weight arithmetic, the dependency graph free list and
//! the derivation tracker.

use std::cmp::Ordering;

use episodic::{DependencyGraph, DerivationTracker, PropositionId, Weight};
use proptest::prelude::*;

// Keep sums inside i64.
fn finite() -> impl Strategy<Value = Weight> {
    (-(1i64 << 60)..(1i64 << 60)).prop_map(Weight::finite)
}

proptest! {
    #[test]
    fn addition_commutes(a in finite(), b in finite()) {
        prop_assert_eq!(a.add(b).unwrap(), b.add(a).unwrap());
    }

    #[test]
    fn adding_the_inverse_gives_zero(a in finite()) {
        prop_assert_eq!(a.add(a.invert_sign()).unwrap(), Weight::ZERO);
    }

    #[test]
    fn infinities_bound_every_finite_weight(a in finite()) {
        prop_assert_eq!(Weight::NEG_INFINITY.compare(&a), Ordering::Less);
        prop_assert_eq!(Weight::POS_INFINITY.compare(&a), Ordering::Greater);
        prop_assert_eq!(a.add(Weight::POS_INFINITY).unwrap(), Weight::POS_INFINITY);
    }

    #[test]
    fn removed_slots_are_reused_without_growth(n in 2usize..40) {
        let mut graph: DependencyGraph<usize, ()> = DependencyGraph::with_increment(4);
        for v in 0..n {
            graph.add_vertex(v);
        }
        for v in 1..n {
            graph.set_edge(&0, &v, Some(()));
        }
        for v in 1..n {
            prop_assert!(graph.remove_vertex(&v));
        }
        prop_assert_eq!(graph.len(), 1);
        prop_assert_eq!(graph.edges().count(), 0);

        let capacity = graph.capacity();
        graph.add_vertex(n);
        prop_assert_eq!(graph.capacity(), capacity);
        prop_assert!(graph.contains(&n));
        prop_assert!(!graph.contains(&1));
    }

    #[test]
    fn tracker_maps_stay_inverse(
        records in prop::collection::vec(
            (prop::collection::vec(0usize..12, 1..4), 0usize..12),
            0..40,
        ),
        repeat in any::<bool>(),
    ) {
        let ids: Vec<PropositionId> = (0..12).map(|_| PropositionId::new()).collect();
        let mut tracker = DerivationTracker::new();
        for (sources, derived) in &records {
            let sources: Vec<_> = sources.iter().map(|&i| ids[i]).collect();
            tracker.record_derivation(&sources, ids[*derived]);
            if repeat {
                prop_assert!(!tracker.record_derivation(&sources, ids[*derived]));
            }
            prop_assert!(tracker.is_consistent());
        }
        for (source, derived) in tracker.forward_map() {
            for d in derived {
                prop_assert!(tracker.backward_derivations(d).any(|s| s == source));
            }
        }
    }
}

#[test]
fn opposite_infinities_do_not_add() {
    assert!(Weight::POS_INFINITY.add(Weight::NEG_INFINITY).is_err());
    assert!(Weight::NEG_INFINITY.add(Weight::POS_INFINITY).is_err());
}
