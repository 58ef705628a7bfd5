//! Pairwise relation matching.
//!
//! Every [`Relation`] compiles to a list of [`BoundaryConstraint`]s of the form
//! `min <= to - from <= max` over the start and finish boundaries of the two
//! intervals. Strict orderings use [`Weight::POS_EPSILON`] as their lower
//! bound. Imprecise boundaries are matched by possibility: a constraint holds
//! if some choice of boundary values within the intervals' bounds satisfies it.

use serde::{Deserialize, Serialize};

use crate::definition::{AbstractionDefinition, Bound, Relation, TemporalRelation};
use crate::error::ArithmeticError;
use crate::time::Interval;
use crate::weight::Weight;

/// Which interval of the pair a boundary belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Lhs,
    Rhs,
}

/// Start or finish of an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    Start,
    Finish,
}

/// One boundary of one side of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Boundary {
    pub side: Side,
    pub endpoint: Endpoint,
}

impl Boundary {
    pub const LHS_START: Self = Self::new(Side::Lhs, Endpoint::Start);
    pub const LHS_FINISH: Self = Self::new(Side::Lhs, Endpoint::Finish);
    pub const RHS_START: Self = Self::new(Side::Rhs, Endpoint::Start);
    pub const RHS_FINISH: Self = Self::new(Side::Rhs, Endpoint::Finish);

    #[must_use]
    pub const fn new(side: Side, endpoint: Endpoint) -> Self {
        Self { side, endpoint }
    }

    /// Earliest and latest value of this boundary.
    fn range(self, lhs: &Interval, rhs: &Interval) -> (Weight, Weight) {
        let interval = match self.side {
            Side::Lhs => lhs,
            Side::Rhs => rhs,
        };
        match self.endpoint {
            Endpoint::Start => interval.start(),
            Endpoint::Finish => interval.finish(),
        }
    }
}

/// `bound.min <= to - from <= bound.max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundaryConstraint {
    pub from: Boundary,
    pub to: Boundary,
    pub bound: Bound,
}

impl BoundaryConstraint {
    #[must_use]
    pub const fn new(from: Boundary, to: Boundary, bound: Bound) -> Self {
        Self { from, to, bound }
    }

    /// Whether some placement of the boundaries satisfies the constraint.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] from boundary subtraction.
    pub fn is_satisfiable(&self, lhs: &Interval, rhs: &Interval) -> Result<bool, ArithmeticError> {
        let (from_min, from_max) = self.from.range(lhs, rhs);
        let (to_min, to_max) = self.to.range(lhs, rhs);
        let lo = to_min.subtract(from_max)?;
        let hi = to_max.subtract(from_min)?;
        Ok(self.bound.intersects(lo, hi))
    }
}

const EPS: Weight = Weight::POS_EPSILON;
const NEG_EPS: Weight = Weight::NEG_EPSILON;

fn strictly_after(from: Boundary, to: Boundary) -> BoundaryConstraint {
    BoundaryConstraint::new(from, to, Bound::at_least(EPS))
}

fn strictly_before(from: Boundary, to: Boundary) -> BoundaryConstraint {
    BoundaryConstraint::new(from, to, Bound::at_most(NEG_EPS))
}

fn equal(from: Boundary, to: Boundary) -> BoundaryConstraint {
    BoundaryConstraint::new(from, to, Bound::exactly(Weight::ZERO))
}

/// Boundary constraints expressing a qualitative ordering.
#[must_use]
pub fn ordering_constraints(ordering: TemporalRelation) -> Vec<BoundaryConstraint> {
    use Boundary as B;
    match ordering {
        TemporalRelation::Before => vec![strictly_after(B::LHS_FINISH, B::RHS_START)],
        TemporalRelation::Meets => vec![equal(B::LHS_FINISH, B::RHS_START)],
        TemporalRelation::Overlaps => vec![
            strictly_after(B::LHS_START, B::RHS_START),
            strictly_before(B::LHS_FINISH, B::RHS_START),
            strictly_after(B::LHS_FINISH, B::RHS_FINISH),
        ],
        TemporalRelation::Starts => vec![
            equal(B::LHS_START, B::RHS_START),
            strictly_after(B::LHS_FINISH, B::RHS_FINISH),
        ],
        TemporalRelation::During => vec![
            strictly_before(B::LHS_START, B::RHS_START),
            strictly_after(B::LHS_FINISH, B::RHS_FINISH),
        ],
        TemporalRelation::Finishes => vec![
            equal(B::LHS_FINISH, B::RHS_FINISH),
            strictly_before(B::LHS_START, B::RHS_START),
        ],
        TemporalRelation::Equals => vec![
            equal(B::LHS_START, B::RHS_START),
            equal(B::LHS_FINISH, B::RHS_FINISH),
        ],
        TemporalRelation::After => vec![strictly_before(B::LHS_START, B::RHS_FINISH)],
        TemporalRelation::MetBy => vec![equal(B::LHS_START, B::RHS_FINISH)],
        TemporalRelation::OverlappedBy => vec![
            strictly_before(B::LHS_START, B::RHS_START),
            strictly_after(B::LHS_START, B::RHS_FINISH),
            strictly_before(B::LHS_FINISH, B::RHS_FINISH),
        ],
        TemporalRelation::StartedBy => vec![
            equal(B::LHS_START, B::RHS_START),
            strictly_before(B::LHS_FINISH, B::RHS_FINISH),
        ],
        TemporalRelation::Contains => vec![
            strictly_after(B::LHS_START, B::RHS_START),
            strictly_before(B::LHS_FINISH, B::RHS_FINISH),
        ],
        TemporalRelation::FinishedBy => vec![
            equal(B::LHS_FINISH, B::RHS_FINISH),
            strictly_after(B::LHS_START, B::RHS_START),
        ],
        TemporalRelation::BeforeOrOverlaps => vec![
            strictly_after(B::LHS_START, B::RHS_START),
            strictly_after(B::LHS_FINISH, B::RHS_FINISH),
        ],
        TemporalRelation::Any => Vec::new(),
    }
}

/// Full constraint list of a relation: its ordering plus every bounded metric.
#[must_use]
pub fn compile(relation: &Relation) -> Vec<BoundaryConstraint> {
    use Boundary as B;
    let mut constraints = ordering_constraints(relation.ordering);
    let metrics = [
        (B::LHS_FINISH, B::RHS_START, relation.gap),
        (B::LHS_START, B::RHS_START, relation.start_distance),
        (B::LHS_FINISH, B::RHS_FINISH, relation.finish_distance),
        (B::LHS_START, B::RHS_FINISH, relation.span),
        (B::LHS_START, B::LHS_FINISH, relation.lhs_duration),
        (B::RHS_START, B::RHS_FINISH, relation.rhs_duration),
    ];
    constraints.extend(
        metrics
            .into_iter()
            .filter(|(_, _, bound)| !bound.is_unbounded())
            .map(|(from, to, bound)| BoundaryConstraint::new(from, to, bound)),
    );
    constraints
}

/// A relation compiled for the roles at `lhs` and `rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRelation {
    pub lhs: usize,
    pub rhs: usize,
    pub constraints: Vec<BoundaryConstraint>,
}

impl CompiledRelation {
    /// Compiles every relation declared by an abstraction.
    #[must_use]
    pub fn for_abstraction(def: &AbstractionDefinition) -> Vec<Self> {
        def.relations
            .iter()
            .map(|decl| Self {
                lhs: decl.lhs,
                rhs: decl.rhs,
                constraints: compile(&decl.relation),
            })
            .collect()
    }

    /// Returns true if this relation constrains role `role`.
    #[must_use]
    pub const fn involves(&self, role: usize) -> bool {
        self.lhs == role || self.rhs == role
    }

    /// Checks the relation against the intervals bound to its two roles.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] from boundary subtraction.
    pub fn matches(&self, lhs: &Interval, rhs: &Interval) -> Result<bool, ArithmeticError> {
        satisfies_all(&self.constraints, lhs, rhs)
    }
}

fn satisfies_all(constraints: &[BoundaryConstraint], lhs: &Interval, rhs: &Interval) -> Result<bool, ArithmeticError> {
    for constraint in constraints {
        if !constraint.is_satisfiable(lhs, rhs)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluates declared relations against pairs of intervals.
///
/// Only the declared direction is evaluated: `A before B` says nothing about
/// the pair `(B, A)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationMatcher;

impl RelationMatcher {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns true if `relation` holds from `lhs` to `rhs`.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] from boundary subtraction.
    pub fn matches(&self, relation: &Relation, lhs: &Interval, rhs: &Interval) -> Result<bool, ArithmeticError> {
        satisfies_all(&compile(relation), lhs, rhs)
    }
}

/// Simple temporal network over the boundaries of an abstraction's roles.
///
/// Node `2r` is the start of role `r`, node `2r + 1` its finish. The distance
/// matrix holds the tightest known upper bound on `x_to - x_from`.
#[derive(Debug, Clone)]
pub struct RelationNetwork {
    nodes: usize,
    distances: Vec<Weight>,
}

impl RelationNetwork {
    /// Assembles the network of an abstraction: every role finishes no
    /// earlier than it starts, honours its duration bound, and every declared
    /// relation contributes its boundary constraints.
    #[must_use]
    pub fn for_abstraction(def: &AbstractionDefinition) -> Self {
        let nodes = def.arity() * 2;
        let mut network = Self {
            nodes,
            distances: vec![Weight::PosInfinity; nodes * nodes],
        };
        for i in 0..nodes {
            network.distances[i * nodes + i] = Weight::ZERO;
        }

        for (role, ext) in def.abstracted_from.iter().enumerate() {
            let bound = Bound::at_least(Weight::ZERO);
            network.tighten(2 * role, 2 * role + 1, bound);
            if ext.has_duration_bound() {
                network.tighten(2 * role, 2 * role + 1, ext.duration_bound());
            }
        }

        for compiled in CompiledRelation::for_abstraction(def) {
            for constraint in &compiled.constraints {
                let node = |b: Boundary| {
                    let role = match b.side {
                        Side::Lhs => compiled.lhs,
                        Side::Rhs => compiled.rhs,
                    };
                    2 * role + usize::from(b.endpoint == Endpoint::Finish)
                };
                network.tighten(node(constraint.from), node(constraint.to), constraint.bound);
            }
        }
        network
    }

    fn tighten(&mut self, from: usize, to: usize, bound: Bound) {
        let forward = from * self.nodes + to;
        let backward = to * self.nodes + from;
        self.distances[forward] = self.distances[forward].min(bound.max);
        self.distances[backward] = self.distances[backward].min(bound.min.invert_sign());
    }

    /// Runs Floyd–Warshall and reports whether the network admits a solution.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] if bounds combine opposite infinities.
    pub fn is_consistent(mut self) -> Result<bool, ArithmeticError> {
        let n = self.nodes;
        for k in 0..n {
            for i in 0..n {
                let ik = self.distances[i * n + k];
                if ik == Weight::PosInfinity {
                    continue;
                }
                for j in 0..n {
                    let kj = self.distances[k * n + j];
                    if kj == Weight::PosInfinity {
                        continue;
                    }
                    let through = ik.add(kj)?;
                    if through < self.distances[i * n + j] {
                        self.distances[i * n + j] = through;
                    }
                }
            }
        }
        Ok((0..n).all(|i| self.distances[i * n + i] >= Weight::ZERO))
    }
}
