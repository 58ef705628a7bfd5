//! Two-stage matching: per-role proposition filters, then pairwise relations.

pub mod proposition;
pub mod relation;

pub use proposition::PropositionMatcher;
pub use relation::{
    compile, ordering_constraints, Boundary, BoundaryConstraint, CompiledRelation, Endpoint, RelationMatcher,
    RelationNetwork, Side,
};
