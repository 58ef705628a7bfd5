//! # episodic - Temporal Abstraction Engine
//!
//! episodic derives higher-level, interval-stamped propositions ("episodes")
//! from raw clinical or event data. A knowledge base of abstraction
//! definitions states which propositions combine, under which temporal
//! relations, into which derived proposition; the engine runs each subject's
//! data to a fixed point and records the provenance of everything it derives.
//!
//! ## Core Concepts
//!
//! - **Proposition**: a timestamped or interval-stamped fact about one subject
//! - **AbstractionDefinition**: roles, relations between them, and the
//!   proposition they derive
//! - **KnowledgeBase**: validated definitions plus their dependency graph
//! - **Activation**: a found tuple waiting to fire; the resolver orders them
//! - **DerivationTracker**: forward and backward provenance maps
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use episodic::*;
//!
//! let source = InMemoryKnowledgeSource::new()
//!     .with_proposition(PropositionDefinition::new("Fever", PropositionKind::Event))
//!     .with_proposition(PropositionDefinition::new("Chills", PropositionKind::Event))
//!     .with_abstraction(
//!         AbstractionDefinition::builder("FeverEpisode")
//!             .abstracted_from(ExtendedPropositionDefinition::new("fever", "Fever"))
//!             .abstracted_from(ExtendedPropositionDefinition::new("chills", "Chills"))
//!             .relation(
//!                 "fever",
//!                 "chills",
//!                 Relation::new(TemporalRelation::BeforeOrOverlaps)
//!                     .with_gap(Bound::at_most(TimeSpan::minutes(120).to_weight())),
//!             )
//!             .build()?,
//!     );
//! let kb = Arc::new(KnowledgeBase::load(&source)?);
//! let engine = DerivationEngine::new(kb, EngineConfig::default())?;
//! let result = engine.process_subject(Subject::new("K1", propositions), &CancellationToken::new())?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Temporal primitives
pub mod proposition;
pub mod time;
pub mod value;
pub mod weight;

// Knowledge
pub mod definition;
pub mod graph;
pub mod knowledge;

// Matching and scheduling
pub mod inference;
pub mod matcher;
pub mod pattern;

// Provenance, storage and execution
pub mod config;
pub mod derivation;
pub mod engine;
pub mod error;
pub mod storage;

pub use config::{EngineConfig, RuntimeConfig};
pub use definition::{
    AbstractionDefinition, AbstractionDefinitionBuilder, Bound, ExtendedPropositionDefinition,
    IntervalCombination, PropertyConstraint, PropositionDefinition, Relation, RelationDeclaration,
    TemporalRelation,
};
pub use derivation::DerivationTracker;
pub use engine::runtime::{SubjectHandle, SubjectRuntime};
pub use engine::{
    CancellationToken, CollectingHandler, DataSource, DerivationEngine, QueryResultsHandler, RunReport, Subject,
    SubjectFailure, SubjectResult,
};
pub use error::{
    ArithmeticError, EpisodicError, EpisodicResult, ExecutionError, MatchingError, ValidationError,
};
pub use graph::{Cycle, DependencyGraph, GraphError, VertexHandle};
pub use inference::{Activation, Agenda, DependencyPolicy, DerivationConflictResolver};
pub use knowledge::{InMemoryKnowledgeSource, KnowledgeBase, KnowledgeSource, RoleRef};
pub use matcher::{PropositionMatcher, RelationMatcher, RelationNetwork};
pub use pattern::{AbstractionPatternFinder, Match};
pub use proposition::{KindId, Proposition, PropositionBuilder, PropositionId, PropositionKind};
pub use storage::{
    CacheConfig, CacheStore, KeyedStore, KeyedStoreExt, StorageError, StoreEnvironment, StoreFlavor, StoreHandle,
};
#[cfg(feature = "persistent")]
pub use storage::{DurableConfig, DurableStore};
pub use time::{Granularity, Interval, TimeSpan};
pub use value::Value;
pub use weight::{Weight, WeightAccumulator};
