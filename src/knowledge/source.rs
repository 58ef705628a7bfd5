//! Knowledge source interface and an in-memory implementation.

use std::collections::BTreeSet;

use crate::definition::{AbstractionDefinition, PropositionDefinition};
use crate::error::EpisodicResult;
use crate::proposition::KindId;

/// Read access to proposition and abstraction definitions.
///
/// Implementations may be backed by files, databases or remote services; the
/// engine reads everything it needs once, in [`KnowledgeBase::load`].
///
/// [`KnowledgeBase::load`]: super::KnowledgeBase::load
pub trait KnowledgeSource: Send + Sync {
    /// Ids of all abstraction definitions, in declaration order.
    fn abstraction_ids(&self) -> EpisodicResult<Vec<KindId>>;

    /// Ids of all non-derived proposition definitions, in declaration order.
    fn proposition_ids(&self) -> EpisodicResult<Vec<KindId>>;

    fn read_abstraction_definition(&self, id: &KindId) -> EpisodicResult<Option<AbstractionDefinition>>;

    fn read_proposition_definition(&self, id: &KindId) -> EpisodicResult<Option<PropositionDefinition>>;

    /// Direct is-a parents of a kind.
    fn read_is_a(&self, id: &KindId) -> EpisodicResult<Vec<KindId>>;

    /// Abstractions that read a kind directly in one of their roles.
    fn read_abstracted_into(&self, id: &KindId) -> EpisodicResult<Vec<KindId>>;
}

/// Knowledge source holding definitions in memory.
///
/// Duplicate ids are kept as given; [`KnowledgeBase::load`] rejects them.
///
/// [`KnowledgeBase::load`]: super::KnowledgeBase::load
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeSource {
    propositions: Vec<PropositionDefinition>,
    abstractions: Vec<AbstractionDefinition>,
}

impl InMemoryKnowledgeSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_proposition(mut self, def: PropositionDefinition) -> Self {
        self.propositions.push(def);
        self
    }

    #[must_use]
    pub fn with_abstraction(mut self, def: AbstractionDefinition) -> Self {
        self.abstractions.push(def);
        self
    }

    pub fn add_proposition(&mut self, def: PropositionDefinition) {
        self.propositions.push(def);
    }

    pub fn add_abstraction(&mut self, def: AbstractionDefinition) {
        self.abstractions.push(def);
    }
}

impl KnowledgeSource for InMemoryKnowledgeSource {
    fn abstraction_ids(&self) -> EpisodicResult<Vec<KindId>> {
        Ok(self.abstractions.iter().map(|a| a.id.clone()).collect())
    }

    fn proposition_ids(&self) -> EpisodicResult<Vec<KindId>> {
        Ok(self.propositions.iter().map(|p| p.id.clone()).collect())
    }

    fn read_abstraction_definition(&self, id: &KindId) -> EpisodicResult<Option<AbstractionDefinition>> {
        Ok(self.abstractions.iter().find(|a| &a.id == id).cloned())
    }

    fn read_proposition_definition(&self, id: &KindId) -> EpisodicResult<Option<PropositionDefinition>> {
        Ok(self.propositions.iter().find(|p| &p.id == id).cloned())
    }

    fn read_is_a(&self, id: &KindId) -> EpisodicResult<Vec<KindId>> {
        Ok(self
            .propositions
            .iter()
            .find(|p| &p.id == id)
            .map(|p| p.is_a.clone())
            .unwrap_or_default())
    }

    fn read_abstracted_into(&self, id: &KindId) -> EpisodicResult<Vec<KindId>> {
        let readers: BTreeSet<&KindId> = self
            .abstractions
            .iter()
            .filter(|a| a.abstracted_from.iter().any(|d| &d.kind_id == id))
            .map(|a| &a.id)
            .collect();
        Ok(readers.into_iter().cloned().collect())
    }
}
