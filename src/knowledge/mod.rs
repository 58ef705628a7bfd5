//! Validated, read-only knowledge base.
//!
//! [`KnowledgeBase::load`] reads every definition from a [`KnowledgeSource`]
//! once and checks it:
//!
//! - identifiers are well formed and unique across both namespaces;
//! - every kind named by a role or an is-a link exists;
//! - the abstraction dependency graph is acyclic;
//! - each abstraction's relation network is satisfiable.
//!
//! These failures are fatal. A definition with a malformed bound (`min > max`)
//! is only rejected, together with every definition that depends on it, and
//! the rest of the knowledge base loads. The result is immutable and shared
//! across worker threads.

mod source;

pub use source::{InMemoryKnowledgeSource, KnowledgeSource};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::definition::{AbstractionDefinition, ExtendedPropositionDefinition, PropositionDefinition};
use crate::error::{EpisodicError, EpisodicResult, MatchingError, ValidationError};
use crate::graph::{Cycle, DependencyGraph};
use crate::matcher::{CompiledRelation, RelationNetwork};
use crate::proposition::KindId;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_.:-]*$";

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

fn validate_identifier(id: &KindId) -> EpisodicResult<()> {
    let re = match IDENTIFIER.get() {
        Some(re) => re,
        None => {
            let compiled = Regex::new(IDENTIFIER_PATTERN)
                .map_err(|e| EpisodicError::internal(format!("identifier pattern: {e}")))?;
            IDENTIFIER.get_or_init(|| compiled)
        }
    };
    if re.is_match(id.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier { id: id.to_string() }.into())
    }
}

/// A role of a loaded abstraction, by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleRef {
    /// Load-order index of the abstraction.
    pub abstraction: usize,
    /// Index of the role within the abstraction.
    pub role: usize,
}

/// Immutable, validated set of definitions.
#[derive(Debug)]
pub struct KnowledgeBase {
    propositions: HashMap<KindId, PropositionDefinition>,
    abstractions: Vec<AbstractionDefinition>,
    index: HashMap<KindId, usize>,
    relations: Vec<Vec<CompiledRelation>>,
    graph: DependencyGraph<KindId, usize>,
    parents: HashMap<KindId, Vec<KindId>>,
    evaluation_order: Vec<usize>,
    topological_rank: Vec<usize>,
    dependencies: Vec<HashSet<usize>>,
    active: Vec<bool>,
    rejected: Vec<MatchingError>,
    accepting: HashMap<KindId, Vec<RoleRef>>,
}

impl KnowledgeBase {
    /// Reads and validates every definition of `source`.
    ///
    /// # Errors
    ///
    /// Returns `EpisodicError::Validation` for configuration errors, or any
    /// error raised by the source itself.
    pub fn load(source: &dyn KnowledgeSource) -> EpisodicResult<Self> {
        let proposition_ids = source.proposition_ids()?;
        let abstraction_ids = source.abstraction_ids()?;

        let mut known: HashSet<KindId> = HashSet::new();
        for id in proposition_ids.iter().chain(&abstraction_ids) {
            validate_identifier(id)?;
            if !known.insert(id.clone()) {
                return Err(ValidationError::DuplicateDefinition { id: id.clone() }.into());
            }
        }

        let mut propositions = HashMap::with_capacity(proposition_ids.len());
        let mut parents: HashMap<KindId, Vec<KindId>> = HashMap::new();
        for id in &proposition_ids {
            let def = source
                .read_proposition_definition(id)?
                .ok_or_else(|| missing(id, id))?;
            let is_a = source.read_is_a(id)?;
            for parent in &is_a {
                if !known.contains(parent) {
                    return Err(missing(parent, id).into());
                }
            }
            if !is_a.is_empty() {
                parents.insert(id.clone(), is_a);
            }
            propositions.insert(id.clone(), def);
        }

        let mut abstractions = Vec::with_capacity(abstraction_ids.len());
        let mut index = HashMap::with_capacity(abstraction_ids.len());
        for (i, id) in abstraction_ids.iter().enumerate() {
            let def = source
                .read_abstraction_definition(id)?
                .ok_or_else(|| missing(id, id))?;
            for role in &def.abstracted_from {
                if !known.contains(&role.kind_id) {
                    return Err(missing(&role.kind_id, id).into());
                }
            }
            index.insert(id.clone(), i);
            abstractions.push(def);
        }

        let graph = build_dependency_graph(source, &abstractions, &index)?;

        // Dependents come first in the sort; evaluation wants inputs first.
        let sorted = graph
            .topological_sort()
            .map_err(|Cycle(cycle)| ValidationError::CyclicDependency { cycle })?;
        let full_order: Vec<usize> = sorted.iter().rev().filter_map(|id| index.get(id).copied()).collect();
        let mut topological_rank = vec![0; abstractions.len()];
        for (rank, &idx) in full_order.iter().enumerate() {
            topological_rank[idx] = rank;
        }

        let dependencies: Vec<HashSet<usize>> = abstractions
            .iter()
            .map(|def| {
                graph
                    .reachable_from(&def.id)
                    .iter()
                    .filter_map(|dep| index.get(dep).copied())
                    .collect()
            })
            .collect();

        let mut active = vec![true; abstractions.len()];
        let mut rejected = Vec::new();
        for &idx in &full_order {
            let def = &abstractions[idx];
            let verdict = check_definition(def)?.or_else(|| {
                let mut deps: Vec<usize> = dependencies[idx].iter().copied().collect();
                deps.sort_by_key(|&d| topological_rank[d]);
                deps.into_iter()
                    .find(|&d| !active[d])
                    .map(|d| MatchingError::RejectedDependency {
                        abstraction: def.id.clone(),
                        dependency: abstractions[d].id.clone(),
                    })
            });
            if let Some(err) = verdict {
                warn!(abstraction = %def.id, error = %err, "abstraction definition rejected");
                active[idx] = false;
                rejected.push(err);
            }
        }

        let relations = abstractions.iter().map(CompiledRelation::for_abstraction).collect();
        let evaluation_order: Vec<usize> = full_order.into_iter().filter(|&i| active[i]).collect();

        let mut kb = Self {
            propositions,
            abstractions,
            index,
            relations,
            graph,
            parents,
            evaluation_order,
            topological_rank,
            dependencies,
            active,
            rejected,
            accepting: HashMap::new(),
        };
        kb.accepting = kb.build_accepting(&known);

        info!(
            propositions = kb.propositions.len(),
            abstractions = kb.abstractions.len(),
            active = kb.evaluation_order.len(),
            rejected = kb.rejected.len(),
            "knowledge base loaded"
        );
        Ok(kb)
    }

    /// Maps every known kind to the active roles it can fill.
    fn build_accepting(&self, known: &HashSet<KindId>) -> HashMap<KindId, Vec<RoleRef>> {
        let mut targets: HashMap<&KindId, Vec<RoleRef>> = HashMap::new();
        for &abstraction in &self.evaluation_order {
            for (role, ext) in self.abstractions[abstraction].abstracted_from.iter().enumerate() {
                targets.entry(&ext.kind_id).or_default().push(RoleRef { abstraction, role });
            }
        }

        let mut accepting = HashMap::new();
        for kind in known {
            let mut roles: Vec<RoleRef> = self
                .ancestors(kind)
                .iter()
                .filter_map(|k| targets.get(k))
                .flatten()
                .copied()
                .collect();
            if roles.is_empty() {
                continue;
            }
            roles.sort_unstable();
            roles.dedup();
            accepting.insert(kind.clone(), roles);
        }
        accepting
    }

    /// `kind` and everything it is-a, transitively.
    fn ancestors<'a>(&'a self, kind: &'a KindId) -> Vec<&'a KindId> {
        let mut seen: Vec<&KindId> = vec![kind];
        let mut queue = VecDeque::from([kind]);
        while let Some(k) = queue.pop_front() {
            for parent in self.parents.get(k).into_iter().flatten() {
                if !seen.contains(&parent) {
                    seen.push(parent);
                    queue.push_back(parent);
                }
            }
        }
        seen
    }

    /// Returns true if a proposition of kind `actual` satisfies a definition
    /// targeting `target`: the same kind, or one that is-a `target`.
    #[must_use]
    pub fn kind_satisfies(&self, actual: &KindId, target: &KindId) -> bool {
        actual == target || self.ancestors(actual).contains(&target)
    }

    /// Every active role a proposition of `kind` may fill, in load order.
    #[must_use]
    pub fn roles_accepting(&self, kind: &KindId) -> &[RoleRef] {
        self.accepting.get(kind).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn abstraction(&self, id: &KindId) -> Option<&AbstractionDefinition> {
        self.index.get(id).map(|&i| &self.abstractions[i])
    }

    #[must_use]
    pub fn abstraction_index(&self, id: &KindId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// All abstractions in load order, including rejected ones.
    #[must_use]
    pub fn abstractions(&self) -> &[AbstractionDefinition] {
        &self.abstractions
    }

    #[must_use]
    pub fn proposition_definition(&self, id: &KindId) -> Option<&PropositionDefinition> {
        self.propositions.get(id)
    }

    /// Returns true if `id` names any definition.
    #[must_use]
    pub fn contains(&self, id: &KindId) -> bool {
        self.propositions.contains_key(id) || self.index.contains_key(id)
    }

    #[must_use]
    pub fn role(&self, role: RoleRef) -> Option<&ExtendedPropositionDefinition> {
        self.abstractions.get(role.abstraction)?.abstracted_from.get(role.role)
    }

    /// Compiled relations of an abstraction.
    #[must_use]
    pub fn relations(&self, abstraction: usize) -> &[CompiledRelation] {
        self.relations.get(abstraction).map_or(&[], Vec::as_slice)
    }

    /// Active abstractions, inputs before dependents.
    #[must_use]
    pub fn evaluation_order(&self) -> &[usize] {
        &self.evaluation_order
    }

    /// Position of an abstraction in the topological order over all
    /// abstractions; inputs rank lower than their dependents.
    #[must_use]
    pub fn topological_rank(&self, abstraction: usize) -> usize {
        self.topological_rank.get(abstraction).copied().unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_active(&self, abstraction: usize) -> bool {
        self.active.get(abstraction).copied().unwrap_or(false)
    }

    /// Definitions rejected during load.
    #[must_use]
    pub fn rejected(&self) -> &[MatchingError] {
        &self.rejected
    }

    /// Returns true if abstraction `a` reads `b`'s output, directly or transitively.
    #[must_use]
    pub fn depends_on_index(&self, a: usize, b: usize) -> bool {
        self.dependencies.get(a).is_some_and(|deps| deps.contains(&b))
    }

    /// Abstractions whose output `abstraction` reads, directly or transitively.
    pub fn dependencies_of(&self, abstraction: usize) -> impl Iterator<Item = usize> + '_ {
        self.dependencies.get(abstraction).into_iter().flatten().copied()
    }

    /// Returns true if abstraction `a` reads `b`'s output, directly or transitively.
    #[must_use]
    pub fn depends_on(&self, a: &KindId, b: &KindId) -> bool {
        match (self.index.get(a), self.index.get(b)) {
            (Some(&a), Some(&b)) => self.depends_on_index(a, b),
            _ => false,
        }
    }

    /// Graph with an edge `A -> B` whenever A reads B; the weight counts the
    /// roles of A that read B.
    #[must_use]
    pub fn dependency_graph(&self) -> &DependencyGraph<KindId, usize> {
        &self.graph
    }
}

fn missing(id: &KindId, referenced_by: &KindId) -> ValidationError {
    ValidationError::MissingDefinition {
        id: id.clone(),
        referenced_by: referenced_by.clone(),
    }
}

fn build_dependency_graph(
    source: &dyn KnowledgeSource,
    abstractions: &[AbstractionDefinition],
    index: &HashMap<KindId, usize>,
) -> EpisodicResult<DependencyGraph<KindId, usize>> {
    let mut graph = DependencyGraph::new();
    for def in abstractions {
        graph.add_vertex(def.id.clone());
    }
    for input in abstractions {
        for reader in source.read_abstracted_into(&input.id)? {
            let Some(&r) = index.get(&reader) else {
                return Err(missing(&reader, &input.id).into());
            };
            let roles = abstractions[r]
                .abstracted_from
                .iter()
                .filter(|d| d.kind_id == input.id)
                .count();
            graph.set_edge(&reader, &input.id, Some(roles.max(1)));
        }
    }
    Ok(graph)
}

/// Per-definition checks. Malformed bounds and arithmetic failures reject the
/// definition; an unsatisfiable relation network is fatal.
fn check_definition(def: &AbstractionDefinition) -> Result<Option<MatchingError>, ValidationError> {
    for ext in &def.abstracted_from {
        let bound = ext.duration_bound();
        if bound.is_malformed() {
            return Ok(Some(MatchingError::MalformedBound {
                abstraction: def.id.clone(),
                field: format!("{}.duration", ext.role),
                min: bound.min,
                max: bound.max,
            }));
        }
    }

    for decl in &def.relations {
        for (name, bound) in decl.relation.bounds() {
            if bound.is_malformed() {
                return Ok(Some(MatchingError::MalformedBound {
                    abstraction: def.id.clone(),
                    field: format!(
                        "{}->{}.{name}",
                        def.abstracted_from[decl.lhs].role, def.abstracted_from[decl.rhs].role
                    ),
                    min: bound.min,
                    max: bound.max,
                }));
            }
        }
    }

    match RelationNetwork::for_abstraction(def).is_consistent() {
        Ok(true) => Ok(None),
        Ok(false) => Err(ValidationError::InconsistentRelations {
            abstraction: def.id.clone(),
        }),
        Err(source) => Ok(Some(MatchingError::Arithmetic {
            abstraction: def.id.clone(),
            source,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Bound, Relation, TemporalRelation};
    use crate::proposition::PropositionKind;
    use crate::weight::Weight;

    fn event(id: &str) -> PropositionDefinition {
        PropositionDefinition::new(id, PropositionKind::Event)
    }

    fn abstraction(id: &str, inputs: &[&str]) -> AbstractionDefinition {
        inputs
            .iter()
            .enumerate()
            .fold(AbstractionDefinition::builder(id), |b, (i, kind)| {
                b.abstracted_from(ExtendedPropositionDefinition::new(format!("r{i}"), *kind))
            })
            .build()
            .unwrap()
    }

    fn layered() -> InMemoryKnowledgeSource {
        InMemoryKnowledgeSource::new()
            .with_proposition(event("Fever"))
            .with_proposition(event("Chills"))
            .with_abstraction(abstraction("Sepsis", &["FeverEpisode", "Chills"]))
            .with_abstraction(abstraction("FeverEpisode", &["Fever", "Chills"]))
            .with_abstraction(abstraction("Icu", &["Sepsis"]))
    }

    #[test]
    fn test_evaluation_order_puts_inputs_first() {
        let kb = KnowledgeBase::load(&layered()).unwrap();
        let order: Vec<&str> = kb
            .evaluation_order()
            .iter()
            .map(|&i| kb.abstractions()[i].id.as_str())
            .collect();
        assert_eq!(order, vec!["FeverEpisode", "Sepsis", "Icu"]);
        assert!(kb.depends_on(&"Icu".into(), &"FeverEpisode".into()));
        assert!(!kb.depends_on(&"FeverEpisode".into(), &"Icu".into()));
        assert_eq!(kb.dependency_graph().edge(&"Sepsis".into(), &"FeverEpisode".into()), Some(&1));
    }

    #[test]
    fn test_cyclic_dependency_is_fatal() {
        let source = InMemoryKnowledgeSource::new()
            .with_proposition(event("Fever"))
            .with_abstraction(abstraction("A", &["B", "Fever"]))
            .with_abstraction(abstraction("B", &["A"]));
        let err = KnowledgeBase::load(&source).unwrap_err();
        let EpisodicError::Validation(ValidationError::CyclicDependency { cycle }) = err else {
            panic!("expected cycle, got {err}");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 3);
    }

    #[test]
    fn test_missing_definition_names_referrer() {
        let source = InMemoryKnowledgeSource::new().with_abstraction(abstraction("FeverEpisode", &["Fever"]));
        let err = KnowledgeBase::load(&source).unwrap_err();
        assert!(matches!(
            err,
            EpisodicError::Validation(ValidationError::MissingDefinition { ref id, ref referenced_by })
                if id.as_str() == "Fever" && referenced_by.as_str() == "FeverEpisode"
        ));
    }

    #[test]
    fn test_duplicate_and_invalid_ids() {
        let source = InMemoryKnowledgeSource::new()
            .with_proposition(event("Fever"))
            .with_abstraction(abstraction("Fever", &["Fever"]));
        assert!(matches!(
            KnowledgeBase::load(&source).unwrap_err(),
            EpisodicError::Validation(ValidationError::DuplicateDefinition { .. })
        ));

        let source = InMemoryKnowledgeSource::new().with_proposition(event("9lives"));
        assert!(matches!(
            KnowledgeBase::load(&source).unwrap_err(),
            EpisodicError::Validation(ValidationError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_inconsistent_relations_are_fatal() {
        let def = AbstractionDefinition::builder("Impossible")
            .abstracted_from(ExtendedPropositionDefinition::new("a", "Fever"))
            .abstracted_from(ExtendedPropositionDefinition::new("b", "Chills"))
            .relation("a", "b", Relation::new(TemporalRelation::Before))
            .relation("b", "a", Relation::new(TemporalRelation::Before))
            .build()
            .unwrap();
        let source = InMemoryKnowledgeSource::new()
            .with_proposition(event("Fever"))
            .with_proposition(event("Chills"))
            .with_abstraction(def);
        assert!(matches!(
            KnowledgeBase::load(&source).unwrap_err(),
            EpisodicError::Validation(ValidationError::InconsistentRelations { .. })
        ));
    }

    #[test]
    fn test_malformed_bound_rejects_definition_and_dependents() {
        let broken = AbstractionDefinition::builder("FeverEpisode")
            .abstracted_from(ExtendedPropositionDefinition::new("fever", "Fever"))
            .abstracted_from(ExtendedPropositionDefinition::new("chills", "Chills"))
            .relation(
                "fever",
                "chills",
                Relation::new(TemporalRelation::Before).with_gap(Bound::new(Weight::finite(10), Weight::finite(5))),
            )
            .build()
            .unwrap();
        let source = InMemoryKnowledgeSource::new()
            .with_proposition(event("Fever"))
            .with_proposition(event("Chills"))
            .with_abstraction(broken)
            .with_abstraction(abstraction("Sepsis", &["FeverEpisode"]))
            .with_abstraction(abstraction("ChillsOnly", &["Chills"]));

        let kb = KnowledgeBase::load(&source).unwrap();
        assert_eq!(kb.rejected().len(), 2);
        assert!(matches!(kb.rejected()[0], MatchingError::MalformedBound { ref field, .. } if field == "fever->chills.gap"));
        assert!(matches!(kb.rejected()[1], MatchingError::RejectedDependency { .. }));
        assert_eq!(kb.evaluation_order().len(), 1);
        assert!(kb.is_active(kb.abstraction_index(&"ChillsOnly".into()).unwrap()));
        assert!(kb.roles_accepting(&"Fever".into()).is_empty());
    }

    #[test]
    fn test_is_a_descendants_fill_parent_roles() {
        let source = InMemoryKnowledgeSource::new()
            .with_proposition(PropositionDefinition::new("Temperature", PropositionKind::PrimitiveParameter))
            .with_proposition(
                PropositionDefinition::new("CoreTemperature", PropositionKind::PrimitiveParameter).is_a("Temperature"),
            )
            .with_proposition(
                PropositionDefinition::new("RectalTemperature", PropositionKind::PrimitiveParameter)
                    .is_a("CoreTemperature"),
            )
            .with_abstraction(abstraction("Hyperthermia", &["Temperature"]));
        let kb = KnowledgeBase::load(&source).unwrap();
        assert_eq!(kb.roles_accepting(&"RectalTemperature".into()).len(), 1);
        assert!(kb.kind_satisfies(&"RectalTemperature".into(), &"Temperature".into()));
        assert!(!kb.kind_satisfies(&"Temperature".into(), &"CoreTemperature".into()));
    }

    #[test]
    fn test_missing_is_a_parent_is_fatal() {
        let source = InMemoryKnowledgeSource::new().with_proposition(event("Fever").is_a("Symptom"));
        assert!(matches!(
            KnowledgeBase::load(&source).unwrap_err(),
            EpisodicError::Validation(ValidationError::MissingDefinition { .. })
        ));
    }
}
