//! The fixed-point loop of one subject.
//!
//! Every committed proposition is pinned into each role it satisfies and
//! searched against the propositions committed before it, so a tuple is
//! found exactly once, when its latest member arrives. Found tuples become
//! activations; the resolver picks which fires next. Firing commits the
//! derived proposition, which starts the next propagation.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use super::{subject_failed, SubjectResult};
use crate::config::EngineConfig;
use crate::definition::AbstractionDefinition;
use crate::derivation::DerivationTracker;
use crate::engine::CancellationToken;
use crate::error::{EpisodicResult, ExecutionError, MatchingError};
use crate::inference::{Agenda, DerivationConflictResolver};
use crate::knowledge::{KnowledgeBase, RoleRef};
use crate::matcher::PropositionMatcher;
use crate::pattern::{derived_id, AbstractionPatternFinder, Match};
use crate::proposition::{Proposition, PropositionId, PropositionKind};
use crate::time::Interval;

pub(super) struct FixedPoint<'a> {
    kb: &'a KnowledgeBase,
    config: &'a EngineConfig,
    key: &'a str,
    matcher: PropositionMatcher<'a>,
    finder: AbstractionPatternFinder<'a>,
    agenda: Agenda,
    tracker: DerivationTracker,
    committed: Vec<Proposition>,
    ids: HashSet<PropositionId>,
    /// Arrival sequence of each committed proposition.
    arrival: HashMap<PropositionId, u64>,
    /// Committed propositions satisfying each role: abstraction -> role -> indices.
    filling: Vec<Vec<Vec<usize>>>,
    /// Abstractions disabled for this subject after an arithmetic failure.
    disabled: HashSet<usize>,
    propagation: u64,
}

impl<'a> FixedPoint<'a> {
    pub(super) fn new(kb: &'a KnowledgeBase, config: &'a EngineConfig, key: &'a str) -> Self {
        let filling = kb
            .abstractions()
            .iter()
            .map(|def| vec![Vec::new(); def.arity()])
            .collect();
        Self {
            kb,
            config,
            key,
            matcher: PropositionMatcher::new(kb, config.memoize_matches),
            finder: AbstractionPatternFinder::new(kb),
            agenda: Agenda::new(),
            tracker: DerivationTracker::new(),
            committed: Vec::new(),
            ids: HashSet::new(),
            arrival: HashMap::new(),
            filling,
            disabled: HashSet::new(),
            propagation: 0,
        }
    }

    pub(super) fn run(mut self, raw: Vec<Proposition>, cancel: &CancellationToken) -> EpisodicResult<SubjectResult> {
        // The raw load is one propagation.
        self.propagation = 1;
        for prop in raw {
            if self.ids.contains(&prop.id) {
                return Err(subject_failed(self.key, format!("proposition {} appears more than once", prop.id)));
            }
            if prop.kind.is_temporal() && prop.interval.is_none() {
                return Err(subject_failed(
                    self.key,
                    format!("{} proposition {} has no interval", prop.kind, prop.id),
                ));
            }
            self.commit(prop);
        }

        let resolver = DerivationConflictResolver::new(self.kb, self.config.dependency_policy);
        let mut firings = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled {
                    key: self.key.to_string(),
                }
                .into());
            }
            let Some(activation) = self.agenda.pop_next(&resolver) else {
                break;
            };
            if self.disabled.contains(&activation.abstraction) || self.ids.contains(&activation.found.derived.id) {
                continue;
            }
            if self.blocked_by_solid(&activation.found) {
                debug!(
                    abstraction = %activation.abstraction_id(),
                    "solid abstraction already covers this stretch; not committed"
                );
                continue;
            }

            firings += 1;
            if firings > self.config.max_firings_per_subject {
                return Err(ExecutionError::FixedPointLimitExceeded {
                    key: self.key.to_string(),
                    limit: self.config.max_firings_per_subject,
                }
                .into());
            }

            self.propagation += 1;
            debug!(
                abstraction = %activation.abstraction_id(),
                salience = activation.salience,
                propagation = activation.propagation,
                recency = activation.recency,
                "fired"
            );
            let Match { derived, sources, .. } = activation.found;
            self.tracker.record_derivation(&sources, derived.id);
            self.commit(derived);
        }

        self.concatenate();
        Ok(self.finish())
    }

    /// Adds `prop` to the working set and queues every tuple it completes.
    fn commit(&mut self, prop: Proposition) {
        let seq = self.committed.len() as u64;
        self.arrival.insert(prop.id, seq);

        let kb = self.kb;
        let mut satisfied: Vec<RoleRef> = Vec::new();
        for &role in kb.roles_accepting(&prop.kind_id) {
            if self.disabled.contains(&role.abstraction) {
                continue;
            }
            match self.matcher.matches_role(role, &prop) {
                Ok(true) => satisfied.push(role),
                Ok(false) => {}
                Err(source) => {
                    let error = MatchingError::Arithmetic {
                        abstraction: kb.abstractions()[role.abstraction].id.clone(),
                        source,
                    };
                    self.disable(error, role.abstraction);
                }
            }
        }

        let mut found: Vec<Match> = Vec::new();
        for role in &satisfied {
            if self.disabled.contains(&role.abstraction) {
                continue;
            }
            let candidates: Vec<Vec<&Proposition>> = self.filling[role.abstraction]
                .iter()
                .map(|indices| indices.iter().map(|&i| &self.committed[i]).collect())
                .collect();
            match self.finder.find_with(role.abstraction, role.role, &prop, &candidates) {
                Ok(matches) => found.extend(matches),
                Err(e) => self.disable(e, role.abstraction),
            }
        }

        let index = self.committed.len();
        for role in &satisfied {
            self.filling[role.abstraction][role.role].push(index);
        }
        self.ids.insert(prop.id);
        self.committed.push(prop);

        for m in found {
            if self.disabled.contains(&m.abstraction) {
                continue;
            }
            let recency = m
                .sources
                .iter()
                .filter_map(|id| self.arrival.get(id))
                .copied()
                .max()
                .unwrap_or(seq);
            let salience = kb.abstractions()[m.abstraction].salience;
            self.agenda.push(salience, self.propagation, recency, m);
        }
    }

    fn disable(&mut self, error: MatchingError, abstraction: usize) {
        if self.disabled.insert(abstraction) {
            warn!(key = %self.key, error = %error, "abstraction disabled for subject");
        }
    }

    /// True if `found` belongs to a solid abstraction and properly overlaps
    /// one of its committed instances.
    fn blocked_by_solid(&self, found: &Match) -> bool {
        let def = &self.kb.abstractions()[found.abstraction];
        if !def.solid {
            return false;
        }
        let Some(interval) = &found.derived.interval else {
            return false;
        };
        self.committed
            .iter()
            .filter(|p| p.kind_id == def.id)
            .filter_map(|p| p.interval.as_ref())
            .any(|other| interval.overlaps_properly(other))
    }

    /// Coalesces overlapping or meeting instances of each concatenable
    /// abstraction into one additional proposition.
    ///
    /// Runs once, after the fixed point. Coalesced propositions are not
    /// committed through the agenda, so abstractions reading a concatenable
    /// abstraction only ever match its individual instances.
    fn concatenate(&mut self) {
        let kb = self.kb;
        let mut additions: Vec<(Proposition, Vec<PropositionId>)> = Vec::new();
        for &abstraction in kb.evaluation_order() {
            let def = &kb.abstractions()[abstraction];
            if !def.concatenable || self.disabled.contains(&abstraction) {
                continue;
            }
            let mut instances: Vec<&Proposition> = self
                .committed
                .iter()
                .filter(|p| p.kind_id == def.id && p.interval.is_some())
                .collect();
            instances.sort_by_key(|p| p.interval.map(|i| (i.start(), i.finish())));

            let mut run: Vec<&Proposition> = Vec::new();
            let mut covered = None;
            for p in instances {
                let Some(interval) = p.interval else {
                    continue;
                };
                match covered {
                    Some(c) if interval.overlaps_or_meets(&c) => {
                        covered = Some(interval.union(&c));
                        run.push(p);
                    }
                    _ => {
                        flush_run(def, &run, covered, &mut additions);
                        run = vec![p];
                        covered = Some(interval);
                    }
                }
            }
            flush_run(def, &run, covered, &mut additions);
        }

        for (prop, sources) in additions {
            if self.ids.contains(&prop.id) {
                continue;
            }
            debug!(abstraction = %prop.kind_id, members = sources.len(), "concatenated");
            self.tracker.record_derivation(&sources, prop.id);
            self.ids.insert(prop.id);
            self.committed.push(prop);
        }
    }

    fn finish(self) -> SubjectResult {
        let references: BTreeMap<_, _> = self
            .committed
            .iter()
            .filter(|p| !p.references.is_empty())
            .map(|p| (p.id, p.references.clone()))
            .collect();
        debug!(memoized = self.matcher.memoized(), "fixed point reached");
        SubjectResult {
            propositions: self.committed,
            derivations: self.tracker,
            references,
        }
    }
}

fn flush_run(
    def: &AbstractionDefinition,
    run: &[&Proposition],
    covered: Option<Interval>,
    additions: &mut Vec<(Proposition, Vec<PropositionId>)>,
) {
    if run.len() < 2 {
        return;
    }
    let Some(interval) = covered else {
        return;
    };
    let sources: Vec<PropositionId> = run.iter().map(|p| p.id).collect();
    let prop = Proposition {
        id: derived_id(def, &sources),
        kind_id: def.id.clone(),
        kind: PropositionKind::Abstraction,
        interval: Some(interval),
        value: def.derived_value.clone(),
        properties: BTreeMap::new(),
        references: BTreeMap::new(),
    };
    additions.push((prop, sources));
}
