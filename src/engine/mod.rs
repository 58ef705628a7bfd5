//! Derivation engine.
//!
//! Subjects are independent: each one's propositions, agenda and derivation
//! tracker are private to the thread processing it. The knowledge base and
//! the store environment are the only shared state, and both are read-only
//! or internally synchronized.

/// Worker pool processing subjects in parallel.
pub mod runtime;
mod subject;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::derivation::DerivationTracker;
use crate::error::{EpisodicError, EpisodicResult, ExecutionError};
use crate::knowledge::KnowledgeBase;
use crate::proposition::{Proposition, PropositionId};
use crate::storage::KeyedStore;

/// Raw propositions of one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub key: String,
    pub propositions: Vec<Proposition>,
}

impl Subject {
    #[must_use]
    pub fn new(key: impl Into<String>, propositions: Vec<Proposition>) -> Self {
        Self {
            key: key.into(),
            propositions,
        }
    }
}

/// Lazy, single-pass sequence of subjects.
///
/// Once a subject has been yielded it is gone; callers that need replay must
/// request the data again from its origin.
pub trait DataSource: Send {
    /// The next subject, `None` once exhausted.
    fn next_subject(&mut self) -> Option<EpisodicResult<Subject>>;
}

impl<I> DataSource for I
where
    I: Iterator<Item = Subject> + Send,
{
    fn next_subject(&mut self) -> Option<EpisodicResult<Subject>> {
        self.next().map(Ok)
    }
}

/// Receives the output of each completed subject.
pub trait QueryResultsHandler: Send + Sync {
    fn handle(&self, key: &str, result: SubjectResult) -> EpisodicResult<()>;
}

/// Everything derived for one subject.
#[derive(Debug, Clone, Default)]
pub struct SubjectResult {
    /// Raw and derived propositions, in commit order.
    pub propositions: Vec<Proposition>,
    /// Forward and backward derivation maps.
    pub derivations: DerivationTracker,
    /// Named references of every proposition that carries any.
    pub references: BTreeMap<PropositionId, BTreeMap<String, Vec<PropositionId>>>,
}

impl SubjectResult {
    /// Derived propositions, in commit order.
    pub fn derived(&self) -> impl Iterator<Item = &Proposition> + '_ {
        self.propositions
            .iter()
            .filter(|p| self.derivations.backward_map().contains_key(&p.id))
    }

    #[must_use]
    pub fn forward(&self) -> &HashMap<PropositionId, BTreeSet<PropositionId>> {
        self.derivations.forward_map()
    }

    #[must_use]
    pub fn backward(&self) -> &HashMap<PropositionId, BTreeSet<PropositionId>> {
        self.derivations.backward_map()
    }

    /// Propositions of kind `kind_id`.
    pub fn of_kind<'a>(&'a self, kind_id: &'a str) -> impl Iterator<Item = &'a Proposition> + 'a {
        self.propositions.iter().filter(move |p| p.kind_id.as_str() == kind_id)
    }
}

/// Handler that keeps every result in memory, keyed by subject.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    results: Mutex<BTreeMap<String, SubjectResult>>,
}

impl CollectingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the collected results, leaving the handler empty.
    pub fn take(&self) -> EpisodicResult<BTreeMap<String, SubjectResult>> {
        let mut results = self
            .results
            .lock()
            .map_err(|_| EpisodicError::internal("result collector lock poisoned"))?;
        Ok(std::mem::take(&mut *results))
    }
}

impl QueryResultsHandler for CollectingHandler {
    fn handle(&self, key: &str, result: SubjectResult) -> EpisodicResult<()> {
        self.results
            .lock()
            .map_err(|_| EpisodicError::internal("result collector lock poisoned"))?
            .insert(key.to_string(), result);
        Ok(())
    }
}

/// Cooperative cancellation, observed between activation firings.
///
/// A child token is cancelled when it or any ancestor is.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire) || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// A token cancelled together with `self`, which can also be cancelled alone.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }
}

/// A subject that did not complete.
#[derive(Debug)]
pub struct SubjectFailure {
    pub key: String,
    pub error: EpisodicError,
}

/// Outcome of a run over a data source.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Subjects whose results reached the handler.
    pub completed: usize,
    /// Propositions derived across completed subjects.
    pub derived: usize,
    /// Subjects abandoned with a subject-local error.
    pub failures: Vec<SubjectFailure>,
    /// Subjects not completed because the run was cancelled.
    pub cancelled: Vec<String>,
}

impl RunReport {
    /// Returns true if every subject seen completed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }

    /// Files one subject's outcome, or returns the error if it must abort
    /// the run.
    fn record(&mut self, key: String, outcome: EpisodicResult<usize>) -> EpisodicResult<()> {
        match outcome {
            Ok(derived) => {
                self.completed += 1;
                self.derived += derived;
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                self.cancelled.push(key);
                Ok(())
            }
            Err(e) if e.is_subject_local() => {
                tracing::warn!(key = %key, error = %e, "subject failed; continuing");
                self.failures.push(SubjectFailure { key, error: e });
                Ok(())
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "run aborted");
                Err(e)
            }
        }
    }
}

/// Runs the per-subject fixed point over a knowledge base.
pub struct DerivationEngine {
    kb: Arc<KnowledgeBase>,
    config: EngineConfig,
    store: Option<Arc<dyn KeyedStore>>,
}

impl std::fmt::Debug for DerivationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivationEngine")
            .field("config", &self.config)
            .field("persists", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl DerivationEngine {
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if `config` does not validate.
    pub fn new(kb: Arc<KnowledgeBase>, config: EngineConfig) -> EpisodicResult<Self> {
        Ok(Self {
            kb,
            config: config.validate()?,
            store: None,
        })
    }

    /// Flushes each completed subject's derivations to `store`, keyed by
    /// subject key.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn KeyedStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Derives everything that follows from one subject's propositions.
    ///
    /// Derivations are flushed to the store only after the fixed point is
    /// reached; a cancelled or failed subject leaves the store untouched.
    ///
    /// # Errors
    ///
    /// - `ExecutionError::Cancelled` if `cancel` fires between firings
    /// - `ExecutionError::FixedPointLimitExceeded` past the firing limit
    /// - `ExecutionError::SubjectFailed` for malformed input
    /// - `EpisodicError::Storage` if the flush fails
    pub fn process_subject(&self, subject: Subject, cancel: &CancellationToken) -> EpisodicResult<SubjectResult> {
        let key = subject.key.clone();
        let span = tracing::info_span!("subject", key = %key);
        let _entered = span.enter();

        let result = subject::FixedPoint::new(&self.kb, &self.config, &key).run(subject.propositions, cancel)?;
        if let Some(store) = &self.store {
            result.derivations.flush(&key, store.as_ref())?;
        }
        tracing::info!(
            propositions = result.propositions.len(),
            derived = result.derivations.len(),
            "subject complete"
        );
        Ok(result)
    }

    /// Processes one subject and hands its result to `handler`. Returns the
    /// number of derived propositions.
    pub fn process_and_handle(
        &self,
        subject: Subject,
        handler: &dyn QueryResultsHandler,
        cancel: &CancellationToken,
    ) -> EpisodicResult<usize> {
        let key = subject.key.clone();
        let result = self.process_subject(subject, cancel)?;
        let derived = result.derivations.len();
        handler.handle(&key, result)?;
        Ok(derived)
    }

    /// Processes every subject of `source` on the calling thread.
    ///
    /// Subject-local failures are logged and reported; shared-state failures
    /// abort the run.
    pub fn run(
        &self,
        source: &mut dyn DataSource,
        handler: &dyn QueryResultsHandler,
        cancel: &CancellationToken,
    ) -> EpisodicResult<RunReport> {
        let mut report = RunReport::default();
        while let Some(next) = source.next_subject() {
            let subject = match next {
                Ok(subject) => subject,
                Err(e) if e.is_subject_local() => {
                    report.record("<unreadable>".to_string(), Err(e))?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let key = subject.key.clone();
            if cancel.is_cancelled() {
                report.cancelled.push(key);
                continue;
            }
            let outcome = self.process_and_handle(subject, handler, cancel);
            report.record(key, outcome)?;
        }
        Ok(report)
    }
}

/// Error for a subject whose input cannot be processed.
fn subject_failed(key: &str, reason: impl Into<String>) -> EpisodicError {
    ExecutionError::SubjectFailed {
        key: key.to_string(),
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{
        AbstractionDefinition, ExtendedPropositionDefinition, PropositionDefinition, Relation, TemporalRelation,
    };
    use crate::knowledge::InMemoryKnowledgeSource;
    use crate::proposition::PropositionKind;
    use crate::storage::{CacheConfig, CacheStore};
    use crate::time::Interval;

    const HOUR: i64 = 3_600_000;

    fn kb() -> Arc<KnowledgeBase> {
        let source = InMemoryKnowledgeSource::new()
            .with_proposition(PropositionDefinition::new("A", PropositionKind::Event))
            .with_proposition(PropositionDefinition::new("B", PropositionKind::Event))
            .with_abstraction(
                AbstractionDefinition::builder("AB")
                    .abstracted_from(ExtendedPropositionDefinition::new("a", "A"))
                    .abstracted_from(ExtendedPropositionDefinition::new("b", "B"))
                    .relation("a", "b", Relation::new(TemporalRelation::Before))
                    .build()
                    .unwrap(),
            );
        Arc::new(KnowledgeBase::load(&source).unwrap())
    }

    fn prop(kind: &str, start: i64, finish: i64) -> Proposition {
        Proposition::builder()
            .kind_id(kind)
            .kind(PropositionKind::Event)
            .interval(Interval::precise(start * HOUR, finish * HOUR).unwrap())
            .build()
            .unwrap()
    }

    fn engine() -> DerivationEngine {
        DerivationEngine::new(kb(), EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_process_subject_derives_and_tracks() {
        let a = prop("A", 0, 1);
        let b = prop("B", 2, 3);
        let result = engine()
            .process_subject(Subject::new("K1", vec![a.clone(), b.clone()]), &CancellationToken::new())
            .unwrap();

        let derived: Vec<_> = result.derived().collect();
        assert_eq!(derived.len(), 1);
        let sources: BTreeSet<_> = result.derivations.backward_derivations(&derived[0].id).copied().collect();
        assert_eq!(sources, BTreeSet::from([a.id, b.id]));
        assert!(result.derivations.is_consistent());
    }

    #[test]
    fn test_cancelled_subject_is_not_flushed() {
        let store = Arc::new(CacheStore::new("derivations", CacheConfig::default()));
        let engine = engine().with_store(store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .process_subject(Subject::new("K1", vec![prop("A", 0, 1), prop("B", 2, 3)]), &cancel)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(store.get("K1").unwrap().is_none());
    }

    #[test]
    fn test_completed_subject_is_flushed() {
        let store = Arc::new(CacheStore::new("derivations", CacheConfig::default()));
        let engine = engine().with_store(store.clone());
        let result = engine
            .process_subject(Subject::new("K1", vec![prop("A", 0, 1), prop("B", 2, 3)]), &CancellationToken::new())
            .unwrap();

        let loaded = DerivationTracker::load("K1", store.as_ref()).unwrap().unwrap();
        assert_eq!(loaded, result.derivations);
    }

    #[test]
    fn test_run_isolates_subject_failures() {
        let a = prop("A", 0, 1);
        let subjects = vec![
            Subject::new("bad", vec![a.clone(), a]),
            Subject::new("good", vec![prop("A", 0, 1), prop("B", 2, 3)]),
        ];
        let handler = CollectingHandler::new();
        let report = engine()
            .run(&mut subjects.into_iter(), &handler, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(report.derived, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, "bad");
        let results = handler.take().unwrap();
        assert!(results.contains_key("good"));
        assert!(!results.contains_key("bad"));
    }

    #[test]
    fn test_child_token_follows_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let sibling = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());
        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_firings_per_subject: 0,
            ..EngineConfig::default()
        };
        let err = DerivationEngine::new(kb(), config).unwrap_err();
        assert!(err.is_validation());
    }
}
