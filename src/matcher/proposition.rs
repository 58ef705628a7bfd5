//! Per-role proposition filtering.

use std::collections::HashMap;

use crate::definition::ExtendedPropositionDefinition;
use crate::error::ArithmeticError;
use crate::knowledge::{KnowledgeBase, RoleRef};
use crate::proposition::{Proposition, PropositionId};

/// Tests propositions against the extended definitions of abstraction roles.
///
/// The predicate is pure; results are memoized per `(role, proposition)` for
/// the lifetime of the matcher, which is one subject.
#[derive(Debug)]
pub struct PropositionMatcher<'kb> {
    kb: &'kb KnowledgeBase,
    memo: Option<HashMap<(RoleRef, PropositionId), bool>>,
}

impl<'kb> PropositionMatcher<'kb> {
    #[must_use]
    pub fn new(kb: &'kb KnowledgeBase, memoize: bool) -> Self {
        Self {
            kb,
            memo: memoize.then(HashMap::new),
        }
    }

    /// Returns true if `prop` may fill a role described by `def`.
    ///
    /// - the proposition's kind is `def.kind_id` or is-a it transitively;
    /// - a declared value must equal the proposition's value;
    /// - each declared property must be present with an equal value;
    /// - a declared duration bound requires an interval whose every possible
    ///   length lies within the bound.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] from interval length computation.
    pub fn matches(&self, def: &ExtendedPropositionDefinition, prop: &Proposition) -> Result<bool, ArithmeticError> {
        if !self.kb.kind_satisfies(&prop.kind_id, &def.kind_id) {
            return Ok(false);
        }

        if let Some(expected) = &def.value {
            match &prop.value {
                Some(actual) if actual.matches(expected) => {}
                _ => return Ok(false),
            }
        }

        let properties_hold = def
            .properties
            .iter()
            .all(|c| prop.property(&c.name).is_some_and(|v| v.matches(&c.value)));
        if !properties_hold {
            return Ok(false);
        }

        if def.has_duration_bound() {
            let Some(interval) = &prop.interval else {
                return Ok(false);
            };
            let bound = def.duration_bound();
            return Ok(bound.encloses(interval.min_length()?, interval.max_length()?));
        }

        Ok(true)
    }

    /// Memoized variant of [`Self::matches`] for a role of a loaded abstraction.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] from interval length computation.
    pub fn matches_role(&mut self, role: RoleRef, prop: &Proposition) -> Result<bool, ArithmeticError> {
        if let Some(hit) = self.memo.as_ref().and_then(|m| m.get(&(role, prop.id))) {
            return Ok(*hit);
        }
        let Some(def) = self.kb.role(role) else {
            return Ok(false);
        };
        let result = self.matches(def, prop)?;
        if let Some(memo) = self.memo.as_mut() {
            memo.insert((role, prop.id), result);
        }
        Ok(result)
    }

    /// Number of memoized results.
    #[must_use]
    pub fn memoized(&self) -> usize {
        self.memo.as_ref().map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AbstractionDefinition, PropositionDefinition};
    use crate::knowledge::InMemoryKnowledgeSource;
    use crate::proposition::PropositionKind;
    use crate::time::{Interval, TimeSpan};

    fn kb() -> KnowledgeBase {
        let source = InMemoryKnowledgeSource::new()
            .with_proposition(PropositionDefinition::new("Temperature", PropositionKind::PrimitiveParameter))
            .with_proposition(
                PropositionDefinition::new("OralTemperature", PropositionKind::PrimitiveParameter).is_a("Temperature"),
            )
            .with_proposition(PropositionDefinition::new("Chills", PropositionKind::Event))
            .with_abstraction(
                AbstractionDefinition::builder("HighTemp")
                    .abstracted_from(
                        ExtendedPropositionDefinition::new("temp", "Temperature")
                            .with_value("High")
                            .with_max_duration(TimeSpan::hours(2)),
                    )
                    .build()
                    .unwrap(),
            );
        KnowledgeBase::load(&source).unwrap()
    }

    fn temp(kind: &str, value: &str, hours: i64) -> Proposition {
        Proposition::builder()
            .kind_id(kind)
            .kind(PropositionKind::PrimitiveParameter)
            .interval(Interval::precise(0, TimeSpan::hours(hours).to_weight().value().unwrap()).unwrap())
            .value(value)
            .build()
            .unwrap()
    }

    #[test]
    fn test_is_a_descendants_match() {
        let kb = kb();
        let matcher = PropositionMatcher::new(&kb, false);
        let def = ExtendedPropositionDefinition::new("t", "Temperature");
        assert!(matcher.matches(&def, &temp("OralTemperature", "High", 1)).unwrap());
        assert!(matcher.matches(&def, &temp("Temperature", "High", 1)).unwrap());

        let narrow = ExtendedPropositionDefinition::new("t", "OralTemperature");
        assert!(!matcher.matches(&narrow, &temp("Temperature", "High", 1)).unwrap());
    }

    #[test]
    fn test_value_and_property_constraints() {
        let kb = kb();
        let matcher = PropositionMatcher::new(&kb, false);
        let def = ExtendedPropositionDefinition::new("t", "Temperature")
            .with_value("High")
            .with_property("site", "oral");

        let mut prop = temp("Temperature", "High", 1);
        assert!(!matcher.matches(&def, &prop).unwrap());
        prop.properties.insert("site".into(), "oral".into());
        assert!(matcher.matches(&def, &prop).unwrap());
        prop.value = Some("Low".into());
        assert!(!matcher.matches(&def, &prop).unwrap());
    }

    #[test]
    fn test_unconstrained_value_matches_anything() {
        let kb = kb();
        let matcher = PropositionMatcher::new(&kb, false);
        let def = ExtendedPropositionDefinition::new("t", "Temperature");
        let mut prop = temp("Temperature", "High", 1);
        prop.value = None;
        assert!(matcher.matches(&def, &prop).unwrap());
    }

    #[test]
    fn test_duration_bounds_are_inclusive() {
        let kb = kb();
        let matcher = PropositionMatcher::new(&kb, false);
        let def = ExtendedPropositionDefinition::new("t", "Temperature")
            .with_min_duration(TimeSpan::hours(1))
            .with_max_duration(TimeSpan::hours(2));
        assert!(matcher.matches(&def, &temp("Temperature", "High", 1)).unwrap());
        assert!(matcher.matches(&def, &temp("Temperature", "High", 2)).unwrap());
        assert!(!matcher.matches(&def, &temp("Temperature", "High", 3)).unwrap());
        assert!(!matcher.matches(&def, &temp("Temperature", "High", 0)).unwrap());
    }

    #[test]
    fn test_role_results_are_memoized() {
        let kb = kb();
        let role = kb.roles_accepting(&"Temperature".into())[0];
        let mut matcher = PropositionMatcher::new(&kb, true);
        let prop = temp("Temperature", "High", 1);
        assert!(matcher.matches_role(role, &prop).unwrap());
        assert!(matcher.matches_role(role, &prop).unwrap());
        assert_eq!(matcher.memoized(), 1);

        let mut uncached = PropositionMatcher::new(&kb, false);
        assert!(uncached.matches_role(role, &prop).unwrap());
        assert_eq!(uncached.memoized(), 0);
    }
}
