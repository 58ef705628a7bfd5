//! Knowledge-base definitions.
//!
//! An [`AbstractionDefinition`] names the roles it is abstracted from (each an
//! [`ExtendedPropositionDefinition`]) and the [`Relation`] that must hold
//! between ordered pairs of roles. These types are read once from a knowledge
//! source and are immutable for the duration of a run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::proposition::{KindId, PropositionKind};
use crate::time::TimeSpan;
use crate::value::Value;
use crate::weight::Weight;

/// Inclusive range `[min, max]` of weights. Unbounded sides are infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bound {
    pub min: Weight,
    pub max: Weight,
}

impl Bound {
    /// `[-∞, +∞]`.
    pub const UNBOUNDED: Self = Self {
        min: Weight::NegInfinity,
        max: Weight::PosInfinity,
    };

    #[must_use]
    pub const fn new(min: Weight, max: Weight) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub const fn exactly(value: Weight) -> Self {
        Self::new(value, value)
    }

    /// `[-∞, max]`.
    #[must_use]
    pub const fn at_most(max: Weight) -> Self {
        Self::new(Weight::NegInfinity, max)
    }

    /// `[min, +∞]`.
    #[must_use]
    pub const fn at_least(min: Weight) -> Self {
        Self::new(min, Weight::PosInfinity)
    }

    /// Bound built from optional spans; a missing side is unbounded.
    #[must_use]
    pub fn from_spans(min: Option<TimeSpan>, max: Option<TimeSpan>) -> Self {
        Self::new(
            min.map_or(Weight::NegInfinity, TimeSpan::to_weight),
            max.map_or(Weight::PosInfinity, TimeSpan::to_weight),
        )
    }

    /// Returns true if both sides are infinite.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        *self == Self::UNBOUNDED
    }

    /// Returns true if `min > max`.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.min > self.max
    }

    /// Returns true if `value` lies within the bound.
    #[must_use]
    pub fn contains(&self, value: Weight) -> bool {
        self.min <= value && value <= self.max
    }

    /// Returns true if the range `[lo, hi]` shares at least one value with the bound.
    #[must_use]
    pub fn intersects(&self, lo: Weight, hi: Weight) -> bool {
        lo <= self.max && hi >= self.min
    }

    /// Returns true if the range `[lo, hi]` lies entirely within the bound.
    #[must_use]
    pub fn encloses(&self, lo: Weight, hi: Weight) -> bool {
        self.min <= lo && hi <= self.max
    }

    /// The bound on the negated quantity.
    #[must_use]
    pub const fn negated(self) -> Self {
        Self::new(self.max.invert_sign(), self.min.invert_sign())
    }
}

impl Default for Bound {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Equality constraint on a named property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConstraint {
    pub name: String,
    pub value: Value,
}

/// A filter over propositions that fills one role of an abstraction.
///
/// Two extended definitions over the same kind are distinct roles; the role
/// name is what tells them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedPropositionDefinition {
    /// Role name, unique within the owning abstraction.
    pub role: String,

    /// Target kind. Kinds that are transitively is-a this kind also match.
    pub kind_id: KindId,

    /// Required proposition value. `None` matches any value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Required property values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyConstraint>,

    /// Inclusive minimum duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<TimeSpan>,

    /// Inclusive maximum duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<TimeSpan>,
}

impl ExtendedPropositionDefinition {
    /// Creates an unconstrained role over `kind_id`.
    #[must_use]
    pub fn new(role: impl Into<String>, kind_id: impl Into<KindId>) -> Self {
        Self {
            role: role.into(),
            kind_id: kind_id.into(),
            value: None,
            properties: Vec::new(),
            min_duration: None,
            max_duration: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push(PropertyConstraint {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn with_min_duration(mut self, span: TimeSpan) -> Self {
        self.min_duration = Some(span);
        self
    }

    #[must_use]
    pub fn with_max_duration(mut self, span: TimeSpan) -> Self {
        self.max_duration = Some(span);
        self
    }

    /// Duration bound in milliseconds.
    #[must_use]
    pub fn duration_bound(&self) -> Bound {
        Bound::from_spans(self.min_duration, self.max_duration)
    }

    /// Returns true if the role constrains duration at all.
    #[must_use]
    pub const fn has_duration_bound(&self) -> bool {
        self.min_duration.is_some() || self.max_duration.is_some()
    }
}

/// Qualitative ordering between the intervals of an ordered pair of roles.
///
/// Allen's thirteen relations plus two disjunctions commonly used in
/// clinical abstraction rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalRelation {
    Before,
    Meets,
    Overlaps,
    Starts,
    During,
    Finishes,
    Equals,
    After,
    MetBy,
    OverlappedBy,
    StartedBy,
    Contains,
    FinishedBy,
    /// lhs starts and finishes strictly before rhs does (before, meets or overlaps).
    BeforeOrOverlaps,
    /// No qualitative constraint; only the metric bounds apply.
    Any,
}

impl TemporalRelation {
    /// The relation that holds with the sides swapped.
    #[must_use]
    pub const fn inverse(self) -> Option<Self> {
        Some(match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
            Self::Meets => Self::MetBy,
            Self::MetBy => Self::Meets,
            Self::Overlaps => Self::OverlappedBy,
            Self::OverlappedBy => Self::Overlaps,
            Self::Starts => Self::StartedBy,
            Self::StartedBy => Self::Starts,
            Self::During => Self::Contains,
            Self::Contains => Self::During,
            Self::Finishes => Self::FinishedBy,
            Self::FinishedBy => Self::Finishes,
            Self::Equals => Self::Equals,
            Self::Any => Self::Any,
            Self::BeforeOrOverlaps => return None,
        })
    }
}

impl fmt::Display for TemporalRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Before => "before",
            Self::Meets => "meets",
            Self::Overlaps => "overlaps",
            Self::Starts => "starts",
            Self::During => "during",
            Self::Finishes => "finishes",
            Self::Equals => "equals",
            Self::After => "after",
            Self::MetBy => "met_by",
            Self::OverlappedBy => "overlapped_by",
            Self::StartedBy => "started_by",
            Self::Contains => "contains",
            Self::FinishedBy => "finished_by",
            Self::BeforeOrOverlaps => "before_or_overlaps",
            Self::Any => "any",
        };
        f.write_str(s)
    }
}

/// Constraint between the intervals bound to an ordered pair of roles.
///
/// Every distance is measured from a boundary of the left-hand interval to a
/// boundary of the right-hand one, in milliseconds:
/// - `gap`: lhs finish to rhs start
/// - `start_distance`: lhs start to rhs start
/// - `finish_distance`: lhs finish to rhs finish
/// - `span`: lhs start to rhs finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub ordering: TemporalRelation,
    #[serde(default)]
    pub gap: Bound,
    #[serde(default)]
    pub start_distance: Bound,
    #[serde(default)]
    pub finish_distance: Bound,
    #[serde(default)]
    pub span: Bound,
    #[serde(default)]
    pub lhs_duration: Bound,
    #[serde(default)]
    pub rhs_duration: Bound,
}

impl Relation {
    /// Creates a purely qualitative relation.
    #[must_use]
    pub const fn new(ordering: TemporalRelation) -> Self {
        Self {
            ordering,
            gap: Bound::UNBOUNDED,
            start_distance: Bound::UNBOUNDED,
            finish_distance: Bound::UNBOUNDED,
            span: Bound::UNBOUNDED,
            lhs_duration: Bound::UNBOUNDED,
            rhs_duration: Bound::UNBOUNDED,
        }
    }

    #[must_use]
    pub const fn with_gap(mut self, gap: Bound) -> Self {
        self.gap = gap;
        self
    }

    #[must_use]
    pub const fn with_start_distance(mut self, bound: Bound) -> Self {
        self.start_distance = bound;
        self
    }

    #[must_use]
    pub const fn with_finish_distance(mut self, bound: Bound) -> Self {
        self.finish_distance = bound;
        self
    }

    #[must_use]
    pub const fn with_span(mut self, bound: Bound) -> Self {
        self.span = bound;
        self
    }

    #[must_use]
    pub const fn with_lhs_duration(mut self, bound: Bound) -> Self {
        self.lhs_duration = bound;
        self
    }

    #[must_use]
    pub const fn with_rhs_duration(mut self, bound: Bound) -> Self {
        self.rhs_duration = bound;
        self
    }

    /// Named metric bounds, for validation and error reporting.
    #[must_use]
    pub fn bounds(&self) -> [(&'static str, Bound); 6] {
        [
            ("gap", self.gap),
            ("start_distance", self.start_distance),
            ("finish_distance", self.finish_distance),
            ("span", self.span),
            ("lhs_duration", self.lhs_duration),
            ("rhs_duration", self.rhs_duration),
        ]
    }

    /// The equivalent relation with the sides swapped.
    ///
    /// Never applied implicitly: a knowledge base that wants `B r A` must
    /// declare it, possibly with this helper. Returns `None` for orderings
    /// with no single-relation inverse.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        Some(Self {
            ordering: self.ordering.inverse()?,
            gap: self.span.negated(),
            start_distance: self.start_distance.negated(),
            finish_distance: self.finish_distance.negated(),
            span: self.gap.negated(),
            lhs_duration: self.rhs_duration,
            rhs_duration: self.lhs_duration,
        })
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ordering)?;
        for (name, bound) in self.bounds() {
            if !bound.is_unbounded() {
                write!(f, " {name}={bound}")?;
            }
        }
        Ok(())
    }
}

/// How the interval of a derived proposition is computed from its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalCombination {
    /// Earliest start to latest finish.
    #[default]
    Union,
    /// The stretch common to every source; tuples without one are rejected.
    Intersection,
}

/// A relation declared between two roles, by role index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDeclaration {
    pub lhs: usize,
    pub rhs: usize,
    pub relation: Relation,
}

/// A rule that derives a proposition from related input propositions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractionDefinition {
    /// Id of the abstraction, which is also the kind of what it derives.
    pub id: KindId,

    /// Roles, in declaration order.
    pub abstracted_from: Vec<ExtendedPropositionDefinition>,

    /// At most one relation per ordered pair of roles.
    #[serde(default)]
    pub relations: Vec<RelationDeclaration>,

    /// Whether meeting or overlapping instances are coalesced.
    #[serde(default)]
    pub concatenable: bool,

    /// Whether instances are forbidden from properly overlapping each other.
    #[serde(default)]
    pub solid: bool,

    /// Explicit priority of this abstraction's activations.
    #[serde(default)]
    pub salience: i32,

    /// Value carried by derived propositions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_value: Option<Value>,

    #[serde(default)]
    pub combination: IntervalCombination,
}

impl AbstractionDefinition {
    /// Creates a new abstraction builder.
    #[must_use]
    pub fn builder(id: impl Into<KindId>) -> AbstractionDefinitionBuilder {
        AbstractionDefinitionBuilder::new(id)
    }

    /// Number of roles.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.abstracted_from.len()
    }

    /// Index of a role by name.
    #[must_use]
    pub fn role_index(&self, role: &str) -> Option<usize> {
        self.abstracted_from.iter().position(|d| d.role == role)
    }

    /// The relation declared for the ordered pair `(lhs, rhs)`, if any.
    #[must_use]
    pub fn relation(&self, lhs: usize, rhs: usize) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|r| r.lhs == lhs && r.rhs == rhs)
            .map(|r| &r.relation)
    }

    /// Kinds this abstraction reads, with duplicates removed.
    #[must_use]
    pub fn input_kinds(&self) -> Vec<&KindId> {
        let mut kinds: Vec<&KindId> = self.abstracted_from.iter().map(|d| &d.kind_id).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// Builder for creating AbstractionDefinition instances.
#[derive(Debug)]
pub struct AbstractionDefinitionBuilder {
    id: KindId,
    abstracted_from: Vec<ExtendedPropositionDefinition>,
    relations: Vec<(String, String, Relation)>,
    concatenable: bool,
    solid: bool,
    salience: i32,
    derived_value: Option<Value>,
    combination: IntervalCombination,
}

impl AbstractionDefinitionBuilder {
    #[must_use]
    pub fn new(id: impl Into<KindId>) -> Self {
        Self {
            id: id.into(),
            abstracted_from: Vec::new(),
            relations: Vec::new(),
            concatenable: false,
            solid: false,
            salience: 0,
            derived_value: None,
            combination: IntervalCombination::default(),
        }
    }

    /// Adds a role.
    #[must_use]
    pub fn abstracted_from(mut self, definition: ExtendedPropositionDefinition) -> Self {
        self.abstracted_from.push(definition);
        self
    }

    /// Declares the relation between two roles, by role name.
    #[must_use]
    pub fn relation(mut self, lhs: impl Into<String>, rhs: impl Into<String>, relation: Relation) -> Self {
        self.relations.push((lhs.into(), rhs.into(), relation));
        self
    }

    #[must_use]
    pub fn concatenable(mut self, concatenable: bool) -> Self {
        self.concatenable = concatenable;
        self
    }

    #[must_use]
    pub fn solid(mut self, solid: bool) -> Self {
        self.solid = solid;
        self
    }

    #[must_use]
    pub fn salience(mut self, salience: i32) -> Self {
        self.salience = salience;
        self
    }

    #[must_use]
    pub fn derived_value(mut self, value: impl Into<Value>) -> Self {
        self.derived_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn combination(mut self, combination: IntervalCombination) -> Self {
        self.combination = combination;
        self
    }

    /// Builds the definition.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an abstraction without roles, duplicate
    /// role names, relations naming unknown roles, a relation between a role
    /// and itself, or more than one relation for the same ordered pair.
    pub fn build(self) -> Result<AbstractionDefinition, ValidationError> {
        if self.abstracted_from.is_empty() {
            return Err(ValidationError::EmptyAbstraction { abstraction: self.id });
        }

        for (i, def) in self.abstracted_from.iter().enumerate() {
            if self.abstracted_from[..i].iter().any(|d| d.role == def.role) {
                return Err(ValidationError::DuplicateRole {
                    abstraction: self.id,
                    role: def.role.clone(),
                });
            }
        }

        let index_of = |role: &str| self.abstracted_from.iter().position(|d| d.role == role);

        let mut relations: Vec<RelationDeclaration> = Vec::with_capacity(self.relations.len());
        for (lhs_role, rhs_role, relation) in &self.relations {
            let Some(lhs) = index_of(lhs_role) else {
                return Err(ValidationError::UnknownRole {
                    abstraction: self.id,
                    role: lhs_role.clone(),
                });
            };
            let Some(rhs) = index_of(rhs_role) else {
                return Err(ValidationError::UnknownRole {
                    abstraction: self.id,
                    role: rhs_role.clone(),
                });
            };
            if lhs == rhs {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("abstraction '{}' relates role '{lhs_role}' to itself", self.id),
                });
            }
            if relations.iter().any(|r| r.lhs == lhs && r.rhs == rhs) {
                return Err(ValidationError::DuplicateRelation {
                    abstraction: self.id,
                    lhs: lhs_role.clone(),
                    rhs: rhs_role.clone(),
                });
            }
            relations.push(RelationDeclaration {
                lhs,
                rhs,
                relation: *relation,
            });
        }

        Ok(AbstractionDefinition {
            id: self.id,
            abstracted_from: self.abstracted_from,
            relations,
            concatenable: self.concatenable,
            solid: self.solid,
            salience: self.salience,
            derived_value: self.derived_value,
            combination: self.combination,
        })
    }
}

/// Definition of a non-derived kind, as read from a knowledge source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropositionDefinition {
    pub id: KindId,
    pub kind: PropositionKind,
    /// Direct parents in the is-a hierarchy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub is_a: Vec<KindId>,
}

impl PropositionDefinition {
    #[must_use]
    pub fn new(id: impl Into<KindId>, kind: PropositionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            is_a: Vec::new(),
        }
    }

    /// Adds a direct parent.
    #[must_use]
    pub fn is_a(mut self, parent: impl Into<KindId>) -> Self {
        self.is_a.push(parent.into());
        self
    }
}
