//! Propositions: the time-stamped facts the engine reasons over.
//!
//! Raw propositions arrive from a data source; derived propositions are
//! produced when an abstraction definition matches. Both share one shape:
//! a kind id, an optional interval, an optional value, named properties and
//! named references to other propositions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::time::Interval;
use crate::value::Value;

/// Identifier of a proposition definition (a "kind").
///
/// Abstraction definitions share this namespace: the propositions an
/// abstraction derives carry the abstraction's id as their kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KindId(String);

impl KindId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KindId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for KindId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique identifier for a proposition instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropositionId(Uuid);

impl PropositionId {
    /// Namespace for ids of derived propositions.
    const DERIVED_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_4c2e_9d3a_4e57_a0c8_2f51_9e6d_7b30);

    /// Creates a new random proposition ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates the deterministic id of a derived proposition from its fingerprint.
    #[must_use]
    pub fn derived(fingerprint: &[u8]) -> Self {
        Self(Uuid::new_v5(&Self::DERIVED_NAMESPACE, fingerprint))
    }

    /// Returns the raw bytes, used when fingerprinting tuples.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for PropositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PropositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of proposition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropositionKind {
    /// Atemporal fact (demographics, patient record).
    Constant,
    /// Something that happened over an interval (an encounter, a procedure).
    Event,
    /// A time-stamped measured value (a lab result).
    PrimitiveParameter,
    /// A proposition derived by an abstraction definition.
    Abstraction,
}

impl PropositionKind {
    /// Returns true if propositions of this kind must carry an interval.
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        !matches!(self, Self::Constant)
    }
}

impl fmt::Display for PropositionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Constant => "constant",
            Self::Event => "event",
            Self::PrimitiveParameter => "primitive_parameter",
            Self::Abstraction => "abstraction",
        };
        f.write_str(s)
    }
}

/// An identified fact about one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposition {
    /// Unique identifier.
    pub id: PropositionId,

    /// Definition this proposition is an instance of.
    pub kind_id: KindId,

    /// Structural kind.
    pub kind: PropositionKind,

    /// Temporal location. `None` only for constants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,

    /// The proposition's own value, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Named property values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,

    /// Named references to other propositions, e.g. `encounter`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, Vec<PropositionId>>,
}

impl Proposition {
    /// Creates a new proposition builder.
    #[must_use]
    pub fn builder() -> PropositionBuilder {
        PropositionBuilder::new()
    }

    /// Returns true if the proposition has an interval.
    #[must_use]
    pub const fn is_temporal(&self) -> bool {
        self.interval.is_some()
    }

    /// Returns a property value by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

impl fmt::Display for Proposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind_id)?;
        if let Some(value) = &self.value {
            write!(f, "={value}")?;
        }
        if let Some(interval) = &self.interval {
            write!(f, " {interval}")?;
        }
        Ok(())
    }
}

/// Builder for creating Proposition instances.
#[derive(Debug, Default)]
pub struct PropositionBuilder {
    id: Option<PropositionId>,
    kind_id: Option<KindId>,
    kind: Option<PropositionKind>,
    interval: Option<Interval>,
    value: Option<Value>,
    properties: BTreeMap<String, Value>,
    references: BTreeMap<String, Vec<PropositionId>>,
}

impl PropositionBuilder {
    /// Creates a new proposition builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the proposition ID (optional, will be generated if not set).
    #[must_use]
    pub fn id(mut self, id: PropositionId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the kind id.
    #[must_use]
    pub fn kind_id(mut self, kind_id: impl Into<KindId>) -> Self {
        self.kind_id = Some(kind_id.into());
        self
    }

    /// Sets the structural kind. Defaults to `Event` when an interval is set
    /// and `Constant` otherwise.
    #[must_use]
    pub fn kind(mut self, kind: PropositionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    #[must_use]
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn reference(mut self, name: impl Into<String>, target: PropositionId) -> Self {
        self.references.entry(name.into()).or_default().push(target);
        self
    }

    /// Builds the Proposition.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the kind id is missing or empty, or if the
    /// interval does not agree with the kind (constants are atemporal, all
    /// other kinds are temporal).
    pub fn build(self) -> Result<Proposition, ValidationError> {
        let kind_id = self.kind_id.ok_or(ValidationError::MissingField {
            field: "kind_id".to_string(),
        })?;
        if kind_id.as_str().trim().is_empty() {
            return Err(ValidationError::InvalidIdentifier {
                id: kind_id.to_string(),
            });
        }

        let kind = self.kind.unwrap_or(if self.interval.is_some() {
            PropositionKind::Event
        } else {
            PropositionKind::Constant
        });

        match (kind.is_temporal(), self.interval.is_some()) {
            (true, false) => {
                return Err(ValidationError::MissingField {
                    field: "interval".to_string(),
                })
            }
            (false, true) => {
                return Err(ValidationError::InvalidInterval {
                    reason: format!("constant '{kind_id}' cannot carry an interval"),
                })
            }
            _ => {}
        }

        Ok(Proposition {
            id: self.id.unwrap_or_else(PropositionId::new),
            kind_id,
            kind,
            interval: self.interval,
            value: self.value,
            properties: self.properties,
            references: self.references,
        })
    }
}
