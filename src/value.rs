//! Values carried by propositions.
//!
//! A proposition may hold a value of its own (the "High" of an abstracted
//! blood-pressure parameter, the 38.4 of a raw temperature reading) and any
//! number of named property values. Definitions filter on the same type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A proposition or property value.
///
/// # Examples
///
/// ```
/// use episodic::Value;
///
/// let high = Value::from("High");
/// assert_eq!(high.as_nominal(), Some("High"));
///
/// // A declared set accepts any of its members.
/// let accepted = Value::one_of(["High", "VeryHigh"]);
/// assert!(high.matches(&accepted));
/// assert!(Value::Integer(38).matches(&Value::Number(38.0)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// A category such as "High" or "female".
    Nominal(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
    Date(DateTime<Utc>),
    /// Alternatives; as an expected value, any member is accepted.
    OneOf(Vec<Value>),
}

impl Value {
    /// Builds a set of accepted alternatives.
    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn as_nominal(&self) -> Option<&str> {
        match self {
            Self::Nominal(v) => Some(v),
            _ => None,
        }
    }

    /// Reads either numeric variant as a float.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub const fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns true if `self`, as found on a proposition, satisfies `expected`
    /// as declared on a definition.
    ///
    /// Numbers compare across `Integer`/`Number`. An expected `OneOf` accepts
    /// a value matching any member.
    #[must_use]
    pub fn matches(&self, expected: &Self) -> bool {
        match (self, expected) {
            (_, Self::OneOf(options)) if !matches!(self, Self::OneOf(_)) => {
                options.iter().any(|option| self.matches(option))
            }
            (Self::Integer(_) | Self::Number(_), Self::Integer(_) | Self::Number(_)) => {
                self.as_number() == expected.as_number()
            }
            _ => self == expected,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nominal(v) => f.write_str(v),
            Self::Number(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Date(v) => f.write_str(&v.to_rfc3339()),
            Self::OneOf(options) => {
                f.write_str("{")?;
                for (i, option) in options.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{option}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Nominal(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Nominal(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}
