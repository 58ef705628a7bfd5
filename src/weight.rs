//! Extended-integer weights for temporal bound arithmetic.
//!
//! A [`Weight`] is either a finite signed 64-bit value or one of the two
//! infinities. Interval endpoints, gap bounds and duration bounds are all
//! weights, so unbounded sides of a constraint are simply `±∞`.
//!
//! The epsilon sentinels are the smallest nonzero finite steps (`±1`). They are
//! used to express strict inequalities (`x < y` is `y - x >= ε`) and behave as
//! ordinary finite values once created. Only the infinities are absorbing.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Neg;

use serde::{Deserialize, Serialize};

use crate::error::ArithmeticError;

/// An extended integer: `-∞ < finite < +∞`.
///
/// Variant declaration order is the total order, so the derived `Ord` is the
/// comparison the engine relies on. Two infinities of the same sign are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Weight {
    /// Negative infinity.
    NegInfinity,
    /// A finite value.
    Finite(i64),
    /// Positive infinity.
    PosInfinity,
}

impl Weight {
    /// Zero.
    pub const ZERO: Self = Self::Finite(0);
    /// Positive infinity.
    pub const POS_INFINITY: Self = Self::PosInfinity;
    /// Negative infinity.
    pub const NEG_INFINITY: Self = Self::NegInfinity;
    /// Smallest positive step.
    pub const POS_EPSILON: Self = Self::Finite(1);
    /// Smallest negative step.
    pub const NEG_EPSILON: Self = Self::Finite(-1);

    /// Creates a finite weight.
    #[must_use]
    pub const fn finite(value: i64) -> Self {
        Self::Finite(value)
    }

    /// Returns true for either infinity.
    #[must_use]
    pub const fn is_infinity(&self) -> bool {
        !matches!(self, Self::Finite(_))
    }

    /// Returns the finite value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<i64> {
        match self {
            Self::Finite(v) => Some(*v),
            Self::NegInfinity | Self::PosInfinity => None,
        }
    }

    /// Returns `-1`, `0` or `1` following the sign of the weight.
    #[must_use]
    pub const fn signum(&self) -> i64 {
        match self {
            Self::NegInfinity => -1,
            Self::Finite(v) => v.signum(),
            Self::PosInfinity => 1,
        }
    }

    /// Adds two weights.
    ///
    /// Finite overflow saturates to the infinity of the overflowing sign. An
    /// infinite operand absorbs a finite one.
    ///
    /// # Errors
    ///
    /// Returns [`ArithmeticError::OppositeInfinities`] for `+∞ + -∞`.
    pub fn add(self, other: Self) -> Result<Self, ArithmeticError> {
        match (self, other) {
            (Self::Finite(a), Self::Finite(b)) => Ok(match a.checked_add(b) {
                Some(sum) => Self::Finite(sum),
                None if b > 0 => Self::PosInfinity,
                None => Self::NegInfinity,
            }),
            (Self::PosInfinity, Self::NegInfinity) | (Self::NegInfinity, Self::PosInfinity) => {
                Err(ArithmeticError::OppositeInfinities {
                    lhs: self,
                    rhs: other,
                })
            }
            (inf @ (Self::PosInfinity | Self::NegInfinity), _) => Ok(inf),
            (_, inf) => Ok(inf),
        }
    }

    /// Subtracts `other` from `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ArithmeticError::OppositeInfinities`] when the result would
    /// cancel two infinities (`+∞ - +∞`, `-∞ - -∞`).
    pub fn subtract(self, other: Self) -> Result<Self, ArithmeticError> {
        match (self, other) {
            (Self::Finite(a), Self::Finite(b)) => Ok(match a.checked_sub(b) {
                Some(diff) => Self::Finite(diff),
                None if b < 0 => Self::PosInfinity,
                None => Self::NegInfinity,
            }),
            (Self::PosInfinity, Self::PosInfinity) | (Self::NegInfinity, Self::NegInfinity) => {
                Err(ArithmeticError::OppositeInfinities {
                    lhs: self,
                    rhs: other.invert_sign(),
                })
            }
            _ => self.add(other.invert_sign()),
        }
    }

    /// Returns the weight with its sign flipped.
    ///
    /// `i64::MIN` has no finite negation and saturates to `+∞`.
    #[must_use]
    pub const fn invert_sign(self) -> Self {
        match self {
            Self::NegInfinity => Self::PosInfinity,
            Self::PosInfinity => Self::NegInfinity,
            Self::Finite(v) => match v.checked_neg() {
                Some(n) => Self::Finite(n),
                None => Self::PosInfinity,
            },
        }
    }

    /// Returns the larger of two weights.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Ord::max(self, other)
    }

    /// Returns the smaller of two weights.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Ord::min(self, other)
    }

    /// Compares two weights.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    /// Returns true if this weight is greater than the finite value `v`.
    #[must_use]
    pub const fn greater_than(&self, v: i64) -> bool {
        match self {
            Self::NegInfinity => false,
            Self::Finite(x) => *x > v,
            Self::PosInfinity => true,
        }
    }

    /// Returns true if this weight is less than the finite value `v`.
    #[must_use]
    pub const fn less_than(&self, v: i64) -> bool {
        match self {
            Self::NegInfinity => true,
            Self::Finite(x) => *x < v,
            Self::PosInfinity => false,
        }
    }

    /// Returns true if this weight equals the finite value `v`.
    #[must_use]
    pub const fn is_equal(&self, v: i64) -> bool {
        matches!(self, Self::Finite(x) if *x == v)
    }
}

impl Default for Weight {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<i64> for Weight {
    fn from(value: i64) -> Self {
        Self::Finite(value)
    }
}

impl Neg for Weight {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.invert_sign()
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegInfinity => write!(f, "-inf"),
            Self::Finite(v) => write!(f, "{v}"),
            Self::PosInfinity => write!(f, "+inf"),
        }
    }
}

/// In-place accumulator for hot loops (shortest-path relaxation, span sums).
///
/// Obeys the same laws as [`Weight`]: a failed update leaves the accumulator
/// unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightAccumulator {
    value: Weight,
}

impl WeightAccumulator {
    /// Creates an accumulator holding `initial`.
    #[must_use]
    pub const fn new(initial: Weight) -> Self {
        Self { value: initial }
    }

    /// Adds `other` in place.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] from [`Weight::add`].
    pub fn add_assign(&mut self, other: Weight) -> Result<(), ArithmeticError> {
        self.value = self.value.add(other)?;
        Ok(())
    }

    /// Subtracts `other` in place.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] from [`Weight::subtract`].
    pub fn subtract_assign(&mut self, other: Weight) -> Result<(), ArithmeticError> {
        self.value = self.value.subtract(other)?;
        Ok(())
    }

    /// Keeps the smaller of the current value and `other`.
    pub fn min_assign(&mut self, other: Weight) {
        self.value = self.value.min(other);
    }

    /// Keeps the larger of the current value and `other`.
    pub fn max_assign(&mut self, other: Weight) {
        self.value = self.value.max(other);
    }

    /// Returns the current value.
    #[must_use]
    pub const fn get(&self) -> Weight {
        self.value
    }
}
