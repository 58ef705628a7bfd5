//! Temporal types for interval-stamped propositions.
//!
//! An [`Interval`] locates a proposition in time. Its start and finish are each
//! a pair of [`Weight`] bounds, so an imprecisely known interval ("started some
//! time on Monday") is represented directly. A precise interval has
//! `min == max` on both sides and a point has start equal to finish.
//!
//! All weights are expressed in milliseconds since the Unix epoch; the
//! [`Granularity`] tag on each side records the precision the source data had.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArithmeticError, ValidationError};
use crate::weight::Weight;

/// Precision of an interval side, also used as the unit of [`TimeSpan`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

impl Granularity {
    /// Number of milliseconds in one unit.
    #[must_use]
    pub const fn millis(self) -> i64 {
        match self {
            Self::Millisecond => 1,
            Self::Second => 1_000,
            Self::Minute => 60_000,
            Self::Hour => 3_600_000,
            Self::Day => 86_400_000,
        }
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self::Millisecond
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Millisecond => "ms",
            Self::Second => "s",
            Self::Minute => "min",
            Self::Hour => "h",
            Self::Day => "d",
        };
        f.write_str(s)
    }
}

/// A duration expressed in a unit, e.g. `120 min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    /// Number of units.
    pub amount: i64,
    /// The unit.
    pub unit: Granularity,
}

impl TimeSpan {
    #[must_use]
    pub const fn new(amount: i64, unit: Granularity) -> Self {
        Self { amount, unit }
    }

    #[must_use]
    pub const fn minutes(amount: i64) -> Self {
        Self::new(amount, Granularity::Minute)
    }

    #[must_use]
    pub const fn hours(amount: i64) -> Self {
        Self::new(amount, Granularity::Hour)
    }

    #[must_use]
    pub const fn days(amount: i64) -> Self {
        Self::new(amount, Granularity::Day)
    }

    /// Converts to a weight in milliseconds, saturating to an infinity.
    #[must_use]
    pub fn to_weight(self) -> Weight {
        match self.amount.checked_mul(self.unit.millis()) {
            Some(ms) => Weight::finite(ms),
            None if self.amount > 0 => Weight::POS_INFINITY,
            None => Weight::NEG_INFINITY,
        }
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit)
    }
}

/// A possibly imprecise temporal location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    min_start: Weight,
    max_start: Weight,
    min_finish: Weight,
    max_finish: Weight,
    #[serde(default)]
    start_granularity: Granularity,
    #[serde(default)]
    finish_granularity: Granularity,
}

impl Interval {
    /// Creates an interval from start and finish bounds.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidInterval` if a side has `min > max` or
    /// the interval would have to finish before it starts.
    pub fn imprecise(
        start: (Weight, Weight),
        finish: (Weight, Weight),
    ) -> Result<Self, ValidationError> {
        let (min_start, max_start) = start;
        let (min_finish, max_finish) = finish;
        if min_start > max_start {
            return Err(ValidationError::InvalidInterval {
                reason: format!("start bounds [{min_start}, {max_start}] are inverted"),
            });
        }
        if min_finish > max_finish {
            return Err(ValidationError::InvalidInterval {
                reason: format!("finish bounds [{min_finish}, {max_finish}] are inverted"),
            });
        }
        if min_start > max_finish {
            return Err(ValidationError::InvalidInterval {
                reason: format!("start {min_start} is after latest finish {max_finish}"),
            });
        }
        Ok(Self {
            min_start,
            max_start,
            min_finish,
            max_finish,
            start_granularity: Granularity::default(),
            finish_granularity: Granularity::default(),
        })
    }

    /// Creates a precise interval `[start, finish]` in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidInterval` if `start > finish`.
    pub fn precise(start: i64, finish: i64) -> Result<Self, ValidationError> {
        let s = Weight::finite(start);
        let f = Weight::finite(finish);
        Self::imprecise((s, s), (f, f))
    }

    /// Creates a point interval.
    #[must_use]
    pub const fn point(at: i64) -> Self {
        let w = Weight::Finite(at);
        Self {
            min_start: w,
            max_start: w,
            min_finish: w,
            max_finish: w,
            start_granularity: Granularity::Millisecond,
            finish_granularity: Granularity::Millisecond,
        }
    }

    /// Creates a precise interval between two timestamps.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidInterval` if `from > to`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use episodic::Interval;
    ///
    /// let now = Utc::now();
    /// let interval = Interval::between(now, now + Duration::hours(2)).unwrap();
    /// assert!(!interval.is_point());
    /// ```
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, ValidationError> {
        Self::precise(from.timestamp_millis(), to.timestamp_millis())
    }

    /// Creates a point interval at a timestamp.
    #[must_use]
    pub fn at(when: DateTime<Utc>) -> Self {
        Self::point(when.timestamp_millis())
    }

    /// Returns a copy with the given side granularities.
    #[must_use]
    pub const fn with_granularity(mut self, start: Granularity, finish: Granularity) -> Self {
        self.start_granularity = start;
        self.finish_granularity = finish;
        self
    }

    /// Earliest and latest possible start.
    #[must_use]
    pub const fn start(&self) -> (Weight, Weight) {
        (self.min_start, self.max_start)
    }

    /// Earliest and latest possible finish.
    #[must_use]
    pub const fn finish(&self) -> (Weight, Weight) {
        (self.min_finish, self.max_finish)
    }

    #[must_use]
    pub const fn start_granularity(&self) -> Granularity {
        self.start_granularity
    }

    #[must_use]
    pub const fn finish_granularity(&self) -> Granularity {
        self.finish_granularity
    }

    /// Returns true if start and finish are the same known instant.
    #[must_use]
    pub fn is_point(&self) -> bool {
        self.min_start == self.max_start
            && self.min_finish == self.max_finish
            && self.min_start == self.min_finish
    }

    /// Shortest possible length, never below zero.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] for infinite boundaries of the same sign.
    pub fn min_length(&self) -> Result<Weight, ArithmeticError> {
        Ok(self.min_finish.subtract(self.max_start)?.max(Weight::ZERO))
    }

    /// Longest possible length.
    ///
    /// # Errors
    ///
    /// Propagates [`ArithmeticError`] for infinite boundaries of the same sign.
    pub fn max_length(&self) -> Result<Weight, ArithmeticError> {
        self.max_finish.subtract(self.min_start)
    }

    /// Smallest interval covering both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min_start: self.min_start.min(other.min_start),
            max_start: self.max_start.min(other.max_start),
            min_finish: self.min_finish.max(other.min_finish),
            max_finish: self.max_finish.max(other.max_finish),
            start_granularity: self.start_granularity.min(other.start_granularity),
            finish_granularity: self.finish_granularity.min(other.finish_granularity),
        }
    }

    /// Common part of both intervals, if any.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let candidate = Self {
            min_start: self.min_start.max(other.min_start),
            max_start: self.max_start.max(other.max_start),
            min_finish: self.min_finish.min(other.min_finish),
            max_finish: self.max_finish.min(other.max_finish),
            start_granularity: self.start_granularity.min(other.start_granularity),
            finish_granularity: self.finish_granularity.min(other.finish_granularity),
        };
        if candidate.max_start > candidate.min_finish {
            return None;
        }
        Some(candidate)
    }

    /// True if the two intervals necessarily share a stretch of positive length.
    #[must_use]
    pub fn overlaps_properly(&self, other: &Self) -> bool {
        self.max_start < other.min_finish && other.max_start < self.min_finish
    }

    /// True if the two intervals necessarily overlap or meet end to end.
    #[must_use]
    pub fn overlaps_or_meets(&self, other: &Self) -> bool {
        self.max_start <= other.min_finish && other.max_start <= self.min_finish
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |min: Weight, max: Weight| {
            if min == max {
                format!("{min}")
            } else {
                format!("{min}..{max}")
            }
        };
        write!(
            f,
            "[{} → {}]",
            side(self.min_start, self.max_start),
            side(self.min_finish, self.max_finish)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_precise_interval() {
        let interval = Interval::precise(10, 20).unwrap();
        assert_eq!(interval.start(), (Weight::finite(10), Weight::finite(10)));
        assert_eq!(interval.finish(), (Weight::finite(20), Weight::finite(20)));
        assert_eq!(interval.min_length().unwrap(), Weight::finite(10));
        assert_eq!(interval.max_length().unwrap(), Weight::finite(10));
        assert!(!interval.is_point());
    }

    #[test]
    fn test_precise_interval_rejects_inverted() {
        assert!(Interval::precise(20, 10).is_err());
        assert!(Interval::precise(10, 10).is_ok());
    }

    #[test]
    fn test_point_interval() {
        let point = Interval::point(5);
        assert!(point.is_point());
        assert_eq!(point.max_length().unwrap(), Weight::ZERO);
    }

    #[test]
    fn test_imprecise_validation() {
        let bad = Interval::imprecise(
            (Weight::finite(5), Weight::finite(1)),
            (Weight::finite(10), Weight::finite(10)),
        );
        assert!(bad.is_err());

        let ok = Interval::imprecise(
            (Weight::finite(0), Weight::finite(5)),
            (Weight::finite(3), Weight::finite(10)),
        )
        .unwrap();
        assert_eq!(ok.min_length().unwrap(), Weight::ZERO);
        assert_eq!(ok.max_length().unwrap(), Weight::finite(10));
    }

    #[test]
    fn test_open_ended_length() {
        let open = Interval::imprecise(
            (Weight::finite(0), Weight::finite(0)),
            (Weight::finite(10), Weight::POS_INFINITY),
        )
        .unwrap();
        assert_eq!(open.max_length().unwrap(), Weight::POS_INFINITY);
        assert_eq!(open.min_length().unwrap(), Weight::finite(10));
    }

    #[test]
    fn test_between_uses_milliseconds() {
        let now = Utc::now();
        let interval = Interval::between(now, now + Duration::minutes(2)).unwrap();
        assert_eq!(interval.max_length().unwrap(), Weight::finite(120_000));
    }

    #[test]
    fn test_union_and_intersection() {
        let a = Interval::precise(0, 10).unwrap();
        let b = Interval::precise(5, 20).unwrap();
        let c = Interval::precise(30, 40).unwrap();

        assert_eq!(a.union(&b), Interval::precise(0, 20).unwrap());
        assert_eq!(a.intersection(&b), Some(Interval::precise(5, 10).unwrap()));
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_overlap_predicates() {
        let a = Interval::precise(0, 10).unwrap();
        let b = Interval::precise(10, 20).unwrap();
        let c = Interval::precise(5, 15).unwrap();

        assert!(!a.overlaps_properly(&b));
        assert!(a.overlaps_or_meets(&b));
        assert!(a.overlaps_properly(&c));
    }

    #[test]
    fn test_time_span_conversion() {
        assert_eq!(TimeSpan::minutes(120).to_weight(), Weight::finite(7_200_000));
        assert_eq!(TimeSpan::new(i64::MAX, Granularity::Day).to_weight(), Weight::POS_INFINITY);
        assert_eq!(format!("{}", TimeSpan::hours(2)), "2 h");
    }

    #[test]
    fn test_display() {
        let interval = Interval::precise(1, 2).unwrap();
        assert_eq!(format!("{interval}"), "[1 → 2]");
    }

    #[test]
    fn test_serialization() {
        let interval = Interval::precise(1, 2)
            .unwrap()
            .with_granularity(Granularity::Minute, Granularity::Hour);
        let json = serde_json::to_string(&interval).unwrap();
        let back: Interval = serde_json::from_str(&json).unwrap();
        assert_eq!(interval, back);
        assert_eq!(back.finish_granularity(), Granularity::Hour);
    }
}
