//! Dependency policies for the conflict resolver.

use serde::{Deserialize, Serialize};

/// How the dependency criterion interacts with salience and recency.
///
/// Policies are pure: the same agenda and knowledge base always yield the
/// same firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DependencyPolicy {
    /// Activations of an abstraction that depends, directly or transitively,
    /// on an abstraction with pending activations are deferred. Eligible
    /// activations are then ordered by salience, propagation, recency,
    /// dependency and load order.
    TopologicalFirst,

    /// Salience, propagation and recency are consulted before dependency,
    /// with no deferral. A dependent abstraction may be attempted before its
    /// inputs have settled.
    Inherited,
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self::TopologicalFirst
    }
}

impl DependencyPolicy {
    /// Returns true if this policy defers dependent activations.
    #[must_use]
    pub const fn defers_dependents(self) -> bool {
        matches!(self, Self::TopologicalFirst)
    }

    /// Returns a short stable identifier suitable for logging/debugging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TopologicalFirst => "topological_first",
            Self::Inherited => "inherited",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_topological_first() {
        assert_eq!(DependencyPolicy::default(), DependencyPolicy::TopologicalFirst);
        assert!(DependencyPolicy::default().defers_dependents());
        assert!(!DependencyPolicy::Inherited.defers_dependents());
    }

    #[test]
    fn test_policy_serializes_with_type_tag() {
        let json = serde_json::to_string(&DependencyPolicy::Inherited).unwrap();
        assert_eq!(json, r#"{"type":"inherited"}"#);
        let back: DependencyPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "inherited");
    }
}
