//! Engine and runtime configuration.
//!
//! Hosts embed these structs in their own configuration files; every field
//! has a default and `validate` rejects values the engine cannot run with.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::inference::DependencyPolicy;

/// Per-subject derivation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How the resolver weighs dependency order against salience and recency.
    pub dependency_policy: DependencyPolicy,
    /// Activations one subject may fire before its fixed point is abandoned.
    pub max_firings_per_subject: usize,
    /// Cache proposition-against-role checks within one subject.
    pub memoize_matches: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dependency_policy: DependencyPolicy::default(),
            max_firings_per_subject: 100_000,
            memoize_matches: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_firings_per_subject == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_firings_per_subject must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads processing subjects.
    pub workers: usize,
    /// Maximum queued subjects.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "workers must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "queue_capacity must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let engine = EngineConfig {
            max_firings_per_subject: 0,
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_err());

        let runtime = RuntimeConfig {
            workers: 0,
            ..RuntimeConfig::default()
        };
        assert!(runtime.validate().unwrap_err().to_string().contains("workers"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"dependency_policy":{"type":"inherited"}}"#).unwrap();
        assert_eq!(cfg.dependency_policy, DependencyPolicy::Inherited);
        assert_eq!(cfg.max_firings_per_subject, EngineConfig::default().max_firings_per_subject);
        assert!(cfg.memoize_matches);
    }
}
