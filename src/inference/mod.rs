//! Activation scheduling.
//!
//! Matches found for a subject become activations on an [`Agenda`]; the
//! [`DerivationConflictResolver`] decides which fires next.

mod agenda;
mod policies;
mod resolver;

pub use agenda::{Activation, Agenda};
pub use policies::DependencyPolicy;
pub use resolver::DerivationConflictResolver;
