//! Error types for projection and natural/structural conversion.
//!
//! Every failure here is terminal for the enclosing backward-pass call: the
//! operations are pure and deterministic, so there is nothing to retry.

use thiserror::Error;

use crate::shape::Shape;

/// Errors raised by projectors, the destructure/restructure protocol, and the
/// natural-pullback adapter.
///
/// A structural-zero cotangent is never an error condition: every branch
/// resolves it to a typed zero instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// No projection or conversion rule exists for this target/cotangent
    /// pair and no fallback applies.
    #[error("no projection rule for target {target} from {cotangent} cotangent")]
    UnsupportedType { target: String, cotangent: String },

    /// A concrete cotangent's shape is incompatible with the destination.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },
}

impl Error {
    /// Convenience constructor for the common unsupported-pair case.
    pub fn unsupported(target: impl Into<String>, cotangent: impl Into<String>) -> Self {
        Error::UnsupportedType {
            target: target.into(),
            cotangent: cotangent.into(),
        }
    }
}
