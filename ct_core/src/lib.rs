//! # ct_core - Cotangent Projection and Natural/Structural Adapters
//!
//! This crate is the cotangent plumbing of a reverse-mode differentiation
//! framework: it coerces incoming cotangents (gradient-like values) onto the
//! exact type and shape of a primal, and converts between the two cotangent
//! representations every rule has to agree on:
//!
//! - the **natural** representation: a flat dense array matching the
//!   primal's storage layout, and
//! - the **structural** representation: a tagged, field-wise tree mirroring
//!   the primal's composite structure.
//!
//! Derivative rules themselves (what the gradient of `matmul` *is*) live
//! outside this crate; what lives here is everything a rule needs to speak
//! the structural-cotangent calling convention while being written in plain
//! flat-array terms.
//!
//! ## Quick Start
//!
//! ```
//! use ct_core::prelude::*;
//!
//! // y = sum(x) for a 2x2 input, with the pullback written in natural
//! // (flat-array) terms: broadcast the scalar cotangent back to 2x2.
//! let x = Value::Dense(DenseArray::new(
//!     DType::F64,
//!     Shape::new(vec![2, 2]),
//!     vec![1.0, 2.0, 3.0, 4.0],
//! ));
//! let y = Value::Real(10.0);
//!
//! let adapted = wrap_natural_pullback(
//!     |y_nat| {
//!         Ok(vec![DenseArray::filled(
//!             DType::F64,
//!             Shape::new(vec![2, 2]),
//!             y_nat.scalar_value(),
//!         )])
//!     },
//!     &y,
//!     std::slice::from_ref(&x),
//! );
//!
//! let grads = adapted.call(&Cotangent::Concrete(Value::Real(2.0))).unwrap();
//! assert_eq!(
//!     grads[0],
//!     Cotangent::Concrete(Value::Dense(DenseArray::filled(
//!         DType::F64,
//!         Shape::new(vec![2, 2]),
//!         2.0,
//!     )))
//! );
//! ```
//!
//! ## Architecture
//!
//! - **[`Cotangent`]**: the closed kind set - concrete, structural, zero,
//!   lazy. Forcing a lazy cotangent is idempotent and transparent to every
//!   operation here.
//! - **[`Projector`]**: built once per destination value, coerces any
//!   cotangent kind (and structurally equivalent foreign representations)
//!   onto that destination.
//! - **[`natural`]**: destructure/restructure between structural and natural
//!   form, plus the adjoints of both maps.
//! - **[`wrap_natural_pullback`]**: composes a flat-array pullback with
//!   those adjoints to satisfy the structural calling convention.
//! - **[`ExtensionValue`]**: the open dispatch point - user value categories
//!   implement it and participate like built-ins.
//!
//! Everything is pure and synchronous: no I/O, no shared mutable state, no
//! retries. Failures surface as [`Error`] and are terminal for the
//! enclosing backward pass.

pub mod adapter;
pub mod array;
pub mod cotangent;
pub mod error;
pub mod natural;
pub mod project;
pub mod shape;
pub mod trace;
pub mod value;

pub use adapter::{wrap_natural_pullback, AdaptedPullback};
pub use array::{DType, DenseArray};
pub use cotangent::{Cotangent, LazyCotangent, StructTangent};
pub use error::Error;
pub use project::{projector, Projector};
pub use shape::Shape;
pub use trace::{TraceEvent, TraceSink};
pub use value::{Complex, ExtensionValue, FillArray, ScaledArray, StructValue, Value};

/// Convenience re-exports for rule authors.
pub mod prelude {
    pub use crate::adapter::{wrap_natural_pullback, AdaptedPullback};
    pub use crate::array::{DType, DenseArray};
    pub use crate::cotangent::{Cotangent, StructTangent};
    pub use crate::error::Error;
    pub use crate::natural::{
        destructure, destructure_pullback, has_natural_form, restructure, restructure_pullback,
    };
    pub use crate::project::{projector, Projector};
    pub use crate::shape::Shape;
    pub use crate::value::{
        Complex, ExtensionValue, FillArray, ScaledArray, StructValue, Value,
    };
}
