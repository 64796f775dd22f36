//! # ct_rules - Example Derivative Rules and Gradient Checking
//!
//! Application code exercising the `ct_core` adapter layer:
//!
//! - **[`rules`]**: forward computations with pullbacks written purely in
//!   natural (flat-array) terms - `matmul`, `sum`, `scale`, `dot`, `diag` -
//!   lifted into the structural calling convention with
//!   [`ct_core::wrap_natural_pullback`].
//! - **[`check`]**: a finite-difference harness comparing an adapted
//!   pullback's vector-Jacobian products against central-difference
//!   estimates, plus the inner products and directional derivatives the
//!   adjoint (dot-product) law needs.
//! - **[`symmetric`]**: a packed-triangle symmetric matrix implementing
//!   [`ct_core::ExtensionValue`], showing how user categories join the
//!   protocol.
//!
//! ## Example
//!
//! ```
//! use ct_core::prelude::*;
//! use ct_rules::check::{check_adapted_pullback, seeded_rng, random_dense, DEFAULT_TOLERANCE};
//! use ct_rules::rules::sum_rule;
//!
//! let mut rng = seeded_rng(7);
//! let x = Value::Dense(random_dense(&mut rng, Shape::new(vec![2, 2])));
//! let (_, adapted) = sum_rule(&x);
//!
//! check_adapted_pullback(
//!     |vals| Value::Real(destructure(&vals[0]).sum()),
//!     std::slice::from_ref(&x),
//!     &Cotangent::Concrete(Value::Real(2.0)),
//!     &adapted,
//!     DEFAULT_TOLERANCE,
//! )
//! .unwrap();
//! ```

pub mod check;
pub mod rules;
pub mod symmetric;

pub use check::{check_adapted_pullback, CheckError, DEFAULT_TOLERANCE};
pub use rules::{diag_rule, dot_rule, matmul_rule, scale_rule, sum_rule};
pub use symmetric::SymmetricMatrix;
