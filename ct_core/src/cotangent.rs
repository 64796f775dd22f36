//! Cotangent kinds - the closed variant set every operation consumes.
//!
//! A cotangent is a derivative contribution paired with a primal. The
//! variants: [`Cotangent::Concrete`] carries data shaped like (or coercible
//! to) the primal; [`Cotangent::Structural`] is a field-wise tree mirroring a
//! composite primal; [`Cotangent::Zero`] is the structural zero; and
//! [`Cotangent::Lazy`] defers its computation until first use.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::value::Value;

/// A field-wise composite cotangent keyed by the primal's field names.
///
/// Each field holds a full [`Cotangent`], so per-field zeros and lazy values
/// are representable.
#[derive(Debug, Clone, PartialEq)]
pub struct StructTangent {
    pub name: &'static str,
    pub fields: Vec<(&'static str, Cotangent)>,
}

impl StructTangent {
    pub fn new(name: &'static str, fields: Vec<(&'static str, Cotangent)>) -> Self {
        StructTangent { name, fields }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Cotangent> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, c)| c)
    }
}

/// A derivative contribution for some primal.
#[derive(Debug, Clone)]
pub enum Cotangent {
    /// Carries concrete data.
    Concrete(Value),
    /// Field-wise composite tangent.
    Structural(StructTangent),
    /// The structural zero: the additive identity, carrying no data.
    Zero,
    /// A deferred computation, forced at most once.
    Lazy(LazyCotangent),
}

impl Cotangent {
    /// Wrap a deferred computation.
    ///
    /// The thunk runs at most once; its result (or its error) is cached so
    /// forcing is idempotent. Errors raised by the thunk propagate unchanged
    /// to every consumer that forces the value.
    pub fn lazy<F>(thunk: F) -> Cotangent
    where
        F: FnOnce() -> Result<Cotangent, Error> + 'static,
    {
        Cotangent::Lazy(LazyCotangent::new(thunk))
    }

    /// Resolve lazy wrappers, yielding a non-lazy cotangent.
    ///
    /// Non-lazy cotangents are returned as-is (cloned); nested lazy values
    /// are forced through.
    pub fn forced(&self) -> Result<Cotangent, Error> {
        match self {
            Cotangent::Lazy(l) => l.force(),
            other => Ok(other.clone()),
        }
    }

    /// The kind name, used in error messages and trace events.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Cotangent::Concrete(_) => "concrete",
            Cotangent::Structural(_) => "structural",
            Cotangent::Zero => "zero",
            Cotangent::Lazy(_) => "lazy",
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Cotangent::Zero)
    }
}

impl PartialEq for Cotangent {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // Forcing is transparent to every consumer, equality included.
            (Cotangent::Lazy(_), _) | (_, Cotangent::Lazy(_)) => {
                match (self.forced(), other.forced()) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
            }
            (Cotangent::Concrete(a), Cotangent::Concrete(b)) => a == b,
            (Cotangent::Structural(a), Cotangent::Structural(b)) => a == b,
            (Cotangent::Zero, Cotangent::Zero) => true,
            _ => false,
        }
    }
}

type Thunk = Box<dyn FnOnce() -> Result<Cotangent, Error>>;

struct LazyInner {
    thunk: RefCell<Option<Thunk>>,
    cell: OnceCell<Result<Cotangent, Error>>,
}

/// A deferred cotangent computation with cached, idempotent forcing.
#[derive(Clone)]
pub struct LazyCotangent(Rc<LazyInner>);

impl LazyCotangent {
    pub fn new<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Result<Cotangent, Error> + 'static,
    {
        LazyCotangent(Rc::new(LazyInner {
            thunk: RefCell::new(Some(Box::new(thunk))),
            cell: OnceCell::new(),
        }))
    }

    /// Run the thunk if it has not run yet and return the cached result.
    ///
    /// A thunk yielding another lazy cotangent is forced through, so the
    /// result is always concrete, structural, or zero.
    pub fn force(&self) -> Result<Cotangent, Error> {
        let result = self.0.cell.get_or_init(|| {
            let thunk = self
                .0
                .thunk
                .borrow_mut()
                .take()
                .expect("lazy cotangent forced from within its own thunk");
            thunk()
        });
        match result {
            Ok(ct) => ct.forced(),
            Err(e) => Err(e.clone()),
        }
    }

    /// Whether the thunk has already run.
    pub fn is_forced(&self) -> bool {
        self.0.cell.get().is_some()
    }
}

impl fmt::Debug for LazyCotangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.cell.get() {
            Some(Ok(ct)) => write!(f, "Lazy(forced {:?})", ct),
            Some(Err(e)) => write!(f, "Lazy(failed {})", e),
            None => write!(f, "Lazy(pending)"),
        }
    }
}
