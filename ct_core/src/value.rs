//! The dynamic value model: one variant per supported value category.
//!
//! A [`Value`] is a primal participating in differentiation, or the payload
//! of a concrete cotangent. The variant set is closed over the built-in
//! categories; user types plug in through the [`ExtensionValue`] trait
//! without touching the enum.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::array::DenseArray;
use crate::cotangent::Cotangent;
use crate::error::Error;
use crate::shape::Shape;

/// A general numeric scalar with real and imaginary parts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Complex { re, im }
    }
}

/// A constant-fill array: one scalar broadcast over a shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FillArray {
    pub value: f64,
    pub shape: Shape,
}

impl FillArray {
    pub fn new(value: f64, shape: Shape) -> Self {
        FillArray { value, shape }
    }
}

/// A scaled-payload wrapper: represents `factor * payload` without
/// materializing the product.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledArray {
    pub factor: f64,
    pub payload: DenseArray,
}

impl ScaledArray {
    pub fn new(factor: f64, payload: DenseArray) -> Self {
        ScaledArray { factor, payload }
    }
}

/// A composite value with named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub name: &'static str,
    pub fields: Vec<(&'static str, Value)>,
}

impl StructValue {
    pub fn new(name: &'static str, fields: Vec<(&'static str, Value)>) -> Self {
        StructValue { name, fields }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}

/// A primal value or concrete cotangent payload.
#[derive(Debug, Clone)]
pub enum Value {
    /// Real scalar, double precision.
    Real(f64),
    /// Real scalar, single precision.
    Real32(f32),
    /// General numeric scalar.
    Complex(Complex),
    /// Homogeneous dense array of rank N.
    Dense(DenseArray),
    /// Fixed-size array: same shape contract as `Dense`, distinct
    /// representation (a "foreign" array the projector materializes).
    Fixed(DenseArray),
    /// Diagonal matrix wrapping its rank-1 diagonal payload.
    Diagonal(DenseArray),
    /// Constant-fill array.
    Fill(FillArray),
    /// Scaled-payload wrapper.
    Scaled(ScaledArray),
    /// Composite with named fields.
    Struct(StructValue),
    /// User-supplied value category.
    Extension(Rc<dyn ExtensionValue>),
}

impl Value {
    /// The category name, used in error messages and trace events.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Real(_) => "Real",
            Value::Real32(_) => "Real32",
            Value::Complex(_) => "Complex",
            Value::Dense(_) => "Dense",
            Value::Fixed(_) => "Fixed",
            Value::Diagonal(_) => "Diagonal",
            Value::Fill(_) => "Fill",
            Value::Scaled(_) => "Scaled",
            Value::Struct(_) => "Struct",
            Value::Extension(e) => e.type_name(),
        }
    }

    /// The additive identity of this value's type and shape.
    pub fn zero_like(&self) -> Value {
        match self {
            Value::Real(_) => Value::Real(0.0),
            Value::Real32(_) => Value::Real32(0.0),
            Value::Complex(_) => Value::Complex(Complex::new(0.0, 0.0)),
            Value::Dense(a) => Value::Dense(DenseArray::zeros(a.dtype(), a.shape().clone())),
            Value::Fixed(a) => Value::Fixed(DenseArray::zeros(a.dtype(), a.shape().clone())),
            Value::Diagonal(d) => {
                Value::Diagonal(DenseArray::zeros(d.dtype(), d.shape().clone()))
            }
            Value::Fill(f) => Value::Fill(FillArray::new(0.0, f.shape.clone())),
            Value::Scaled(s) => Value::Scaled(ScaledArray::new(
                s.factor,
                DenseArray::zeros(s.payload.dtype(), s.payload.shape().clone()),
            )),
            Value::Struct(s) => Value::Struct(StructValue::new(
                s.name,
                s.fields
                    .iter()
                    .map(|(n, v)| (*n, v.zero_like()))
                    .collect(),
            )),
            Value::Extension(e) => e.zero(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Real32(a), Value::Real32(b)) => a == b,
            (Value::Complex(a), Value::Complex(b)) => a == b,
            (Value::Dense(a), Value::Dense(b)) => a == b,
            (Value::Fixed(a), Value::Fixed(b)) => a == b,
            (Value::Diagonal(a), Value::Diagonal(b)) => a == b,
            (Value::Fill(a), Value::Fill(b)) => a == b,
            (Value::Scaled(a), Value::Scaled(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Extension(a), Value::Extension(b)) => a.eq_value(b.as_ref()),
            _ => false,
        }
    }
}

/// Open extension point for user value categories.
///
/// A type implementing this trait participates in projection and in the
/// destructure/restructure protocol exactly like the built-in categories:
/// wrap it in [`Value::Extension`] and every operation dispatches to these
/// methods. `dtype`-style metadata, field layouts, and anything else the
/// conversions need live inside the implementing type.
pub trait ExtensionValue: fmt::Debug {
    /// The category name (used for exact-match dispatch and errors).
    fn type_name(&self) -> &'static str;

    /// Downcast support for [`ExtensionValue::eq_value`] implementations.
    fn as_any(&self) -> &dyn Any;

    /// Structural equality against another extension value.
    fn eq_value(&self, other: &dyn ExtensionValue) -> bool;

    /// The additive identity of this value's type and shape.
    fn zero(&self) -> Value;

    /// The canonical linearization of this value.
    fn destructure(&self) -> DenseArray;

    /// Rebuild a value of this type from a natural array, using `self` as
    /// the prototype for static shape/metadata.
    fn restructure(&self, natural: &DenseArray) -> Result<Value, Error>;

    /// Vector-Jacobian product of [`ExtensionValue::destructure`] at `self`.
    fn destructure_pullback(&self, natural: &DenseArray) -> Result<Cotangent, Error>;

    /// Vector-Jacobian product of [`ExtensionValue::restructure`] at `self`.
    fn restructure_pullback(&self, structural: &Cotangent) -> Result<DenseArray, Error>;

    /// Projection of a non-exact, non-zero cotangent onto this value.
    ///
    /// The projector handles exact matches, structural zeros, and lazy
    /// forcing before consulting this hook.
    fn project(&self, cotangent: &Cotangent) -> Result<Cotangent, Error> {
        Err(Error::unsupported(self.type_name(), cotangent.kind_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_like_scalars() {
        assert_eq!(Value::Real(3.5).zero_like(), Value::Real(0.0));
        assert_eq!(
            Value::Complex(Complex::new(1.0, 2.0)).zero_like(),
            Value::Complex(Complex::new(0.0, 0.0))
        );
    }

    #[test]
    fn test_zero_like_struct_recurses() {
        let v = Value::Struct(StructValue::new(
            "Pair",
            vec![
                ("a", Value::Real(1.0)),
                ("b", Value::Dense(DenseArray::vector(vec![1.0, 2.0]))),
            ],
        ));
        let z = v.zero_like();
        match z {
            Value::Struct(s) => {
                assert_eq!(s.field("a"), Some(&Value::Real(0.0)));
                assert_eq!(
                    s.field("b"),
                    Some(&Value::Dense(DenseArray::vector(vec![0.0, 0.0])))
                );
            }
            _ => panic!("expected struct zero"),
        }
    }

    #[test]
    fn test_struct_field_lookup() {
        let s = StructValue::new("S", vec![("x", Value::Real(1.0))]);
        assert_eq!(s.field("x"), Some(&Value::Real(1.0)));
        assert_eq!(s.field("y"), None);
    }
}
