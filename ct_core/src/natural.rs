//! The destructure/restructure protocol and its adjoints.
//!
//! Every differentiable value admits one natural representation: a dense
//! array matching its storage rank ([`destructure`]). [`restructure`]
//! rebuilds a value from that array given a prototype for static metadata.
//! This module supplies both maps for the built-in categories and, the part
//! the adapter actually consumes, their vector-Jacobian products:
//!
//! - [`destructure_pullback`] takes a cotangent in natural form and
//!   distributes it across the fields that contributed to the linearization
//!   (natural -> structural).
//! - [`restructure_pullback`] takes a structural cotangent and accumulates it
//!   back into natural form (structural -> natural).
//!
//! Where several mathematically valid `restructure` definitions exist (a
//! constant-fill array can collapse by mean or by first element), the
//! adjoint follows the definition chosen here; correctness is the
//! dot-product law, not any one choice.
//!
//! Both pullbacks resolve a structural-zero input to the typed zero of their
//! output and force lazy inputs before processing.

use crate::array::{DType, DenseArray};
use crate::cotangent::{Cotangent, StructTangent};
use crate::error::Error;
use crate::shape::Shape;
use crate::value::{Complex, FillArray, ScaledArray, StructValue, Value};

/// Whether a value category distinguishes natural from structural form.
///
/// Plain reals and dense arrays are their own natural representation; the
/// adapter treats their conversion steps as the identity.
pub fn has_natural_form(x: &Value) -> bool {
    !matches!(
        x,
        Value::Real(_) | Value::Real32(_) | Value::Complex(_) | Value::Dense(_)
    )
}

/// The shape of a value's natural representation.
pub fn natural_shape(x: &Value) -> Shape {
    match x {
        Value::Real(_) | Value::Real32(_) => Shape::scalar(),
        Value::Complex(_) => Shape::new(vec![2]),
        Value::Dense(a) | Value::Fixed(a) => a.shape().clone(),
        Value::Diagonal(d) => Shape::new(vec![d.numel(), d.numel()]),
        Value::Fill(f) => f.shape.clone(),
        Value::Scaled(s) => s.payload.shape().clone(),
        Value::Struct(s) => {
            let total = s
                .fields
                .iter()
                .map(|(_, v)| natural_shape(v).numel())
                .sum();
            Shape::new(vec![total])
        }
        Value::Extension(e) => e.destructure().shape().clone(),
    }
}

fn natural_dtype(x: &Value) -> DType {
    match x {
        Value::Real32(_) => DType::F32,
        Value::Dense(a) | Value::Fixed(a) | Value::Diagonal(a) => a.dtype(),
        Value::Scaled(s) => s.payload.dtype(),
        _ => DType::F64,
    }
}

/// The canonical linearization of a value.
pub fn destructure(x: &Value) -> DenseArray {
    match x {
        Value::Real(v) => DenseArray::scalar(*v),
        Value::Real32(v) => {
            DenseArray::new(DType::F32, Shape::scalar(), vec![*v as f64])
        }
        Value::Complex(c) => DenseArray::vector(vec![c.re, c.im]),
        Value::Dense(a) | Value::Fixed(a) => a.clone(),
        Value::Diagonal(d) => DenseArray::from_diagonal(d),
        Value::Fill(f) => DenseArray::filled(DType::F64, f.shape.clone(), f.value),
        Value::Scaled(s) => s.payload.scale(s.factor),
        Value::Struct(s) => {
            let mut data = Vec::new();
            for (_, field) in &s.fields {
                data.extend_from_slice(destructure(field).data());
            }
            let shape = Shape::new(vec![data.len()]);
            DenseArray::new(DType::F64, shape, data)
        }
        Value::Extension(e) => e.destructure(),
    }
}

/// Rebuild a value from its natural representation, using `prototype` for
/// static shape/metadata.
pub fn restructure(prototype: &Value, natural: &DenseArray) -> Result<Value, Error> {
    let expected = natural_shape(prototype);
    if natural.shape() != &expected {
        return Err(Error::ShapeMismatch {
            expected,
            got: natural.shape().clone(),
        });
    }
    match prototype {
        Value::Real(_) => Ok(Value::Real(natural.scalar_value())),
        Value::Real32(_) => Ok(Value::Real32(natural.scalar_value() as f32)),
        Value::Complex(_) => Ok(Value::Complex(Complex::new(
            natural.data()[0],
            natural.data()[1],
        ))),
        Value::Dense(a) => Ok(Value::Dense(natural.cast(a.dtype()))),
        Value::Fixed(a) => Ok(Value::Fixed(natural.cast(a.dtype()))),
        Value::Diagonal(d) => Ok(Value::Diagonal(natural.diagonal().cast(d.dtype()))),
        // Collapse by mean: one of several valid affine reconstructions.
        Value::Fill(f) => Ok(Value::Fill(FillArray::new(natural.mean(), f.shape.clone()))),
        Value::Scaled(s) => Ok(Value::Scaled(ScaledArray::new(
            s.factor,
            natural.scale(1.0 / s.factor).cast(s.payload.dtype()),
        ))),
        Value::Struct(s) => {
            let mut fields = Vec::with_capacity(s.fields.len());
            let mut offset = 0;
            for (name, field) in &s.fields {
                let field_shape = natural_shape(field);
                let numel = field_shape.numel();
                let slice = natural.data()[offset..offset + numel].to_vec();
                let sub = DenseArray::new(DType::F64, field_shape, slice);
                fields.push((*name, restructure(field, &sub)?));
                offset += numel;
            }
            Ok(Value::Struct(StructValue::new(s.name, fields)))
        }
        Value::Extension(e) => e.restructure(natural),
    }
}

/// Vector-Jacobian product of [`destructure`] at `x`: distribute a natural
/// cotangent across the structural representation of `x`.
pub fn destructure_pullback(x: &Value, natural_ct: &Cotangent) -> Result<Cotangent, Error> {
    match natural_ct {
        Cotangent::Zero => Ok(structural_zero_of(x)),
        Cotangent::Lazy(l) => destructure_pullback(x, &l.force()?),
        Cotangent::Structural(_) => Err(Error::unsupported(
            x.type_name(),
            "structural (natural cotangent expected)",
        )),
        Cotangent::Concrete(v) => {
            let nat = as_natural_array(v)
                .ok_or_else(|| Error::unsupported(x.type_name(), v.type_name()))?;
            let expected = natural_shape(x);
            if nat.shape() != &expected {
                return Err(Error::ShapeMismatch {
                    expected,
                    got: nat.shape().clone(),
                });
            }
            destructure_pullback_dense(x, &nat)
        }
    }
}

fn destructure_pullback_dense(x: &Value, nat: &DenseArray) -> Result<Cotangent, Error> {
    match x {
        Value::Real(_) => Ok(Cotangent::Concrete(Value::Real(nat.scalar_value()))),
        Value::Real32(_) => Ok(Cotangent::Concrete(Value::Real32(
            nat.scalar_value() as f32
        ))),
        Value::Complex(_) => Ok(Cotangent::Concrete(Value::Complex(Complex::new(
            nat.data()[0],
            nat.data()[1],
        )))),
        Value::Dense(a) => Ok(Cotangent::Concrete(Value::Dense(nat.cast(a.dtype())))),
        Value::Fixed(a) => Ok(Cotangent::Concrete(Value::Fixed(nat.cast(a.dtype())))),
        // Only the diagonal contributed to the linearization.
        Value::Diagonal(_) => Ok(Cotangent::Structural(StructTangent::new(
            "Diagonal",
            vec![(
                "diag",
                Cotangent::Concrete(Value::Dense(nat.diagonal())),
            )],
        ))),
        // The broadcast value receives the sum of the natural cotangent.
        Value::Fill(_) => Ok(Cotangent::Structural(StructTangent::new(
            "Fill",
            vec![("value", Cotangent::Concrete(Value::Real(nat.sum())))],
        ))),
        // factor receives <nat, payload>; payload receives factor * nat.
        Value::Scaled(s) => Ok(Cotangent::Structural(StructTangent::new(
            "Scaled",
            vec![
                (
                    "factor",
                    Cotangent::Concrete(Value::Real(nat.dot(&s.payload))),
                ),
                (
                    "payload",
                    Cotangent::Concrete(Value::Dense(nat.scale(s.factor))),
                ),
            ],
        ))),
        Value::Struct(s) => {
            let mut fields = Vec::with_capacity(s.fields.len());
            let mut offset = 0;
            for (name, field) in &s.fields {
                let field_shape = natural_shape(field);
                let numel = field_shape.numel();
                let slice = nat.data()[offset..offset + numel].to_vec();
                let sub = DenseArray::new(DType::F64, field_shape, slice);
                fields.push((*name, destructure_pullback_dense(field, &sub)?));
                offset += numel;
            }
            Ok(Cotangent::Structural(StructTangent::new(s.name, fields)))
        }
        Value::Extension(e) => e.destructure_pullback(nat),
    }
}

/// Vector-Jacobian product of [`restructure`] at `x`: accumulate a
/// structural cotangent back into natural form.
///
/// Always yields a concrete dense cotangent of the natural shape.
pub fn restructure_pullback(x: &Value, structural_ct: &Cotangent) -> Result<Cotangent, Error> {
    let nat = restructure_pullback_array(x, structural_ct)?;
    Ok(Cotangent::Concrete(Value::Dense(nat)))
}

fn restructure_pullback_array(x: &Value, ct: &Cotangent) -> Result<DenseArray, Error> {
    let shape = natural_shape(x);
    match ct {
        Cotangent::Zero => Ok(DenseArray::zeros(natural_dtype(x), shape)),
        Cotangent::Lazy(l) => restructure_pullback_array(x, &l.force()?),
        _ => match x {
            Value::Real(_) | Value::Real32(_) => {
                let v = scalar_component(ct)?
                    .ok_or_else(|| Error::unsupported(x.type_name(), ct.kind_name()))?;
                Ok(DenseArray::new(natural_dtype(x), shape, vec![v]))
            }
            Value::Complex(_) => match ct {
                Cotangent::Concrete(Value::Complex(c)) => {
                    Ok(DenseArray::vector(vec![c.re, c.im]))
                }
                _ => Err(Error::unsupported("Complex", ct.kind_name())),
            },
            Value::Dense(_) | Value::Fixed(_) => {
                match array_component(ct, &shape)? {
                    Some(arr) => Ok(arr),
                    None => Ok(DenseArray::zeros(natural_dtype(x), shape)),
                }
            }
            Value::Diagonal(d) => {
                let payload = match ct {
                    Cotangent::Concrete(Value::Diagonal(v)) => Some(v.clone()),
                    Cotangent::Structural(t) => match t.field("diag") {
                        Some(field) => {
                            array_component(field, &Shape::new(vec![d.numel()]))?
                        }
                        None => None,
                    },
                    _ => return Err(Error::unsupported("Diagonal", ct.kind_name())),
                };
                match payload {
                    Some(v) => Ok(DenseArray::from_diagonal(&v)),
                    None => Ok(DenseArray::zeros(natural_dtype(x), shape)),
                }
            }
            Value::Fill(f) => {
                let value = match ct {
                    Cotangent::Concrete(Value::Fill(g)) => Some(g.value),
                    Cotangent::Structural(t) => match t.field("value") {
                        Some(field) => scalar_component(field)?,
                        None => None,
                    },
                    _ => return Err(Error::unsupported("Fill", ct.kind_name())),
                };
                // Adjoint of the mean collapse: broadcast value / numel.
                let numel = f.shape.numel() as f64;
                Ok(DenseArray::filled(
                    DType::F64,
                    f.shape.clone(),
                    value.unwrap_or(0.0) / numel,
                ))
            }
            Value::Scaled(s) => {
                // restructure reads only the payload from the natural array,
                // so the factor component of the cotangent does not flow.
                let payload = match ct {
                    Cotangent::Concrete(Value::Scaled(v)) => Some(v.payload.clone()),
                    Cotangent::Structural(t) => match t.field("payload") {
                        Some(field) => array_component(field, s.payload.shape())?,
                        None => None,
                    },
                    _ => return Err(Error::unsupported("Scaled", ct.kind_name())),
                };
                match payload {
                    Some(p) => Ok(p.scale(1.0 / s.factor)),
                    None => Ok(DenseArray::zeros(natural_dtype(x), shape)),
                }
            }
            Value::Struct(sv) => {
                let mut data = Vec::with_capacity(shape.numel());
                for (name, field) in &sv.fields {
                    let field_ct = match ct {
                        Cotangent::Structural(t) => {
                            t.field(name).cloned().unwrap_or(Cotangent::Zero)
                        }
                        Cotangent::Concrete(Value::Struct(cv)) => cv
                            .field(name)
                            .map(|v| Cotangent::Concrete(v.clone()))
                            .unwrap_or(Cotangent::Zero),
                        _ => return Err(Error::unsupported(sv.name, ct.kind_name())),
                    };
                    let sub = restructure_pullback_array(field, &field_ct)?;
                    data.extend_from_slice(sub.data());
                }
                Ok(DenseArray::new(DType::F64, shape, data))
            }
            Value::Extension(e) => e.restructure_pullback(ct),
        },
    }
}

/// The typed structural zero of a value's cotangent space.
fn structural_zero_of(x: &Value) -> Cotangent {
    match x {
        Value::Diagonal(_) => Cotangent::Structural(StructTangent::new(
            "Diagonal",
            vec![("diag", Cotangent::Zero)],
        )),
        Value::Fill(_) => Cotangent::Structural(StructTangent::new(
            "Fill",
            vec![("value", Cotangent::Zero)],
        )),
        Value::Scaled(_) => Cotangent::Structural(StructTangent::new(
            "Scaled",
            vec![("factor", Cotangent::Zero), ("payload", Cotangent::Zero)],
        )),
        Value::Struct(s) => Cotangent::Structural(StructTangent::new(
            s.name,
            s.fields.iter().map(|(n, _)| (*n, Cotangent::Zero)).collect(),
        )),
        _ => Cotangent::Concrete(x.zero_like()),
    }
}

/// View a concrete cotangent payload as a natural array, if it is one.
fn as_natural_array(v: &Value) -> Option<DenseArray> {
    match v {
        Value::Dense(a) | Value::Fixed(a) => Some(a.clone()),
        Value::Real(x) => Some(DenseArray::scalar(*x)),
        Value::Real32(x) => Some(DenseArray::new(
            DType::F32,
            Shape::scalar(),
            vec![*x as f64],
        )),
        _ => None,
    }
}

/// Resolve a field cotangent to an array of the expected shape.
///
/// `None` means the field is a structural zero.
fn array_component(ct: &Cotangent, expected: &Shape) -> Result<Option<DenseArray>, Error> {
    match ct {
        Cotangent::Zero => Ok(None),
        Cotangent::Lazy(l) => array_component(&l.force()?, expected),
        Cotangent::Concrete(v) => {
            let arr = as_natural_array(v)
                .ok_or_else(|| Error::unsupported("Dense", v.type_name()))?;
            if arr.shape() != expected {
                return Err(Error::ShapeMismatch {
                    expected: expected.clone(),
                    got: arr.shape().clone(),
                });
            }
            Ok(Some(arr))
        }
        Cotangent::Structural(_) => Err(Error::unsupported("Dense", ct.kind_name())),
    }
}

/// Resolve a field cotangent to a scalar. `None` means structural zero.
fn scalar_component(ct: &Cotangent) -> Result<Option<f64>, Error> {
    match ct {
        Cotangent::Zero => Ok(None),
        Cotangent::Lazy(l) => scalar_component(&l.force()?),
        Cotangent::Concrete(Value::Real(v)) => Ok(Some(*v)),
        Cotangent::Concrete(Value::Real32(v)) => Ok(Some(*v as f64)),
        Cotangent::Concrete(Value::Dense(a)) if a.shape().is_scalar() => {
            Ok(Some(a.scalar_value()))
        }
        _ => Err(Error::unsupported("Real", ct.kind_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dense(shape: Vec<usize>, data: Vec<f64>) -> DenseArray {
        DenseArray::new(DType::F64, Shape::new(shape), data)
    }

    fn assert_value_close(a: &Value, b: &Value) {
        let (da, db) = (destructure(a), destructure(b));
        assert_eq!(da.shape(), db.shape());
        for (x, y) in da.data().iter().zip(db.data().iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_roundtrip_diagonal() {
        let x = Value::Diagonal(DenseArray::vector(vec![1.5, -2.0, 3.0]));
        let back = restructure(&x, &destructure(&x)).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn test_roundtrip_scaled() {
        let x = Value::Scaled(ScaledArray::new(
            2.5,
            dense(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]),
        ));
        let back = restructure(&x, &destructure(&x)).unwrap();
        assert_value_close(&back, &x);
    }

    #[test]
    fn test_roundtrip_fill() {
        let x = Value::Fill(FillArray::new(0.7, Shape::new(vec![3, 4])));
        let back = restructure(&x, &destructure(&x)).unwrap();
        assert_value_close(&back, &x);
    }

    #[test]
    fn test_roundtrip_fixed() {
        let x = Value::Fixed(dense(vec![3], vec![1.0, 2.0, 3.0]));
        let back = restructure(&x, &destructure(&x)).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn test_roundtrip_nested_struct() {
        let x = Value::Struct(StructValue::new(
            "Model",
            vec![
                ("weight", Value::Dense(dense(vec![2], vec![0.5, -0.5]))),
                ("gain", Value::Real(3.0)),
                (
                    "inner",
                    Value::Struct(StructValue::new(
                        "Layer",
                        vec![("diag", Value::Diagonal(DenseArray::vector(vec![1.0, 2.0])))],
                    )),
                ),
            ],
        ));
        let nat = destructure(&x);
        assert_eq!(nat.shape(), &Shape::new(vec![2 + 1 + 4]));
        let back = restructure(&x, &nat).unwrap();
        assert_value_close(&back, &x);
    }

    #[test]
    fn test_destructure_pullback_diagonal_extracts() {
        let x = Value::Diagonal(DenseArray::vector(vec![0.0, 0.0]));
        let nat_ct = Cotangent::Concrete(Value::Dense(dense(
            vec![2, 2],
            vec![1.0, 5.0, 6.0, 2.0],
        )));
        match destructure_pullback(&x, &nat_ct).unwrap() {
            Cotangent::Structural(t) => {
                assert_eq!(
                    t.field("diag"),
                    Some(&Cotangent::Concrete(Value::Dense(DenseArray::vector(
                        vec![1.0, 2.0]
                    ))))
                );
            }
            other => panic!("expected structural, got {:?}", other),
        }
    }

    #[test]
    fn test_destructure_pullback_scaled_distributes() {
        let x = Value::Scaled(ScaledArray::new(2.0, dense(vec![2], vec![3.0, 4.0])));
        let nat_ct = Cotangent::Concrete(Value::Dense(dense(vec![2], vec![1.0, 1.0])));
        match destructure_pullback(&x, &nat_ct).unwrap() {
            Cotangent::Structural(t) => {
                // factor receives <nat, payload> = 3 + 4
                assert_eq!(
                    t.field("factor"),
                    Some(&Cotangent::Concrete(Value::Real(7.0)))
                );
                // payload receives factor * nat
                assert_eq!(
                    t.field("payload"),
                    Some(&Cotangent::Concrete(Value::Dense(dense(
                        vec![2],
                        vec![2.0, 2.0]
                    ))))
                );
            }
            other => panic!("expected structural, got {:?}", other),
        }
    }

    #[test]
    fn test_destructure_pullback_fill_sums() {
        let x = Value::Fill(FillArray::new(0.0, Shape::new(vec![3, 4])));
        let nat_ct = Cotangent::Concrete(Value::Dense(DenseArray::filled(
            DType::F64,
            Shape::new(vec![3, 4]),
            0.5,
        )));
        match destructure_pullback(&x, &nat_ct).unwrap() {
            Cotangent::Structural(t) => {
                assert_eq!(
                    t.field("value"),
                    Some(&Cotangent::Concrete(Value::Real(6.0)))
                );
            }
            other => panic!("expected structural, got {:?}", other),
        }
    }

    #[test]
    fn test_pullbacks_resolve_zero_to_typed_zero() {
        let x = Value::Fill(FillArray::new(1.0, Shape::new(vec![2, 2])));
        let down = destructure_pullback(&x, &Cotangent::Zero).unwrap();
        match down {
            Cotangent::Structural(t) => assert_eq!(t.field("value"), Some(&Cotangent::Zero)),
            other => panic!("expected structural zero, got {:?}", other),
        }

        let up = restructure_pullback(&x, &Cotangent::Zero).unwrap();
        assert_eq!(
            up,
            Cotangent::Concrete(Value::Dense(DenseArray::zeros(
                DType::F64,
                Shape::new(vec![2, 2])
            )))
        );
    }

    #[test]
    fn test_pullbacks_force_lazy_inputs() {
        let x = Value::Diagonal(DenseArray::vector(vec![0.0, 0.0]));
        let lazy = Cotangent::lazy(|| {
            Ok(Cotangent::Concrete(Value::Dense(DenseArray::new(
                DType::F64,
                Shape::new(vec![2, 2]),
                vec![1.0, 0.0, 0.0, 2.0],
            ))))
        });
        let eager = Cotangent::Concrete(Value::Dense(dense(
            vec![2, 2],
            vec![1.0, 0.0, 0.0, 2.0],
        )));
        assert_eq!(
            destructure_pullback(&x, &lazy).unwrap(),
            destructure_pullback(&x, &eager).unwrap()
        );
    }

    #[test]
    fn test_restructure_pullback_diagonal_embeds() {
        let x = Value::Diagonal(DenseArray::vector(vec![0.0, 0.0]));
        let ct = Cotangent::Structural(StructTangent::new(
            "Diagonal",
            vec![(
                "diag",
                Cotangent::Concrete(Value::Dense(DenseArray::vector(vec![3.0, 4.0]))),
            )],
        ));
        assert_eq!(
            restructure_pullback(&x, &ct).unwrap(),
            Cotangent::Concrete(Value::Dense(dense(
                vec![2, 2],
                vec![3.0, 0.0, 0.0, 4.0]
            )))
        );
    }

    #[test]
    fn test_restructure_pullback_fill_broadcasts_mean_adjoint() {
        let x = Value::Fill(FillArray::new(0.0, Shape::new(vec![3, 4])));
        let ct = Cotangent::Structural(StructTangent::new(
            "Fill",
            vec![("value", Cotangent::Concrete(Value::Real(24.0)))],
        ));
        assert_eq!(
            restructure_pullback(&x, &ct).unwrap(),
            Cotangent::Concrete(Value::Dense(DenseArray::filled(
                DType::F64,
                Shape::new(vec![3, 4]),
                2.0
            )))
        );
    }

    #[test]
    fn test_struct_pullback_missing_field_is_zero() {
        let x = Value::Struct(StructValue::new(
            "Pair",
            vec![
                ("a", Value::Real(1.0)),
                ("b", Value::Dense(dense(vec![2], vec![1.0, 1.0]))),
            ],
        ));
        let ct = Cotangent::Structural(StructTangent::new(
            "Pair",
            vec![("b", Cotangent::Concrete(Value::Dense(dense(vec![2], vec![5.0, 6.0]))))],
        ));
        assert_eq!(
            restructure_pullback(&x, &ct).unwrap(),
            Cotangent::Concrete(Value::Dense(dense(vec![3], vec![0.0, 5.0, 6.0])))
        );
    }

    #[test]
    fn test_natural_cotangent_shape_is_checked() {
        let x = Value::Diagonal(DenseArray::vector(vec![0.0, 0.0]));
        let wrong = Cotangent::Concrete(Value::Dense(dense(vec![3], vec![1.0, 2.0, 3.0])));
        assert!(matches!(
            destructure_pullback(&x, &wrong),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
