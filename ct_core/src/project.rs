//! Projector factory - coercing an incoming cotangent onto the exact
//! type/shape of a target primal.
//!
//! A [`Projector`] is built once per destination value and captures the
//! metadata the coercion needs (category tag, dtype, shape, field names,
//! inner projectors for wrappers). Building is pure and never mutates the
//! destination; the returned projector is reusable across any number of
//! cotangents.
//!
//! Dispatch is most-specific-first within each target category: the exact
//! match wins, then category-specific coercions, then the structural zero,
//! and lazy cotangents are forced and re-dispatched last so a precise match
//! never pays the forcing detour.

use crate::array::{DType, DenseArray};
use crate::cotangent::{Cotangent, StructTangent};
use crate::error::Error;
use crate::shape::Shape;
use crate::value::{Complex, FillArray, ScaledArray, Value};

/// Build a projector for the runtime type of `reference`.
pub fn projector(reference: &Value) -> Projector {
    Projector::new(reference)
}

/// A coercion function specialized to one destination value.
#[derive(Debug, Clone)]
pub struct Projector {
    spec: ProjectSpec,
}

/// Captured per-target metadata, one variant per value category.
#[derive(Debug, Clone)]
enum ProjectSpec {
    Real,
    Real32,
    Complex,
    Dense { dtype: DType, shape: Shape },
    Fixed { dtype: DType, shape: Shape },
    Diagonal { n: usize, inner: Box<Projector> },
    Fill { shape: Shape, inner: Box<Projector> },
    Scaled { factor: f64, inner: Box<Projector> },
    Struct { name: &'static str, field_names: Vec<&'static str> },
    Extension { template: Value },
}

impl Projector {
    /// Capture the projection metadata for `reference`.
    ///
    /// The target category defaults to the runtime type of the reference
    /// value; wrapper categories derive their inner reference (the wrapped
    /// payload) here, once, rather than per call.
    pub fn new(reference: &Value) -> Self {
        let spec = match reference {
            Value::Real(_) => ProjectSpec::Real,
            Value::Real32(_) => ProjectSpec::Real32,
            Value::Complex(_) => ProjectSpec::Complex,
            Value::Dense(a) => ProjectSpec::Dense {
                dtype: a.dtype(),
                shape: a.shape().clone(),
            },
            Value::Fixed(a) => ProjectSpec::Fixed {
                dtype: a.dtype(),
                shape: a.shape().clone(),
            },
            Value::Diagonal(d) => ProjectSpec::Diagonal {
                n: d.numel(),
                inner: Box::new(Projector::new(&Value::Dense(d.clone()))),
            },
            Value::Fill(f) => ProjectSpec::Fill {
                shape: f.shape.clone(),
                inner: Box::new(Projector::new(&Value::Real(f.value))),
            },
            Value::Scaled(s) => ProjectSpec::Scaled {
                factor: s.factor,
                inner: Box::new(Projector::new(&Value::Dense(s.payload.clone()))),
            },
            Value::Struct(s) => ProjectSpec::Struct {
                name: s.name,
                field_names: s.fields.iter().map(|(n, _)| *n).collect(),
            },
            Value::Extension(_) => ProjectSpec::Extension {
                template: reference.clone(),
            },
        };
        Projector { spec }
    }

    /// The target category name.
    pub fn target_name(&self) -> &'static str {
        match &self.spec {
            ProjectSpec::Real => "Real",
            ProjectSpec::Real32 => "Real32",
            ProjectSpec::Complex => "Complex",
            ProjectSpec::Dense { .. } => "Dense",
            ProjectSpec::Fixed { .. } => "Fixed",
            ProjectSpec::Diagonal { .. } => "Diagonal",
            ProjectSpec::Fill { .. } => "Fill",
            ProjectSpec::Scaled { .. } => "Scaled",
            ProjectSpec::Struct { .. } => "Struct",
            ProjectSpec::Extension { template } => template.type_name(),
        }
    }

    /// Coerce a cotangent to the captured target type/shape.
    pub fn project(&self, cotangent: &Cotangent) -> Result<Cotangent, Error> {
        match &self.spec {
            ProjectSpec::Real => self.project_real(cotangent, DType::F64),
            ProjectSpec::Real32 => self.project_real(cotangent, DType::F32),
            ProjectSpec::Complex => self.project_complex(cotangent),
            ProjectSpec::Dense { dtype, shape } => {
                self.project_array(cotangent, *dtype, shape, false)
            }
            ProjectSpec::Fixed { dtype, shape } => {
                self.project_array(cotangent, *dtype, shape, true)
            }
            ProjectSpec::Diagonal { n, inner } => self.project_diagonal(cotangent, *n, inner),
            ProjectSpec::Fill { shape, inner } => self.project_fill(cotangent, shape, inner),
            ProjectSpec::Scaled { factor, inner } => {
                self.project_scaled(cotangent, *factor, inner)
            }
            ProjectSpec::Struct { name, field_names } => {
                self.project_struct(cotangent, name, field_names)
            }
            ProjectSpec::Extension { template } => self.project_extension(cotangent, template),
        }
    }

    // === Real number targets ===

    fn project_real(&self, cotangent: &Cotangent, dtype: DType) -> Result<Cotangent, Error> {
        let wrap = |v: f64| match dtype {
            DType::F64 => Cotangent::Concrete(Value::Real(v)),
            DType::F32 => Cotangent::Concrete(Value::Real32(v as f32)),
        };
        match cotangent {
            Cotangent::Concrete(value) => match value {
                Value::Real(_) if dtype == DType::F64 => Ok(cotangent.clone()),
                Value::Real32(_) if dtype == DType::F32 => Ok(cotangent.clone()),
                Value::Real(x) => Ok(wrap(*x)),
                Value::Real32(x) => Ok(wrap(*x as f64)),
                // General numeric cotangents narrow through their real part.
                Value::Complex(c) => Ok(wrap(c.re)),
                Value::Dense(a) | Value::Fixed(a) if a.shape().is_scalar() => {
                    Ok(wrap(a.scalar_value()))
                }
                other => Err(Error::unsupported(self.target_name(), other.type_name())),
            },
            Cotangent::Zero => Ok(wrap(0.0)),
            Cotangent::Lazy(l) => self.project(&l.force()?),
            Cotangent::Structural(_) => {
                Err(Error::unsupported(self.target_name(), cotangent.kind_name()))
            }
        }
    }

    // === General numeric target ===

    fn project_complex(&self, cotangent: &Cotangent) -> Result<Cotangent, Error> {
        match cotangent {
            Cotangent::Concrete(value) => match value {
                Value::Complex(_) => Ok(cotangent.clone()),
                Value::Real(x) => Ok(Cotangent::Concrete(Value::Complex(Complex::new(*x, 0.0)))),
                Value::Real32(x) => Ok(Cotangent::Concrete(Value::Complex(Complex::new(
                    *x as f64, 0.0,
                )))),
                other => Err(Error::unsupported("Complex", other.type_name())),
            },
            Cotangent::Zero => Ok(Cotangent::Concrete(Value::Complex(Complex::new(0.0, 0.0)))),
            Cotangent::Lazy(l) => self.project(&l.force()?),
            Cotangent::Structural(_) => {
                Err(Error::unsupported("Complex", cotangent.kind_name()))
            }
        }
    }

    // === Homogeneous dense / fixed-size array targets ===

    fn project_array(
        &self,
        cotangent: &Cotangent,
        dtype: DType,
        shape: &Shape,
        fixed: bool,
    ) -> Result<Cotangent, Error> {
        let wrap = |a: DenseArray| {
            Cotangent::Concrete(if fixed { Value::Fixed(a) } else { Value::Dense(a) })
        };
        match cotangent {
            Cotangent::Concrete(value) => {
                // Exact type/dtype/shape match is the identity.
                match value {
                    Value::Dense(a) if !fixed && a.dtype() == dtype && a.shape() == shape => {
                        return Ok(cotangent.clone());
                    }
                    Value::Fixed(a) if fixed && a.dtype() == dtype && a.shape() == shape => {
                        return Ok(cotangent.clone());
                    }
                    _ => {}
                }
                // Scalar-shaped targets accept bare reals.
                if shape.is_scalar() {
                    match value {
                        Value::Real(x) => return Ok(wrap(DenseArray::scalar(*x).cast(dtype))),
                        Value::Real32(x) => {
                            return Ok(wrap(DenseArray::scalar(*x as f64).cast(dtype)));
                        }
                        _ => {}
                    }
                }
                // Foreign array representations materialize to dense first;
                // a dtype difference then re-projects element-wise.
                let dense = materialize_dense(value)
                    .ok_or_else(|| Error::unsupported(self.target_name(), value.type_name()))?;
                if dense.shape() != shape {
                    return Err(Error::ShapeMismatch {
                        expected: shape.clone(),
                        got: dense.shape().clone(),
                    });
                }
                Ok(wrap(dense.cast(dtype)))
            }
            Cotangent::Zero => Ok(wrap(DenseArray::zeros(dtype, shape.clone()))),
            Cotangent::Lazy(l) => self.project(&l.force()?),
            Cotangent::Structural(_) => {
                Err(Error::unsupported(self.target_name(), cotangent.kind_name()))
            }
        }
    }

    // === Wrapper targets: project the payload, then re-wrap ===

    fn project_diagonal(
        &self,
        cotangent: &Cotangent,
        n: usize,
        inner: &Projector,
    ) -> Result<Cotangent, Error> {
        let rewrap =
            |ct: Cotangent| Ok(Cotangent::Concrete(Value::Diagonal(expect_dense(ct))));
        match cotangent {
            Cotangent::Concrete(Value::Diagonal(d)) => {
                rewrap(inner.project(&Cotangent::Concrete(Value::Dense(d.clone())))?)
            }
            Cotangent::Concrete(Value::Dense(m)) => {
                // A full matrix cotangent contributes through its diagonal.
                let expected = Shape::new(vec![n, n]);
                if m.shape() != &expected {
                    return Err(Error::ShapeMismatch {
                        expected,
                        got: m.shape().clone(),
                    });
                }
                rewrap(inner.project(&Cotangent::Concrete(Value::Dense(m.diagonal())))?)
            }
            Cotangent::Structural(t) => {
                let payload = t.field("diag").cloned().unwrap_or(Cotangent::Zero);
                rewrap(inner.project(&payload)?)
            }
            Cotangent::Zero => rewrap(inner.project(&Cotangent::Zero)?),
            Cotangent::Lazy(l) => self.project(&l.force()?),
            Cotangent::Concrete(other) => {
                Err(Error::unsupported("Diagonal", other.type_name()))
            }
        }
    }

    fn project_fill(
        &self,
        cotangent: &Cotangent,
        shape: &Shape,
        inner: &Projector,
    ) -> Result<Cotangent, Error> {
        let rewrap = |ct: Cotangent| {
            Ok(Cotangent::Concrete(Value::Fill(FillArray::new(
                expect_real(ct),
                shape.clone(),
            ))))
        };
        match cotangent {
            Cotangent::Concrete(Value::Fill(f)) => {
                if &f.shape != shape {
                    return Err(Error::ShapeMismatch {
                        expected: shape.clone(),
                        got: f.shape.clone(),
                    });
                }
                Ok(cotangent.clone())
            }
            Cotangent::Concrete(Value::Dense(a)) | Cotangent::Concrete(Value::Fixed(a)) => {
                if a.shape() != shape {
                    return Err(Error::ShapeMismatch {
                        expected: shape.clone(),
                        got: a.shape().clone(),
                    });
                }
                // Payload extraction collapses by mean (the inverse of the
                // broadcast that materializes a fill).
                rewrap(inner.project(&Cotangent::Concrete(Value::Real(a.mean())))?)
            }
            Cotangent::Structural(t) => {
                let payload = t.field("value").cloned().unwrap_or(Cotangent::Zero);
                rewrap(inner.project(&payload)?)
            }
            Cotangent::Zero => rewrap(inner.project(&Cotangent::Zero)?),
            Cotangent::Lazy(l) => self.project(&l.force()?),
            Cotangent::Concrete(other) => Err(Error::unsupported("Fill", other.type_name())),
        }
    }

    fn project_scaled(
        &self,
        cotangent: &Cotangent,
        factor: f64,
        inner: &Projector,
    ) -> Result<Cotangent, Error> {
        let rewrap = |ct: Cotangent| {
            Ok(Cotangent::Concrete(Value::Scaled(ScaledArray::new(
                factor,
                expect_dense(ct),
            ))))
        };
        match cotangent {
            Cotangent::Concrete(Value::Scaled(s)) => {
                if let ProjectSpec::Dense { dtype, shape } = &inner.spec {
                    if s.factor == factor && s.payload.dtype() == *dtype && s.payload.shape() == shape
                    {
                        return Ok(cotangent.clone());
                    }
                }
                // Re-express the same represented value under the target factor.
                let payload = s.payload.scale(s.factor / factor);
                rewrap(inner.project(&Cotangent::Concrete(Value::Dense(payload)))?)
            }
            Cotangent::Concrete(Value::Dense(a)) => {
                rewrap(inner.project(&Cotangent::Concrete(Value::Dense(a.scale(1.0 / factor))))?)
            }
            Cotangent::Structural(t) => {
                // The wrapper holds no slot for a factor cotangent; only the
                // named payload field flows through.
                let payload = t.field("payload").cloned().unwrap_or(Cotangent::Zero);
                rewrap(inner.project(&payload)?)
            }
            Cotangent::Zero => rewrap(inner.project(&Cotangent::Zero)?),
            Cotangent::Lazy(l) => self.project(&l.force()?),
            Cotangent::Concrete(other) => Err(Error::unsupported("Scaled", other.type_name())),
        }
    }

    // === Composite target ===

    fn project_struct(
        &self,
        cotangent: &Cotangent,
        name: &'static str,
        field_names: &[&'static str],
    ) -> Result<Cotangent, Error> {
        // Field-level projection is deferred to the owning type's
        // restructure/destructure; fields transfer by name only.
        match cotangent {
            Cotangent::Structural(t) => {
                let fields = field_names
                    .iter()
                    .map(|n| (*n, t.field(n).cloned().unwrap_or(Cotangent::Zero)))
                    .collect();
                Ok(Cotangent::Structural(StructTangent::new(name, fields)))
            }
            Cotangent::Concrete(Value::Struct(s)) => {
                let fields = field_names
                    .iter()
                    .map(|n| {
                        let field = s
                            .field(n)
                            .map(|v| Cotangent::Concrete(v.clone()))
                            .unwrap_or(Cotangent::Zero);
                        (*n, field)
                    })
                    .collect();
                Ok(Cotangent::Structural(StructTangent::new(name, fields)))
            }
            Cotangent::Zero => {
                let fields = field_names.iter().map(|n| (*n, Cotangent::Zero)).collect();
                Ok(Cotangent::Structural(StructTangent::new(name, fields)))
            }
            Cotangent::Lazy(l) => self.project(&l.force()?),
            Cotangent::Concrete(other) => Err(Error::unsupported(name, other.type_name())),
        }
    }

    // === Extension target (also the fallback category) ===

    fn project_extension(
        &self,
        cotangent: &Cotangent,
        template: &Value,
    ) -> Result<Cotangent, Error> {
        let Value::Extension(ext) = template else {
            unreachable!("extension spec built from non-extension reference");
        };
        match cotangent {
            Cotangent::Concrete(Value::Extension(e)) if e.type_name() == ext.type_name() => {
                Ok(cotangent.clone())
            }
            Cotangent::Zero => Ok(Cotangent::Concrete(ext.zero())),
            Cotangent::Lazy(l) => self.project(&l.force()?),
            other => ext.project(other),
        }
    }
}

/// Materialize a foreign array representation as a dense array.
fn materialize_dense(value: &Value) -> Option<DenseArray> {
    match value {
        Value::Dense(a) | Value::Fixed(a) => Some(a.clone()),
        Value::Diagonal(d) => Some(DenseArray::from_diagonal(d)),
        Value::Fill(f) => Some(DenseArray::filled(DType::F64, f.shape.clone(), f.value)),
        Value::Scaled(s) => Some(s.payload.scale(s.factor)),
        _ => None,
    }
}

fn expect_dense(ct: Cotangent) -> DenseArray {
    match ct {
        Cotangent::Concrete(Value::Dense(a)) => a,
        other => unreachable!("dense payload projector returned {:?}", other),
    }
}

fn expect_real(ct: Cotangent) -> f64 {
    match ct {
        Cotangent::Concrete(Value::Real(v)) => v,
        other => unreachable!("real payload projector returned {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::StructValue;

    fn dense(shape: Vec<usize>, data: Vec<f64>) -> DenseArray {
        DenseArray::new(DType::F64, Shape::new(shape), data)
    }

    #[test]
    fn test_identity_projection() {
        let values = [
            Value::Real(2.5),
            Value::Dense(dense(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0])),
            Value::Diagonal(DenseArray::vector(vec![1.0, 2.0])),
            Value::Fill(FillArray::new(3.0, Shape::new(vec![3, 4]))),
        ];
        for v in values {
            let p = projector(&v);
            let ct = Cotangent::Concrete(v.clone());
            assert_eq!(p.project(&ct).unwrap(), ct, "identity failed for {:?}", v);
        }
    }

    #[test]
    fn test_zero_projection() {
        let x = Value::Dense(dense(vec![2], vec![5.0, 6.0]));
        let p = projector(&x);
        assert_eq!(
            p.project(&Cotangent::Zero).unwrap(),
            Cotangent::Concrete(x.zero_like())
        );

        let r = projector(&Value::Real(1.0));
        assert_eq!(
            r.project(&Cotangent::Zero).unwrap(),
            Cotangent::Concrete(Value::Real(0.0))
        );
    }

    #[test]
    fn test_lazy_transparency() {
        let x = Value::Real(1.0);
        let p = projector(&x);
        let direct = p
            .project(&Cotangent::Concrete(Value::Real32(2.0)))
            .unwrap();
        let lazy = p
            .project(&Cotangent::lazy(|| {
                Ok(Cotangent::Concrete(Value::Real32(2.0)))
            }))
            .unwrap();
        assert_eq!(direct, lazy);
    }

    #[test]
    fn test_real_narrows_complex_via_real_part() {
        let p = projector(&Value::Real(0.0));
        let ct = Cotangent::Concrete(Value::Complex(Complex::new(1.5, -7.0)));
        assert_eq!(
            p.project(&ct).unwrap(),
            Cotangent::Concrete(Value::Real(1.5))
        );
    }

    #[test]
    fn test_complex_widens_real() {
        let p = projector(&Value::Complex(Complex::new(0.0, 0.0)));
        let ct = Cotangent::Concrete(Value::Real(2.0));
        assert_eq!(
            p.project(&ct).unwrap(),
            Cotangent::Concrete(Value::Complex(Complex::new(2.0, 0.0)))
        );
    }

    #[test]
    fn test_elementwise_retyping_to_f32() {
        let reference = Value::Dense(DenseArray::zeros(DType::F32, Shape::new(vec![2])));
        let p = projector(&reference);
        let ct = Cotangent::Concrete(Value::Dense(dense(vec![2], vec![0.1, 0.2])));
        match p.project(&ct).unwrap() {
            Cotangent::Concrete(Value::Dense(a)) => {
                assert_eq!(a.dtype(), DType::F32);
                assert_eq!(a.data(), &[0.1f32 as f64, 0.2f32 as f64]);
            }
            other => panic!("expected dense result, got {:?}", other),
        }
    }

    #[test]
    fn test_foreign_array_materializes() {
        let reference = Value::Dense(DenseArray::zeros(DType::F64, Shape::new(vec![2, 2])));
        let p = projector(&reference);
        let ct = Cotangent::Concrete(Value::Diagonal(DenseArray::vector(vec![1.0, 2.0])));
        assert_eq!(
            p.project(&ct).unwrap(),
            Cotangent::Concrete(Value::Dense(dense(
                vec![2, 2],
                vec![1.0, 0.0, 0.0, 2.0]
            )))
        );
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let reference = Value::Dense(DenseArray::zeros(DType::F64, Shape::new(vec![2, 2])));
        let p = projector(&reference);
        let ct = Cotangent::Concrete(Value::Dense(dense(vec![3], vec![1.0, 2.0, 3.0])));
        assert!(matches!(
            p.project(&ct),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_diagonal_extracts_from_matrix() {
        let reference = Value::Diagonal(DenseArray::vector(vec![0.0, 0.0]));
        let p = projector(&reference);
        let ct = Cotangent::Concrete(Value::Dense(dense(
            vec![2, 2],
            vec![1.0, 9.0, 9.0, 4.0],
        )));
        assert_eq!(
            p.project(&ct).unwrap(),
            Cotangent::Concrete(Value::Diagonal(DenseArray::vector(vec![1.0, 4.0])))
        );
    }

    #[test]
    fn test_diagonal_from_structural_field() {
        let reference = Value::Diagonal(DenseArray::vector(vec![0.0, 0.0]));
        let p = projector(&reference);
        let t = StructTangent::new(
            "Diagonal",
            vec![(
                "diag",
                Cotangent::Concrete(Value::Dense(DenseArray::vector(vec![3.0, 4.0]))),
            )],
        );
        assert_eq!(
            p.project(&Cotangent::Structural(t)).unwrap(),
            Cotangent::Concrete(Value::Diagonal(DenseArray::vector(vec![3.0, 4.0])))
        );
    }

    #[test]
    fn test_struct_transfers_fields_by_name() {
        let reference = Value::Struct(StructValue::new(
            "Pair",
            vec![("a", Value::Real(0.0)), ("b", Value::Real(0.0))],
        ));
        let p = projector(&reference);
        let incoming = Cotangent::Structural(StructTangent::new(
            "Other",
            vec![
                ("b", Cotangent::Concrete(Value::Real(7.0))),
                ("c", Cotangent::Concrete(Value::Real(9.0))),
            ],
        ));
        match p.project(&incoming).unwrap() {
            Cotangent::Structural(t) => {
                assert_eq!(t.name, "Pair");
                assert_eq!(t.field("a"), Some(&Cotangent::Zero));
                assert_eq!(
                    t.field("b"),
                    Some(&Cotangent::Concrete(Value::Real(7.0)))
                );
                assert_eq!(t.field("c"), None);
            }
            other => panic!("expected structural result, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_pairing_is_an_error() {
        let p = projector(&Value::Real(0.0));
        let incoming = Cotangent::Structural(StructTangent::new("S", vec![]));
        assert!(matches!(
            p.project(&incoming),
            Err(Error::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_fill_collapses_dense_by_mean() {
        let reference = Value::Fill(FillArray::new(0.0, Shape::new(vec![2, 2])));
        let p = projector(&reference);
        let ct = Cotangent::Concrete(Value::Dense(dense(
            vec![2, 2],
            vec![1.0, 2.0, 3.0, 6.0],
        )));
        assert_eq!(
            p.project(&ct).unwrap(),
            Cotangent::Concrete(Value::Fill(FillArray::new(3.0, Shape::new(vec![2, 2]))))
        );
    }
}
