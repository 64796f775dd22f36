//! A symmetric matrix stored as its packed upper triangle.
//!
//! This is the worked example of plugging a user category into the core
//! through [`ExtensionValue`]: the type owns its linearization (mirroring
//! the triangle into a full matrix), its reconstruction (reading the upper
//! triangle back), and both adjoints.

use std::any::Any;
use std::rc::Rc;

use ct_core::prelude::*;

/// Symmetric n x n matrix, storing only the upper triangle row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricMatrix {
    n: usize,
    upper: Vec<f64>,
}

impl SymmetricMatrix {
    /// Build from packed upper-triangle storage of length `n * (n + 1) / 2`.
    pub fn new(n: usize, upper: Vec<f64>) -> Self {
        assert_eq!(
            upper.len(),
            n * (n + 1) / 2,
            "packed storage must hold the upper triangle"
        );
        SymmetricMatrix { n, upper }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Wrap into the dynamic value model.
    pub fn into_value(self) -> Value {
        Value::Extension(Rc::new(self))
    }

    fn packed_index(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i <= j { (i, j) } else { (j, i) };
        i * self.n - i * (i + 1) / 2 + j
    }

    fn expected_shape(&self) -> Shape {
        Shape::new(vec![self.n, self.n])
    }

    fn check_natural(&self, natural: &DenseArray) -> Result<(), Error> {
        let expected = self.expected_shape();
        if natural.shape() != &expected {
            return Err(Error::ShapeMismatch {
                expected,
                got: natural.shape().clone(),
            });
        }
        Ok(())
    }
}

impl ExtensionValue for SymmetricMatrix {
    fn type_name(&self) -> &'static str {
        "Symmetric"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_value(&self, other: &dyn ExtensionValue) -> bool {
        other
            .as_any()
            .downcast_ref::<SymmetricMatrix>()
            .is_some_and(|o| self == o)
    }

    fn zero(&self) -> Value {
        SymmetricMatrix::new(self.n, vec![0.0; self.upper.len()]).into_value()
    }

    fn destructure(&self) -> DenseArray {
        let n = self.n;
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                data[i * n + j] = self.upper[self.packed_index(i, j)];
            }
        }
        DenseArray::new(DType::F64, self.expected_shape(), data)
    }

    fn restructure(&self, natural: &DenseArray) -> Result<Value, Error> {
        self.check_natural(natural)?;
        // Reads the upper triangle only; the mirrored lower entries are
        // storage this wrapper considers private.
        let n = self.n;
        let mut upper = vec![0.0; self.upper.len()];
        for i in 0..n {
            for j in i..n {
                upper[self.packed_index(i, j)] = natural.data()[i * n + j];
            }
        }
        Ok(SymmetricMatrix::new(n, upper).into_value())
    }

    fn destructure_pullback(&self, natural: &DenseArray) -> Result<Cotangent, Error> {
        self.check_natural(natural)?;
        // Adjoint of the mirror: each packed component accumulates both
        // storage positions it fans out to.
        let n = self.n;
        let mut upper = vec![0.0; self.upper.len()];
        for i in 0..n {
            upper[self.packed_index(i, i)] = natural.data()[i * n + i];
            for j in (i + 1)..n {
                upper[self.packed_index(i, j)] =
                    natural.data()[i * n + j] + natural.data()[j * n + i];
            }
        }
        Ok(Cotangent::Concrete(
            SymmetricMatrix::new(n, upper).into_value(),
        ))
    }

    fn restructure_pullback(&self, structural: &Cotangent) -> Result<DenseArray, Error> {
        // Known limitation: restructure reads only the upper triangle, but
        // this adjoint writes each off-diagonal component to both mirrored
        // positions, as if the lower (private) entries had been read as
        // well. The dot-product identity therefore double-counts
        // off-diagonal pairs against symmetric directions.
        // TODO: decide between halving off-diagonal components here and
        // writing them upper-only; either choice restores the identity.
        match structural {
            Cotangent::Zero => Ok(DenseArray::zeros(DType::F64, self.expected_shape())),
            Cotangent::Lazy(l) => self.restructure_pullback(&l.force()?),
            Cotangent::Concrete(Value::Extension(e)) => {
                let packed = e
                    .as_any()
                    .downcast_ref::<SymmetricMatrix>()
                    .ok_or_else(|| Error::unsupported("Symmetric", e.type_name()))?;
                let n = self.n;
                let mut data = vec![0.0; n * n];
                for i in 0..n {
                    for j in i..n {
                        let v = packed.upper[packed.packed_index(i, j)];
                        data[i * n + j] = v;
                        data[j * n + i] = v;
                    }
                }
                Ok(DenseArray::new(DType::F64, self.expected_shape(), data))
            }
            other => Err(Error::unsupported("Symmetric", other.kind_name())),
        }
    }
}
