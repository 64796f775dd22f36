//! Dense array storage - the natural representation of differentiable values.
//!
//! A [`DenseArray`] is the canonical flat linearization every supported primal
//! destructures into: row-major storage, a shape whose rank matches the
//! primal's storage rank, and an element dtype.

use std::fmt;

use crate::shape::Shape;

/// Element precision of a dense array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    /// Round a value through this precision.
    ///
    /// `F32` drops the value to single precision and widens it back, so the
    /// stored `f64` is always exactly representable in the logical dtype.
    pub fn quantize(self, value: f64) -> f64 {
        match self {
            DType::F32 => value as f32 as f64,
            DType::F64 => value,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

/// A dense array: dtype tag, shape, and flat row-major storage.
///
/// Storage is `f64` regardless of dtype; an `F32` array keeps every element
/// rounded to single precision (see [`DType::quantize`]).
#[derive(Clone, PartialEq)]
pub struct DenseArray {
    dtype: DType,
    shape: Shape,
    data: Vec<f64>,
}

impl DenseArray {
    /// Create an array from flat row-major data.
    ///
    /// Panics if `data.len()` does not match `shape.numel()`; shape/data
    /// agreement is a caller invariant, not a recoverable condition.
    pub fn new(dtype: DType, shape: Shape, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length must match shape {}",
            shape
        );
        let data = data.into_iter().map(|v| dtype.quantize(v)).collect();
        DenseArray { dtype, shape, data }
    }

    /// Create a zero-filled array.
    pub fn zeros(dtype: DType, shape: Shape) -> Self {
        let numel = shape.numel();
        DenseArray {
            dtype,
            shape,
            data: vec![0.0; numel],
        }
    }

    /// Create an array filled with a constant value.
    pub fn filled(dtype: DType, shape: Shape, value: f64) -> Self {
        let numel = shape.numel();
        DenseArray {
            dtype,
            shape,
            data: vec![dtype.quantize(value); numel],
        }
    }

    /// Create a rank-0 (scalar) array in double precision.
    pub fn scalar(value: f64) -> Self {
        DenseArray {
            dtype: DType::F64,
            shape: Shape::scalar(),
            data: vec![value],
        }
    }

    /// Create a rank-1 array in double precision.
    pub fn vector(data: Vec<f64>) -> Self {
        let shape = Shape::new(vec![data.len()]);
        DenseArray {
            dtype: DType::F64,
            shape,
            data,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Flat row-major element access.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Scalar value (panics if not scalar-shaped).
    pub fn scalar_value(&self) -> f64 {
        assert!(self.shape.is_scalar(), "expected scalar array");
        self.data[0]
    }

    /// Re-type every element into the target dtype.
    pub fn cast(&self, dtype: DType) -> DenseArray {
        DenseArray {
            dtype,
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| dtype.quantize(v)).collect(),
        }
    }

    /// Multiply every element by a scalar.
    pub fn scale(&self, k: f64) -> DenseArray {
        DenseArray {
            dtype: self.dtype,
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .map(|&v| self.dtype.quantize(v * k))
                .collect(),
        }
    }

    /// Element-wise sum with another array of the same shape.
    pub fn add(&self, other: &DenseArray) -> DenseArray {
        assert_eq!(self.shape, other.shape, "shape mismatch in add");
        DenseArray {
            dtype: self.dtype,
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| self.dtype.quantize(a + b))
                .collect(),
        }
    }

    /// Inner product against another array of the same element count.
    pub fn dot(&self, other: &DenseArray) -> f64 {
        assert_eq!(self.numel(), other.numel(), "element count mismatch in dot");
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| a * b)
            .sum()
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Mean of all elements.
    pub fn mean(&self) -> f64 {
        self.sum() / self.numel() as f64
    }

    /// Extract the main diagonal of a square rank-2 array.
    pub fn diagonal(&self) -> DenseArray {
        assert!(self.shape.is_square(), "diagonal requires a square matrix");
        let n = self.shape.dim(0);
        let data = (0..n).map(|i| self.data[i * n + i]).collect();
        DenseArray {
            dtype: self.dtype,
            shape: Shape::new(vec![n]),
            data,
        }
    }

    /// Embed a rank-1 array as the main diagonal of an n x n array.
    pub fn from_diagonal(diag: &DenseArray) -> DenseArray {
        assert_eq!(diag.shape.ndim(), 1, "from_diagonal requires a vector");
        let n = diag.shape.dim(0);
        let mut data = vec![0.0; n * n];
        for (i, &v) in diag.data.iter().enumerate() {
            data[i * n + i] = v;
        }
        DenseArray {
            dtype: diag.dtype,
            shape: Shape::new(vec![n, n]),
            data,
        }
    }
}

impl fmt::Debug for DenseArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DenseArray<{}, {}> {:?}",
            self.dtype.name(),
            self.shape,
            self.data
        )
    }
}
