//! Shape utilities for natural (dense) arrays.

use std::fmt;

/// An array shape (dimensions). Rank 0 is a scalar.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    /// Create a new shape from dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// Create a scalar shape (0-dimensional).
    pub fn scalar() -> Self {
        Shape(vec![])
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Get dimension at index.
    pub fn dim(&self, idx: usize) -> usize {
        self.0[idx]
    }

    /// Get dimensions as slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }

    /// Check if this is a scalar (0-dim) shape.
    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if this is a square matrix shape.
    pub fn is_square(&self) -> bool {
        self.ndim() == 2 && self.0[0] == self.0[1]
    }

    /// Compute the row-major flat offset of multi-dimensional indices.
    pub fn offset(&self, indices: &[usize]) -> usize {
        debug_assert_eq!(self.ndim(), indices.len());
        let mut offset = 0;
        for (dim, idx) in self.0.iter().zip(indices.iter()) {
            debug_assert!(idx < dim);
            offset = offset * dim + idx;
        }
        offset
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.dim(1), 3);
        assert_eq!(s.numel(), 24);
        assert!(!s.is_scalar());
    }

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert!(s.is_scalar());
    }

    #[test]
    fn test_square() {
        assert!(Shape::new(vec![3, 3]).is_square());
        assert!(!Shape::new(vec![3, 4]).is_square());
        assert!(!Shape::new(vec![3]).is_square());
    }

    #[test]
    fn test_offset_row_major() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.offset(&[0, 0, 0]), 0);
        assert_eq!(s.offset(&[0, 0, 1]), 1);
        assert_eq!(s.offset(&[0, 1, 0]), 4);
        assert_eq!(s.offset(&[1, 0, 0]), 12);
        assert_eq!(s.offset(&[1, 2, 3]), 23);
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new(vec![4, 3]).to_string(), "(4, 3)");
        assert_eq!(Shape::new(vec![5]).to_string(), "(5,)");
        assert_eq!(Shape::scalar().to_string(), "()");
    }
}
