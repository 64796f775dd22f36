//! Example derivative rules written in natural-array terms.
//!
//! Each rule is a forward computation plus a pullback expressed purely on
//! flat arrays, lifted into the structural calling convention with
//! [`wrap_natural_pullback`]. The rules work on any input category that
//! destructures to the right shape - `sum_rule` over a constant-fill array
//! and `diag_rule` over a diagonal wrapper get their structural gradients
//! from the adapter, not from rule code.

use ct_core::natural::natural_shape;
use ct_core::prelude::*;

/// 2-D matrix product of dense arrays.
pub fn matmul(a: &DenseArray, b: &DenseArray) -> DenseArray {
    assert_eq!(a.shape().ndim(), 2, "matmul requires rank-2 operands");
    assert_eq!(b.shape().ndim(), 2, "matmul requires rank-2 operands");
    let (m, k) = (a.shape().dim(0), a.shape().dim(1));
    let (k2, n) = (b.shape().dim(0), b.shape().dim(1));
    assert_eq!(k, k2, "inner dimensions must match");

    let mut data = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for l in 0..k {
                sum += a.data()[i * k + l] * b.data()[l * n + j];
            }
            data[i * n + j] = sum;
        }
    }
    DenseArray::new(a.dtype(), Shape::new(vec![m, n]), data)
}

/// Transpose of a rank-2 dense array.
pub fn transpose(a: &DenseArray) -> DenseArray {
    assert_eq!(a.shape().ndim(), 2, "transpose requires a rank-2 operand");
    let (m, n) = (a.shape().dim(0), a.shape().dim(1));
    let mut data = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            data[j * m + i] = a.data()[i * n + j];
        }
    }
    DenseArray::new(a.dtype(), Shape::new(vec![n, m]), data)
}

/// `C = A @ B` with pullback `(C̄ Bᵀ, Aᵀ C̄)`.
pub fn matmul_rule(a: &Value, b: &Value) -> (Value, AdaptedPullback) {
    let (da, db) = (destructure(a), destructure(b));
    let y = Value::Dense(matmul(&da, &db));
    let adapted = wrap_natural_pullback(
        move |c_bar| {
            Ok(vec![
                matmul(c_bar, &transpose(&db)),
                matmul(&transpose(&da), c_bar),
            ])
        },
        &y,
        &[a.clone(), b.clone()],
    );
    (y, adapted)
}

/// `y = sum(x)` with pullback broadcasting the scalar cotangent back over x.
pub fn sum_rule(x: &Value) -> (Value, AdaptedPullback) {
    let shape = natural_shape(x);
    let y = Value::Real(destructure(x).sum());
    let adapted = wrap_natural_pullback(
        move |y_bar| {
            Ok(vec![DenseArray::filled(
                DType::F64,
                shape.clone(),
                y_bar.scalar_value(),
            )])
        },
        &y,
        std::slice::from_ref(x),
    );
    (y, adapted)
}

/// `Y = alpha * X` with pullback `(<Ȳ, X>, alpha * Ȳ)`.
pub fn scale_rule(alpha: f64, x: &Value) -> (Value, AdaptedPullback) {
    let dx = destructure(x);
    let y = Value::Dense(dx.scale(alpha));
    let adapted = wrap_natural_pullback(
        move |y_bar| Ok(vec![DenseArray::scalar(y_bar.dot(&dx)), y_bar.scale(alpha)]),
        &y,
        &[Value::Real(alpha), x.clone()],
    );
    (y, adapted)
}

/// `z = <x, y>` with pullback `(z̄ y, z̄ x)`.
pub fn dot_rule(x: &Value, y: &Value) -> (Value, AdaptedPullback) {
    let (dx, dy) = (destructure(x), destructure(y));
    let z = Value::Real(dx.dot(&dy));
    let adapted = wrap_natural_pullback(
        move |z_bar| {
            let c = z_bar.scalar_value();
            Ok(vec![dy.scale(c), dx.scale(c)])
        },
        &z,
        &[x.clone(), y.clone()],
    );
    (z, adapted)
}

/// `v = diag(M)`: extract the main diagonal of a (square) matrix value.
///
/// The pullback embeds the vector cotangent back on the diagonal of the
/// natural matrix; for a diagonal-wrapped input the adapter turns that into
/// a structural cotangent on the `diag` field.
pub fn diag_rule(m: &Value) -> (Value, AdaptedPullback) {
    let dm = destructure(m);
    let y = Value::Dense(dm.diagonal());
    let adapted = wrap_natural_pullback(
        move |v_bar| Ok(vec![DenseArray::from_diagonal(v_bar)]),
        &y,
        std::slice::from_ref(m),
    );
    (y, adapted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(shape: Vec<usize>, data: Vec<f64>) -> DenseArray {
        DenseArray::new(DType::F64, Shape::new(shape), data)
    }

    #[test]
    fn test_matmul_values() {
        let a = dense(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let b = dense(vec![2, 2], vec![5.0, 6.0, 7.0, 8.0]);
        let c = matmul(&a, &b);
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_transpose() {
        let a = dense(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = transpose(&a);
        assert_eq!(t.shape(), &Shape::new(vec![3, 2]));
        assert_eq!(t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_sum_rule_forward() {
        let x = Value::Dense(dense(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]));
        let (y, _) = sum_rule(&x);
        assert_eq!(y, Value::Real(10.0));
    }

    #[test]
    fn test_scale_rule_forward() {
        let x = Value::Dense(dense(vec![2], vec![1.0, -2.0]));
        let (y, _) = scale_rule(3.0, &x);
        assert_eq!(y, Value::Dense(dense(vec![2], vec![3.0, -6.0])));
    }

    #[test]
    fn test_diag_rule_forward_on_wrapper() {
        let m = Value::Diagonal(DenseArray::vector(vec![2.0, 5.0]));
        let (y, _) = diag_rule(&m);
        assert_eq!(y, Value::Dense(DenseArray::vector(vec![2.0, 5.0])));
    }
}
