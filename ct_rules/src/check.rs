//! Finite-difference verification for adapted pullbacks.
//!
//! The checker perturbs each input along every basis direction of its
//! natural representation, estimates the vector-Jacobian product with
//! central differences, and compares it against the natural coordinates of
//! the adapted pullback's structural cotangent. Agreement is relative, with
//! a floor of 1 so gradients near zero compare absolutely.
//!
//! Also here: the pieces the adjoint (dot-product) law needs - inner
//! products over structural cotangent space, random tangents, and the
//! directional derivatives of destructure/restructure for the built-in
//! categories.

use ct_core::natural::{destructure, natural_shape, restructure, restructure_pullback};
use ct_core::prelude::*;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

/// Default relative tolerance for gradient agreement.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Step size for central differences.
const EPS: f64 = 1e-6;

/// Failures reported by the checker.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Core(#[from] ct_core::Error),

    #[error(
        "vjp mismatch for input {input} at flat index {index}: \
         adapted={adapted:.6e}, finite differences={estimate:.6e}"
    )]
    Mismatch {
        input: usize,
        index: usize,
        adapted: f64,
        estimate: f64,
    },
}

/// Seeded random stream for reproducible checks.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Dense array with elements uniform in [-1, 1).
pub fn random_dense(rng: &mut impl Rng, shape: Shape) -> DenseArray {
    let data = (0..shape.numel())
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();
    DenseArray::new(DType::F64, shape, data)
}

/// Random tangent direction in a primal's structural space.
pub fn random_tangent(rng: &mut impl Rng, x: &Value) -> Cotangent {
    match x {
        Value::Real(_) => Cotangent::Concrete(Value::Real(rng.gen_range(-1.0..1.0))),
        Value::Real32(_) => {
            Cotangent::Concrete(Value::Real32(rng.gen_range(-1.0f32..1.0)))
        }
        Value::Complex(_) => Cotangent::Concrete(Value::Complex(Complex::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        ))),
        Value::Dense(a) => {
            Cotangent::Concrete(Value::Dense(random_dense(rng, a.shape().clone())))
        }
        Value::Fixed(a) => {
            Cotangent::Concrete(Value::Fixed(random_dense(rng, a.shape().clone())))
        }
        Value::Diagonal(d) => Cotangent::Structural(StructTangent::new(
            "Diagonal",
            vec![(
                "diag",
                Cotangent::Concrete(Value::Dense(random_dense(
                    rng,
                    Shape::new(vec![d.numel()]),
                ))),
            )],
        )),
        Value::Fill(_) => Cotangent::Structural(StructTangent::new(
            "Fill",
            vec![(
                "value",
                Cotangent::Concrete(Value::Real(rng.gen_range(-1.0..1.0))),
            )],
        )),
        Value::Scaled(s) => Cotangent::Structural(StructTangent::new(
            "Scaled",
            vec![
                (
                    "factor",
                    Cotangent::Concrete(Value::Real(rng.gen_range(-1.0..1.0))),
                ),
                (
                    "payload",
                    Cotangent::Concrete(Value::Dense(random_dense(
                        rng,
                        s.payload.shape().clone(),
                    ))),
                ),
            ],
        )),
        Value::Struct(s) => Cotangent::Structural(StructTangent::new(
            s.name,
            s.fields
                .iter()
                .map(|(n, v)| (*n, random_tangent(rng, v)))
                .collect(),
        )),
        Value::Extension(_) => {
            panic!("extension categories supply their own tangent sampling")
        }
    }
}

/// Inner product of two cotangents over the same structural space.
pub fn cotangent_dot(a: &Cotangent, b: &Cotangent) -> Result<f64, CheckError> {
    let (a, b) = (a.forced()?, b.forced()?);
    match (&a, &b) {
        (Cotangent::Zero, _) | (_, Cotangent::Zero) => Ok(0.0),
        (Cotangent::Concrete(va), Cotangent::Concrete(vb)) => {
            Ok(destructure(va).dot(&destructure(vb)))
        }
        (Cotangent::Structural(ta), Cotangent::Structural(tb)) => {
            let mut total = 0.0;
            for (name, fa) in &ta.fields {
                let fb = tb.field(name).cloned().unwrap_or(Cotangent::Zero);
                total += cotangent_dot(fa, &fb)?;
            }
            Ok(total)
        }
        _ => Err(CheckError::Core(ct_core::Error::unsupported(
            a.kind_name(),
            b.kind_name(),
        ))),
    }
}

/// Directional derivative of `destructure` at `x` along structural tangent
/// `v`.
pub fn destructure_directional(x: &Value, v: &Cotangent) -> Result<DenseArray, CheckError> {
    let v = v.forced()?;
    if v.is_zero() {
        return Ok(DenseArray::zeros(DType::F64, natural_shape(x)));
    }
    match x {
        Value::Real(_)
        | Value::Real32(_)
        | Value::Complex(_)
        | Value::Dense(_)
        | Value::Fixed(_) => match &v {
            Cotangent::Concrete(val) => Ok(destructure(val)),
            other => Err(unsupported(x, other)),
        },
        Value::Diagonal(d) => {
            let t = expect_structural(x, &v)?;
            let diag = field_array(&t, "diag", &Shape::new(vec![d.numel()]))?;
            Ok(DenseArray::from_diagonal(&diag))
        }
        Value::Fill(f) => {
            let t = expect_structural(x, &v)?;
            let value = field_scalar(&t, "value")?;
            Ok(DenseArray::filled(DType::F64, f.shape.clone(), value))
        }
        Value::Scaled(s) => {
            // destructure is bilinear in (factor, payload).
            let t = expect_structural(x, &v)?;
            let factor_t = field_scalar(&t, "factor")?;
            let payload_t = field_array(&t, "payload", s.payload.shape())?;
            Ok(payload_t.scale(s.factor).add(&s.payload.scale(factor_t)))
        }
        Value::Struct(sv) => {
            let t = expect_structural(x, &v)?;
            let mut data = Vec::new();
            for (name, field) in &sv.fields {
                let field_v = t.field(name).cloned().unwrap_or(Cotangent::Zero);
                data.extend_from_slice(destructure_directional(field, &field_v)?.data());
            }
            let shape = Shape::new(vec![data.len()]);
            Ok(DenseArray::new(DType::F64, shape, data))
        }
        Value::Extension(_) => Err(unsupported(x, &v)),
    }
}

/// Directional derivative of `restructure` at `x` along natural direction
/// `w`.
pub fn restructure_directional(x: &Value, w: &DenseArray) -> Result<Cotangent, CheckError> {
    match x {
        Value::Real(_) => Ok(Cotangent::Concrete(Value::Real(w.scalar_value()))),
        Value::Real32(_) => Ok(Cotangent::Concrete(Value::Real32(
            w.scalar_value() as f32
        ))),
        Value::Complex(_) => Ok(Cotangent::Concrete(Value::Complex(Complex::new(
            w.data()[0],
            w.data()[1],
        )))),
        Value::Dense(_) => Ok(Cotangent::Concrete(Value::Dense(w.clone()))),
        Value::Fixed(_) => Ok(Cotangent::Concrete(Value::Fixed(w.clone()))),
        Value::Diagonal(_) => Ok(Cotangent::Structural(StructTangent::new(
            "Diagonal",
            vec![("diag", Cotangent::Concrete(Value::Dense(w.diagonal())))],
        ))),
        Value::Fill(_) => Ok(Cotangent::Structural(StructTangent::new(
            "Fill",
            vec![("value", Cotangent::Concrete(Value::Real(w.mean())))],
        ))),
        Value::Scaled(s) => Ok(Cotangent::Structural(StructTangent::new(
            "Scaled",
            vec![
                // restructure keeps the factor from the prototype.
                ("factor", Cotangent::Zero),
                (
                    "payload",
                    Cotangent::Concrete(Value::Dense(w.scale(1.0 / s.factor))),
                ),
            ],
        ))),
        Value::Struct(sv) => {
            let mut fields = Vec::with_capacity(sv.fields.len());
            let mut offset = 0;
            for (name, field) in &sv.fields {
                let field_shape = natural_shape(field);
                let numel = field_shape.numel();
                let slice = w.data()[offset..offset + numel].to_vec();
                let sub = DenseArray::new(DType::F64, field_shape, slice);
                fields.push((*name, restructure_directional(field, &sub)?));
                offset += numel;
            }
            Ok(Cotangent::Structural(StructTangent::new(sv.name, fields)))
        }
        Value::Extension(_) => Err(CheckError::Core(ct_core::Error::unsupported(
            x.type_name(),
            "natural direction",
        ))),
    }
}

/// Natural coordinates of a structural cotangent of `x`.
pub fn cotangent_to_natural(x: &Value, ct: &Cotangent) -> Result<DenseArray, CheckError> {
    match restructure_pullback(x, ct)? {
        Cotangent::Concrete(Value::Dense(a)) => Ok(a),
        other => unreachable!("restructure pullback returned {:?}", other),
    }
}

/// Check an adapted pullback against central finite differences.
///
/// `forward` recomputes the rule's output from a full input list; the
/// adapted pullback is evaluated once on `output_cotangent` and every
/// component of every input gradient is compared.
pub fn check_adapted_pullback<F>(
    forward: F,
    inputs: &[Value],
    output_cotangent: &Cotangent,
    adapted: &AdaptedPullback,
    tol: f64,
) -> Result<(), CheckError>
where
    F: Fn(&[Value]) -> Value,
{
    let output = forward(inputs);
    let y_bar = cotangent_to_natural(&output, output_cotangent)?;

    let grads = adapted.call(output_cotangent)?;

    for (i, x) in inputs.iter().enumerate() {
        let ad_nat = cotangent_to_natural(x, &grads[i])?;
        let x_nat = destructure(x);

        for j in 0..x_nat.numel() {
            let mut plus = x_nat.data().to_vec();
            let mut minus = x_nat.data().to_vec();
            plus[j] += EPS;
            minus[j] -= EPS;

            let y_plus = eval_perturbed(&forward, inputs, i, x, &x_nat, plus)?;
            let y_minus = eval_perturbed(&forward, inputs, i, x, &x_nat, minus)?;

            let slope: Vec<f64> = y_plus
                .data()
                .iter()
                .zip(y_minus.data().iter())
                .map(|(p, m)| (p - m) / (2.0 * EPS))
                .collect();
            let slope = DenseArray::new(DType::F64, y_plus.shape().clone(), slope);

            let estimate = y_bar.dot(&slope);
            let adapted_value = ad_nat.data()[j];
            if !close(adapted_value, estimate, tol) {
                return Err(CheckError::Mismatch {
                    input: i,
                    index: j,
                    adapted: adapted_value,
                    estimate,
                });
            }
        }
    }
    Ok(())
}

fn eval_perturbed<F>(
    forward: &F,
    inputs: &[Value],
    index: usize,
    x: &Value,
    x_nat: &DenseArray,
    data: Vec<f64>,
) -> Result<DenseArray, CheckError>
where
    F: Fn(&[Value]) -> Value,
{
    let perturbed_nat = DenseArray::new(x_nat.dtype(), x_nat.shape().clone(), data);
    let perturbed = restructure(x, &perturbed_nat)?;
    let mut all = inputs.to_vec();
    all[index] = perturbed;
    Ok(destructure(&forward(&all)))
}

/// Relative agreement with a floor of 1 for near-zero values.
fn close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol * a.abs().max(b.abs()).max(1.0)
}

fn expect_structural(x: &Value, ct: &Cotangent) -> Result<StructTangent, CheckError> {
    match ct {
        Cotangent::Structural(t) => Ok(t.clone()),
        other => Err(unsupported(x, other)),
    }
}

fn field_array(
    t: &StructTangent,
    name: &str,
    shape: &Shape,
) -> Result<DenseArray, CheckError> {
    match t.field(name).map(|c| c.forced()).transpose()? {
        Some(Cotangent::Concrete(Value::Dense(a))) => Ok(a),
        Some(Cotangent::Zero) | None => Ok(DenseArray::zeros(DType::F64, shape.clone())),
        Some(other) => Err(CheckError::Core(ct_core::Error::unsupported(
            "Dense",
            other.kind_name(),
        ))),
    }
}

fn field_scalar(t: &StructTangent, name: &str) -> Result<f64, CheckError> {
    match t.field(name).map(|c| c.forced()).transpose()? {
        Some(Cotangent::Concrete(Value::Real(v))) => Ok(v),
        Some(Cotangent::Zero) | None => Ok(0.0),
        Some(other) => Err(CheckError::Core(ct_core::Error::unsupported(
            "Real",
            other.kind_name(),
        ))),
    }
}

fn unsupported(x: &Value, ct: &Cotangent) -> CheckError {
    CheckError::Core(ct_core::Error::unsupported(x.type_name(), ct.kind_name()))
}
