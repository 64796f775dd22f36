//! Natural-pullback adapter: lift a rule written in flat-array terms into
//! the structural-cotangent calling convention.
//!
//! A rule author supplies `naturalPullback: natural_cotangent_of(y) ->
//! (natural_cotangent_of(x_1), ...)`. The adapter composes it with the
//! conversion adjoints: the incoming structural cotangent of the output goes
//! through the restructure adjoint (structural -> natural), and each
//! resulting input cotangent comes back through the destructure adjoint
//! (natural -> structural). Values with no natural/structural distinction
//! (plain reals, plain dense arrays) skip their conversion step.

use std::rc::Rc;

use crate::array::DenseArray;
use crate::cotangent::Cotangent;
use crate::error::Error;
use crate::natural::{destructure, destructure_pullback, has_natural_form, restructure_pullback};
use crate::project::Projector;
use crate::trace::{TraceEvent, TraceSink};
use crate::value::Value;

/// A derivative rule's pullback in natural-array terms: one natural
/// cotangent in, one natural cotangent per input out.
pub type NaturalPullbackFn = dyn Fn(&DenseArray) -> Result<Vec<DenseArray>, Error>;

/// Adapt a natural-space pullback to the structural calling convention.
///
/// This is the single entry point rule authors use; the returned
/// [`AdaptedPullback`] captures its conversion plans once and is reusable
/// across any number of backward invocations.
pub fn wrap_natural_pullback<F>(
    pullback: F,
    output: &Value,
    inputs: &[Value],
) -> AdaptedPullback
where
    F: Fn(&DenseArray) -> Result<Vec<DenseArray>, Error> + 'static,
{
    AdaptedPullback {
        // Identity-category values skip destructure/restructure; their
        // cotangents only need coercion onto the exact type.
        output_projector: (!has_natural_form(output)).then(|| Projector::new(output)),
        input_projectors: inputs
            .iter()
            .map(|x| (!has_natural_form(x)).then(|| Projector::new(x)))
            .collect(),
        output: output.clone(),
        inputs: inputs.to_vec(),
        pullback: Box::new(pullback),
        trace: None,
    }
}

/// A pullback satisfying the structural-cotangent contract.
pub struct AdaptedPullback {
    output: Value,
    inputs: Vec<Value>,
    output_projector: Option<Projector>,
    input_projectors: Vec<Option<Projector>>,
    pullback: Box<NaturalPullbackFn>,
    trace: Option<Rc<dyn TraceSink>>,
}

impl AdaptedPullback {
    /// Install an observation hook for subsequent calls.
    pub fn with_trace(mut self, sink: Rc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    fn record(&self, event: TraceEvent) {
        if let Some(sink) = &self.trace {
            sink.record(event);
        }
    }

    /// Run the adapted pullback on a structural cotangent of the output.
    pub fn call(&self, output_cotangent: &Cotangent) -> Result<Vec<Cotangent>, Error> {
        match output_cotangent {
            // A zero output cotangent yields zero input cotangents without
            // touching the rule.
            Cotangent::Zero => {
                self.record(TraceEvent::ZeroShortCircuit {
                    inputs: self.inputs.len(),
                });
                Ok(vec![Cotangent::Zero; self.inputs.len()])
            }
            Cotangent::Lazy(l) => self.call(&l.force()?),
            ct => {
                let y_nat = self.output_to_natural(ct)?;
                self.record(TraceEvent::OutputNaturalized {
                    category: self.output.type_name(),
                });

                let naturals = (self.pullback)(&y_nat)?;
                assert_eq!(
                    naturals.len(),
                    self.inputs.len(),
                    "natural pullback returned {} cotangents for {} inputs",
                    naturals.len(),
                    self.inputs.len()
                );
                self.record(TraceEvent::NaturalPullbackEvaluated {
                    inputs: naturals.len(),
                });

                let mut results = Vec::with_capacity(self.inputs.len());
                for (index, (x, nat)) in
                    self.inputs.iter().zip(naturals.into_iter()).enumerate()
                {
                    let structural = self.input_from_natural(index, x, nat)?;
                    self.record(TraceEvent::InputRestructured {
                        index,
                        category: x.type_name(),
                    });
                    results.push(structural);
                }
                Ok(results)
            }
        }
    }

    fn output_to_natural(&self, ct: &Cotangent) -> Result<DenseArray, Error> {
        match &self.output_projector {
            // Identity category: coerce onto the output's exact type, then
            // read the (trivial) linearization.
            Some(p) => match p.project(ct)? {
                Cotangent::Concrete(v) => Ok(destructure(&v)),
                other => Err(Error::unsupported(self.output.type_name(), other.kind_name())),
            },
            None => match restructure_pullback(&self.output, ct)? {
                Cotangent::Concrete(Value::Dense(a)) => Ok(a),
                other => unreachable!("restructure pullback returned {:?}", other),
            },
        }
    }

    fn input_from_natural(
        &self,
        index: usize,
        x: &Value,
        nat: DenseArray,
    ) -> Result<Cotangent, Error> {
        let nat_ct = Cotangent::Concrete(Value::Dense(nat));
        match &self.input_projectors[index] {
            Some(p) => p.project(&nat_ct),
            None => destructure_pullback(x, &nat_ct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;
    use crate::shape::Shape;
    use crate::trace::CollectingSink;
    use crate::value::FillArray;

    fn dense(shape: Vec<usize>, data: Vec<f64>) -> DenseArray {
        DenseArray::new(DType::F64, Shape::new(shape), data)
    }

    #[test]
    fn test_zero_short_circuits_without_invoking_rule() {
        let x = Value::Dense(dense(vec![2], vec![1.0, 2.0]));
        let y = Value::Real(3.0);
        let adapted = wrap_natural_pullback(
            |_| panic!("natural pullback must not run for a zero cotangent"),
            &y,
            std::slice::from_ref(&x),
        );
        let grads = adapted.call(&Cotangent::Zero).unwrap();
        assert_eq!(grads, vec![Cotangent::Zero]);
    }

    #[test]
    fn test_identity_categories_skip_conversion() {
        // y = 2 * x for scalars: pullback is multiplication by 2.
        let x = Value::Real(5.0);
        let y = Value::Real(10.0);
        let adapted = wrap_natural_pullback(
            |y_nat| Ok(vec![y_nat.scale(2.0)]),
            &y,
            std::slice::from_ref(&x),
        );
        let grads = adapted
            .call(&Cotangent::Concrete(Value::Real(1.5)))
            .unwrap();
        assert_eq!(grads, vec![Cotangent::Concrete(Value::Real(3.0))]);
    }

    #[test]
    fn test_lazy_output_cotangent_is_forced() {
        let x = Value::Real(1.0);
        let y = Value::Real(1.0);
        let adapted = wrap_natural_pullback(
            |y_nat| Ok(vec![y_nat.clone()]),
            &y,
            std::slice::from_ref(&x),
        );
        let lazy = Cotangent::lazy(|| Ok(Cotangent::Concrete(Value::Real(4.0))));
        let grads = adapted.call(&lazy).unwrap();
        assert_eq!(grads, vec![Cotangent::Concrete(Value::Real(4.0))]);
    }

    #[test]
    fn test_structured_input_comes_back_structural() {
        // y = sum(x) for a fill input: natural pullback broadcasts.
        let shape = Shape::new(vec![3, 4]);
        let x = Value::Fill(FillArray::new(2.0, shape.clone()));
        let y = Value::Real(24.0);
        let pb_shape = shape.clone();
        let adapted = wrap_natural_pullback(
            move |y_nat| {
                Ok(vec![DenseArray::filled(
                    DType::F64,
                    pb_shape.clone(),
                    y_nat.scalar_value(),
                )])
            },
            &y,
            std::slice::from_ref(&x),
        );
        let grads = adapted
            .call(&Cotangent::Concrete(Value::Real(1.0)))
            .unwrap();
        match &grads[0] {
            Cotangent::Structural(t) => {
                assert_eq!(
                    t.field("value"),
                    Some(&Cotangent::Concrete(Value::Real(12.0)))
                );
            }
            other => panic!("expected structural gradient, got {:?}", other),
        }
    }

    #[test]
    fn test_trace_events_are_recorded_in_order() {
        let sink = Rc::new(CollectingSink::new());
        let x = Value::Real(1.0);
        let y = Value::Real(1.0);
        let adapted = wrap_natural_pullback(
            |y_nat| Ok(vec![y_nat.clone()]),
            &y,
            std::slice::from_ref(&x),
        )
        .with_trace(sink.clone());

        adapted
            .call(&Cotangent::Concrete(Value::Real(1.0)))
            .unwrap();
        assert_eq!(
            sink.events(),
            vec![
                TraceEvent::OutputNaturalized { category: "Real" },
                TraceEvent::NaturalPullbackEvaluated { inputs: 1 },
                TraceEvent::InputRestructured {
                    index: 0,
                    category: "Real"
                },
            ]
        );

        adapted.call(&Cotangent::Zero).unwrap();
        assert_eq!(
            sink.events().last(),
            Some(&TraceEvent::ZeroShortCircuit { inputs: 1 })
        );
    }
}
