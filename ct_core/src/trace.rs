//! Caller-injected observation hook for the adapter layer.
//!
//! The core never prints. A caller wanting visibility into how cotangents
//! move through an adapted pullback supplies a [`TraceSink`]; with no sink
//! installed the layer is silent.

use std::cell::RefCell;

/// One observation from an adapted pullback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A structural-zero output cotangent skipped the rule entirely.
    ZeroShortCircuit { inputs: usize },
    /// The output cotangent was converted to its natural representation.
    OutputNaturalized { category: &'static str },
    /// The rule's natural-space pullback ran.
    NaturalPullbackEvaluated { inputs: usize },
    /// One input's natural cotangent was converted back to structural form.
    InputRestructured {
        index: usize,
        category: &'static str,
    },
}

/// Receiver for [`TraceEvent`]s.
pub trait TraceSink {
    fn record(&self, event: TraceEvent);
}

/// Sink that stores every event for later inspection.
#[derive(Default)]
pub struct CollectingSink {
    events: RefCell<Vec<TraceEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }
}

impl TraceSink for CollectingSink {
    fn record(&self, event: TraceEvent) {
        self.events.borrow_mut().push(event);
    }
}
