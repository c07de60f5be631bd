//! Observation hooks for firings and flow steps.
use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::net::{Transition, TransitionId, TransitionKind};
use crate::sim::behavior::FiringDetails;

/// Receives every discrete firing (immediates included) and every
/// continuous integration step that moved tokens.
pub trait DataCollector {
    fn on_transition_fired(&mut self, transition: &Transition, time: f64, details: &FiringDetails);
}

/// Lets a caller keep a handle on a collector it installs into a controller.
impl<C: DataCollector> DataCollector for Rc<RefCell<C>> {
    fn on_transition_fired(&mut self, transition: &Transition, time: f64, details: &FiringDetails) {
        self.borrow_mut()
            .on_transition_fired(transition, time, details)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiringRecord {
    pub time: f64,
    pub transition: TransitionId,
    pub name: String,
    pub kind: TransitionKind,
    pub details: FiringDetails,
}

/// In-memory event log, serialisable as a trace document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceCollector {
    records: Vec<FiringRecord>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn records(&self) -> &[FiringRecord] {
        &self.records
    }

    pub fn firings_of(&self, transition: TransitionId) -> impl Iterator<Item = &FiringRecord> {
        self.records
            .iter()
            .filter(move |r| r.transition == transition)
    }

    /// Timed and stochastic firings recorded at `time`.
    pub fn discrete_firings_at(&self, time: f64) -> usize {
        self.records
            .iter()
            .filter(|r| r.kind.is_discrete() && (r.time - time).abs() < 1e-9)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl DataCollector for TraceCollector {
    fn on_transition_fired(&mut self, transition: &Transition, time: f64, details: &FiringDetails) {
        self.records.push(FiringRecord {
            time,
            transition: details.transition,
            name: transition.name.clone(),
            kind: details.kind,
            details: details.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::behavior::fire_discrete;
    use crate::sim::behavior::test_support::chain;

    #[test]
    fn shared_collector_sees_records() {
        let (mut net, _, _, t) = chain(TransitionKind::Timed, 2.0, 1.0, 1.0);
        let shared = TraceCollector::shared();
        let mut handle: Box<dyn DataCollector> = Box::new(Rc::clone(&shared));
        for time in [1.0, 2.0] {
            let locality = net.locality(t);
            let details = fire_discrete(&mut net, &locality, t, TransitionKind::Timed, time).unwrap();
            let transition = net.transition(t).unwrap().clone();
            handle.on_transition_fired(&transition, time, &details);
        }
        let trace = shared.borrow();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.firings_of(t).count(), 2);
        assert_eq!(trace.discrete_firings_at(2.0), 1);
        assert_eq!(trace.records()[0].name, "t");
    }
}
