//! Per-transition runtime timing state, kept separately from the net so that
//! stopping a run can drop it wholesale.
use indexmap::IndexMap;

use crate::net::TransitionId;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransitionState {
    /// Start of the current enablement episode.
    pub enablement_time: Option<f64>,
    /// Stochastic firing time sampled for this episode.
    pub scheduled_time: Option<f64>,
}

#[derive(Debug, Default)]
pub struct TransitionStateTracker {
    states: IndexMap<TransitionId, TransitionState>,
}

impl TransitionStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, transition: TransitionId) -> Option<&TransitionState> {
        self.states.get(&transition)
    }

    pub fn is_enabled(&self, transition: TransitionId) -> bool {
        self.get(transition)
            .is_some_and(|s| s.enablement_time.is_some())
    }

    /// Stamps the start of an enablement episode. Returns `false` if the
    /// episode was already stamped; the original stamp is kept.
    pub fn mark_enabled(&mut self, transition: TransitionId, time: f64) -> bool {
        let state = self.states.entry(transition).or_default();
        if state.enablement_time.is_some() {
            return false;
        }
        state.enablement_time = Some(time);
        true
    }

    pub fn set_scheduled(&mut self, transition: TransitionId, at: Option<f64>) {
        self.states.entry(transition).or_default().scheduled_time = at;
    }

    pub fn clear(&mut self, transition: TransitionId) {
        self.states.swap_remove(&transition);
    }

    pub fn clear_all(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
