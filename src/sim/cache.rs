//! Lazily built behavior per transition.
//!
//! Each access compares the cached behavior's type name with the
//! transition's current kind. A mismatch means an editor changed the kind;
//! the stale behavior and its timing state are dropped and a fresh behavior
//! of the new kind is built.
use indexmap::IndexMap;

use crate::net::{Net, TransitionId};
use crate::sim::behavior::{Behavior, TransitionBehavior};
use crate::sim::state::TransitionStateTracker;

#[derive(Debug, Default)]
pub struct BehaviorCache {
    entries: IndexMap<TransitionId, Behavior>,
}

impl BehaviorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` only when `transition` is not in `net`.
    pub fn get_behavior(
        &mut self,
        net: &Net,
        transition: TransitionId,
        states: &mut TransitionStateTracker,
    ) -> Option<&mut Behavior> {
        let kind = net.transition(transition)?.kind;
        let stale = self
            .entries
            .get(&transition)
            .is_some_and(|cached| cached.type_name() != kind.type_name());
        if stale {
            if let Some(old) = self.entries.swap_remove(&transition) {
                log::debug!(
                    "{:?} changed kind {} -> {}, rebuilding behavior",
                    transition,
                    old.type_name(),
                    kind
                );
            }
            states.clear(transition);
        }
        Some(
            self.entries
                .entry(transition)
                .or_insert_with(|| Behavior::for_kind(kind, transition)),
        )
    }

    pub fn contains(&self, transition: TransitionId) -> bool {
        self.entries.contains_key(&transition)
    }

    pub fn invalidate(&mut self, transition: TransitionId) {
        self.entries.swap_remove(&transition);
    }

    /// Keeps the behaviors, drops their enablement episodes.
    pub fn clear_enablement(&mut self) {
        for behavior in self.entries.values_mut() {
            behavior.clear_enablement();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
