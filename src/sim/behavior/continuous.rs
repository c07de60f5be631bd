//! Flow transitions, integrated with explicit Euler steps.
//!
//! One step moves `w · r · dt` along every arc, where `r` is the rate
//! evaluated against the marking at the start of the step. When a consuming
//! input would go negative the whole flow is scaled down to what the
//! tightest input can supply, so stoichiometry is preserved.
use smallvec::SmallVec;

use crate::net::{Locality, Net, PlaceId, Tokens, TransitionId, TransitionKind};
use crate::sim::behavior::{
    Eligibility, FireContext, FireError, FiringDetails, TransitionBehavior, check_enabled,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousBehavior {
    transition: TransitionId,
}

impl ContinuousBehavior {
    pub fn new(transition: TransitionId) -> Self {
        Self { transition }
    }
}

impl TransitionBehavior for ContinuousBehavior {
    fn transition(&self) -> TransitionId {
        self.transition
    }

    fn kind(&self) -> TransitionKind {
        TransitionKind::Continuous
    }

    fn can_fire(&self, ctx: &FireContext<'_>) -> Eligibility {
        match check_enabled(ctx, self.transition) {
            Ok(()) => Eligibility::Ready,
            Err(reason) => Eligibility::Blocked(reason),
        }
    }

    fn fire(
        &mut self,
        _net: &mut Net,
        _locality: &Locality,
        _now: f64,
    ) -> Result<FiringDetails, FireError> {
        Err(FireError::WrongKind {
            transition: self.transition,
            kind: TransitionKind::Continuous,
            operation: "discrete firing",
        })
    }

    fn integrate_step(
        &mut self,
        net: &mut Net,
        locality: &Locality,
        now: f64,
        dt: f64,
    ) -> Result<FiringDetails, FireError> {
        let transition = self.transition;
        let Some(t) = net.transition(transition) else {
            return Err(FireError::UnknownTransition(transition));
        };
        let rate = t
            .rate
            .eval(&net.scope(now))
            .map_err(|error| FireError::Expression { transition, error })?;
        let mut details = FiringDetails::new(transition, TransitionKind::Continuous);
        details.flow_rate = Some(rate);

        let rate = if rate.is_finite() { rate.max(0.0) } else { 0.0 };
        let mut flow = rate * dt.max(0.0);

        let mut inputs: SmallVec<[(PlaceId, Tokens); 4]> = SmallVec::new();
        for arc in locality.inputs.iter().filter_map(|id| net.arc(*id)) {
            if !arc.kind.consumes() {
                continue;
            }
            let Some(place) = arc.place() else {
                continue;
            };
            match inputs.iter_mut().find(|(p, _)| *p == place) {
                Some((_, w)) => *w += arc.weight,
                None => inputs.push((place, arc.weight)),
            }
        }
        for (place, weight) in &inputs {
            let limit = net.tokens(*place) / weight;
            if flow > limit {
                flow = limit.max(0.0);
                details.clamped = true;
            }
        }
        if details.clamped {
            log::debug!(
                "t={now}: flow of {} clamped to {flow} by its inputs",
                t.name
            );
        }
        if flow <= 0.0 {
            return Ok(details);
        }

        let outputs = locality
            .outputs
            .iter()
            .filter_map(|id| net.arc(*id))
            .filter_map(|arc| arc.place().map(|p| (p, arc.weight)))
            .collect::<SmallVec<[_; 4]>>();
        for (place, weight) in inputs {
            let amount = weight * flow;
            net.add_tokens(place, -amount);
            details.consumed.push((place, amount));
        }
        for (place, weight) in outputs {
            let amount = weight * flow;
            net.add_tokens(place, amount);
            details.produced.push((place, amount));
        }
        details.success = true;
        Ok(details)
    }
}
