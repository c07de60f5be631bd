//! Deterministic delay with an optional firing window `[earliest, latest]`.
//!
//! `rate` is the earliest delay measured from the start of the current
//! enablement episode. `latest` closes the window; under
//! [`FiringPolicy::Latest`] the transition waits for the end of the window.
use rand::rngs::StdRng;

use crate::net::{FiringPolicy, Net, TransitionId, TransitionKind};
use crate::sim::behavior::{Eligibility, FireContext, TransitionBehavior, check_enabled};

#[derive(Debug, Clone, PartialEq)]
pub struct TimedBehavior {
    transition: TransitionId,
    enabled_since: Option<f64>,
}

impl TimedBehavior {
    pub fn new(transition: TransitionId) -> Self {
        Self {
            transition,
            enabled_since: None,
        }
    }

    fn threshold(&self, ctx: &FireContext<'_>) -> Result<f64, String> {
        let Some(t) = ctx.net.transition(self.transition) else {
            return Err(format!("transition {:?} does not exist", self.transition));
        };
        let earliest = t
            .rate
            .eval(&ctx.net.scope(ctx.now))
            .map_err(|err| format!("delay could not be evaluated: {err}"))?;
        if !earliest.is_finite() {
            return Err(format!("delay {earliest} is not finite"));
        }
        let earliest = earliest.max(0.0);
        Ok(match t.firing_policy {
            FiringPolicy::Earliest => earliest,
            FiringPolicy::Latest => t.latest.map_or(earliest, |latest| latest.max(earliest)),
        })
    }
}

impl TransitionBehavior for TimedBehavior {
    fn transition(&self) -> TransitionId {
        self.transition
    }

    fn kind(&self) -> TransitionKind {
        TransitionKind::Timed
    }

    fn can_fire(&self, ctx: &FireContext<'_>) -> Eligibility {
        if let Err(reason) = check_enabled(ctx, self.transition) {
            return Eligibility::Blocked(reason);
        }
        let threshold = match self.threshold(ctx) {
            Ok(threshold) => threshold,
            Err(reason) => return Eligibility::Blocked(reason),
        };
        let Some(since) = self.enabled_since else {
            return Eligibility::TooEarly {
                remaining: f64::INFINITY,
            };
        };
        let elapsed = ctx.now - since;
        if elapsed + ctx.time_epsilon >= threshold {
            Eligibility::Ready
        } else {
            Eligibility::TooEarly {
                remaining: threshold - elapsed,
            }
        }
    }

    fn set_enablement_time(&mut self, time: f64, _net: &Net, _rng: &mut StdRng) {
        self.enabled_since = Some(time);
    }

    fn clear_enablement(&mut self) {
        self.enabled_since = None;
    }

    fn enablement_time(&self) -> Option<f64> {
        self.enabled_since
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::net::Rate;
    use crate::sim::behavior::TOO_EARLY;
    use crate::sim::behavior::test_support::chain;

    fn ctx(net: &Net, now: f64) -> FireContext<'_> {
        FireContext {
            net,
            now,
            time_epsilon: 1e-9,
        }
    }

    #[test]
    fn waits_for_the_delay() {
        let (mut net, _, dst, t) = chain(TransitionKind::Timed, 1.0, 1.0, 1.0);
        net.transition_mut(t).unwrap().rate = Rate::Constant(5.0);
        let mut rng = StdRng::seed_from_u64(7);
        let mut behavior = TimedBehavior::new(t);

        let unstamped = behavior.can_fire(&ctx(&net, 0.0));
        assert!(unstamped.is_waiting());

        behavior.set_enablement_time(0.0, &net, &mut rng);
        let early = behavior.can_fire(&ctx(&net, 4.0));
        assert!(early.reason().contains(TOO_EARLY));
        assert!(behavior.can_fire(&ctx(&net, 5.0)).is_ready());

        let locality = net.locality(t);
        behavior.fire(&mut net, &locality, 5.0).unwrap();
        assert_eq!(net.tokens(dst), 1.0);
        assert_eq!(behavior.enablement_time(), None);
    }

    #[test]
    fn accumulated_float_time_still_reaches_the_delay() {
        let (mut net, _, _, t) = chain(TransitionKind::Timed, 1.0, 1.0, 1.0);
        net.transition_mut(t).unwrap().rate = Rate::Constant(1.0);
        let mut behavior = TimedBehavior::new(t);
        behavior.set_enablement_time(0.0, &net, &mut StdRng::seed_from_u64(0));
        let now = (0..10).fold(0.0, |acc, _| acc + 0.1);
        assert!(now < 1.0);
        assert!(behavior.can_fire(&ctx(&net, now)).is_ready());
    }

    #[test]
    fn latest_policy_waits_for_window_end() {
        let (mut net, _, _, t) = chain(TransitionKind::Timed, 1.0, 1.0, 1.0);
        {
            let tr = net.transition_mut(t).unwrap();
            tr.rate = Rate::Constant(2.0);
            tr.latest = Some(4.0);
            tr.firing_policy = FiringPolicy::Latest;
        }
        let mut behavior = TimedBehavior::new(t);
        behavior.set_enablement_time(1.0, &net, &mut StdRng::seed_from_u64(0));
        assert!(behavior.can_fire(&ctx(&net, 3.0)).is_waiting());
        assert!(behavior.can_fire(&ctx(&net, 5.0)).is_ready());
    }

    #[test]
    fn missing_tokens_block_instead_of_wait() {
        let (net, _, _, t) = chain(TransitionKind::Timed, 0.0, 1.0, 1.0);
        let mut behavior = TimedBehavior::new(t);
        behavior.set_enablement_time(0.0, &net, &mut StdRng::seed_from_u64(0));
        let result = behavior.can_fire(&ctx(&net, 10.0));
        assert!(!result.is_ready());
        assert!(!result.reason().contains(TOO_EARLY));
    }
}
