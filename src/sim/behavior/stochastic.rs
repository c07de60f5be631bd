//! Exponentially distributed delay, sampled once per enablement episode.
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};

use crate::net::{Net, TransitionId, TransitionKind};
use crate::sim::behavior::{Eligibility, FireContext, TransitionBehavior, check_enabled};

#[derive(Debug, Clone, PartialEq)]
pub struct StochasticBehavior {
    transition: TransitionId,
    enabled_since: Option<f64>,
    scheduled: Option<f64>,
}

impl StochasticBehavior {
    pub fn new(transition: TransitionId) -> Self {
        Self {
            transition,
            enabled_since: None,
            scheduled: None,
        }
    }
}

impl TransitionBehavior for StochasticBehavior {
    fn transition(&self) -> TransitionId {
        self.transition
    }

    fn kind(&self) -> TransitionKind {
        TransitionKind::Stochastic
    }

    fn can_fire(&self, ctx: &FireContext<'_>) -> Eligibility {
        if let Err(reason) = check_enabled(ctx, self.transition) {
            return Eligibility::Blocked(reason);
        }
        match (self.enabled_since, self.scheduled) {
            (None, _) => Eligibility::TooEarly {
                remaining: f64::INFINITY,
            },
            (Some(_), None) => Eligibility::Blocked("non-positive rate, no firing scheduled".into()),
            (Some(_), Some(at)) if ctx.now + ctx.time_epsilon >= at => Eligibility::Ready,
            (Some(_), Some(at)) => Eligibility::TooEarly {
                remaining: at - ctx.now,
            },
        }
    }

    fn set_enablement_time(&mut self, time: f64, net: &Net, rng: &mut StdRng) {
        self.enabled_since = Some(time);
        self.scheduled = None;
        let Some(t) = net.transition(self.transition) else {
            return;
        };
        let lambda = match t.rate.eval(&net.scope(time)) {
            Ok(lambda) => lambda,
            Err(err) => {
                log::warn!("rate of {} could not be evaluated: {}", t.name, err);
                return;
            }
        };
        if !(lambda.is_finite() && lambda > 0.0) {
            log::debug!("{} has rate {}, never scheduled", t.name, lambda);
            return;
        }
        match Exp::new(lambda) {
            Ok(exp) => {
                let delay = exp.sample(rng);
                self.scheduled = Some(time + delay);
                log::trace!("{} scheduled at {} (rate {})", t.name, time + delay, lambda);
            }
            Err(err) => log::warn!("cannot sample rate {} for {}: {}", lambda, t.name, err),
        }
    }

    fn clear_enablement(&mut self) {
        self.enabled_since = None;
        self.scheduled = None;
    }

    fn enablement_time(&self) -> Option<f64> {
        self.enabled_since
    }

    fn scheduled_time(&self) -> Option<f64> {
        self.scheduled
    }
}
