//! Per-kind firing semantics.
//!
//! Every transition kind implements [`TransitionBehavior`]; [`Behavior`] is
//! the tagged union the cache stores, one instance per transition.
use rand::rngs::StdRng;
use serde::Serialize;
use smallvec::SmallVec;
use thiserror::Error;

use crate::expr::ExprError;
use crate::net::{ArcKind, Locality, Net, PlaceId, Tokens, TransitionId, TransitionKind};

mod continuous;
mod immediate;
mod stochastic;
mod timed;

pub use continuous::ContinuousBehavior;
pub use immediate::ImmediateBehavior;
pub use stochastic::StochasticBehavior;
pub use timed::TimedBehavior;

/// Slack used when comparing token counts against arc weights.
pub const TOKEN_EPSILON: f64 = 1e-9;

/// Marker contained in the reason of a structurally enabled transition whose
/// time window has not opened yet.
pub const TOO_EARLY: &str = "too-early";

#[derive(Debug, Error)]
pub enum FireError {
    #[error("transition {0:?} does not exist")]
    UnknownTransition(TransitionId),
    #[error("transition {transition:?} is not enabled: {reason}")]
    NotEnabled {
        transition: TransitionId,
        reason: String,
    },
    #[error("{kind} transition {transition:?} does not support {operation}")]
    WrongKind {
        transition: TransitionId,
        kind: TransitionKind,
        operation: &'static str,
    },
    #[error("rate of transition {transition:?} could not be evaluated: {error}")]
    Expression {
        transition: TransitionId,
        error: ExprError,
    },
}

/// Outcome of `can_fire`.
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Ready,
    /// Structurally enabled, waiting for its time window.
    TooEarly { remaining: f64 },
    Blocked(String),
}

impl Eligibility {
    pub fn is_ready(&self) -> bool {
        matches!(self, Eligibility::Ready)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Eligibility::TooEarly { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            Eligibility::Ready => "enabled".to_string(),
            Eligibility::TooEarly { remaining } if remaining.is_finite() => {
                format!("{TOO_EARLY}: {remaining:.6} time units left")
            }
            Eligibility::TooEarly { .. } => format!("{TOO_EARLY}: enablement clock not started"),
            Eligibility::Blocked(reason) => reason.clone(),
        }
    }

    /// `(can_fire, reason)` pair as reported to editors.
    pub fn as_pair(&self) -> (bool, String) {
        (self.is_ready(), self.reason())
    }
}

/// Token movement of one firing or integration step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiringDetails {
    pub transition: TransitionId,
    pub kind: TransitionKind,
    pub success: bool,
    pub consumed: SmallVec<[(PlaceId, Tokens); 4]>,
    pub produced: SmallVec<[(PlaceId, Tokens); 4]>,
    /// Continuous only: the evaluated rate before clamping.
    pub flow_rate: Option<f64>,
    /// Continuous only: the flow was limited by an input place.
    pub clamped: bool,
}

impl FiringDetails {
    fn new(transition: TransitionId, kind: TransitionKind) -> Self {
        Self {
            transition,
            kind,
            success: false,
            consumed: SmallVec::new(),
            produced: SmallVec::new(),
            flow_rate: None,
            clamped: false,
        }
    }

    pub fn consumed_total(&self) -> Tokens {
        self.consumed.iter().map(|(_, q)| q).sum()
    }

    pub fn produced_total(&self) -> Tokens {
        self.produced.iter().map(|(_, q)| q).sum()
    }
}

/// Read-only view a behavior evaluates against.
#[derive(Clone, Copy)]
pub struct FireContext<'a> {
    pub net: &'a Net,
    pub now: f64,
    pub time_epsilon: f64,
}

pub trait TransitionBehavior {
    fn transition(&self) -> TransitionId;

    fn kind(&self) -> TransitionKind;

    fn type_name(&self) -> &'static str {
        self.kind().type_name()
    }

    fn can_fire(&self, ctx: &FireContext<'_>) -> Eligibility;

    fn fire(
        &mut self,
        net: &mut Net,
        locality: &Locality,
        now: f64,
    ) -> Result<FiringDetails, FireError> {
        let details = fire_discrete(net, locality, self.transition(), self.kind(), now)?;
        self.clear_enablement();
        Ok(details)
    }

    fn integrate_step(
        &mut self,
        _net: &mut Net,
        _locality: &Locality,
        _now: f64,
        _dt: f64,
    ) -> Result<FiringDetails, FireError> {
        Err(FireError::WrongKind {
            transition: self.transition(),
            kind: self.kind(),
            operation: "flow integration",
        })
    }

    fn set_enablement_time(&mut self, _time: f64, _net: &Net, _rng: &mut StdRng) {}

    fn clear_enablement(&mut self) {}

    fn enablement_time(&self) -> Option<f64> {
        None
    }

    fn scheduled_time(&self) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    Immediate(ImmediateBehavior),
    Timed(TimedBehavior),
    Stochastic(StochasticBehavior),
    Continuous(ContinuousBehavior),
}

macro_rules! dispatch {
    ($self:expr, $b:ident => $body:expr) => {
        match $self {
            Behavior::Immediate($b) => $body,
            Behavior::Timed($b) => $body,
            Behavior::Stochastic($b) => $body,
            Behavior::Continuous($b) => $body,
        }
    };
}

impl Behavior {
    /// Factory keyed on the transition's declared kind.
    pub fn for_kind(kind: TransitionKind, transition: TransitionId) -> Self {
        match kind {
            TransitionKind::Immediate => Behavior::Immediate(ImmediateBehavior::new(transition)),
            TransitionKind::Timed => Behavior::Timed(TimedBehavior::new(transition)),
            TransitionKind::Stochastic => Behavior::Stochastic(StochasticBehavior::new(transition)),
            TransitionKind::Continuous => Behavior::Continuous(ContinuousBehavior::new(transition)),
        }
    }
}

impl TransitionBehavior for Behavior {
    fn transition(&self) -> TransitionId {
        dispatch!(self, b => b.transition())
    }

    fn kind(&self) -> TransitionKind {
        dispatch!(self, b => b.kind())
    }

    fn can_fire(&self, ctx: &FireContext<'_>) -> Eligibility {
        dispatch!(self, b => b.can_fire(ctx))
    }

    fn fire(
        &mut self,
        net: &mut Net,
        locality: &Locality,
        now: f64,
    ) -> Result<FiringDetails, FireError> {
        dispatch!(self, b => b.fire(net, locality, now))
    }

    fn integrate_step(
        &mut self,
        net: &mut Net,
        locality: &Locality,
        now: f64,
        dt: f64,
    ) -> Result<FiringDetails, FireError> {
        dispatch!(self, b => b.integrate_step(net, locality, now, dt))
    }

    fn set_enablement_time(&mut self, time: f64, net: &Net, rng: &mut StdRng) {
        dispatch!(self, b => b.set_enablement_time(time, net, rng))
    }

    fn clear_enablement(&mut self) {
        dispatch!(self, b => b.clear_enablement())
    }

    fn enablement_time(&self) -> Option<f64> {
        dispatch!(self, b => b.enablement_time())
    }

    fn scheduled_time(&self) -> Option<f64> {
        dispatch!(self, b => b.scheduled_time())
    }
}

/// Arc-level enablement over the locality of `transition`: every input place
/// holds at least the arc weight. Guards are not consulted.
pub fn structurally_enabled(net: &Net, transition: TransitionId) -> bool {
    check_arcs(net, &net.locality(transition)).is_ok()
}

fn check_arcs(net: &Net, locality: &Locality) -> Result<(), String> {
    let mut demand: SmallVec<[(PlaceId, Tokens); 4]> = SmallVec::new();
    for arc in locality.inputs.iter().filter_map(|id| net.arc(*id)) {
        let Some(place) = arc.place() else {
            continue;
        };
        let tokens = net.tokens(place);
        // 测试弧只要求令牌数达到权重，不参与消耗累计
        if tokens + TOKEN_EPSILON < arc.weight {
            let label = match arc.kind {
                ArcKind::Normal => "input",
                ArcKind::Inhibitor => "inhibitor",
                ArcKind::Test => "test",
            };
            return Err(format!(
                "{label} place {place:?} has {tokens} tokens, needs {}",
                arc.weight
            ));
        }
        if arc.kind.consumes() {
            match demand.iter_mut().find(|(p, _)| *p == place) {
                Some((_, total)) => *total += arc.weight,
                None => demand.push((place, arc.weight)),
            }
        }
    }
    for (place, total) in demand {
        let tokens = net.tokens(place);
        if tokens + TOKEN_EPSILON < total {
            return Err(format!(
                "place {place:?} has {tokens} tokens, parallel arcs need {total}"
            ));
        }
    }
    Ok(())
}

/// Structural check plus guard. Shared by every kind before its own timing rule.
pub(crate) fn check_enabled(ctx: &FireContext<'_>, transition: TransitionId) -> Result<(), String> {
    let Some(t) = ctx.net.transition(transition) else {
        return Err(format!("transition {transition:?} does not exist"));
    };
    check_arcs(ctx.net, &ctx.net.locality(transition))?;
    match t.guard.eval(&ctx.net.scope(ctx.now)) {
        Ok(true) => Ok(()),
        Ok(false) => Err("guard is false".to_string()),
        Err(err) => Err(format!("guard could not be evaluated: {err}")),
    }
}

/// Atomic discrete firing: all inputs are checked before any place changes.
pub(crate) fn fire_discrete(
    net: &mut Net,
    locality: &Locality,
    transition: TransitionId,
    kind: TransitionKind,
    now: f64,
) -> Result<FiringDetails, FireError> {
    if net.transition(transition).is_none() {
        return Err(FireError::UnknownTransition(transition));
    }
    check_arcs(net, locality).map_err(|reason| FireError::NotEnabled { transition, reason })?;

    let mut details = FiringDetails::new(transition, kind);
    let inputs = locality
        .inputs
        .iter()
        .filter_map(|id| net.arc(*id))
        .filter(|arc| arc.kind.consumes())
        .filter_map(|arc| arc.place().map(|p| (p, arc.weight)))
        .collect::<SmallVec<[_; 4]>>();
    let outputs = locality
        .outputs
        .iter()
        .filter_map(|id| net.arc(*id))
        .filter_map(|arc| arc.place().map(|p| (p, arc.weight)))
        .collect::<SmallVec<[_; 4]>>();

    for (place, weight) in inputs {
        net.add_tokens(place, -weight);
        details.consumed.push((place, weight));
    }
    for (place, weight) in outputs {
        net.add_tokens(place, weight);
        details.produced.push((place, weight));
    }
    details.success = true;
    log::debug!(
        "t={now}: fired {kind} {transition:?}, consumed {:?}, produced {:?}",
        details.consumed,
        details.produced
    );
    Ok(details)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::net::{ArcKind, Net, Place, PlaceId, Transition, TransitionId, TransitionKind};

    /// `src --[w_in]--> t --[w_out]--> dst`
    pub fn chain(
        kind: TransitionKind,
        src_tokens: f64,
        w_in: f64,
        w_out: f64,
    ) -> (Net, PlaceId, PlaceId, TransitionId) {
        let mut net = Net::empty();
        let src = net.add_place(Place::new("src", src_tokens));
        let dst = net.add_place(Place::new("dst", 0.0));
        let t = net.add_transition(Transition::new("t", kind));
        net.add_input_arc(src, t, w_in, ArcKind::Normal).unwrap();
        net.add_output_arc(t, dst, w_out).unwrap();
        (net, src, dst, t)
    }
}
