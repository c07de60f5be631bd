use crate::net::{TransitionId, TransitionKind};
use crate::sim::behavior::{Eligibility, FireContext, TransitionBehavior, check_enabled};

/// Zero-delay firing; priority over every timed kind within a step.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmediateBehavior {
    transition: TransitionId,
}

impl ImmediateBehavior {
    pub fn new(transition: TransitionId) -> Self {
        Self { transition }
    }
}

impl TransitionBehavior for ImmediateBehavior {
    fn transition(&self) -> TransitionId {
        self.transition
    }

    fn kind(&self) -> TransitionKind {
        TransitionKind::Immediate
    }

    fn can_fire(&self, ctx: &FireContext<'_>) -> Eligibility {
        match check_enabled(ctx, self.transition) {
            Ok(()) => Eligibility::Ready,
            Err(reason) => Eligibility::Blocked(reason),
        }
    }
}
