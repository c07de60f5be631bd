//! Picks one transition out of a set of simultaneously ready candidates.
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::{Net, TransitionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Random,
    /// Highest `priority` wins; ties broken at random.
    Priority,
    /// Fixed kind order immediate > timed > stochastic > continuous; ties at random.
    TypeBased,
    /// Cycles through the candidate list with a persistent index.
    RoundRobin,
}

impl ConflictPolicy {
    pub const ALL: [ConflictPolicy; 4] = [
        ConflictPolicy::Random,
        ConflictPolicy::Priority,
        ConflictPolicy::TypeBased,
        ConflictPolicy::RoundRobin,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConflictPolicy::Random => "random",
            ConflictPolicy::Priority => "priority",
            ConflictPolicy::TypeBased => "type_based",
            ConflictPolicy::RoundRobin => "round_robin",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown conflict policy {0:?} (expected random, priority, type_based or round_robin)")]
pub struct UnknownPolicy(String);

impl FromStr for ConflictPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ConflictPolicy::ALL
            .into_iter()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| UnknownPolicy(s.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    round_robin_index: usize,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            round_robin_index: 0,
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Switching policy restarts the round-robin cycle.
    pub fn set_policy(&mut self, policy: ConflictPolicy) {
        self.policy = policy;
        self.round_robin_index = 0;
    }

    /// Returns `None` only for an empty candidate list. A single candidate is
    /// returned without consulting the policy.
    pub fn resolve<R: Rng + ?Sized>(
        &mut self,
        candidates: &[TransitionId],
        net: &Net,
        rng: &mut R,
    ) -> Option<TransitionId> {
        match candidates {
            [] => return None,
            [only] => return Some(*only),
            _ => {}
        }
        let chosen = match self.policy {
            ConflictPolicy::Random => candidates.choose(rng).copied(),
            ConflictPolicy::Priority => {
                let best = candidates
                    .iter()
                    .copied()
                    .max_set_by_key(|t| net.transition(*t).map_or(i32::MIN, |t| t.priority));
                best.choose(rng).copied()
            }
            ConflictPolicy::TypeBased => {
                let best = candidates
                    .iter()
                    .copied()
                    .max_set_by_key(|t| net.transition(*t).map_or(0, |t| t.kind.precedence()));
                best.choose(rng).copied()
            }
            ConflictPolicy::RoundRobin => {
                let pick = candidates[self.round_robin_index % candidates.len()];
                self.round_robin_index = self.round_robin_index.wrapping_add(1);
                Some(pick)
            }
        };
        log::trace!(
            "{} picked {:?} from {} candidates",
            self.policy,
            chosen,
            candidates.len()
        );
        chosen
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::net::{Transition, TransitionKind};

    fn net_with(specs: &[(TransitionKind, i32)]) -> (Net, Vec<TransitionId>) {
        let mut net = Net::empty();
        let ids = specs
            .iter()
            .enumerate()
            .map(|(i, (kind, priority))| {
                net.add_transition(Transition::new(format!("t{i}"), *kind).with_priority(*priority))
            })
            .collect();
        (net, ids)
    }

    #[test]
    fn policy_names_round_trip_through_from_str() {
        for policy in ConflictPolicy::ALL {
            assert_eq!(policy.name().parse::<ConflictPolicy>().unwrap(), policy);
        }
        assert_eq!(
            "Round-Robin".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::RoundRobin
        );
        assert!("fifo".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn priority_picks_the_highest() {
        let (net, ids) = net_with(&[
            (TransitionKind::Timed, 1),
            (TransitionKind::Timed, 5),
            (TransitionKind::Timed, 3),
        ]);
        let mut resolver = ConflictResolver::new(ConflictPolicy::Priority);
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            assert_eq!(resolver.resolve(&ids, &net, &mut rng), Some(ids[1]));
        }
    }

    #[test]
    fn priority_ties_are_broken_among_the_maxima() {
        let (net, ids) = net_with(&[
            (TransitionKind::Timed, 2),
            (TransitionKind::Timed, 2),
            (TransitionKind::Timed, 0),
        ]);
        let mut resolver = ConflictResolver::new(ConflictPolicy::Priority);
        let mut rng = StdRng::seed_from_u64(11);
        let seen: HashSet<_> = (0..200)
            .filter_map(|_| resolver.resolve(&ids, &net, &mut rng))
            .collect();
        assert!(seen.contains(&ids[0]));
        assert!(seen.contains(&ids[1]));
        assert!(!seen.contains(&ids[2]));
    }

    #[test]
    fn type_based_prefers_timed_over_stochastic() {
        let (net, ids) = net_with(&[(TransitionKind::Stochastic, 9), (TransitionKind::Timed, 0)]);
        let mut resolver = ConflictResolver::new(ConflictPolicy::TypeBased);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(resolver.resolve(&ids, &net, &mut rng), Some(ids[1]));
    }

    #[test]
    fn round_robin_cycles_and_resets_on_policy_change() {
        let (net, ids) = net_with(&[(TransitionKind::Timed, 0); 3]);
        let mut resolver = ConflictResolver::new(ConflictPolicy::RoundRobin);
        let mut rng = StdRng::seed_from_u64(0);
        let picks: Vec<_> = (0..4)
            .filter_map(|_| resolver.resolve(&ids, &net, &mut rng))
            .collect();
        assert_eq!(picks, vec![ids[0], ids[1], ids[2], ids[0]]);

        resolver.set_policy(ConflictPolicy::RoundRobin);
        assert_eq!(resolver.resolve(&ids, &net, &mut rng), Some(ids[0]));
    }

    #[test]
    fn random_stays_within_candidates() {
        let (net, ids) = net_with(&[(TransitionKind::Timed, 0); 4]);
        let mut resolver = ConflictResolver::default();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let pick = resolver.resolve(&ids[1..3], &net, &mut rng).unwrap();
            assert!(pick == ids[1] || pick == ids[2]);
        }
        assert_eq!(resolver.resolve(&[], &net, &mut rng), None);
    }
}
