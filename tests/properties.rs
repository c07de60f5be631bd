use std::rc::Rc;

use proptest::prelude::*;

use hypn::config::SimConfig;
use hypn::net::{ArcKind, Net, Place, Rate, Transition, TransitionKind};
use hypn::sim::{ConflictPolicy, SimulationController, TraceCollector};

#[derive(Debug, Clone)]
struct ArcSpec {
    place: usize,
    transition: usize,
    weight: f64,
    kind: ArcKind,
    input: bool,
}

fn kind_strategy() -> impl Strategy<Value = TransitionKind> {
    prop_oneof![
        Just(TransitionKind::Immediate),
        Just(TransitionKind::Timed),
        Just(TransitionKind::Stochastic),
        Just(TransitionKind::Continuous),
    ]
}

fn policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![
        Just(ConflictPolicy::Random),
        Just(ConflictPolicy::Priority),
        Just(ConflictPolicy::TypeBased),
        Just(ConflictPolicy::RoundRobin),
    ]
}

fn arc_strategy(places: usize, transitions: usize) -> impl Strategy<Value = ArcSpec> {
    (
        0..places,
        0..transitions,
        1u8..4,
        prop_oneof![
            4 => Just(ArcKind::Normal),
            1 => Just(ArcKind::Inhibitor),
            1 => Just(ArcKind::Test),
        ],
        any::<bool>(),
    )
        .prop_map(|(place, transition, weight, kind, input)| ArcSpec {
            place,
            transition,
            weight: f64::from(weight),
            kind: if input { kind } else { ArcKind::Normal },
            input,
        })
}

fn build(tokens: &[u8], kinds: &[(TransitionKind, u8, i8)], arcs: &[ArcSpec]) -> Net {
    let mut net = Net::empty();
    let places: Vec<_> = tokens
        .iter()
        .enumerate()
        .map(|(i, t)| net.add_place(Place::new(format!("p{i}"), f64::from(*t))))
        .collect();
    let transitions: Vec<_> = kinds
        .iter()
        .enumerate()
        .map(|(i, (kind, rate, priority))| {
            net.add_transition(
                Transition::new(format!("t{i}"), *kind)
                    .with_rate(Rate::Constant(f64::from(*rate) / 4.0))
                    .with_priority(i32::from(*priority)),
            )
        })
        .collect();
    for arc in arcs {
        let p = places[arc.place % places.len()];
        let t = transitions[arc.transition % transitions.len()];
        let result = if arc.input {
            net.add_input_arc(p, t, arc.weight, arc.kind)
        } else {
            net.add_output_arc(t, p, arc.weight)
        };
        result.unwrap();
    }
    net
}

fn net_strategy() -> impl Strategy<Value = Net> {
    (1usize..5, 1usize..5).prop_flat_map(|(places, transitions)| {
        (
            prop::collection::vec(0u8..5, places),
            prop::collection::vec((kind_strategy(), 0u8..12, -2i8..3), transitions),
            prop::collection::vec(arc_strategy(places, transitions), 0..10),
        )
            .prop_map(|(tokens, kinds, arcs)| build(&tokens, &kinds, &arcs))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tokens_never_go_negative(
        net in net_strategy(),
        policy in policy_strategy(),
        seed in any::<u64>(),
    ) {
        let config = SimConfig::default().with_seed(seed).with_policy(policy);
        let mut sim = SimulationController::new(net, config).unwrap();
        for _ in 0..30 {
            sim.step(0.25);
            for (_, place) in sim.net().places() {
                prop_assert!(place.tokens >= 0.0, "{} went negative: {}", place.name, place.tokens);
            }
        }
    }

    #[test]
    fn at_most_one_discrete_firing_per_step(
        net in net_strategy(),
        policy in policy_strategy(),
        seed in any::<u64>(),
    ) {
        let config = SimConfig::default().with_seed(seed).with_policy(policy);
        let mut sim = SimulationController::new(net, config).unwrap();
        let trace = TraceCollector::shared();
        sim.set_data_collector(Box::new(Rc::clone(&trace)));
        for _ in 0..30 {
            let time = sim.now();
            sim.step(0.25);
            prop_assert!(trace.borrow().discrete_firings_at(time) <= 1);
            prop_assert!(sim.last_report().discrete_fired.is_some() == (trace.borrow().discrete_firings_at(time) == 1));
        }
    }

    #[test]
    fn enablement_time_is_monotone_within_an_episode(
        net in net_strategy(),
        seed in any::<u64>(),
    ) {
        let mut sim = SimulationController::new(net, SimConfig::default().with_seed(seed)).unwrap();
        let ids: Vec<_> = sim.net().transition_ids().collect();
        let mut previous: Vec<Option<f64>> = vec![None; ids.len()];
        for _ in 0..20 {
            sim.step(0.25);
            for (i, t) in ids.iter().enumerate() {
                let current = sim.transition_state(*t).and_then(|s| s.enablement_time);
                if let (Some(before), Some(now)) = (previous[i], current) {
                    // a new episode can only start later, never earlier
                    prop_assert!(now >= before);
                }
                previous[i] = current;
            }
        }
    }
}
