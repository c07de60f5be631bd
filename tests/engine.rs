use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use hypn::config::SimConfig;
use hypn::net::{ArcKind, Net, Place, PlaceId, Rate, Transition, TransitionId, TransitionKind};
use hypn::sim::{ConflictPolicy, IntervalDriver, RunDriver, SimulationController, TraceCollector};

fn config() -> SimConfig {
    SimConfig::default().with_seed(2024)
}

fn chain(src_tokens: f64, transition: Transition) -> (Net, PlaceId, PlaceId, TransitionId) {
    let mut net = Net::empty();
    let p1 = net.add_place(Place::new("P1", src_tokens));
    let p2 = net.add_place(Place::new("P2", 0.0));
    let t1 = net.add_transition(transition);
    net.add_input_arc(p1, t1, 1.0, ArcKind::Normal).unwrap();
    net.add_output_arc(t1, p2, 1.0).unwrap();
    (net, p1, p2, t1)
}

#[test]
fn immediate_fires_in_zero_time() {
    let (net, p1, p2, _) = chain(1.0, Transition::new("T1", TransitionKind::Immediate));
    let mut sim = SimulationController::new(net, config()).unwrap();
    assert!(sim.step(0.1));
    assert_eq!(sim.net().tokens(p1), 0.0);
    assert_eq!(sim.net().tokens(p2), 1.0);
    assert_eq!(sim.last_report().time, 0.0);
    assert_eq!(sim.last_report().immediate_fired.len(), 1);
}

#[test]
fn immediate_phase_exhausts_within_one_step() {
    let (net, p1, p2, t1) = chain(2.0, Transition::new("T1", TransitionKind::Immediate));
    let mut sim = SimulationController::new(net, config()).unwrap();
    assert!(sim.step(0.1));
    assert_eq!(sim.net().tokens(p1), 0.0);
    assert_eq!(sim.net().tokens(p2), 2.0);
    assert_eq!(sim.last_report().immediate_fired, vec![t1, t1]);
    assert!(!sim.step(0.1));
}

#[test]
fn timed_transition_waits_then_fires_once() {
    let (net, _, p2, t1) = chain(
        1.0,
        Transition::new("T1", TransitionKind::Timed).with_rate(Rate::Constant(5.0)),
    );
    let mut sim = SimulationController::new(net, config()).unwrap();
    let trace = TraceCollector::shared();
    sim.set_data_collector(Box::new(Rc::clone(&trace)));

    assert!(sim.step(1.0));
    assert!(sim.last_report().waiting);
    assert!(sim.eligibility(t1).unwrap().reason().contains("too-early"));
    for _ in 0..4 {
        assert!(sim.step(1.0));
        assert_eq!(sim.net().tokens(p2), 0.0);
    }
    // t = 5
    assert!(sim.step(1.0));
    assert_eq!(sim.net().tokens(p2), 1.0);
    assert!(!sim.step(1.0));
    assert_eq!(trace.borrow().firings_of(t1).count(), 1);
    assert_eq!(trace.borrow().records()[0].time, 5.0);
}

#[test]
fn empty_input_is_deadlock_not_waiting() {
    let (net, _, _, _) = chain(
        0.0,
        Transition::new("T1", TransitionKind::Timed).with_rate(Rate::Constant(5.0)),
    );
    let mut sim = SimulationController::new(net, config()).unwrap();
    assert!(!sim.step(1.0));
    assert!(!sim.last_report().waiting);
}

#[test]
fn priority_policy_picks_higher_priority_timed() {
    for seed in 0..20 {
        let mut net = Net::empty();
        let p1 = net.add_place(Place::new("P1", 1.0));
        let out1 = net.add_place(Place::new("out1", 0.0));
        let out2 = net.add_place(Place::new("out2", 0.0));
        let t1 = net.add_transition(
            Transition::new("T1", TransitionKind::Timed)
                .with_rate(Rate::Constant(1.0))
                .with_priority(1),
        );
        let t2 = net.add_transition(
            Transition::new("T2", TransitionKind::Timed)
                .with_rate(Rate::Constant(1.0))
                .with_priority(5),
        );
        net.add_input_arc(p1, t1, 1.0, ArcKind::Normal).unwrap();
        net.add_input_arc(p1, t2, 1.0, ArcKind::Normal).unwrap();
        net.add_output_arc(t1, out1, 1.0).unwrap();
        net.add_output_arc(t2, out2, 1.0).unwrap();

        let config = SimConfig::default()
            .with_seed(seed)
            .with_policy(ConflictPolicy::Priority);
        let mut sim = SimulationController::new(net, config).unwrap();
        for _ in 0..4 {
            sim.step(0.5);
        }
        assert_eq!(sim.net().tokens(out2), 1.0);
        assert_eq!(sim.net().tokens(out1), 0.0);
    }
}

#[test]
fn continuous_flow_integrates_rate_over_time() {
    let (net, p1, p2, t1) = chain(
        10.0,
        Transition::new("T1", TransitionKind::Continuous).with_rate(Rate::Constant(2.0)),
    );
    let mut sim = SimulationController::new(net, config()).unwrap();
    for _ in 0..10 {
        assert!(sim.step(0.1));
        assert_eq!(sim.last_report().continuous_flowed, vec![t1]);
    }
    assert!((sim.net().tokens(p2) - 2.0).abs() < 1e-9);
    assert!((sim.net().tokens(p1) - 8.0).abs() < 1e-9);
    assert!((sim.now() - 1.0).abs() < 1e-9);
}

#[test]
fn continuous_preselection_ignores_discrete_phase() {
    // T_c and T_d share P1; the flow still runs on the pre-discrete snapshot
    // and is clamped by whatever the discrete firing left behind.
    let mut net = Net::empty();
    let p1 = net.add_place(Place::new("P1", 1.0));
    let sink = net.add_place(Place::new("sink", 0.0));
    let out = net.add_place(Place::new("out", 0.0));
    let tc = net.add_transition(
        Transition::new("Tc", TransitionKind::Continuous).with_rate(Rate::Constant(1.0)),
    );
    let td = net.add_transition(
        Transition::new("Td", TransitionKind::Timed).with_rate(Rate::Constant(0.0)),
    );
    net.add_input_arc(p1, tc, 1.0, ArcKind::Normal).unwrap();
    net.add_output_arc(tc, sink, 1.0).unwrap();
    net.add_input_arc(p1, td, 1.0, ArcKind::Normal).unwrap();
    net.add_output_arc(td, out, 1.0).unwrap();

    let mut sim = SimulationController::new(net, config()).unwrap();
    sim.step(0.5);
    let report = sim.last_report().clone();
    assert_eq!(report.discrete_fired, Some(td));
    assert!(report.continuous_flowed.is_empty());
    assert_eq!(sim.net().tokens(out), 1.0);
    assert_eq!(sim.net().tokens(sink), 0.0);
    assert!(sim.net().tokens(p1) >= 0.0);
}

#[test]
fn stop_then_run_restarts_the_delay() {
    let (net, _, p2, t1) = chain(
        1.0,
        Transition::new("T1", TransitionKind::Timed).with_rate(Rate::Constant(10.0)),
    );
    let mut sim = SimulationController::new(net, config()).unwrap();
    assert!(sim.run(1.0, None));
    for _ in 0..8 {
        assert!(sim.tick());
    }
    sim.stop();
    assert!(!sim.tick());
    assert!(sim.transition_state(t1).is_none());

    assert!(sim.run(1.0, None));
    // episode restarts at t = 8, so nothing fires before t = 18
    for _ in 0..10 {
        assert!(sim.tick());
        assert_eq!(sim.net().tokens(p2), 0.0);
    }
    assert!(sim.tick());
    assert_eq!(sim.net().tokens(p2), 1.0);
    assert_eq!(sim.last_report().time, 18.0);
}

#[test]
fn interval_driver_runs_until_deadlock() {
    let (net, _, p2, _) = chain(
        3.0,
        Transition::new("T1", TransitionKind::Timed).with_rate(Rate::Constant(1.0)),
    );
    let mut sim = SimulationController::new(net, config()).unwrap();
    assert!(sim.run(0.5, Some(100)));
    let ticks = IntervalDriver::new(Duration::ZERO).drive(&mut sim);
    assert!(!sim.is_running());
    assert_eq!(sim.net().tokens(p2), 3.0);
    assert!(ticks < 100);
}

#[test]
fn kind_change_is_picked_up_between_steps() {
    let (net, _, p2, t1) = chain(
        2.0,
        Transition::new("T1", TransitionKind::Timed).with_rate(Rate::Constant(100.0)),
    );
    let mut sim = SimulationController::new(net, config()).unwrap();
    assert!(sim.step(1.0));
    assert_eq!(sim.net().tokens(p2), 0.0);

    sim.net_mut()
        .set_transition_kind_str(t1, "immediate")
        .unwrap();
    assert!(sim.step(1.0));
    assert_eq!(sim.net().tokens(p2), 2.0);
}

#[test]
fn structural_edit_with_explicit_invalidation() {
    let (net, p1, p2, t1) = chain(1.0, Transition::new("T1", TransitionKind::Immediate));
    let mut sim = SimulationController::new(net, config()).unwrap();
    let gate = sim.net_mut().add_place(Place::new("gate", 0.0));
    sim.net_mut()
        .add_input_arc(gate, t1, 1.0, ArcKind::Test)
        .unwrap();
    sim.invalidate_behavior_cache(None);
    assert!(!sim.step(0.1));
    assert_eq!(sim.net().tokens(p1), 1.0);

    sim.net_mut().set_tokens(gate, 1.0).unwrap();
    assert!(sim.step(0.1));
    assert_eq!(sim.net().tokens(p2), 1.0);
    assert_eq!(sim.net().tokens(gate), 1.0);
}

#[test]
fn immediate_feedback_loop_is_capped() {
    let mut net = Net::empty();
    let a = net.add_place(Place::new("A", 1.0));
    let b = net.add_place(Place::new("B", 0.0));
    let ab = net.add_transition(Transition::new("ab", TransitionKind::Immediate));
    let ba = net.add_transition(Transition::new("ba", TransitionKind::Immediate));
    net.add_input_arc(a, ab, 1.0, ArcKind::Normal).unwrap();
    net.add_output_arc(ab, b, 1.0).unwrap();
    net.add_input_arc(b, ba, 1.0, ArcKind::Normal).unwrap();
    net.add_output_arc(ba, a, 1.0).unwrap();

    let mut config = config();
    config.max_immediate_iterations = 50;
    let mut sim = SimulationController::new(net, config).unwrap();
    assert!(sim.step(0.1));
    let report = sim.last_report();
    assert!(report.safety_limit_hit);
    assert_eq!(report.immediate_fired.len(), 50);
    assert_eq!(sim.net().tokens(a) + sim.net().tokens(b), 1.0);
}

#[test]
fn stochastic_transition_fires_eventually() {
    let (net, _, p2, t1) = chain(
        1.0,
        Transition::new("T1", TransitionKind::Stochastic).with_rate(Rate::Constant(4.0)),
    );
    let mut sim = SimulationController::new(net, config()).unwrap();
    sim.step(0.01);
    let scheduled = sim.transition_state(t1).unwrap().scheduled_time.unwrap();
    while sim.step(0.01) {}
    assert_eq!(sim.net().tokens(p2), 1.0);
    assert!(sim.now() + 1e-9 >= scheduled);
}

#[test]
fn listeners_see_every_step_and_reset() {
    let (net, p1, _, _) = chain(
        1.0,
        Transition::new("T1", TransitionKind::Timed).with_rate(Rate::Constant(0.5)),
    );
    let mut sim = SimulationController::new(net, config()).unwrap();
    let times = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&times);
    sim.add_step_listener(move |c, now| sink.borrow_mut().push((now, c.net().marking().total())));
    sim.step(0.5);
    sim.step(0.5);
    sim.reset();
    assert_eq!(sim.net().tokens(p1), 1.0);
    let times = times.borrow();
    assert_eq!(times.len(), 3);
    assert_eq!(times[2].0, 0.0);
}
