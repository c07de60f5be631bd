//! The stepping state machine.
//!
//! One [`SimulationController::step`] runs, in order: enablement refresh,
//! immediate exhaustion, continuous pre-selection, at most one discrete
//! firing, continuous integration, time advance and listener notification.
//! Run mode is an explicit [`RunState`] advanced by [`SimulationController::tick`];
//! the periodic caller lives in [`crate::sim::driver`].
use std::collections::HashSet;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::SimConfig;
use crate::net::{Locality, Net, NetError, TransitionId, TransitionKind};
use crate::sim::behavior::{
    Eligibility, FireContext, FireError, FiringDetails, TransitionBehavior, structurally_enabled,
};
use crate::sim::cache::BehaviorCache;
use crate::sim::collector::DataCollector;
use crate::sim::conflict::{ConflictPolicy, ConflictResolver};
use crate::sim::driver::StopHandle;
use crate::sim::state::{TransitionState, TransitionStateTracker};

/// Called after every step and once per reset with the new logical time.
/// Listeners must not re-enter the controller.
pub type StepListener = Box<dyn FnMut(&SimulationController, f64)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running {
        dt: f64,
        max_steps: Option<u64>,
        steps: u64,
    },
    /// `stop()` was called; the next tick moves back to `Idle`.
    StopRequested,
}

/// What one step did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Logical time the step ran at.
    pub time: f64,
    pub immediate_fired: Vec<TransitionId>,
    pub discrete_fired: Option<TransitionId>,
    pub continuous_flowed: Vec<TransitionId>,
    /// A timed or stochastic transition is enabled but its window is not open.
    pub waiting: bool,
    /// Something can fire at the start of the next step.
    pub pending: bool,
    /// The immediate loop was cut off at `max_immediate_iterations`.
    pub safety_limit_hit: bool,
    /// Firings or integrations that failed and were skipped.
    pub failures: usize,
}

impl StepReport {
    pub fn made_progress(&self) -> bool {
        !self.immediate_fired.is_empty()
            || self.discrete_fired.is_some()
            || !self.continuous_flowed.is_empty()
    }

    /// `false` means deadlock: nothing happened and nothing will.
    pub fn is_live(&self) -> bool {
        self.made_progress() || self.waiting || self.pending
    }
}

pub struct SimulationController {
    net: Net,
    config: SimConfig,
    cache: BehaviorCache,
    states: TransitionStateTracker,
    resolver: ConflictResolver,
    rng: StdRng,
    now: f64,
    run_state: RunState,
    stop_handle: StopHandle,
    listeners: Vec<(ListenerId, StepListener)>,
    next_listener: u64,
    collector: Option<Box<dyn DataCollector>>,
    last_report: StepReport,
    steps_taken: u64,
}

impl SimulationController {
    /// Takes ownership of `net` after a full structural check. The current
    /// tokens become the initial marking of places that have none.
    pub fn new(mut net: Net, config: SimConfig) -> Result<Self, NetError> {
        net.validate()?;
        net.capture_initial_marking();
        net.log_diagnostics();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        log::debug!(
            "controller over {} places / {} transitions, policy {}",
            net.places_len(),
            net.transitions_len(),
            config.conflict_policy
        );
        Ok(Self {
            resolver: ConflictResolver::new(config.conflict_policy),
            net,
            config,
            cache: BehaviorCache::new(),
            states: TransitionStateTracker::new(),
            rng,
            now: 0.0,
            run_state: RunState::Idle,
            stop_handle: StopHandle::new(),
            listeners: Vec::new(),
            next_listener: 0,
            collector: None,
            last_report: StepReport::default(),
            steps_taken: 0,
        })
    }

    pub fn with_defaults(net: Net) -> Result<Self, NetError> {
        Self::new(net, SimConfig::default())
    }

    pub fn net(&self) -> &Net {
        &self.net
    }

    /// Editor access between steps. Kind changes are picked up by the cache on
    /// the next access; structural changes should be followed by
    /// [`Self::invalidate_behavior_cache`].
    pub fn net_mut(&mut self) -> &mut Net {
        &mut self.net
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.resolver.policy()
    }

    pub fn set_conflict_policy(&mut self, policy: ConflictPolicy) {
        log::debug!("conflict policy {} -> {}", self.resolver.policy(), policy);
        self.resolver.set_policy(policy);
    }

    pub fn transition_state(&self, transition: TransitionId) -> Option<TransitionState> {
        self.states.get(transition).copied()
    }

    pub fn last_report(&self) -> &StepReport {
        &self.last_report
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.run_state, RunState::Running { .. })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    pub fn set_data_collector(&mut self, collector: Box<dyn DataCollector>) {
        self.collector = Some(collector);
    }

    pub fn take_data_collector(&mut self) -> Option<Box<dyn DataCollector>> {
        self.collector.take()
    }

    pub fn add_step_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&SimulationController, f64) + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_step_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Eligibility of one transition at the current time, as an editor would
    /// display it. `None` for an unknown id.
    pub fn eligibility(&mut self, transition: TransitionId) -> Option<Eligibility> {
        let behavior = self
            .cache
            .get_behavior(&self.net, transition, &mut self.states)?;
        Some(behavior.can_fire(&FireContext {
            net: &self.net,
            now: self.now,
            time_epsilon: self.config.time_epsilon,
        }))
    }

    /// `None` drops every behavior and all timing state and rebuilds the
    /// locality index.
    pub fn invalidate_behavior_cache(&mut self, transition: Option<TransitionId>) {
        match transition {
            Some(t) => {
                self.cache.invalidate(t);
                self.states.clear(t);
            }
            None => {
                self.cache.clear();
                self.states.clear_all();
                self.net.invalidate_locality();
            }
        }
        log::debug!("behavior cache invalidated ({:?})", transition);
    }

    /// Advances the simulation by one step of `dt` logical time. Returns
    /// `false` on deadlock.
    pub fn step(&mut self, dt: f64) -> bool {
        let dt = if dt.is_finite() && dt >= 0.0 {
            dt
        } else {
            log::warn!("invalid dt {}, stepping with dt = 0", dt);
            0.0
        };
        let mut report = StepReport {
            time: self.now,
            ..StepReport::default()
        };

        self.refresh_enablement();
        self.exhaust_immediate(&mut report);
        let continuous = self.preselect_continuous();
        self.fire_discrete_phase(&mut report);
        self.integrate_continuous(&continuous, dt, &mut report);

        self.now += dt;
        report.pending = self.has_pending_firing();
        let live = report.is_live();
        if !live {
            log::info!("deadlock at t={}", self.now);
        }
        log::trace!("step at t={} -> {:?}", report.time, report);
        self.last_report = report;
        self.steps_taken += 1;
        self.notify_listeners();
        live
    }

    /// Enters run mode. Returns `false` if a run is already active or `dt`
    /// is not a positive finite number.
    pub fn run(&mut self, dt: f64, max_steps: Option<u64>) -> bool {
        if self.is_running() {
            log::warn!("run() ignored: already running");
            return false;
        }
        if !(dt.is_finite() && dt > 0.0) {
            log::warn!("run() ignored: dt must be positive, got {}", dt);
            return false;
        }
        self.stop_handle.reset();
        self.run_state = RunState::Running {
            dt,
            max_steps,
            steps: 0,
        };
        log::info!("run started at t={} (dt={}, max_steps={:?})", self.now, dt, max_steps);
        true
    }

    /// One periodic callback of run mode. Returns `true` if it advanced the
    /// simulation; a driver stops calling once it returns `false`.
    pub fn tick(&mut self) -> bool {
        let RunState::Running {
            dt,
            max_steps,
            steps,
        } = self.run_state
        else {
            if self.run_state == RunState::StopRequested {
                self.run_state = RunState::Idle;
            }
            return false;
        };
        if self.stop_handle.take() {
            log::info!("run stopped on request at t={}", self.now);
            self.halt();
            return false;
        }
        if max_steps.is_some_and(|max| steps >= max) {
            self.halt();
            return false;
        }

        let live = self.step(dt);
        let steps = steps + 1;
        self.run_state = RunState::Running {
            dt,
            max_steps,
            steps,
        };
        if !live {
            log::info!("run halted by deadlock after {} steps", steps);
            self.halt();
        } else if max_steps.is_some_and(|max| steps >= max) {
            log::info!("run finished after {} steps at t={}", steps, self.now);
            self.halt();
        }
        true
    }

    /// Leaves run mode and forgets every enablement episode, so a later run
    /// measures all delays from its own start.
    pub fn stop(&mut self) {
        if self.is_running() {
            self.run_state = RunState::StopRequested;
            log::info!("stop requested at t={}", self.now);
        }
        self.states.clear_all();
        self.cache.clear_enablement();
    }

    pub fn reset(&mut self) {
        self.stop();
        self.run_state = RunState::Idle;
        self.stop_handle.reset();
        self.now = 0.0;
        self.states.clear_all();
        self.cache.clear();
        self.net.restore_initial_marking();
        self.last_report = StepReport::default();
        self.steps_taken = 0;
        log::debug!("controller reset");
        self.notify_listeners();
    }

    fn halt(&mut self) {
        self.stop();
        self.run_state = RunState::Idle;
    }

    /// Detects enablement edges. The cache lookup runs first so that a kind
    /// change drops the old episode before the edge is evaluated.
    fn refresh_enablement(&mut self) {
        let now = self.now;
        for tid in self.net.transition_ids() {
            let Some(behavior) = self.cache.get_behavior(&self.net, tid, &mut self.states) else {
                continue;
            };
            let enabled = structurally_enabled(&self.net, tid);
            match (self.states.is_enabled(tid), enabled) {
                (false, true) => {
                    behavior.set_enablement_time(now, &self.net, &mut self.rng);
                    self.states.mark_enabled(tid, now);
                    self.states.set_scheduled(tid, behavior.scheduled_time());
                }
                (true, false) => {
                    behavior.clear_enablement();
                    self.states.clear(tid);
                }
                _ => {}
            }
        }
    }

    /// Ready transitions of the kinds accepted by `filter`, plus whether any
    /// of them is waiting on its time window.
    fn scan(&mut self, filter: impl Fn(TransitionKind) -> bool) -> (Vec<TransitionId>, bool) {
        let mut ready = Vec::new();
        let mut waiting = false;
        for tid in self.net.transition_ids() {
            if !self.net.transition(tid).is_some_and(|t| filter(t.kind)) {
                continue;
            }
            let Some(behavior) = self.cache.get_behavior(&self.net, tid, &mut self.states) else {
                continue;
            };
            let ctx = FireContext {
                net: &self.net,
                now: self.now,
                time_epsilon: self.config.time_epsilon,
            };
            match behavior.can_fire(&ctx) {
                Eligibility::Ready => ready.push(tid),
                Eligibility::TooEarly { .. } => waiting = true,
                Eligibility::Blocked(_) => {}
            }
        }
        (ready, waiting)
    }

    fn exhaust_immediate(&mut self, report: &mut StepReport) {
        let cap = self.config.max_immediate_iterations;
        let mut failed = HashSet::new();
        let mut iterations = 0;
        loop {
            let (mut ready, _) = self.scan(|k| k == TransitionKind::Immediate);
            ready.retain(|t| !failed.contains(t));
            if ready.is_empty() {
                break;
            }
            if iterations >= cap {
                log::warn!(
                    "immediate loop hit the {} iteration cap at t={}; {} transitions still enabled",
                    cap,
                    self.now,
                    ready.len()
                );
                report.safety_limit_hit = true;
                break;
            }
            iterations += 1;
            let Some(chosen) = self.resolver.resolve(&ready, &self.net, &mut self.rng) else {
                break;
            };
            match self.fire_transition(chosen) {
                Ok(_) => report.immediate_fired.push(chosen),
                Err(err) => {
                    log::warn!("immediate firing skipped: {}", err);
                    report.failures += 1;
                    failed.insert(chosen);
                }
            }
            self.refresh_enablement();
        }
    }

    fn preselect_continuous(&mut self) -> Vec<(TransitionId, Locality)> {
        let (ready, _) = self.scan(|k| k == TransitionKind::Continuous);
        ready
            .into_iter()
            .map(|tid| (tid, self.net.locality(tid)))
            .collect()
    }

    fn fire_discrete_phase(&mut self, report: &mut StepReport) {
        let (ready, waiting) = self.scan(TransitionKind::is_discrete);
        report.waiting = waiting;
        let Some(chosen) = self.resolver.resolve(&ready, &self.net, &mut self.rng) else {
            return;
        };
        match self.fire_transition(chosen) {
            Ok(_) => report.discrete_fired = Some(chosen),
            Err(err) => {
                log::warn!("discrete firing skipped: {}", err);
                report.failures += 1;
            }
        }
    }

    fn integrate_continuous(
        &mut self,
        selected: &[(TransitionId, Locality)],
        dt: f64,
        report: &mut StepReport,
    ) {
        let now = self.now;
        for (tid, locality) in selected {
            let Some(behavior) = self.cache.get_behavior(&self.net, *tid, &mut self.states) else {
                continue;
            };
            match behavior.integrate_step(&mut self.net, locality, now, dt) {
                Ok(details) if details.success => {
                    report.continuous_flowed.push(*tid);
                    self.record(*tid, &details);
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("integration skipped: {}", err);
                    report.failures += 1;
                }
            }
        }
    }

    fn fire_transition(&mut self, transition: TransitionId) -> Result<FiringDetails, FireError> {
        let locality = self.net.locality(transition);
        let behavior = self
            .cache
            .get_behavior(&self.net, transition, &mut self.states)
            .ok_or(FireError::UnknownTransition(transition))?;
        let details = behavior.fire(&mut self.net, &locality, self.now)?;
        self.states.clear(transition);
        self.record(transition, &details);
        Ok(details)
    }

    fn record(&mut self, transition: TransitionId, details: &FiringDetails) {
        if let (Some(collector), Some(t)) = (self.collector.as_mut(), self.net.transition(transition)) {
            collector.on_transition_fired(t, self.now, details);
        }
    }

    /// Whether any non-continuous transition is ready or waiting after the
    /// step, without mutating timing state.
    fn has_pending_firing(&mut self) -> bool {
        let (ready, waiting) = self.scan(|k| k != TransitionKind::Continuous);
        !ready.is_empty() || waiting
    }

    fn notify_listeners(&mut self) {
        let mut listeners = std::mem::take(&mut self.listeners);
        let now = self.now;
        for (_, listener) in listeners.iter_mut() {
            listener(&*self, now);
        }
        self.listeners = listeners;
    }
}

impl std::fmt::Debug for SimulationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationController")
            .field("now", &self.now)
            .field("run_state", &self.run_state)
            .field("policy", &self.resolver.policy())
            .field("cached_behaviors", &self.cache.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
