//! 网模型：库所/变迁/弧的区域存储、二部图校验与局部性索引。
//!
//! 局部性索引（每个变迁的 •T 与 T•）在首次访问时构建，任何结构性修改
//! （增删弧、增加节点）都会使其失效。令牌数与变迁属性的修改不属于结构修改。
use std::collections::HashMap;

use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::expr::{ExprError, Scope};
use crate::net::ids::{ArcId, PlaceId, TransitionId};
use crate::net::index_vec::{Idx, IndexVec};
use crate::net::structure::{
    Arc, ArcKind, Guard, Marking, Node, Place, Rate, Tokens, Transition, TransitionKind,
    UnknownKind, Weight,
};

/// Structural errors. These abort the mutation that raised them.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("arc {from:?} -> {to:?} must connect a place and a transition")]
    ArcEndpoints { from: Node, to: Node },
    #[error(transparent)]
    UnknownTransitionKind(#[from] UnknownKind),
    #[error("place {0:?} does not exist")]
    UnknownPlace(PlaceId),
    #[error("transition {0:?} does not exist")]
    UnknownTransition(TransitionId),
    #[error("arc {0:?} does not exist")]
    UnknownArc(ArcId),
    #[error("arc weight must be positive and finite, got {0}")]
    NonPositiveWeight(Weight),
    #[error("place {place:?} is named {name:?}, which expressions read as the logical time")]
    ReservedPlaceName { place: PlaceId, name: String },
    #[error("invalid expression on transition {transition:?}: {error}")]
    InvalidExpression {
        transition: TransitionId,
        error: ExprError,
    },
}

/// Identifier that expressions resolve to the logical time.
pub const TIME_VARIABLE: &str = "t";

/// Input and output arcs of one transition.
#[derive(Debug, Clone, Default)]
pub struct Locality {
    pub inputs: SmallVec<[ArcId; 4]>,
    pub outputs: SmallVec<[ArcId; 4]>,
}

#[derive(Debug, Clone, Default)]
struct LocalityIndex {
    by_transition: HashMap<TransitionId, Locality>,
    place_names: HashMap<String, PlaceId>,
}

/// Petri 网连通性诊断报告
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    pub isolated_places: Vec<(PlaceId, String)>,
    pub isolated_transitions: Vec<(TransitionId, String)>,
    pub warnings: Vec<String>,
}

impl DiagnosticReport {
    pub fn has_issues(&self) -> bool {
        !self.isolated_places.is_empty()
            || !self.isolated_transitions.is_empty()
            || !self.warnings.is_empty()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Net {
    places: IndexVec<PlaceId, Place>,
    transitions: IndexVec<TransitionId, Transition>,
    arcs: IndexVec<ArcId, Option<Arc>>,
    #[serde(skip)]
    locality: OnceCell<LocalityIndex>,
}

impl std::fmt::Debug for Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Net")
            .field("places", &self.places)
            .field("transitions", &self.transitions)
            .field("arcs", &self.arcs)
            .finish()
    }
}

impl Net {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_place(&mut self, place: Place) -> PlaceId {
        self.invalidate_locality();
        self.places.push(place)
    }

    pub fn add_transition(&mut self, transition: Transition) -> TransitionId {
        self.invalidate_locality();
        self.transitions.push(transition)
    }

    /// Adds an arc after checking the bipartite invariant and the weight.
    pub fn add_arc(&mut self, arc: Arc) -> Result<ArcId, NetError> {
        self.check_arc(&arc)?;
        self.invalidate_locality();
        Ok(self.arcs.push(Some(arc)))
    }

    /// 输入弧: place -> transition
    pub fn add_input_arc(
        &mut self,
        place: PlaceId,
        transition: TransitionId,
        weight: Weight,
        kind: ArcKind,
    ) -> Result<ArcId, NetError> {
        self.add_arc(Arc::new(
            Node::Place(place),
            Node::Transition(transition),
            weight,
            kind,
        ))
    }

    /// 输出弧: transition -> place
    pub fn add_output_arc(
        &mut self,
        transition: TransitionId,
        place: PlaceId,
        weight: Weight,
    ) -> Result<ArcId, NetError> {
        self.add_arc(Arc::new(
            Node::Transition(transition),
            Node::Place(place),
            weight,
            ArcKind::Normal,
        ))
    }

    pub fn remove_arc(&mut self, arc: ArcId) -> Result<Arc, NetError> {
        let removed = self
            .arcs
            .get_mut(arc)
            .and_then(Option::take)
            .ok_or(NetError::UnknownArc(arc))?;
        self.invalidate_locality();
        Ok(removed)
    }

    pub fn set_arc_weight(&mut self, arc: ArcId, weight: Weight) -> Result<(), NetError> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(NetError::NonPositiveWeight(weight));
        }
        let slot = self
            .arcs
            .get_mut(arc)
            .and_then(Option::as_mut)
            .ok_or(NetError::UnknownArc(arc))?;
        slot.weight = weight;
        Ok(())
    }

    pub fn set_transition_kind(
        &mut self,
        transition: TransitionId,
        kind: TransitionKind,
    ) -> Result<(), NetError> {
        self.transitions
            .get_mut(transition)
            .ok_or(NetError::UnknownTransition(transition))?
            .kind = kind;
        Ok(())
    }

    /// String form used by editors; rejects unrecognised kinds.
    pub fn set_transition_kind_str(
        &mut self,
        transition: TransitionId,
        kind: &str,
    ) -> Result<(), NetError> {
        let kind = kind.parse::<TransitionKind>()?;
        self.set_transition_kind(transition, kind)
    }

    pub fn place(&self, place: PlaceId) -> Option<&Place> {
        self.places.get(place)
    }

    pub fn place_mut(&mut self, place: PlaceId) -> Option<&mut Place> {
        self.places.get_mut(place)
    }

    pub fn transition(&self, transition: TransitionId) -> Option<&Transition> {
        self.transitions.get(transition)
    }

    pub fn transition_mut(&mut self, transition: TransitionId) -> Option<&mut Transition> {
        self.transitions.get_mut(transition)
    }

    pub fn arc(&self, arc: ArcId) -> Option<&Arc> {
        self.arcs.get(arc).and_then(Option::as_ref)
    }

    pub fn places(&self) -> impl Iterator<Item = (PlaceId, &Place)> {
        self.places.iter_enumerated()
    }

    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &Transition)> {
        self.transitions.iter_enumerated()
    }

    pub fn transition_ids(&self) -> impl Iterator<Item = TransitionId> + use<> {
        self.transitions.indices()
    }

    pub fn arcs(&self) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.arcs
            .iter_enumerated()
            .filter_map(|(id, arc)| arc.as_ref().map(|arc| (id, arc)))
    }

    pub fn places_len(&self) -> usize {
        self.places.len()
    }

    pub fn transitions_len(&self) -> usize {
        self.transitions.len()
    }

    pub fn tokens(&self, place: PlaceId) -> Tokens {
        self.places.get(place).map_or(0.0, |p| p.tokens)
    }

    pub fn set_tokens(&mut self, place: PlaceId, tokens: Tokens) -> Result<(), NetError> {
        self.places
            .get_mut(place)
            .ok_or(NetError::UnknownPlace(place))?
            .tokens = tokens.max(0.0);
        Ok(())
    }

    pub(crate) fn add_tokens(&mut self, place: PlaceId, delta: Tokens) {
        if let Some(p) = self.places.get_mut(place) {
            // 浮点抵消可能留下 -1e-17 之类的残差
            p.tokens = (p.tokens + delta).max(0.0);
        }
    }

    pub fn place_by_name(&self, name: &str) -> Option<PlaceId> {
        self.index().place_names.get(name).copied()
    }

    pub fn marking(&self) -> Marking {
        Marking(self.places.iter().map(|p| p.tokens).collect())
    }

    /// Records the current tokens as the initial marking of every place that
    /// does not already carry one.
    pub fn capture_initial_marking(&mut self) {
        for place in self.places.iter_mut() {
            if place.initial_marking.is_none() {
                place.initial_marking = Some(place.tokens);
            }
        }
    }

    pub fn restore_initial_marking(&mut self) {
        for place in self.places.iter_mut() {
            if let Some(initial) = place.initial_marking {
                place.tokens = initial;
            }
        }
    }

    /// Locality of `transition`: its input arcs (•T) and output arcs (T•).
    pub fn locality(&self, transition: TransitionId) -> Locality {
        self.index()
            .by_transition
            .get(&transition)
            .cloned()
            .unwrap_or_default()
    }

    pub fn input_arcs(&self, transition: TransitionId) -> impl Iterator<Item = &Arc> {
        self.index()
            .by_transition
            .get(&transition)
            .into_iter()
            .flat_map(|l| l.inputs.iter())
            .filter_map(|id| self.arc(*id))
    }

    pub fn output_arcs(&self, transition: TransitionId) -> impl Iterator<Item = &Arc> {
        self.index()
            .by_transition
            .get(&transition)
            .into_iter()
            .flat_map(|l| l.outputs.iter())
            .filter_map(|id| self.arc(*id))
    }

    /// Evaluation scope exposing place tokens by name and `t` as `time`.
    pub fn scope(&self, time: f64) -> NetScope<'_> {
        NetScope { net: self, time }
    }

    /// Full structural check: every arc bipartite with live endpoints, every
    /// expression referring only to known places.
    pub fn validate(&self) -> Result<(), NetError> {
        for (_, arc) in self.arcs() {
            self.check_arc(arc)?;
        }
        if let Some((place, p)) = self.places().find(|(_, p)| p.name == TIME_VARIABLE) {
            return Err(NetError::ReservedPlaceName {
                place,
                name: p.name.clone(),
            });
        }
        let names = &self.index().place_names;
        for (tid, transition) in self.transitions() {
            let mut idents = Vec::new();
            if let Rate::Expr(expr) = &transition.rate {
                idents.extend(expr.identifiers());
            }
            if let Guard::Expr(expr) = &transition.guard {
                idents.extend(expr.identifiers());
            }
            if let Some(unknown) = idents
                .into_iter()
                .find(|name| *name != TIME_VARIABLE && !names.contains_key(*name))
            {
                return Err(NetError::InvalidExpression {
                    transition: tid,
                    error: ExprError::UnknownIdentifier(unknown.to_string()),
                });
            }
        }
        Ok(())
    }

    pub fn diagnose_connectivity(&self) -> DiagnosticReport {
        let mut report = DiagnosticReport::default();
        let mut touched_places = vec![false; self.places_len()];
        let mut fed_places = vec![false; self.places_len()];
        for (_, arc) in self.arcs() {
            if let Some(place) = arc.place() {
                touched_places[place.index()] = true;
                if !arc.is_input() {
                    fed_places[place.index()] = true;
                }
            }
        }
        for (pid, place) in self.places() {
            if !touched_places[pid.index()] {
                report.isolated_places.push((pid, place.name.clone()));
            } else if !fed_places[pid.index()] && place.tokens == 0.0 {
                report.warnings.push(format!(
                    "place '{}' ({}) has no producer and starts empty",
                    place.name, pid
                ));
            }
        }
        for (tid, transition) in self.transitions() {
            let locality = self.locality(tid);
            if locality.inputs.is_empty() && locality.outputs.is_empty() {
                report.isolated_transitions.push((tid, transition.name.clone()));
            } else if locality.inputs.is_empty() && transition.kind == TransitionKind::Immediate {
                report.warnings.push(format!(
                    "immediate transition '{}' ({}) has no inputs and will self-trigger",
                    transition.name, tid
                ));
            }
        }
        report
    }

    pub fn log_diagnostics(&self) {
        let report = self.diagnose_connectivity();
        if !report.has_issues() {
            log::debug!("net connectivity check passed");
            return;
        }
        for (id, name) in &report.isolated_places {
            log::warn!("isolated place [{}] {}", id, name);
        }
        for (id, name) in &report.isolated_transitions {
            log::warn!("isolated transition [{}] {}", id, name);
        }
        for warning in &report.warnings {
            log::warn!("{}", warning);
        }
    }

    fn check_arc(&self, arc: &Arc) -> Result<(), NetError> {
        let (place, transition) = match (arc.source, arc.target) {
            (Node::Place(p), Node::Transition(t)) | (Node::Transition(t), Node::Place(p)) => (p, t),
            (from, to) => return Err(NetError::ArcEndpoints { from, to }),
        };
        if !self.places.contains(place) {
            return Err(NetError::UnknownPlace(place));
        }
        if !self.transitions.contains(transition) {
            return Err(NetError::UnknownTransition(transition));
        }
        if !(arc.weight.is_finite() && arc.weight > 0.0) {
            return Err(NetError::NonPositiveWeight(arc.weight));
        }
        if arc.kind != ArcKind::Normal && !arc.is_input() {
            // 抑制弧/测试弧只能作为输入弧
            return Err(NetError::ArcEndpoints {
                from: arc.source,
                to: arc.target,
            });
        }
        Ok(())
    }

    /// Drops the locality and name index. Needed only after renaming places
    /// through [`Net::place_mut`]; every other structural mutation calls it.
    pub fn invalidate_locality(&mut self) {
        self.locality = OnceCell::new();
    }

    fn index(&self) -> &LocalityIndex {
        self.locality.get_or_init(|| {
            let mut index = LocalityIndex::default();
            for (pid, place) in self.places.iter_enumerated() {
                index.place_names.insert(place.name.clone(), pid);
            }
            for (aid, arc) in self.arcs() {
                let Some(tid) = arc.transition() else {
                    continue;
                };
                let entry = index.by_transition.entry(tid).or_default();
                if arc.is_input() {
                    entry.inputs.push(aid);
                } else {
                    entry.outputs.push(aid);
                }
            }
            index
        })
    }
}

/// Resolves identifiers against a net: place names to tokens, `t` to time.
pub struct NetScope<'a> {
    net: &'a Net,
    time: f64,
}

impl Scope for NetScope<'_> {
    fn lookup(&self, name: &str) -> Option<f64> {
        if name == TIME_VARIABLE {
            return Some(self.time);
        }
        self.net.place_by_name(name).map(|p| self.net.tokens(p))
    }
}
