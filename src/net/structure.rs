//! 混合 Petri 网静态结构元素：库所、变迁、弧与标识。
//!
//! 变迁类型（`kind`）可在运行期被外部编辑器修改；引擎在每次访问行为缓存时
//! 检查类型是否变化，见 [`crate::sim::cache`]。
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::expr::{ExprError, Expression, Scope};
use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::IndexVec;

/// Token counts are real-valued so that continuous flow can move fractions.
pub type Tokens = f64;
pub type Weight = f64;

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
pub struct Place {
    pub name: String,
    pub tokens: Tokens,
    /// Marking restored by `reset()`; `None` means "whatever the place held
    /// when the net was built".
    #[serde(default)]
    pub initial_marking: Option<Tokens>,
}

impl Place {
    pub fn new(name: impl Into<String>, tokens: Tokens) -> Self {
        Self {
            name: name.into(),
            tokens,
            initial_marking: Some(tokens),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransitionKind {
    Immediate,
    Timed,
    Stochastic,
    Continuous,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 4] = [
        TransitionKind::Immediate,
        TransitionKind::Timed,
        TransitionKind::Stochastic,
        TransitionKind::Continuous,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            TransitionKind::Immediate => "immediate",
            TransitionKind::Timed => "timed",
            TransitionKind::Stochastic => "stochastic",
            TransitionKind::Continuous => "continuous",
        }
    }

    pub fn is_discrete(self) -> bool {
        matches!(self, TransitionKind::Timed | TransitionKind::Stochastic)
    }

    /// Fixed order used by type-based conflict resolution (higher wins).
    pub fn precedence(self) -> u8 {
        match self {
            TransitionKind::Immediate => 4,
            TransitionKind::Timed => 3,
            TransitionKind::Stochastic => 2,
            TransitionKind::Continuous => 1,
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised transition kind {0:?}")]
pub struct UnknownKind(pub String);

impl FromStr for TransitionKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransitionKind::ALL
            .into_iter()
            .find(|kind| kind.type_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

impl TryFrom<String> for TransitionKind {
    type Error = UnknownKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransitionKind> for String {
    fn from(kind: TransitionKind) -> Self {
        kind.type_name().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiringPolicy {
    #[default]
    Earliest,
    Latest,
}

/// Kind-dependent rate: delay for timed, λ for stochastic, flow for continuous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rate {
    Constant(f64),
    Expr(Expression),
}

impl Rate {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        match source.trim().parse::<f64>() {
            Ok(value) => Ok(Rate::Constant(value)),
            Err(_) => Expression::parse(source).map(Rate::Expr),
        }
    }

    pub fn eval(&self, scope: &dyn Scope) -> Result<f64, ExprError> {
        match self {
            Rate::Constant(value) => Ok(*value),
            Rate::Expr(expr) => expr.eval_number(scope),
        }
    }
}

impl Default for Rate {
    fn default() -> Self {
        Rate::Constant(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Guard {
    Value(bool),
    Expr(Expression),
}

impl Guard {
    pub fn eval(&self, scope: &dyn Scope) -> Result<bool, ExprError> {
        match self {
            Guard::Value(value) => Ok(*value),
            Guard::Expr(expr) => expr.eval_bool(scope),
        }
    }
}

impl Default for Guard {
    fn default() -> Self {
        Guard::Value(true)
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub name: String,
    pub kind: TransitionKind,
    #[serde(default)]
    pub rate: Rate,
    #[serde(default)]
    pub guard: Guard,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub firing_policy: FiringPolicy,
    /// Upper bound of a timed transition's firing window.
    #[serde(default)]
    pub latest: Option<f64>,
}

impl Transition {
    pub fn new(name: impl Into<String>, kind: TransitionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            rate: Rate::default(),
            guard: Guard::default(),
            priority: 0,
            firing_policy: FiringPolicy::default(),
            latest: None,
        }
    }

    pub fn with_rate(mut self, rate: Rate) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_policy(mut self, policy: FiringPolicy) -> Self {
        self.firing_policy = policy;
        self
    }

    pub fn with_window(mut self, latest: f64) -> Self {
        self.latest = Some(latest);
        self
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transition")
            .field(&self.name)
            .field(&self.kind)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcKind {
    #[default]
    Normal,
    /// Requires `tokens >= weight` and consumes, unlike a textbook inhibitor.
    Inhibitor,
    /// Read arc: enables without consuming.
    Test,
}

impl ArcKind {
    pub fn consumes(self) -> bool {
        !matches!(self, ArcKind::Test)
    }
}

/// Endpoint of an arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Place(PlaceId),
    Transition(TransitionId),
}

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Arc {
    pub source: Node,
    pub target: Node,
    pub weight: Weight,
    #[serde(default)]
    pub kind: ArcKind,
}

impl Arc {
    pub fn new(source: Node, target: Node, weight: Weight, kind: ArcKind) -> Self {
        Self {
            source,
            target,
            weight,
            kind,
        }
    }

    /// The place end of the arc, if the arc is well formed.
    pub fn place(&self) -> Option<PlaceId> {
        match (self.source, self.target) {
            (Node::Place(p), Node::Transition(_)) | (Node::Transition(_), Node::Place(p)) => Some(p),
            _ => None,
        }
    }

    pub fn transition(&self) -> Option<TransitionId> {
        match (self.source, self.target) {
            (Node::Place(_), Node::Transition(t)) | (Node::Transition(t), Node::Place(_)) => Some(t),
            _ => None,
        }
    }

    pub fn is_input(&self) -> bool {
        matches!((self.source, self.target), (Node::Place(_), Node::Transition(_)))
    }
}

impl fmt::Debug for Arc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arc")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("weight", &self.weight)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Marking(pub IndexVec<PlaceId, Tokens>);

impl Marking {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, &Tokens)> {
        self.0.iter_enumerated()
    }

    pub fn tokens(&self, place: PlaceId) -> Tokens {
        self.0[place]
    }

    pub fn total(&self) -> Tokens {
        self.0.iter().sum()
    }
}

impl fmt::Debug for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (place, tokens) in self.iter() {
            map.entry(&place, tokens);
        }
        map.finish()
    }
}
