//! # 混合 Petri 网模型
//!
//! 设库所集合 `P`、变迁集合 `T` 与弧集合 `A ⊆ (P×T) ∪ (T×P)`。每条弧带正权
//! `w(a)` 与类型 `{normal, inhibitor, test}`；标识 `M ∈ ℝ≥0^{|P|}`。
//!
//! * 变迁 `t` **结构可激发** 当且仅当对所有输入弧 `(p, t)`：`M[p] ≥ w(p, t)`，
//!   且守卫表达式为真；
//! * 普通弧与抑制弧在发射时消耗 `w`，测试弧只读不消耗（抑制弧采用"富余协作"
//!   语义，与经典抑制弧不同）；
//! * 变迁类型 `kind ∈ {immediate, timed, stochastic, continuous}` 决定时间语义，
//!   由 [`crate::sim`] 解释。
//!
//! ## 示例
//!
//! ```rust
//! use hypn::net::*;
//!
//! let mut net = Net::empty();
//! let p0 = net.add_place(Place::new("p0", 1.0));
//! let p1 = net.add_place(Place::new("p1", 0.0));
//! let t0 = net.add_transition(Transition::new("t0", TransitionKind::Immediate));
//!
//! net.add_input_arc(p0, t0, 1.0, ArcKind::Normal).unwrap();
//! net.add_output_arc(t0, p1, 1.0).unwrap();
//!
//! assert_eq!(net.input_arcs(t0).count(), 1);
//! assert_eq!(net.marking().tokens(p0), 1.0);
//! ```

pub mod core;
pub mod ids;
pub mod index_vec;
pub mod io;
pub mod structure;

pub use self::core::{DiagnosticReport, Locality, Net, NetError, NetScope, TIME_VARIABLE};
pub use ids::{ArcId, PlaceId, TransitionId};
pub use index_vec::{Idx, IndexVec};
pub use structure::{
    Arc, ArcKind, FiringPolicy, Guard, Marking, Node, Place, Rate, Tokens, Transition,
    TransitionKind, Weight,
};
