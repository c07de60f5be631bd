//! # 混合网执行引擎
//!
//! 控制器按固定顺序推进一步：使能刷新 → 即时变迁耗尽（有上限）→ 连续变迁预选
//! → 至多一次离散发射（定时/随机）→ 连续积分 → 时间推进 → 通知监听者。
//!
//! * 行为对象按变迁类型构造并缓存，每次访问都检查类型是否被外部修改；
//! * 运行期计时状态（使能时间、随机调度时间）由控制器持有，`stop()` 时全部清空；
//! * 引擎单线程、同步，周期性驱动由 [`driver`] 提供。

pub mod behavior;
pub mod cache;
pub mod collector;
pub mod conflict;
pub mod controller;
pub mod driver;
pub mod state;

pub use behavior::{Behavior, Eligibility, FireError, FiringDetails, TransitionBehavior};
pub use cache::BehaviorCache;
pub use collector::{DataCollector, FiringRecord, TraceCollector};
pub use conflict::{ConflictPolicy, ConflictResolver};
pub use controller::{ListenerId, RunState, SimulationController, StepListener, StepReport};
pub use driver::{IntervalDriver, RunDriver, StopHandle};
pub use state::{TransitionState, TransitionStateTracker};
