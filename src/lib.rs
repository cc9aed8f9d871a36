//! Trial and block scheduling for operant-conditioning experiments.
//!
//! Everything is pull-based. A driver asks a block (or a block handler) for
//! the next [`block::Trial`], runs it, and reports the subject's
//! [`source::Outcome`] back before pulling again. Sampling policies decide
//! the order of conditions; adaptive procedures choose each trial from the
//! responses so far and can be saved after every trial with
//! [`persist::Persistent`].

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/source.rs"]
pub mod source;

#[path = "core/policy.rs"]
pub mod policy;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/staircase.rs"]
pub mod staircase;

#[path = "core/bisection.rs"]
pub mod bisection;

#[path = "core/mixture.rs"]
pub mod mixture;

#[path = "core/condition.rs"]
pub mod condition;

#[path = "core/reinforcement.rs"]
pub mod reinforcement;

#[path = "core/stats.rs"]
pub mod stats;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/persist.rs"]
pub mod persist;

#[path = "core/queue.rs"]
pub mod queue;

#[path = "core/block.rs"]
pub mod block;

pub mod prelude {
    pub use crate::bisection::{DoubleStaircase, Probe, ReinforcedDoubleStaircase, Side};
    pub use crate::block::{Block, BlockHandler, Consequence, MixedBlockHandler, Trial, TrialCounter};
    pub use crate::condition::{Condition, StimulusCondition};
    pub use crate::config::{
        CritMethod, DoubleStaircaseConfig, KaernbachConfig, QueueConfig, ReinforcedConfig,
        ReinforcementConfig,
    };
    pub use crate::error::{ErrorKind, Result, ScheduleError};
    pub use crate::mixture::{MixedAdaptiveQueue, Procedure, Selection};
    pub use crate::persist::{Persistent, ProcedureState, Snapshot, SnapshotStore};
    pub use crate::queue::QueueHandler;
    pub use crate::reinforcement::ReinforcementSchedule;
    pub use crate::source::{Outcome, Pull, Source};
    pub use crate::staircase::KaernbachStaircase;
}
