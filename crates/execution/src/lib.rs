//! Execution-layer contracts shared by backends and the client.
//!
//! Architecture role:
//! - the [`Backend`] contract with its capability flags
//! - step strategies, their ordered composition and the named registry
//! - [`RunHandle`], the single outcome channel of a submitted run
//! - the operator registry backing `Map` stages
//!
//! Key modules:
//! - [`backend`]
//! - [`strategy`]
//! - [`handle`]
//! - [`physical_registry`]
//! - [`stats`]

pub mod backend;
pub mod handle;
pub mod physical_registry;
pub mod stats;
pub mod strategy;

pub use backend::{
    Backend, BackendCapabilities, ExecutablePlan, SharedBackend, StepMutability,
};
pub use handle::RunHandle;
pub use physical_registry::{
    utf8_batch, utf8_schema, utf8_values, OperatorFactory, OperatorRegistry,
    SharedOperatorFactory, Utf8MapOperator,
};
pub use stats::{JobStats, StepStats};
pub use strategy::{
    compose_strategies, strategy_fn, ComposedStrategy, FnStrategy, ParallelismStrategy,
    SharedStepStrategy, StepStrategy, StepTagsStrategy, StrategyFactory, StrategyRegistry,
    StrategyRegistryBuilder,
};
