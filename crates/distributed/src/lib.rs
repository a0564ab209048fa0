//! In-process batch cluster backend.
//!
//! [`LocalCluster`] compiles logical graphs with the flowplan physical
//! planner and runs the resulting steps on its own tokio runtime, applying
//! any installed step strategy to each step right before it runs.

pub mod cluster;
pub mod worker;

pub use cluster::{check_operators, ClusterConfig, LocalCluster};
pub use worker::{run_plan, run_plan_inline, RunContext};
