//! Logical dataflow graphs and their compilation into physical steps.
//!
//! Architecture role:
//! - authoring-side [`GraphBuilder`] and the immutable [`LogicalGraph`]
//! - deterministic plan identity ([`derive_plan_id`])
//! - physical plan model and the step-cutting [`create_physical_plan`]
//! - text rendering for both levels
//!
//! Key modules:
//! - [`logical_graph`]
//! - [`identity`]
//! - [`physical_plan`]
//! - [`physical_planner`]
//! - [`explain`]

pub mod explain;
pub mod identity;
pub mod logical_graph;
pub mod physical_plan;
pub mod physical_planner;

pub use explain::{explain_logical, explain_physical};
pub use identity::{assign_plan_id, derive_plan_id};
pub use logical_graph::*;
pub use physical_plan::*;
pub use physical_planner::*;
