//! Plan build & dispatch: turns an authored dataflow graph into an
//! executable plan on a backend and runs it.
//!
//! Architecture role:
//! - [`PlanContext`] carries the graph being authored, its runtime config and
//!   the target backend
//! - [`PlanBuilder`] derives the plan identity, compiles, annotates steps with
//!   provenance and installs step strategies
//! - [`ExecutionDriver`] runs a [`BuildResult`] async or blocking, with build
//!   and run failures sharing one outcome channel
//! - [`Engine`] wraps all of it over a [`flowplan_distributed::LocalCluster`]
//!   or the inline [`EmbeddedBackend`]

mod session;

pub mod annotate;
pub mod builder;
pub mod context;
pub mod driver;
pub mod engine;
pub mod provenance;
pub mod runtime;

pub use annotate::{annotate_step, Annotation};
pub use builder::{BuildFailure, BuildPhase, BuildResult, PlanBuilder};
pub use context::PlanContext;
pub use driver::ExecutionDriver;
pub use engine::Engine;
pub use provenance::extract_descriptions;
pub use runtime::EmbeddedBackend;
