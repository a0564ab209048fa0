use std::sync::Arc;

use flowplan_common::{EngineConfig, Result};
use flowplan_execution::{
    JobStats, RunHandle, SharedBackend, SharedOperatorFactory, SharedStepStrategy,
    StrategyRegistry,
};
use flowplan_planner::{explain_logical, explain_physical};

use crate::builder::BuildResult;
use crate::context::PlanContext;
use crate::session::{Session, SharedSession};

/// Facade over plan authoring, building and running.
#[derive(Debug, Clone)]
pub struct Engine {
    session: SharedSession,
}

impl Engine {
    /// Engine backed by an in-process cluster sized from `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let session = Arc::new(Session::new(config)?);
        Ok(Self { session })
    }

    /// Engine running plans inline on the awaiting thread.
    pub fn embedded(config: EngineConfig) -> Self {
        Self {
            session: Arc::new(Session::embedded(config)),
        }
    }

    pub fn with_backend(
        config: EngineConfig,
        backend: SharedBackend,
        strategies: StrategyRegistry,
    ) -> Self {
        Self {
            session: Arc::new(Session::with_backend(config, backend, strategies)),
        }
    }

    /// Fresh authoring context seeded with the engine's runtime entries.
    pub fn context(&self) -> PlanContext {
        self.session.context()
    }

    pub fn build(&self, ctx: &PlanContext) -> BuildResult {
        self.session.plan_builder(ctx).build()
    }

    /// Build with extra strategies appended after the configured ones.
    pub fn build_with(&self, ctx: &PlanContext, strategies: Vec<SharedStepStrategy>) -> BuildResult {
        strategies
            .into_iter()
            .fold(self.session.plan_builder(ctx), |builder, s| builder.with_strategy(s))
            .build()
    }

    pub fn run_async(&self, build: &BuildResult) -> RunHandle {
        self.session.driver.run_async(build)
    }

    pub fn run_sync(&self, build: &BuildResult) -> Result<JobStats> {
        self.session.driver.run_sync(build)
    }

    /// Logical graph and built physical plan as text.
    pub fn explain(&self, ctx: &PlanContext) -> Result<String> {
        let plan = self.build(ctx).into_result()?;
        Ok(format!(
            "== logical ==\n{}== physical ==\n{}",
            explain_logical(&ctx.logical_graph()),
            explain_physical(&plan.physical)
        ))
    }

    /// Register or replace a `Map` operator.
    ///
    /// Returns `true` when an existing operator with the same name was replaced.
    pub fn register_operator(&self, factory: SharedOperatorFactory) -> bool {
        self.session.operators.register(factory)
    }

    pub fn deregister_operator(&self, name: &str) -> bool {
        self.session.operators.deregister(name)
    }

    pub fn operator_names(&self) -> Vec<String> {
        self.session.operators.names()
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.session.strategies.names()
    }

    pub fn backend_name(&self) -> &str {
        self.session.backend.name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.session.config
    }

    pub fn prometheus_metrics(&self) -> String {
        self.session.prometheus_metrics()
    }
}
