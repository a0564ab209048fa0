use std::sync::Arc;

use flowplan_common::{MetricsRegistry, Result, RuntimeConfig};
use flowplan_distributed::{check_operators, run_plan_inline, RunContext};
use flowplan_execution::{Backend, ExecutablePlan, OperatorRegistry, RunHandle};
use flowplan_planner::{create_physical_plan, LogicalGraph, PhysicalPlan, PhysicalPlannerConfig};
use futures::FutureExt;

/// Inline backend: runs a plan on whichever thread awaits its handle.
///
/// Opaque to the builder, so compiled steps are neither annotated nor given
/// a strategy, and handles cannot be cancelled.
#[derive(Debug)]
pub struct EmbeddedBackend {
    registry: Arc<OperatorRegistry>,
    metrics: MetricsRegistry,
}

impl Default for EmbeddedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedBackend {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(OperatorRegistry::with_builtins()),
            metrics: MetricsRegistry::new(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<OperatorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }
}

impl Backend for EmbeddedBackend {
    fn name(&self) -> &str {
        "embedded"
    }

    fn compile(&self, graph: &LogicalGraph, config: &RuntimeConfig) -> Result<PhysicalPlan> {
        let plan = create_physical_plan(graph, &PhysicalPlannerConfig::from_runtime(config))?;
        check_operators(&plan, &self.registry)?;
        Ok(plan)
    }

    fn submit(&self, plan: Arc<ExecutablePlan>) -> Result<RunHandle> {
        let ctx = RunContext {
            backend: self.name().to_string(),
            registry: Arc::clone(&self.registry),
            metrics: self.metrics.clone(),
        };
        let plan_id = plan.plan_id.clone();
        let run = async move { run_plan_inline(&plan, &ctx) }.boxed();
        Ok(RunHandle::deferred(run).with_plan_id(plan_id))
    }
}

#[cfg(test)]
mod tests {
    use flowplan_common::{FlowError, PlanId};
    use flowplan_execution::{BackendCapabilities, StepTagsStrategy};
    use flowplan_planner::GraphBuilder;

    use super::*;

    #[test]
    fn embedded_backend_is_opaque_and_runs_inline() {
        let backend = EmbeddedBackend::new();
        assert_eq!(backend.capabilities(), BackendCapabilities::opaque());

        let mut b = GraphBuilder::new();
        let s = b.source("in", "v", ["x", "y"]);
        b.sink(s, "out");
        let physical = backend
            .compile(&b.build(), &RuntimeConfig::new())
            .expect("compile");
        let mut plan = ExecutablePlan::new(PlanId("p".to_string()), RuntimeConfig::new(), physical);

        let err = backend
            .install_strategy(&mut plan, Arc::new(StepTagsStrategy))
            .expect_err("opaque");
        assert!(matches!(err, FlowError::Unsupported(_)));

        let handle = backend.submit(Arc::new(plan)).expect("submit");
        assert!(!handle.cancel());
        let stats = futures::executor::block_on(handle).expect("run");
        assert_eq!(stats.sink_values("out"), vec!["x", "y"]);
        assert_eq!(stats.backend, "embedded");
    }
}
