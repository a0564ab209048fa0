use std::fmt::{self, Debug};
use std::sync::Arc;

use flowplan_common::{FlowError, PlanId, Result, RuntimeConfig};
use flowplan_planner::{LogicalGraph, PhysicalPlan};

use crate::handle::RunHandle;
use crate::strategy::SharedStepStrategy;

/// Which parts of a compiled step a backend lets callers change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepMutability {
    pub rename: bool,
    pub configure: bool,
}

impl StepMutability {
    pub fn full() -> Self {
        Self {
            rename: true,
            configure: true,
        }
    }
}

/// What a backend exposes about its compiled plans.
///
/// The default is fully opaque: no step walk, no mutation, no strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Compiled steps and their internal stage graphs can be walked.
    pub step_introspection: bool,
    pub step_mutability: StepMutability,
    /// A step strategy can be installed on a compiled plan.
    pub strategy_installation: bool,
}

impl BackendCapabilities {
    pub fn full() -> Self {
        Self {
            step_introspection: true,
            step_mutability: StepMutability::full(),
            strategy_installation: true,
        }
    }

    pub fn opaque() -> Self {
        Self::default()
    }
}

/// A compiled plan ready for submission.
#[derive(Clone)]
pub struct ExecutablePlan {
    pub plan_id: PlanId,
    /// Derived runtime config, carrying the plan id.
    pub config: RuntimeConfig,
    pub physical: PhysicalPlan,
    strategy: Option<SharedStepStrategy>,
}

impl ExecutablePlan {
    pub fn new(plan_id: PlanId, config: RuntimeConfig, physical: PhysicalPlan) -> Self {
        Self {
            plan_id,
            config,
            physical,
            strategy: None,
        }
    }

    /// Strategy the backend applies to each step right before it runs.
    pub fn strategy(&self) -> Option<&SharedStepStrategy> {
        self.strategy.as_ref()
    }

    pub(crate) fn set_strategy(&mut self, strategy: SharedStepStrategy) {
        self.strategy = Some(strategy);
    }
}

impl Debug for ExecutablePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutablePlan")
            .field("plan_id", &self.plan_id)
            .field("steps", &self.physical.len())
            .field("strategy", &self.strategy.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

/// A batch-processing backend: compiles logical graphs and runs the result.
pub trait Backend: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::opaque()
    }

    /// Compile `graph` under `config`. Graph validation lives here.
    fn compile(&self, graph: &LogicalGraph, config: &RuntimeConfig) -> Result<PhysicalPlan>;

    /// Attach `strategy` to `plan`, replacing any previous one.
    fn install_strategy(
        &self,
        plan: &mut ExecutablePlan,
        strategy: SharedStepStrategy,
    ) -> Result<()> {
        if !self.capabilities().strategy_installation {
            return Err(FlowError::Unsupported(format!(
                "backend '{}' does not accept step strategies",
                self.name()
            )));
        }
        plan.set_strategy(strategy);
        Ok(())
    }

    /// Start running `plan`. Returns once the run is handed off.
    fn submit(&self, plan: Arc<ExecutablePlan>) -> Result<RunHandle>;
}

pub type SharedBackend = Arc<dyn Backend>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StepTagsStrategy;

    #[derive(Debug)]
    struct Opaque;

    impl Backend for Opaque {
        fn name(&self) -> &str {
            "opaque"
        }

        fn compile(&self, _graph: &LogicalGraph, _config: &RuntimeConfig) -> Result<PhysicalPlan> {
            Err(FlowError::Unsupported("compile".to_string()))
        }

        fn submit(&self, _plan: Arc<ExecutablePlan>) -> Result<RunHandle> {
            Err(FlowError::Unsupported("submit".to_string()))
        }
    }

    fn empty_plan() -> ExecutablePlan {
        ExecutablePlan::new(
            PlanId("p".to_string()),
            RuntimeConfig::new(),
            PhysicalPlan {
                plan_id: PlanId("p".to_string()),
                name: "p".to_string(),
                steps: vec![],
            },
        )
    }

    #[test]
    fn opaque_backend_refuses_strategies() {
        let mut plan = empty_plan();
        let err = Opaque
            .install_strategy(&mut plan, Arc::new(StepTagsStrategy))
            .expect_err("unsupported");
        assert!(matches!(err, FlowError::Unsupported(_)));
        assert!(plan.strategy().is_none());
        assert_eq!(Opaque.capabilities(), BackendCapabilities::opaque());
    }

    #[test]
    fn capabilities_full_enables_everything() {
        let caps = BackendCapabilities::full();
        assert!(caps.step_introspection && caps.strategy_installation);
        assert_eq!(caps.step_mutability, StepMutability::full());
    }
}
