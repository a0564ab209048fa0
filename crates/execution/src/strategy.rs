//! Step strategies: per-step callbacks invoked by a backend right before a
//! physical step runs, plus ordered composition and the named registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use flowplan_common::{keys, FlowError, Result, RuntimeConfig};
use flowplan_planner::{PhysicalPlan, PhysicalStep};
use tracing::{debug, warn};

/// Adjusts a step's scheduling/configuration before it runs.
///
/// Implementations must not keep per-step state: the same instance is
/// applied to every step of every run of a plan.
pub trait StepStrategy: Send + Sync {
    /// Stable name used in logs and failure reports.
    fn name(&self) -> &str;

    fn apply(
        &self,
        plan: &PhysicalPlan,
        predecessors: &[&PhysicalStep],
        step: &mut PhysicalStep,
    ) -> Result<()>;
}

pub type SharedStepStrategy = Arc<dyn StepStrategy>;

/// Ordered composite of strategies.
///
/// Every member sees the same `(plan, predecessors, step)` triple in
/// registration order. A failing member does not stop later ones; once all
/// have run, the first failure is returned.
pub struct ComposedStrategy {
    name: String,
    strategies: Vec<SharedStepStrategy>,
}

impl ComposedStrategy {
    pub fn strategies(&self) -> &[SharedStepStrategy] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl fmt::Debug for ComposedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedStrategy")
            .field("name", &self.name)
            .finish()
    }
}

impl StepStrategy for ComposedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(
        &self,
        plan: &PhysicalPlan,
        predecessors: &[&PhysicalStep],
        step: &mut PhysicalStep,
    ) -> Result<()> {
        self.strategies
            .iter()
            .fold(None, |first_err: Option<FlowError>, strategy| {
                match strategy.apply(plan, predecessors, step) {
                    Ok(()) => first_err,
                    Err(err) => {
                        warn!(
                            strategy = strategy.name(),
                            step = %step.name,
                            error = %err,
                            "step strategy failed"
                        );
                        first_err.or_else(|| Some(attribute(strategy.name(), err)))
                    }
                }
            })
            .map_or(Ok(()), Err)
    }
}

fn attribute(strategy: &str, err: FlowError) -> FlowError {
    match err {
        already @ FlowError::Strategy { .. } => already,
        other => FlowError::Strategy {
            strategy: strategy.to_string(),
            source: Box::new(other),
        },
    }
}

/// Fold `strategies` into one, keeping their order.
///
/// Zero strategies yields a no-op and one yields a pass-through; callers do
/// not special-case either.
pub fn compose_strategies(
    strategies: impl IntoIterator<Item = SharedStepStrategy>,
) -> SharedStepStrategy {
    let strategies = strategies.into_iter().collect::<Vec<_>>();
    let name = format!(
        "composed({})",
        strategies
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Arc::new(ComposedStrategy { name, strategies })
}

type StrategyFnBox =
    dyn Fn(&PhysicalPlan, &[&PhysicalStep], &mut PhysicalStep) -> Result<()> + Send + Sync;

/// Closure-backed strategy.
pub struct FnStrategy {
    name: String,
    f: Box<StrategyFnBox>,
}

impl StepStrategy for FnStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(
        &self,
        plan: &PhysicalPlan,
        predecessors: &[&PhysicalStep],
        step: &mut PhysicalStep,
    ) -> Result<()> {
        (self.f)(plan, predecessors, step)
    }
}

/// Wrap a closure as a shared strategy.
pub fn strategy_fn<F>(name: &str, f: F) -> SharedStepStrategy
where
    F: Fn(&PhysicalPlan, &[&PhysicalStep], &mut PhysicalStep) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnStrategy {
        name: name.to_string(),
        f: Box::new(f),
    })
}

/// Builds a strategy from the runtime config of the plan being built.
pub trait StrategyFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, config: &RuntimeConfig) -> Result<SharedStepStrategy>;
}

/// Named strategy factories, frozen once built.
///
/// Plans select strategies by listing names in `flowplan.step.strategies`.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: Arc<BTreeMap<String, Arc<dyn StrategyFactory>>>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("factories", &self.names())
            .finish()
    }
}

impl StrategyRegistry {
    pub fn builder() -> StrategyRegistryBuilder {
        StrategyRegistryBuilder::default()
    }

    /// Registry holding the built-in `parallelism` and `step-tags` factories.
    pub fn with_builtins() -> Self {
        Self::builder()
            .register(Arc::new(ParallelismFactory))
            .register(Arc::new(StepTagsFactory))
            .build()
    }

    /// Sorted factory names.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the strategies `config` lists, in listed order.
    pub fn resolve(&self, config: &RuntimeConfig) -> Result<Vec<SharedStepStrategy>> {
        config
            .get_list(keys::STEP_STRATEGIES)
            .iter()
            .map(|name| {
                let factory = self.factories.get(name).ok_or_else(|| {
                    FlowError::InvalidConfig(format!(
                        "unknown step strategy '{name}' in {} (registered: {})",
                        keys::STEP_STRATEGIES,
                        self.names().join(", ")
                    ))
                })?;
                debug!(strategy = name.as_str(), "resolved step strategy");
                factory.create(config)
            })
            .collect()
    }
}

#[derive(Default)]
pub struct StrategyRegistryBuilder {
    factories: BTreeMap<String, Arc<dyn StrategyFactory>>,
}

impl StrategyRegistryBuilder {
    /// Add or replace a factory under its own name.
    #[must_use]
    pub fn register(mut self, factory: Arc<dyn StrategyFactory>) -> Self {
        self.factories.insert(factory.name().to_string(), factory);
        self
    }

    pub fn build(self) -> StrategyRegistry {
        StrategyRegistry {
            factories: Arc::new(self.factories),
        }
    }
}

/// Copies a fixed `flowplan.step.parallelism` into shuffle-reading steps
/// that do not carry one yet. A configured hint, not an estimate.
pub struct ParallelismStrategy {
    parallelism: usize,
}

impl ParallelismStrategy {
    pub fn new(parallelism: usize) -> Self {
        Self { parallelism }
    }
}

impl StepStrategy for ParallelismStrategy {
    fn name(&self) -> &str {
        "parallelism"
    }

    fn apply(
        &self,
        _plan: &PhysicalPlan,
        _predecessors: &[&PhysicalStep],
        step: &mut PhysicalStep,
    ) -> Result<()> {
        if step.reads_shuffle() {
            step.config
                .entry(keys::STEP_PARALLELISM.to_string())
                .or_insert_with(|| self.parallelism.to_string());
        }
        Ok(())
    }
}

struct ParallelismFactory;

impl StrategyFactory for ParallelismFactory {
    fn name(&self) -> &str {
        "parallelism"
    }

    fn create(&self, config: &RuntimeConfig) -> Result<SharedStepStrategy> {
        let parallelism = config.get_usize(keys::STEP_PARALLELISM)?.ok_or_else(|| {
            FlowError::InvalidConfig(format!(
                "parallelism strategy requires {}",
                keys::STEP_PARALLELISM
            ))
        })?;
        Ok(Arc::new(ParallelismStrategy::new(parallelism)))
    }
}

/// Records the step's `i/N` position and predecessor ids in its config.
pub struct StepTagsStrategy;

impl StepStrategy for StepTagsStrategy {
    fn name(&self) -> &str {
        "step-tags"
    }

    fn apply(
        &self,
        plan: &PhysicalPlan,
        predecessors: &[&PhysicalStep],
        step: &mut PhysicalStep,
    ) -> Result<()> {
        step.config.insert(
            keys::STEP_ORDINAL.to_string(),
            format!("{}/{}", step.ordinal, plan.len()),
        );
        step.config.insert(
            keys::STEP_PREDECESSORS.to_string(),
            predecessors
                .iter()
                .map(|p| p.id.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
        Ok(())
    }
}

struct StepTagsFactory;

impl StrategyFactory for StepTagsFactory {
    fn name(&self) -> &str {
        "step-tags"
    }

    fn create(&self, _config: &RuntimeConfig) -> Result<SharedStepStrategy> {
        Ok(Arc::new(StepTagsStrategy))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use flowplan_common::{PlanId, StepId};

    use super::*;

    fn plan_with_one_step() -> (PhysicalPlan, PhysicalStep) {
        let step = PhysicalStep {
            id: StepId(0),
            ordinal: 1,
            name: "(1/1) job".to_string(),
            config: BTreeMap::new(),
            predecessors: vec![],
            vertices: vec![],
        };
        let plan = PhysicalPlan {
            plan_id: PlanId("p".to_string()),
            name: "job".to_string(),
            steps: vec![step.clone()],
        };
        (plan, step)
    }

    fn recorder(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> SharedStepStrategy {
        strategy_fn(name, move |_, _, step| {
            log.lock().expect("log lock").push(format!("{name}:{}", step.ordinal));
            Ok(())
        })
    }

    #[test]
    fn composed_runs_in_registration_order() {
        let (plan, mut step) = plan_with_one_step();
        let log = Arc::new(Mutex::new(Vec::new()));

        let ab = compose_strategies([recorder("A", log.clone()), recorder("B", log.clone())]);
        ab.apply(&plan, &[], &mut step).expect("apply");
        let ba = compose_strategies([recorder("B", log.clone()), recorder("A", log.clone())]);
        ba.apply(&plan, &[], &mut step).expect("apply");

        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["A:1", "B:1", "B:1", "A:1"]
        );
        assert_eq!(ab.name(), "composed(A, B)");
    }

    #[test]
    fn zero_and_one_strategy_need_no_special_casing() {
        let (plan, mut step) = plan_with_one_step();
        let before = step.clone();
        compose_strategies(Vec::new())
            .apply(&plan, &[], &mut step)
            .expect("noop");
        assert_eq!(step, before);

        compose_strategies([Arc::new(StepTagsStrategy) as SharedStepStrategy])
            .apply(&plan, &[], &mut step)
            .expect("single");
        assert_eq!(step.config.get(keys::STEP_ORDINAL).map(String::as_str), Some("1/1"));
    }

    #[test]
    fn failure_runs_siblings_then_reports_first() {
        let (plan, mut step) = plan_with_one_step();
        let set = |key: &'static str| {
            strategy_fn(key, move |_, _, step| {
                step.config.insert(key.to_string(), "1".to_string());
                Ok(())
            })
        };
        let fail = |name: &'static str| {
            strategy_fn(name, move |_, _, _| {
                Err(FlowError::Execution(format!("{name} exploded")))
            })
        };

        let composed = compose_strategies([set("a"), fail("first"), set("c"), fail("second")]);
        let err = composed.apply(&plan, &[], &mut step).expect_err("fails");

        assert!(step.config.contains_key("a"));
        assert!(step.config.contains_key("c"));
        match err {
            FlowError::Strategy { strategy, source } => {
                assert_eq!(strategy, "first");
                assert_eq!(source.to_string(), "execution error: first exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn registry_resolves_listed_names_in_order() {
        let registry = StrategyRegistry::with_builtins();
        let cfg = RuntimeConfig::new()
            .with(keys::STEP_STRATEGIES, "step-tags, parallelism")
            .with(keys::STEP_PARALLELISM, "3");

        let resolved = registry.resolve(&cfg).expect("resolve");
        let names = resolved.iter().map(|s| s.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["step-tags", "parallelism"]);
        assert!(registry.resolve(&RuntimeConfig::new()).expect("none").is_empty());
    }

    #[test]
    fn registry_rejects_unknown_names() {
        let registry = StrategyRegistry::with_builtins();
        let cfg = RuntimeConfig::new().with(keys::STEP_STRATEGIES, "reducer-estimator");
        let err = registry.resolve(&cfg).err().expect("unknown");
        assert!(err.to_string().contains("reducer-estimator"), "{err}");
    }

    #[test]
    fn parallelism_only_touches_shuffle_readers_without_a_value() {
        let (plan, mut step) = plan_with_one_step();
        ParallelismStrategy::new(4)
            .apply(&plan, &[], &mut step)
            .expect("apply");
        assert!(!step.config.contains_key(keys::STEP_PARALLELISM));
    }
}
