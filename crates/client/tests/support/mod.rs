#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use flowplan_client::{Engine, PlanContext};
use flowplan_common::{EngineConfig, FlowError, Result, RuntimeConfig};
use flowplan_execution::{
    strategy_fn, Backend, BackendCapabilities, ExecutablePlan, OperatorFactory, RunHandle,
    SharedStepStrategy,
};
use flowplan_planner::{create_physical_plan, LogicalGraph, PhysicalPlan, PhysicalPlannerConfig};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().expect("call log lock").clone()
}

/// Strategy appending `"<name>:<step id>"` to `log` on every call.
pub fn recording_strategy(name: &'static str, log: CallLog) -> SharedStepStrategy {
    strategy_fn(name, move |_, _, step| {
        log.lock()
            .expect("call log lock")
            .push(format!("{name}:{}", step.id));
        Ok(())
    })
}

pub fn failing_strategy(name: &'static str) -> SharedStepStrategy {
    strategy_fn(name, move |_, _, step| {
        Err(FlowError::Execution(format!("{name} refused step {}", step.id)))
    })
}

/// Backend whose compiler rejects everything; counts submit calls.
#[derive(Debug, Default)]
pub struct RejectingBackend {
    pub compiles: AtomicUsize,
    pub submits: AtomicUsize,
}

impl RejectingBackend {
    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

impl Backend for RejectingBackend {
    fn name(&self) -> &str {
        "rejecting"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::full()
    }

    fn compile(&self, _graph: &LogicalGraph, _config: &RuntimeConfig) -> Result<PhysicalPlan> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        Err(FlowError::Planning("graph rejected by test backend".to_string()))
    }

    fn submit(&self, _plan: Arc<ExecutablePlan>) -> Result<RunHandle> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        Err(FlowError::Execution("submit must not be reached".to_string()))
    }
}

/// Backend that compiles normally but refuses every submission.
#[derive(Debug, Default)]
pub struct OverloadedBackend {
    pub submits: AtomicUsize,
}

impl OverloadedBackend {
    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

impl Backend for OverloadedBackend {
    fn name(&self) -> &str {
        "overloaded"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::full()
    }

    fn compile(&self, graph: &LogicalGraph, config: &RuntimeConfig) -> Result<PhysicalPlan> {
        create_physical_plan(graph, &PhysicalPlannerConfig::from_runtime(config))
    }

    fn submit(&self, _plan: Arc<ExecutablePlan>) -> Result<RunHandle> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        Err(FlowError::Execution("cluster full".to_string()))
    }
}

/// Pass-through operator that sleeps per batch.
pub struct SlowOperator {
    pub delay: Duration,
}

impl OperatorFactory for SlowOperator {
    fn name(&self) -> &str {
        "slow"
    }

    fn execute(
        &self,
        input_schema: SchemaRef,
        input_batches: Vec<RecordBatch>,
        _options: &BTreeMap<String, String>,
    ) -> Result<(SchemaRef, Vec<RecordBatch>)> {
        std::thread::sleep(self.delay);
        Ok((input_schema, input_batches))
    }
}

pub fn small_engine() -> Engine {
    Engine::new(EngineConfig {
        worker_threads: 2,
        ..EngineConfig::default()
    })
    .expect("engine")
}

/// `rows -> upper -> distinct -> sink "out"`, with `stage1`/`stage2`
/// describing the map and `dedupe` describing the distinct.
pub fn described_pipeline(ctx: &mut PlanContext, rows: &[&str]) {
    let graph = ctx.graph();
    let source = graph.source("in", "value", rows.iter().copied());
    let upper = graph.map(source, "upper", "upper", BTreeMap::new());
    let unique = graph.distinct(upper, "unique");
    graph.sink(unique, "out");
    graph.describe(source, "stage1").expect("describe");
    graph.describe(upper, "stage2").expect("describe");
    graph.describe(unique, "dedupe").expect("describe");
}

pub fn sorted(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values
}

pub fn unique_path(prefix: &str, ext: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}_{nanos}.{ext}"))
}
