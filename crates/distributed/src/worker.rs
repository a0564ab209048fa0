//! Step execution for the in-process cluster.
//!
//! Responsibilities:
//! - apply the installed strategy to a per-run copy of each step;
//! - run a step as `flowplan.step.parallelism` hash partitions when it reads
//!   a shuffle, as a single partition otherwise;
//! - publish shuffle outputs between steps and collect sink batches.
//!
//! Rows are hash-partitioned on their utf8 value, so equal values always meet
//! in the same partition and a per-partition `Distinct` is globally correct.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use flowplan_common::config::parse_positive;
use flowplan_common::{keys, FlowError, MetricsRegistry, Result, StageId};
use flowplan_execution::{
    utf8_batch, utf8_schema, utf8_values, ExecutablePlan, JobStats, OperatorRegistry, StepStats,
};
use flowplan_planner::{PhysicalStep, PlumbingKind, PlumbingVertex, StageKind, StageVertex, StepVertex};
use tracing::{debug, info};

/// Shared services a run needs.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Backend name reported in stats and metric labels.
    pub backend: String,
    pub registry: Arc<OperatorRegistry>,
    pub metrics: MetricsRegistry,
}

/// Output of one stage within one partition.
#[derive(Debug, Clone)]
struct StageData {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl StageData {
    fn from_values(schema: SchemaRef, values: &[String]) -> Result<Self> {
        let batch = utf8_batch(schema.clone(), values)?;
        Ok(Self {
            schema,
            batches: vec![batch],
        })
    }

    fn values(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for batch in &self.batches {
            out.extend(utf8_values(batch)?);
        }
        Ok(out)
    }

    fn num_rows(&self) -> u64 {
        self.batches.iter().map(|b| b.num_rows() as u64).sum()
    }

    fn partition(&self, partition: usize, partitions: usize) -> Result<Self> {
        if partitions <= 1 {
            return Ok(self.clone());
        }
        let values = self
            .values()?
            .into_iter()
            .filter(|v| partition_of(v, partitions) == partition)
            .collect::<Vec<_>>();
        Self::from_values(self.schema.clone(), &values)
    }
}

type Exchange = HashMap<StageId, StageData>;

#[derive(Debug, Default)]
struct PartitionOutput {
    shuffles: Vec<(StageId, StageData)>,
    sinks: Vec<(String, StageData)>,
    rows_in: u64,
    rows_out: u64,
}

struct PreparedStep {
    step: PhysicalStep,
    partitions: usize,
    started: Instant,
}

/// Book-keeping for one run of a plan.
struct PlanRun<'a> {
    plan: &'a ExecutablePlan,
    ctx: &'a RunContext,
    exchange: Arc<Exchange>,
    stats: JobStats,
    started: Instant,
}

impl<'a> PlanRun<'a> {
    fn new(plan: &'a ExecutablePlan, ctx: &'a RunContext) -> Self {
        info!(
            plan_id = %plan.plan_id.short(),
            backend = %ctx.backend,
            steps = plan.physical.len(),
            "plan run started"
        );
        Self {
            plan,
            ctx,
            exchange: Arc::new(HashMap::new()),
            stats: JobStats {
                plan_id: plan.plan_id.clone(),
                backend: ctx.backend.clone(),
                ..JobStats::default()
            },
            started: Instant::now(),
        }
    }

    fn prepare(&self, original: &PhysicalStep) -> Result<PreparedStep> {
        let mut step = original.clone();
        if let Some(strategy) = self.plan.strategy() {
            let predecessors = self.plan.physical.predecessors_of(original);
            strategy.apply(&self.plan.physical, &predecessors, &mut step)?;
            debug!(
                plan_id = %self.plan.plan_id.short(),
                step = %step.id,
                strategy = strategy.name(),
                "applied step strategy"
            );
        }
        let partitions = if step.reads_shuffle() {
            match step.config.get(keys::STEP_PARALLELISM) {
                Some(raw) => parse_positive(keys::STEP_PARALLELISM, raw)?,
                None => self
                    .plan
                    .config
                    .get_usize(keys::STEP_PARALLELISM)?
                    .unwrap_or(1),
            }
        } else {
            1
        };
        Ok(PreparedStep {
            step,
            partitions,
            started: Instant::now(),
        })
    }

    fn finish_step(&mut self, prepared: PreparedStep, outputs: Vec<PartitionOutput>) {
        let PreparedStep {
            step,
            partitions,
            started,
        } = prepared;
        let exchange = Arc::make_mut(&mut self.exchange);
        let mut rows_in = 0;
        let mut rows_out = 0;
        for output in outputs {
            rows_in += output.rows_in;
            rows_out += output.rows_out;
            for (stage, data) in output.shuffles {
                match exchange.get_mut(&stage) {
                    Some(existing) => existing.batches.extend(data.batches),
                    None => {
                        exchange.insert(stage, data);
                    }
                }
            }
            for (table, data) in output.sinks {
                self.stats
                    .outputs
                    .entry(table)
                    .or_default()
                    .extend(data.batches);
            }
        }
        let elapsed = started.elapsed();
        self.ctx.metrics.record_step_run(
            &self.ctx.backend,
            self.plan.plan_id.as_str(),
            step.id.0,
            rows_in,
            rows_out,
            elapsed.as_secs_f64(),
        );
        info!(
            plan_id = %self.plan.plan_id.short(),
            step = %step.id,
            name = %step.name,
            partitions,
            rows_in,
            rows_out,
            "step finished"
        );
        self.stats.steps.push(StepStats {
            step: step.id,
            ordinal: step.ordinal,
            name: step.name,
            partitions,
            rows_in,
            rows_out,
            elapsed,
            config: step.config,
        });
    }

    fn finish(mut self) -> JobStats {
        self.stats.elapsed = self.started.elapsed();
        info!(
            plan_id = %self.plan.plan_id.short(),
            steps = self.stats.steps.len(),
            elapsed_ms = self.stats.elapsed.as_millis() as u64,
            "plan run finished"
        );
        self.stats
    }
}

/// Run every step of `plan` in order, partitions concurrently on the
/// blocking pool of the current tokio runtime.
pub async fn run_plan(plan: Arc<ExecutablePlan>, ctx: RunContext) -> Result<JobStats> {
    let mut run = PlanRun::new(&plan, &ctx);
    for original in plan.physical.steps() {
        let prepared = run.prepare(original)?;
        let step = Arc::new(prepared.step.clone());
        let tasks = (0..prepared.partitions)
            .map(|partition| {
                let step = Arc::clone(&step);
                let exchange = Arc::clone(&run.exchange);
                let registry = Arc::clone(&ctx.registry);
                let partitions = prepared.partitions;
                tokio::task::spawn_blocking(move || {
                    run_partition(&step, partition, partitions, &exchange, &registry)
                })
            })
            .collect::<Vec<_>>();
        let mut outputs = Vec::with_capacity(tasks.len());
        for task in tasks {
            let output = task.await.map_err(|e| {
                FlowError::Execution(format!("step {} partition task failed: {e}", step.id))
            })??;
            outputs.push(output);
        }
        drop(step);
        run.finish_step(prepared, outputs);
    }
    Ok(run.finish())
}

/// Run every step of `plan` on the calling thread, one partition at a time.
pub fn run_plan_inline(plan: &ExecutablePlan, ctx: &RunContext) -> Result<JobStats> {
    let mut run = PlanRun::new(plan, ctx);
    for original in plan.physical.steps() {
        let prepared = run.prepare(original)?;
        let outputs = (0..prepared.partitions)
            .map(|partition| {
                run_partition(
                    &prepared.step,
                    partition,
                    prepared.partitions,
                    &run.exchange,
                    &ctx.registry,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        run.finish_step(prepared, outputs);
    }
    Ok(run.finish())
}

fn run_partition(
    step: &PhysicalStep,
    partition: usize,
    partitions: usize,
    exchange: &Exchange,
    registry: &OperatorRegistry,
) -> Result<PartitionOutput> {
    let mut local: HashMap<StageId, StageData> = HashMap::new();
    let mut out = PartitionOutput::default();
    for vertex in &step.vertices {
        match vertex {
            StepVertex::Plumbing(PlumbingVertex {
                stage,
                kind: PlumbingKind::ShuffleRead { from },
            }) => {
                let published = exchange.get(stage).ok_or_else(|| {
                    FlowError::Execution(format!(
                        "step {} reads stage {stage} before step {from} published it",
                        step.id
                    ))
                })?;
                let data = published.partition(partition, partitions)?;
                out.rows_in += data.num_rows();
                local.insert(*stage, data);
            }
            StepVertex::Plumbing(PlumbingVertex {
                stage,
                kind: PlumbingKind::ShuffleWrite,
            }) => {
                let data = local.get(stage).cloned().ok_or_else(|| {
                    FlowError::Execution(format!(
                        "step {} writes stage {stage} before computing it",
                        step.id
                    ))
                })?;
                out.rows_out += data.num_rows();
                out.shuffles.push((*stage, data));
            }
            StepVertex::Stage(vertex) => {
                let data = eval_stage(vertex, &local, partition, partitions, registry)?;
                match &vertex.kind {
                    StageKind::Source { .. } => out.rows_in += data.num_rows(),
                    StageKind::Sink { table } => {
                        out.rows_out += data.num_rows();
                        out.sinks.push((table.clone(), data.clone()));
                    }
                    _ => {}
                }
                local.insert(vertex.stage, data);
            }
        }
    }
    Ok(out)
}

fn eval_stage(
    vertex: &StageVertex,
    local: &HashMap<StageId, StageData>,
    partition: usize,
    partitions: usize,
    registry: &OperatorRegistry,
) -> Result<StageData> {
    let input = |i: usize| stage_input(vertex, local, i);
    match &vertex.kind {
        StageKind::Source { column, rows } => {
            let values = rows
                .iter()
                .filter(|r| partitions <= 1 || partition_of(r, partitions) == partition)
                .cloned()
                .collect::<Vec<_>>();
            StageData::from_values(utf8_schema(column), &values)
        }
        StageKind::Map { operator, options } => {
            let input = input(0)?;
            let factory = registry.get(operator).ok_or_else(|| {
                FlowError::Execution(format!(
                    "stage '{}' uses unknown operator '{operator}'",
                    vertex.name
                ))
            })?;
            let (schema, batches) =
                factory.execute(input.schema.clone(), input.batches.clone(), options)?;
            Ok(StageData { schema, batches })
        }
        StageKind::Filter { op, value } => {
            let input = input(0)?;
            let kept = input
                .values()?
                .into_iter()
                .filter(|row| op.matches(row, value))
                .collect::<Vec<_>>();
            StageData::from_values(input.schema.clone(), &kept)
        }
        StageKind::Distinct => {
            let input = input(0)?;
            let mut seen = HashSet::new();
            let kept = input
                .values()?
                .into_iter()
                .filter(|row| seen.insert(row.clone()))
                .collect::<Vec<_>>();
            StageData::from_values(input.schema.clone(), &kept)
        }
        StageKind::Merge => {
            let first = input(0)?;
            let mut merged = StageData {
                schema: first.schema.clone(),
                batches: Vec::new(),
            };
            for i in 0..vertex.inputs.len() {
                merged.batches.extend(input(i)?.batches.iter().cloned());
            }
            Ok(merged)
        }
        StageKind::Sink { .. } => input(0).cloned(),
    }
}

fn stage_input<'a>(
    vertex: &StageVertex,
    local: &'a HashMap<StageId, StageData>,
    i: usize,
) -> Result<&'a StageData> {
    vertex
        .inputs
        .get(i)
        .and_then(|id| local.get(id))
        .ok_or_else(|| {
            FlowError::Execution(format!(
                "stage '{}' input {i} is not available in this step",
                vertex.name
            ))
        })
}

fn partition_of(value: &str, partitions: usize) -> usize {
    let mut h = DefaultHasher::new();
    value.hash(&mut h);
    (h.finish() % partitions as u64) as usize
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use flowplan_common::{PlanId, RuntimeConfig};
    use flowplan_execution::{strategy_fn, Backend};
    use flowplan_planner::{create_physical_plan, CompareOp, GraphBuilder, PhysicalPlannerConfig};

    use super::*;

    fn ctx() -> RunContext {
        RunContext {
            backend: "test".to_string(),
            registry: Arc::new(OperatorRegistry::with_builtins()),
            metrics: MetricsRegistry::new(),
        }
    }

    fn executable(builder: &GraphBuilder, config: RuntimeConfig) -> ExecutablePlan {
        let physical =
            create_physical_plan(&builder.build(), &PhysicalPlannerConfig::default()).expect("plan");
        ExecutablePlan::new(PlanId("test".to_string()), config, physical)
    }

    fn sorted(mut values: Vec<String>) -> Vec<String> {
        values.sort();
        values
    }

    #[test]
    fn runs_map_filter_and_sink_in_one_step() {
        let mut b = GraphBuilder::new();
        let s = b.source("words", "word", ["apple", "avocado", "banana"]);
        let m = b.map(s, "up", "upper", BTreeMap::new());
        let f = b.filter(m, "a-only", CompareOp::StartsWith, "A");
        b.sink(f, "out");

        let stats = run_plan_inline(&executable(&b, RuntimeConfig::new()), &ctx()).expect("run");
        assert_eq!(stats.sink_values("out"), vec!["APPLE", "AVOCADO"]);
        assert_eq!(stats.steps.len(), 1);
        assert_eq!(stats.steps[0].rows_in, 3);
        assert_eq!(stats.steps[0].rows_out, 2);
    }

    #[test]
    fn distinct_across_partitions_is_global() {
        let mut b = GraphBuilder::new();
        let left = b.source("left", "v", ["a", "b", "c", "a"]);
        let right = b.source("right", "v", ["c", "d", "b"]);
        let merged = b.merge(&[left, right], "all");
        let d = b.distinct(merged, "dedup");
        b.sink(d, "out");

        let config = RuntimeConfig::new().with(keys::STEP_PARALLELISM, "3");
        let stats = run_plan_inline(&executable(&b, config), &ctx()).expect("run");

        assert_eq!(sorted(stats.sink_values("out")), vec!["a", "b", "c", "d"]);
        assert_eq!(stats.steps.len(), 2);
        assert_eq!(stats.steps[0].partitions, 1);
        assert_eq!(stats.steps[0].rows_out, 7);
        assert_eq!(stats.steps[1].partitions, 3);
        assert_eq!(stats.steps[1].rows_in, 7);
    }

    #[test]
    fn installed_strategy_sees_a_per_run_copy() {
        let mut b = GraphBuilder::new();
        let s = b.source("in", "v", ["x", "y", "x"]);
        let d = b.distinct(s, "dedup");
        b.sink(d, "out");

        let mut plan = executable(&b, RuntimeConfig::new());
        let strategy = strategy_fn("two-partitions", |_, _, step| {
            if step.reads_shuffle() {
                step.config
                    .insert(keys::STEP_PARALLELISM.to_string(), "2".to_string());
            }
            Ok(())
        });
        crate::LocalCluster::new(crate::ClusterConfig::default())
            .expect("cluster")
            .install_strategy(&mut plan, strategy)
            .expect("install");

        let stats = run_plan_inline(&plan, &ctx()).expect("run");
        assert_eq!(stats.steps[1].partitions, 2);
        assert_eq!(
            stats.steps[1].config.get(keys::STEP_PARALLELISM).map(String::as_str),
            Some("2")
        );
        assert!(plan.physical.steps()[1].config.is_empty());
        assert_eq!(sorted(stats.sink_values("out")), vec!["x", "y"]);
    }

    #[test]
    fn invalid_parallelism_fails_the_run() {
        let mut b = GraphBuilder::new();
        let s = b.source("in", "v", ["x"]);
        let d = b.distinct(s, "dedup");
        b.sink(d, "out");

        let config = RuntimeConfig::new().with(keys::STEP_PARALLELISM, "zero");
        let err = run_plan_inline(&executable(&b, config), &ctx()).expect_err("invalid");
        assert!(matches!(err, FlowError::InvalidConfig(_)), "{err}");
    }
}
