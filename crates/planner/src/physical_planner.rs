use std::collections::{BTreeMap, BTreeSet, HashMap};

use flowplan_common::{keys, FlowError, PlanId, Result, RuntimeConfig, StageId, StepId};
use tracing::debug;

use crate::logical_graph::{LogicalGraph, Stage, StageKind};
use crate::physical_plan::{
    PhysicalPlan, PhysicalStep, PlumbingKind, PlumbingVertex, StageVertex, StepVertex,
};

const DEFAULT_PLAN_NAME: &str = "flowplan";

#[derive(Debug, Clone)]
pub struct PhysicalPlannerConfig {
    /// Identity stamped onto the compiled plan.
    pub plan_id: PlanId,
    /// Name used in step display names.
    pub plan_name: String,
}

impl PhysicalPlannerConfig {
    /// Read plan id and name from a runtime config.
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            plan_id: PlanId(config.get(keys::PLAN_ID).unwrap_or_default().to_string()),
            plan_name: config
                .get(keys::PLAN_NAME)
                .unwrap_or(DEFAULT_PLAN_NAME)
                .to_string(),
        }
    }
}

impl Default for PhysicalPlannerConfig {
    fn default() -> Self {
        Self {
            plan_id: PlanId::default(),
            plan_name: DEFAULT_PLAN_NAME.to_string(),
        }
    }
}

/// Cut a logical graph into physical steps.
///
/// Contracts:
/// - stages connected by non-shuffle edges share a step;
/// - a shuffle-reading stage (`Distinct`) opens a step of its own, fed by a
///   `ShuffleRead` plumbing vertex, and its producer gets a `ShuffleWrite`;
/// - a non-shuffle edge that crosses a shuffle depth is cut into an exchange
///   the same way, so a stage can be merged with its own distinct output;
/// - steps are emitted in dependency order and named `(i/N) <plan name>`;
/// - malformed graphs (empty, no sink, dangling input, wrong arity, cycle)
///   return a planning error.
pub fn create_physical_plan(
    graph: &LogicalGraph,
    cfg: &PhysicalPlannerConfig,
) -> Result<PhysicalPlan> {
    if graph.is_empty() {
        return Err(FlowError::Planning(
            "logical graph has no stages".to_string(),
        ));
    }
    let stages = graph.stages();
    let index = index_stages(stages)?;
    for stage in stages {
        check_wiring(stage, &index)?;
    }
    if graph.sinks().next().is_none() {
        return Err(FlowError::Planning(
            "logical graph has no sink stage".to_string(),
        ));
    }
    let order = topo_order(stages, &index)?;

    // Shuffle depth: how many shuffle boundaries sit above a stage. Stages
    // only share a step with same-depth neighbours, so every cross-step edge
    // points to a deeper step and the step graph stays acyclic.
    let mut depth = vec![0usize; stages.len()];
    for &i in &order {
        let stage = &stages[i];
        let above = stage
            .inputs
            .iter()
            .map(|input| depth[index[input]])
            .max()
            .unwrap_or(0);
        depth[i] = above + usize::from(stage.kind.reads_shuffle());
    }

    let mut groups = UnionFind::new(stages.len());
    for (i, stage) in stages.iter().enumerate() {
        if stage.kind.reads_shuffle() {
            continue;
        }
        for input in &stage.inputs {
            let j = index[input];
            if depth[i] == depth[j] {
                groups.union(i, j);
            }
        }
    }

    // Components in order of first appearance along the stage topo order.
    let mut component_of_root = HashMap::new();
    let mut component_of = vec![0usize; stages.len()];
    let mut components: Vec<Vec<usize>> = Vec::new();
    for &i in &order {
        let root = groups.find(i);
        let c = *component_of_root.entry(root).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[c].push(i);
        component_of[i] = c;
    }

    let mut upstream: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    let mut published = vec![false; stages.len()];
    for (i, stage) in stages.iter().enumerate() {
        for input in &stage.inputs {
            let j = index[input];
            if component_of[i] != component_of[j] {
                upstream[component_of[i]].insert(component_of[j]);
                published[j] = true;
            }
        }
    }
    let step_order = order_components(&upstream)?;
    let mut step_of_component = vec![StepId(0); components.len()];
    for (pos, &c) in step_order.iter().enumerate() {
        step_of_component[c] = StepId(pos as u32);
    }

    let total = step_order.len();
    let mut steps = Vec::with_capacity(total);
    for (pos, &c) in step_order.iter().enumerate() {
        let mut vertices = Vec::new();
        let mut read = BTreeSet::new();
        for &i in &components[c] {
            let stage = &stages[i];
            for input in &stage.inputs {
                let j = index[input];
                if component_of[j] != c && read.insert(*input) {
                    vertices.push(StepVertex::Plumbing(PlumbingVertex {
                        stage: *input,
                        kind: PlumbingKind::ShuffleRead {
                            from: step_of_component[component_of[j]],
                        },
                    }));
                }
            }
            vertices.push(StepVertex::Stage(StageVertex {
                stage: stage.id,
                name: stage.name.clone(),
                kind: stage.kind.clone(),
                inputs: stage.inputs.clone(),
                descriptions: stage.descriptions.clone(),
            }));
            if published[i] {
                vertices.push(StepVertex::Plumbing(PlumbingVertex {
                    stage: stage.id,
                    kind: PlumbingKind::ShuffleWrite,
                }));
            }
        }
        let mut predecessors = upstream[c]
            .iter()
            .map(|u| step_of_component[*u])
            .collect::<Vec<_>>();
        predecessors.sort();
        steps.push(PhysicalStep {
            id: StepId(pos as u32),
            ordinal: pos + 1,
            name: format!("({}/{}) {}", pos + 1, total, cfg.plan_name),
            config: BTreeMap::new(),
            predecessors,
            vertices,
        });
    }

    debug!(
        plan_id = %cfg.plan_id,
        stages = stages.len(),
        steps = total,
        "cut logical graph into physical steps"
    );
    Ok(PhysicalPlan {
        plan_id: cfg.plan_id.clone(),
        name: cfg.plan_name.clone(),
        steps,
    })
}

fn index_stages(stages: &[Stage]) -> Result<HashMap<StageId, usize>> {
    let mut index = HashMap::with_capacity(stages.len());
    for (i, stage) in stages.iter().enumerate() {
        if index.insert(stage.id, i).is_some() {
            return Err(FlowError::Planning(format!(
                "duplicate stage id {}",
                stage.id
            )));
        }
    }
    Ok(index)
}

fn check_wiring(stage: &Stage, index: &HashMap<StageId, usize>) -> Result<()> {
    for input in &stage.inputs {
        if !index.contains_key(input) {
            return Err(FlowError::Planning(format!(
                "stage '{}' reads unknown stage {input}",
                stage.name
            )));
        }
    }
    let arity_ok = match &stage.kind {
        StageKind::Source { .. } => stage.inputs.is_empty(),
        StageKind::Merge => !stage.inputs.is_empty(),
        _ => stage.inputs.len() == 1,
    };
    if !arity_ok {
        return Err(FlowError::Planning(format!(
            "{} stage '{}' cannot take {} input(s)",
            stage.kind.label(),
            stage.name,
            stage.inputs.len()
        )));
    }
    Ok(())
}

// Kahn's algorithm; ties broken by authoring order so plans are stable.
fn topo_order(stages: &[Stage], index: &HashMap<StageId, usize>) -> Result<Vec<usize>> {
    let mut indegree = vec![0usize; stages.len()];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    for (i, stage) in stages.iter().enumerate() {
        for input in &stage.inputs {
            indegree[i] += 1;
            downstream[index[input]].push(i);
        }
    }
    let mut ready = (0..stages.len())
        .filter(|i| indegree[*i] == 0)
        .collect::<BTreeSet<_>>();
    let mut order = Vec::with_capacity(stages.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &downstream[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.insert(d);
            }
        }
    }
    if order.len() != stages.len() {
        let stuck = stages
            .iter()
            .enumerate()
            .find(|(i, _)| indegree[*i] > 0)
            .map(|(_, s)| s.name.as_str())
            .unwrap_or_default();
        return Err(FlowError::Planning(format!(
            "logical graph contains a cycle through stage '{stuck}'"
        )));
    }
    Ok(order)
}

fn order_components(upstream: &[BTreeSet<usize>]) -> Result<Vec<usize>> {
    let mut indegree = upstream.iter().map(BTreeSet::len).collect::<Vec<_>>();
    let mut ready = (0..upstream.len())
        .filter(|c| indegree[*c] == 0)
        .collect::<BTreeSet<_>>();
    let mut order = Vec::with_capacity(upstream.len());
    while let Some(c) = ready.pop_first() {
        order.push(c);
        for (d, ups) in upstream.iter().enumerate() {
            if ups.contains(&c) {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    ready.insert(d);
                }
            }
        }
    }
    if order.len() != upstream.len() {
        return Err(FlowError::Planning(
            "shuffle boundaries form a cycle between steps".to_string(),
        ));
    }
    Ok(order)
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index wins so component roots are deterministic.
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }
}
