use std::collections::BTreeMap;

use flowplan_common::{keys, PlanId, StageId, StepId};
use serde::{Deserialize, Serialize};

use crate::logical_graph::StageKind;

/// The compiled, schedulable form of a logical graph.
///
/// Steps are stored in execution order: every step appears after all of
/// its predecessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    /// Identity of the logical plan this was compiled from.
    pub plan_id: PlanId,
    /// Plan name used in step display names.
    pub name: String,
    /// Steps in execution order.
    pub steps: Vec<PhysicalStep>,
}

impl PhysicalPlan {
    pub fn steps(&self) -> &[PhysicalStep] {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut [PhysicalStep] {
        &mut self.steps
    }

    pub fn step(&self, id: StepId) -> Option<&PhysicalStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Steps feeding `step`, in the order `step` lists them.
    pub fn predecessors_of(&self, step: &PhysicalStep) -> Vec<&PhysicalStep> {
        step.predecessors
            .iter()
            .filter_map(|id| self.step(*id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One schedulable unit of a physical plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalStep {
    pub id: StepId,
    /// 1-based position in execution order.
    pub ordinal: usize,
    /// Display name, `"(ordinal/total) <plan name>"` as compiled.
    pub name: String,
    /// Step-local configuration read by the backend at run time.
    pub config: BTreeMap<String, String>,
    pub predecessors: Vec<StepId>,
    /// Internal stage subgraph, topologically ordered.
    pub vertices: Vec<StepVertex>,
}

impl PhysicalStep {
    /// Logical stage vertices, skipping plumbing.
    pub fn stage_vertices(&self) -> impl Iterator<Item = &StageVertex> {
        self.vertices.iter().filter_map(|v| match v {
            StepVertex::Stage(s) => Some(s),
            StepVertex::Plumbing(_) => None,
        })
    }

    pub fn reads_shuffle(&self) -> bool {
        self.vertices.iter().any(|v| {
            matches!(
                v,
                StepVertex::Plumbing(PlumbingVertex {
                    kind: PlumbingKind::ShuffleRead { .. },
                    ..
                })
            )
        })
    }

    /// Provenance identifier recorded by annotation, if any.
    pub fn descriptions(&self) -> Option<&str> {
        self.config
            .get(keys::STEP_DESCRIPTIONS)
            .map(String::as_str)
    }
}

/// A vertex of a step's internal stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepVertex {
    /// A human-authored logical stage compiled into this step.
    Stage(StageVertex),
    /// Internal exchange plumbing with no logical counterpart.
    Plumbing(PlumbingVertex),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageVertex {
    /// Logical stage this vertex was compiled from.
    pub stage: StageId,
    pub name: String,
    pub kind: StageKind,
    pub inputs: Vec<StageId>,
    /// Descriptions copied from the logical stage, attachment order.
    pub descriptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlumbingVertex {
    /// Stage whose output is moved across the boundary.
    pub stage: StageId,
    pub kind: PlumbingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlumbingKind {
    /// Publish `stage` output for downstream steps.
    ShuffleWrite,
    /// Read `stage` output published by step `from`.
    ShuffleRead { from: StepId },
}

impl PlumbingKind {
    pub fn label(&self) -> &'static str {
        match self {
            PlumbingKind::ShuffleWrite => "ShuffleWrite",
            PlumbingKind::ShuffleRead { .. } => "ShuffleRead",
        }
    }
}
