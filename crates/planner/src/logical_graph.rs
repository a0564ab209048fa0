//! Backend-independent logical dataflow graphs and the authoring builder.

use std::collections::BTreeMap;

use flowplan_common::{FlowError, Result, StageId};
use serde::{Deserialize, Serialize};

/// Row predicate used by filter stages. Rows are single utf8 values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    StartsWith,
    Contains,
}

impl CompareOp {
    pub fn matches(&self, row: &str, value: &str) -> bool {
        match self {
            CompareOp::Eq => row == value,
            CompareOp::NotEq => row != value,
            CompareOp::StartsWith => row.starts_with(value),
            CompareOp::Contains => row.contains(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    /// In-memory rows exposed under a single utf8 column.
    Source { column: String, rows: Vec<String> },
    /// Registered operator applied batch-wise; resolved by the backend.
    Map {
        operator: String,
        options: BTreeMap<String, String>,
    },
    Filter { op: CompareOp, value: String },
    /// Exact-duplicate removal. Requires a shuffle, so it always opens a new step.
    Distinct,
    /// Union of all inputs.
    Merge,
    /// Named in-memory sink; results are reported in the job stats.
    Sink { table: String },
}

impl StageKind {
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Source { .. } => "Source",
            StageKind::Map { .. } => "Map",
            StageKind::Filter { .. } => "Filter",
            StageKind::Distinct => "Distinct",
            StageKind::Merge => "Merge",
            StageKind::Sink { .. } => "Sink",
        }
    }

    /// Whether the stage consumes its input through a shuffle boundary.
    pub fn reads_shuffle(&self) -> bool {
        matches!(self, StageKind::Distinct)
    }
}

/// One named processing stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    pub kind: StageKind,
    /// Upstream stages in wiring order.
    pub inputs: Vec<StageId>,
    /// Human-authored descriptions in attachment order. Duplicates are kept.
    pub descriptions: Vec<String>,
}

/// Immutable directed graph of stages, in authoring order.
///
/// Equality is structural, so two independently authored graphs with the
/// same stages compare (and hash into plan identities) equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalGraph {
    stages: Vec<Stage>,
}

impl LogicalGraph {
    /// Wrap stages as-is. No validation happens here; backends reject
    /// malformed graphs when compiling.
    pub fn from_stages(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn sinks(&self) -> impl Iterator<Item = &Stage> {
        self.stages
            .iter()
            .filter(|s| matches!(s.kind, StageKind::Sink { .. }))
    }

    /// Stages that list `id` among their inputs.
    pub fn consumers(&self, id: StageId) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(move |s| s.inputs.contains(&id))
    }
}

/// Authoring-side graph builder.
///
/// Stage ids are handed out in call order and are what later calls wire
/// against; `describe` attaches provenance text to an existing stage.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    stages: Vec<Stage>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: &str, kind: StageKind, inputs: Vec<StageId>) -> StageId {
        let id = StageId(self.stages.len() as u32);
        self.stages.push(Stage {
            id,
            name: name.to_string(),
            kind,
            inputs,
            descriptions: Vec::new(),
        });
        id
    }

    pub fn source<I, S>(&mut self, name: &str, column: &str, rows: I) -> StageId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind = StageKind::Source {
            column: column.to_string(),
            rows: rows.into_iter().map(Into::into).collect(),
        };
        self.push(name, kind, vec![])
    }

    pub fn map(
        &mut self,
        input: StageId,
        name: &str,
        operator: &str,
        options: BTreeMap<String, String>,
    ) -> StageId {
        let kind = StageKind::Map {
            operator: operator.to_string(),
            options,
        };
        self.push(name, kind, vec![input])
    }

    pub fn filter(&mut self, input: StageId, name: &str, op: CompareOp, value: &str) -> StageId {
        let kind = StageKind::Filter {
            op,
            value: value.to_string(),
        };
        self.push(name, kind, vec![input])
    }

    pub fn distinct(&mut self, input: StageId, name: &str) -> StageId {
        self.push(name, StageKind::Distinct, vec![input])
    }

    pub fn merge(&mut self, inputs: &[StageId], name: &str) -> StageId {
        self.push(name, StageKind::Merge, inputs.to_vec())
    }

    pub fn sink(&mut self, input: StageId, table: &str) -> StageId {
        let kind = StageKind::Sink {
            table: table.to_string(),
        };
        self.push(table, kind, vec![input])
    }

    /// Attach a description to `stage`.
    pub fn describe(&mut self, stage: StageId, description: impl Into<String>) -> Result<()> {
        let target = self
            .stages
            .iter_mut()
            .find(|s| s.id == stage)
            .ok_or_else(|| FlowError::Planning(format!("cannot describe unknown stage {stage}")))?;
        target.descriptions.push(description.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Snapshot the graph authored so far.
    pub fn build(&self) -> LogicalGraph {
        LogicalGraph::from_stages(self.stages.clone())
    }
}
