use std::collections::BTreeMap;
use std::time::Duration;

use arrow::array::{Array, StringArray};
use arrow::record_batch::RecordBatch;
use flowplan_common::{PlanId, StepId};

/// Per-step execution report.
#[derive(Debug, Clone)]
pub struct StepStats {
    pub step: StepId,
    pub ordinal: usize,
    pub name: String,
    /// Concurrent partitions the step ran as.
    pub partitions: usize,
    /// Rows read from sources and shuffles.
    pub rows_in: u64,
    /// Rows written to sinks and shuffles.
    pub rows_out: u64,
    pub elapsed: Duration,
    /// Step config as seen at run time, after strategies applied.
    pub config: BTreeMap<String, String>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default)]
pub struct JobStats {
    pub plan_id: PlanId,
    pub backend: String,
    pub steps: Vec<StepStats>,
    /// Sink table -> produced batches.
    pub outputs: BTreeMap<String, Vec<RecordBatch>>,
    pub elapsed: Duration,
}

impl JobStats {
    /// Utf8 values written to `table`, in arrival order.
    ///
    /// Arrival order across partitions is not deterministic; compare as a set
    /// when the producing step ran with more than one partition.
    pub fn sink_values(&self, table: &str) -> Vec<String> {
        let Some(batches) = self.outputs.get(table) else {
            return Vec::new();
        };
        let mut values = Vec::new();
        for batch in batches {
            if batch.num_columns() == 0 {
                continue;
            }
            if let Some(col) = batch.column(0).as_any().downcast_ref::<StringArray>() {
                values.extend(
                    (0..col.len())
                        .filter(|i| !col.is_null(*i))
                        .map(|i| col.value(i).to_string()),
                );
            }
        }
        values
    }

    pub fn sink_row_count(&self, table: &str) -> usize {
        self.outputs
            .get(table)
            .map(|batches| batches.iter().map(RecordBatch::num_rows).sum())
            .unwrap_or_default()
    }

    pub fn step(&self, id: StepId) -> Option<&StepStats> {
        self.steps.iter().find(|s| s.step == id)
    }

    /// One line per step, for logs and the CLI.
    pub fn report(&self) -> String {
        let mut out = format!(
            "plan_id={} backend={} elapsed_ms={}\n",
            self.plan_id.short(),
            self.backend,
            self.elapsed.as_millis()
        );
        for s in &self.steps {
            out.push_str(&format!(
                "step={} name=\"{}\" partitions={} rows_in={} rows_out={} elapsed_ms={}\n",
                s.step,
                s.name,
                s.partitions,
                s.rows_in,
                s.rows_out,
                s.elapsed.as_millis()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};

    use super::*;

    #[test]
    fn sink_values_reads_first_utf8_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from(vec![Some("a"), None, Some("c")]))],
        )
        .expect("batch");
        let mut stats = JobStats::default();
        stats.outputs.insert("out".to_string(), vec![batch]);

        assert_eq!(stats.sink_values("out"), vec!["a", "c"]);
        assert_eq!(stats.sink_row_count("out"), 3);
        assert!(stats.sink_values("missing").is_empty());
    }
}
