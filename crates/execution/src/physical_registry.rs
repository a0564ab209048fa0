use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use flowplan_common::{FlowError, Result};

/// Factory contract for `Map` stage operators.
///
/// Implementations consume the batches of one partition and produce a new
/// schema plus output batches.
pub trait OperatorFactory: Send + Sync {
    /// Stable operator name referenced by `StageKind::Map.operator`.
    fn name(&self) -> &str;

    fn execute(
        &self,
        input_schema: SchemaRef,
        input_batches: Vec<RecordBatch>,
        options: &BTreeMap<String, String>,
    ) -> Result<(SchemaRef, Vec<RecordBatch>)>;
}

pub type SharedOperatorFactory = Arc<dyn OperatorFactory>;

/// Registry of operator factories available to a backend.
#[derive(Default)]
pub struct OperatorRegistry {
    inner: RwLock<HashMap<String, SharedOperatorFactory>>,
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.read().map(|m| m.len()).unwrap_or_default();
        f.debug_struct("OperatorRegistry")
            .field("factories", &count)
            .finish()
    }
}

impl OperatorRegistry {
    /// Registry pre-loaded with `identity`, `upper`, `lower` and `prefix`.
    pub fn with_builtins() -> Self {
        let registry = Self::default();
        registry.register(Arc::new(Utf8MapOperator::new("identity", |v, _| v.to_string())));
        registry.register(Arc::new(Utf8MapOperator::new("upper", |v, _| v.to_uppercase())));
        registry.register(Arc::new(Utf8MapOperator::new("lower", |v, _| v.to_lowercase())));
        registry.register(Arc::new(Utf8MapOperator::new("prefix", |v, options| {
            let prefix = options.get("prefix").map(String::as_str).unwrap_or_default();
            format!("{prefix}{v}")
        })));
        registry
    }

    /// Register or replace a factory.
    ///
    /// Returns `true` when an existing factory with the same name was replaced.
    pub fn register(&self, factory: SharedOperatorFactory) -> bool {
        self.inner
            .write()
            .expect("operator registry lock poisoned")
            .insert(factory.name().to_string(), factory)
            .is_some()
    }

    /// Returns `true` when an existing factory was removed.
    pub fn deregister(&self, name: &str) -> bool {
        self.inner
            .write()
            .expect("operator registry lock poisoned")
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<SharedOperatorFactory> {
        self.inner
            .read()
            .expect("operator registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("operator registry lock poisoned")
            .contains_key(name)
    }

    /// Registered factory names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .inner
            .read()
            .expect("operator registry lock poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

type Utf8Fn = dyn Fn(&str, &BTreeMap<String, String>) -> String + Send + Sync;

/// Maps the first utf8 column value by value; null stays null.
pub struct Utf8MapOperator {
    name: String,
    f: Box<Utf8Fn>,
}

impl Utf8MapOperator {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&str, &BTreeMap<String, String>) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            f: Box::new(f),
        }
    }
}

impl OperatorFactory for Utf8MapOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        input_schema: SchemaRef,
        input_batches: Vec<RecordBatch>,
        options: &BTreeMap<String, String>,
    ) -> Result<(SchemaRef, Vec<RecordBatch>)> {
        let mut out = Vec::with_capacity(input_batches.len());
        for batch in &input_batches {
            let col = first_utf8_column(batch, &self.name)?;
            let mapped = col
                .iter()
                .map(|v| v.map(|v| (self.f)(v, options)))
                .collect::<StringArray>();
            out.push(
                RecordBatch::try_new(input_schema.clone(), vec![Arc::new(mapped) as ArrayRef])
                    .map_err(|e| FlowError::Execution(format!("operator '{}': {e}", self.name)))?,
            );
        }
        Ok((input_schema, out))
    }
}

fn first_utf8_column<'a>(batch: &'a RecordBatch, operator: &str) -> Result<&'a StringArray> {
    if batch.num_columns() == 0 {
        return Err(FlowError::Execution(format!(
            "operator '{operator}' received a batch without columns"
        )));
    }
    batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| {
            FlowError::Execution(format!(
                "operator '{operator}' expects a utf8 column, got {}",
                batch.column(0).data_type()
            ))
        })
}

/// Single nullable utf8 column schema.
pub fn utf8_schema(column: &str) -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new(column, DataType::Utf8, true)]))
}

/// One-column utf8 batch.
pub fn utf8_batch<S: AsRef<str>>(schema: SchemaRef, values: &[S]) -> Result<RecordBatch> {
    let array = values.iter().map(|v| Some(v.as_ref())).collect::<StringArray>();
    RecordBatch::try_new(schema, vec![Arc::new(array) as ArrayRef])
        .map_err(|e| FlowError::Execution(format!("build utf8 batch: {e}")))
}

/// Non-null values of the first utf8 column, in row order.
pub fn utf8_values(batch: &RecordBatch) -> Result<Vec<String>> {
    let col = first_utf8_column(batch, "utf8_values")?;
    Ok(col.iter().flatten().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingOperator;

    impl OperatorFactory for CountingOperator {
        fn name(&self) -> &str {
            "count"
        }

        fn execute(
            &self,
            _input_schema: SchemaRef,
            input_batches: Vec<RecordBatch>,
            _options: &BTreeMap<String, String>,
        ) -> Result<(SchemaRef, Vec<RecordBatch>)> {
            let rows = input_batches.iter().map(RecordBatch::num_rows).sum::<usize>();
            let schema = utf8_schema("count");
            let batch = utf8_batch(schema.clone(), &[rows.to_string()])?;
            Ok((schema, vec![batch]))
        }
    }

    #[test]
    fn builtins_map_first_column() {
        let registry = OperatorRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["identity", "lower", "prefix", "upper"]);

        let schema = utf8_schema("word");
        let batch = utf8_batch(schema.clone(), &["ab", "Cd"]).expect("batch");

        let upper = registry.get("upper").expect("upper");
        let (_, out) = upper
            .execute(schema.clone(), vec![batch.clone()], &BTreeMap::new())
            .expect("upper");
        assert_eq!(utf8_values(&out[0]).expect("values"), vec!["AB", "CD"]);

        let mut options = BTreeMap::new();
        options.insert("prefix".to_string(), "x-".to_string());
        let (_, out) = registry
            .get("prefix")
            .expect("prefix")
            .execute(schema, vec![batch], &options)
            .expect("prefix");
        assert_eq!(utf8_values(&out[0]).expect("values"), vec!["x-ab", "x-Cd"]);
    }

    #[test]
    fn register_replace_and_deregister() {
        let registry = OperatorRegistry::default();
        assert!(!registry.register(Arc::new(CountingOperator)));
        assert!(registry.register(Arc::new(CountingOperator)));
        assert!(registry.contains("count"));
        assert!(registry.deregister("count"));
        assert!(!registry.deregister("count"));
        assert!(registry.get("count").is_none());
    }
}
