use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Well-known runtime configuration keys.
///
/// Every key lives under the `flowplan.` namespace so entries never collide
/// with unrelated configuration carried in the same map.
pub mod keys {
    /// Namespace prefix shared by all flowplan keys.
    pub const NAMESPACE: &str = "flowplan.";
    /// Derived plan identity, written by the plan builder.
    pub const PLAN_ID: &str = "flowplan.plan.id";
    /// Human-facing plan name used in step display names.
    pub const PLAN_NAME: &str = "flowplan.plan.name";
    /// Provenance identifier written into a step's config by annotation.
    pub const STEP_DESCRIPTIONS: &str = "flowplan.step.descriptions";
    /// Comma separated step strategy names, resolved against the strategy registry.
    pub const STEP_STRATEGIES: &str = "flowplan.step.strategies";
    /// Partition count hint for steps that read a shuffle.
    pub const STEP_PARALLELISM: &str = "flowplan.step.parallelism";
    /// `i/N` position of a step, written by the `step-tags` strategy.
    pub const STEP_ORDINAL: &str = "flowplan.step.ordinal";
    /// Comma separated predecessor step ids, written by the `step-tags` strategy.
    pub const STEP_PREDECESSORS: &str = "flowplan.step.predecessors";
}

/// Immutable, namespaced key/value configuration.
///
/// Extension is copy-on-write: [`RuntimeConfig::with`] returns a new value and
/// leaves the receiver untouched, so a caller-held config can be shared by
/// concurrent builds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    entries: Arc<BTreeMap<String, String>>,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Arc::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Derived copy with `key` set to `value`.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = Arc::clone(&self.entries);
        Arc::make_mut(&mut entries).insert(key.into(), value.into());
        Self { entries }
    }

    /// Derived copy without `key`.
    #[must_use]
    pub fn without(&self, key: &str) -> Self {
        if !self.entries.contains_key(key) {
            return self.clone();
        }
        let mut entries = Arc::clone(&self.entries);
        Arc::make_mut(&mut entries).remove(key);
        Self { entries }
    }

    /// Derived copy with every entry of `other` layered on top of `self`.
    #[must_use]
    pub fn merged(&self, other: &RuntimeConfig) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let mut entries = Arc::clone(&self.entries);
        let map = Arc::make_mut(&mut entries);
        for (k, v) in other.iter() {
            map.insert(k.to_string(), v.to_string());
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Parse `key` as a positive integer.
    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => parse_positive(key, raw).map(Some),
        }
    }

    /// Comma separated list under `key`, trimmed, empty items dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse `raw` as a positive integer, naming `key` in the error.
pub fn parse_positive(key: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(FlowError::InvalidConfig(format!(
            "{key} must be a positive integer, got '{raw}'"
        ))),
    }
}

/// Engine-level configuration.
///
/// `runtime` entries seed every plan context created by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Plan name used in step display names (`(1/2) <plan_name>`).
    pub plan_name: String,
    /// Worker threads owned by the local cluster backend.
    pub worker_threads: usize,
    /// Default `flowplan.step.parallelism`.
    pub default_parallelism: usize,
    /// Extra runtime entries applied to every plan.
    pub runtime: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plan_name: "flowplan".to_string(),
            worker_threads: 4,
            default_parallelism: 2,
            runtime: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON document; absent fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw).map_err(|e| {
            FlowError::InvalidConfig(format!(
                "engine config {}: {e}",
                path.as_ref().display()
            ))
        })
    }

    /// Apply `FLOWPLAN_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    ///
    /// Recognized: `FLOWPLAN_PLAN_NAME`, `FLOWPLAN_WORKER_THREADS`,
    /// `FLOWPLAN_DEFAULT_PARALLELISM`, `FLOWPLAN_STEP_STRATEGIES`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(name) = lookup("FLOWPLAN_PLAN_NAME") {
            self.plan_name = name;
        }
        if let Some(raw) = lookup("FLOWPLAN_WORKER_THREADS") {
            self.worker_threads = parse_positive("FLOWPLAN_WORKER_THREADS", &raw)?;
        }
        if let Some(raw) = lookup("FLOWPLAN_DEFAULT_PARALLELISM") {
            self.default_parallelism = parse_positive("FLOWPLAN_DEFAULT_PARALLELISM", &raw)?;
        }
        if let Some(names) = lookup("FLOWPLAN_STEP_STRATEGIES") {
            self.runtime.insert(keys::STEP_STRATEGIES.to_string(), names);
        }
        Ok(self)
    }

    /// Runtime config seeded from this engine config.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::from_entries([
            (keys::PLAN_NAME.to_string(), self.plan_name.clone()),
            (
                keys::STEP_PARALLELISM.to_string(),
                self.default_parallelism.to_string(),
            ),
        ])
        .merged(&RuntimeConfig::from_entries(self.runtime.clone()))
    }
}
