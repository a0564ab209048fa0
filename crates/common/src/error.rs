use std::sync::Arc;

use thiserror::Error;

/// Canonical flowplan error taxonomy used across crates.
///
/// Classification guidance:
/// - [`FlowError::Planning`]: the backend rejected the logical graph while compiling it
/// - [`FlowError::Execution`]: the backend failed while running a successfully built plan
/// - [`FlowError::Strategy`]: a step strategy raised while adjusting a step before it ran
/// - [`FlowError::InvalidConfig`]: runtime/engine configuration contract violations
/// - [`FlowError::Unsupported`]: the backend lacks a requested capability
/// - [`FlowError::BuildFailed`]: a run was requested for a plan whose build failed
#[derive(Debug, Error)]
pub enum FlowError {
    /// Invalid or inconsistent configuration.
    ///
    /// Examples:
    /// - unknown step strategy name in `flowplan.step.strategies`
    /// - non-numeric `flowplan.step.parallelism`
    /// - malformed engine config file
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Compile failures raised by a backend.
    ///
    /// Examples:
    /// - stage input referencing a stage that does not exist
    /// - cycle in the logical graph
    /// - map stage naming an operator the backend does not know
    #[error("planning error: {0}")]
    Planning(String),

    /// Runtime failures after the build succeeded.
    #[error("execution error: {0}")]
    Execution(String),

    /// A step strategy failed. Sibling strategies still ran; this carries the
    /// first failure observed.
    #[error("step strategy '{strategy}' failed: {source}")]
    Strategy {
        /// Name of the failing strategy.
        strategy: String,
        /// What the strategy raised.
        source: Box<FlowError>,
    },

    /// Valid request the backend cannot honor.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The run was cancelled through the backend's native mechanism.
    #[error("run cancelled: {0}")]
    Cancelled(String),

    /// Run requested over a failed build. The original build cause is kept as
    /// the error source.
    #[error("build failed: {0}")]
    BuildFailed(#[source] Arc<FlowError>),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Innermost error, unwrapping build and strategy wrappers.
    pub fn root_cause(&self) -> &FlowError {
        match self {
            FlowError::BuildFailed(inner) => inner.root_cause(),
            FlowError::Strategy { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Standard flowplan result alias.
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn build_failed_keeps_original_cause_chain() {
        let cause = Arc::new(FlowError::Planning("unknown input stage 7".to_string()));
        let err = FlowError::BuildFailed(Arc::clone(&cause));

        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "planning error: unknown input stage 7");
        assert!(matches!(err.root_cause(), FlowError::Planning(_)));
    }

    #[test]
    fn strategy_failure_unwraps_to_strategy_cause() {
        let err = FlowError::Strategy {
            strategy: "parallelism".to_string(),
            source: Box::new(FlowError::InvalidConfig("bad".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "step strategy 'parallelism' failed: invalid configuration: bad"
        );
        assert!(matches!(err.root_cause(), FlowError::InvalidConfig(_)));
    }
}
