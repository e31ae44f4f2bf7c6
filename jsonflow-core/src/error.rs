//! Error types for JSONFlow

use thiserror::Error;

/// JSONFlow error types
#[derive(Debug, Error)]
pub enum FlowError {
    /// A line of input is not valid JSON or does not hold a record.
    #[error("Malformed input at line {line}: {reason}")]
    MalformedInput {
        /// 1-based line number in the source stream
        line: usize,
        /// Parser diagnostic
        reason: String,
    },
    /// An operator failed while processing a record or collection.
    #[error("Operator '{operator}' failed: {message}")]
    Operator {
        /// Name of the failing operator
        operator: String,
        /// Failure description
        message: String,
    },
    /// A batch-capable operator did not provide its batch implementation.
    #[error("Operator '{operator}' declares batch support but does not implement {method}()")]
    NotImplemented {
        /// Name of the operator
        operator: String,
        /// Missing method
        method: &'static str,
    },
    /// Invalid configuration detected while constructing a component.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Processing of one executor input failed.
    #[error("Execution failed for input #{index}: {source}")]
    Execution {
        /// Position of the failing input in the submitted sequence
        index: usize,
        /// Underlying failure
        #[source]
        source: Box<FlowError>,
    },
    /// A worker process terminated or violated the worker protocol.
    #[error("Worker error: {0}")]
    Worker(String),
    /// I/O operation failed while reading or writing data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing or serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Build an operator runtime error.
    pub fn operator(operator: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::Operator {
            operator: operator.into(),
            message: message.into(),
        }
    }

    /// Wrap an error with the executor input index it belongs to.
    pub fn at_index(self, index: usize) -> Self {
        match self {
            FlowError::Execution { .. } => self,
            other => FlowError::Execution {
                index,
                source: Box::new(other),
            },
        }
    }

    /// Executor input index for aggregation errors.
    pub fn index(&self) -> Option<usize> {
        match self {
            FlowError::Execution { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_index_wraps_once() {
        let err = FlowError::operator("upper", "boom").at_index(3).at_index(7);
        assert_eq!(err.index(), Some(3));
        assert!(err.to_string().contains("#3"));
        assert!(err.to_string().contains("upper"));
    }
}
