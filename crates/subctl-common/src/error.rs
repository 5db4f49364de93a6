//! Error types for subctl
//!
//! Errors are structured with fields so a failure can be diagnosed without
//! re-running: which step, which cluster, and the underlying cause.
//! Validation failures are kept apart from runtime failures because the CLI
//! reports them with a different exit code.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for subctl operations
#[derive(Debug, Error)]
pub enum Error {
    /// User input failed static validation
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// Description naming the offending value
        message: String,
    },

    /// The target cluster already holds state incompatible with the request
    #[error("conflicting state in namespace {namespace}: {message}")]
    ConflictingState {
        /// Namespace holding the conflicting record
        namespace: String,
        /// Description of the conflict
        message: String,
    },

    /// A concurrent writer modified the resource (HTTP 409)
    #[error("concurrent modification of {resource}: {message}")]
    Conflict {
        /// Resource that was being written (kind/name)
        resource: String,
        /// Message returned by the API server
        message: String,
    },

    /// A deployment pipeline step failed
    #[error("step '{step}' failed on cluster {cluster}: {source}")]
    StepFailure {
        /// The pipeline step that failed
        step: String,
        /// Cluster the pipeline was running against
        cluster: String,
        /// The underlying cause
        #[source]
        source: Box<Error>,
    },

    /// One or more clusters failed during a multi-cluster operation
    #[error("operation failed on {} cluster(s): {}", .failed.len(), format_failures(.failed))]
    ClusterFailures {
        /// (cluster name, failure message) for every failed cluster
        failed: Vec<(String, String)>,
    },

    /// The operation was cancelled or timed out
    #[error("cancelled: {operation}")]
    Cancelled {
        /// The operation that observed the cancellation
        operation: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Filesystem error
    #[error("io error: {source}")]
    Io {
        /// The underlying io error
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "collector")
        context: String,
    },
}

fn format_failures(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(cluster, message)| format!("{} ({})", cluster, message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Create an invalid configuration error naming the offending value
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: msg.into(),
        }
    }

    /// Create a conflicting state error for the given namespace
    pub fn conflicting_state(namespace: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ConflictingState {
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create a concurrent modification error
    pub fn conflict(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Wrap an error with the pipeline step and cluster it happened in
    pub fn step_failure(step: impl Into<String>, cluster: impl Into<String>, source: Error) -> Self {
        Self::StepFailure {
            step: step.into(),
            cluster: cluster.into(),
            source: Box::new(source),
        }
    }

    /// Create a cancellation error for the given operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Map a kube error for the given resource, turning 409 into [`Error::Conflict`]
    pub fn from_kube(resource: impl Into<String>, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                resource: resource.into(),
                message: ae.message,
            },
            other => Self::Kube { source: other },
        }
    }

    /// Check if the caller may retry the whole operation
    ///
    /// Validation and conflicting state require a configuration change.
    /// Concurrent modification conflicts are retryable by re-running.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::InvalidConfiguration { .. } => false,
            Error::ConflictingState { .. } => false,
            Error::Conflict { .. } => true,
            Error::StepFailure { source, .. } => source.is_retryable(),
            Error::ClusterFailures { .. } => true,
            Error::Cancelled { .. } => true,
            Error::Kube { .. } => self.is_transient(),
            Error::Io { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this is a transport-level failure that may succeed if repeated
    /// immediately: connection and stream errors, or a 5xx response. Never
    /// true for 4xx responses, malformed payloads or client configuration.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube { source } => matches!(
                source,
                kube::Error::Api(ae) if ae.code >= 500
            ) || matches!(
                source,
                kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::ReadEvents(_)
            ),
            _ => false,
        }
    }

    /// True if this error (or the cause of a step failure) is a validation failure
    pub fn is_invalid_configuration(&self) -> bool {
        match self {
            Error::InvalidConfiguration { .. } => true,
            Error::StepFailure { source, .. } => source.is_invalid_configuration(),
            _ => false,
        }
    }

    /// Get the step name if this error is a pipeline step failure
    pub fn step(&self) -> Option<&str> {
        match self {
            Error::StepFailure { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Get the names of the failed clusters for aggregated failures
    pub fn failed_clusters(&self) -> Vec<&str> {
        match self {
            Error::ClusterFailures { failed } => failed.iter().map(|(c, _)| c.as_str()).collect(),
            Error::StepFailure { cluster, .. } => vec![cluster.as_str()],
            _ => Vec::new(),
        }
    }
}
