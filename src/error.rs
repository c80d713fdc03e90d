//! Error types for the NFD operator
//!
//! Provides structured error types for the reconciliation core, the store
//! adapters and the operator runtime.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Resource store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Resource store rejected {operation}: {reason}")]
    StoreRejected { operation: String, reason: String },

    // =========================================================================
    // Ownership Errors
    // =========================================================================
    #[error("Couldn't set owner reference for {kind}/{name}: {reason}")]
    Ownership {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::StoreUnavailable { .. }
            | Error::ResourceExists { .. } => ErrorAction::RequeueWithBackoff,

            // Permission problems need an RBAC change, no point hammering
            Error::StoreRejected { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Spec/config problems - wait for the user to change something
            Error::Ownership { .. } | Error::Configuration(_) => ErrorAction::NoRequeue,

            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::StoreUnavailable { .. } | Error::ResourceExists { .. }
        )
    }

    /// Check if this error means the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "test".into(),
            reason: "test".into(),
            code,
        }))
    }

    #[test]
    fn test_error_actions() {
        let err = Error::StoreRejected {
            operation: "get".into(),
            reason: "forbidden".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(60))
        );

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::Ownership {
            kind: "ClusterRole".into(),
            name: "nfd-worker".into(),
            reason: "already owned".into(),
        };
        assert_eq!(err.action(), ErrorAction::NoRequeue);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::StoreUnavailable {
            reason: "connection reset".into(),
        };
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_transient());
    }

    #[test]
    fn test_not_found_detection() {
        let err = Error::ResourceNotFound {
            kind: "ConfigMap".into(),
            name: "ns1/nfd-worker".into(),
        };
        assert!(err.is_not_found());
        assert!(api_error(404).is_not_found());
        assert!(!api_error(403).is_not_found());
        assert!(!Error::StoreUnavailable { reason: "x".into() }.is_not_found());
    }
}
