//! Error types for SECTORSCOPE operations

use crate::{Layer, RefreshStage};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the snapshot collection pipeline.
///
/// The retryable classification is decided by the collector and surfaced
/// unchanged to the refresh trigger surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectionError {
    #[error("Provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Provider {provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("Malformed snapshot data from {provider}: {reason}")]
    Malformed { provider: String, reason: String },
}

impl CollectionError {
    /// Whether re-running the collection later can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectionError::Unavailable { .. } | CollectionError::RateLimited { .. }
        )
    }

    pub fn provider(&self) -> &str {
        match self {
            CollectionError::Unavailable { provider, .. }
            | CollectionError::RateLimited { provider, .. }
            | CollectionError::Rejected { provider, .. }
            | CollectionError::Malformed { provider, .. } => provider,
        }
    }
}

/// Aggregation was handed an empty snapshot batch.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Insufficient data: cannot aggregate an empty snapshot batch")]
pub struct InsufficientDataError;

/// A durable layer read or write failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("{layer} {operation} failed: {reason}")]
    OperationFailed {
        layer: Layer,
        operation: &'static str,
        reason: String,
    },

    #[error("{layer} {operation} timed out after {timeout:?}")]
    Timeout {
        layer: Layer,
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{layer} payload corrupted: {reason}")]
    Corrupted { layer: Layer, reason: String },

    #[error("{layer} lock poisoned")]
    LockPoisoned { layer: Layer },
}

impl PersistenceError {
    pub fn failed(layer: Layer, operation: &'static str, reason: impl Into<String>) -> Self {
        PersistenceError::OperationFailed {
            layer,
            operation,
            reason: reason.into(),
        }
    }

    /// The layer that produced this error.
    pub fn layer(&self) -> Layer {
        match self {
            PersistenceError::OperationFailed { layer, .. }
            | PersistenceError::Timeout { layer, .. }
            | PersistenceError::Corrupted { layer, .. }
            | PersistenceError::LockPoisoned { layer } => *layer,
        }
    }
}

/// Validation errors for records and labels.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Sector label {raw:?} is empty after normalization")]
    EmptySectorLabel { raw: String },

    #[error("Instrument id must not be empty")]
    EmptyInstrumentId,

    #[error("Duplicate instrument {instrument_id} in snapshot batch")]
    DuplicateInstrument { instrument_id: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Informational signal that returned statistics exceed the freshness horizon.
///
/// Not an error: the data is still served, with reduced confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleDataWarning {
    pub layer: Layer,
    pub age: Duration,
    pub horizon: Duration,
}

impl fmt::Display for StaleDataWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "statistics from {} are {}s old (horizon {}s)",
            self.layer,
            self.age.as_secs(),
            self.horizon.as_secs()
        )
    }
}

/// Master error type for all SECTORSCOPE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("{0}")]
    InsufficientData(#[from] InsufficientDataError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Refresh task aborted during {stage}: {reason}")]
    RefreshAborted { stage: RefreshStage, reason: String },
}

impl ScopeError {
    /// Retryable classification for the trigger surface.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScopeError::Collection(e) => e.is_retryable(),
            ScopeError::Persistence(_) | ScopeError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for SECTORSCOPE operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_error_retryable_classification() {
        let unavailable = CollectionError::Unavailable {
            provider: "kis".to_string(),
            reason: "503".to_string(),
        };
        let limited = CollectionError::RateLimited {
            provider: "kis".to_string(),
            retry_after_ms: 1000,
        };
        let rejected = CollectionError::Rejected {
            provider: "kis".to_string(),
            reason: "token expired".to_string(),
        };
        assert!(unavailable.is_retryable());
        assert!(limited.is_retryable());
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.provider(), "kis");
    }

    #[test]
    fn test_scope_error_preserves_collection_classification() {
        let err: ScopeError = CollectionError::Malformed {
            provider: "file".to_string(),
            reason: "not json".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
        assert!(format!("{}", err).contains("Malformed"));
    }

    #[test]
    fn test_persistence_error_layer() {
        let err = PersistenceError::failed(Layer::Archive, "save", "disk full");
        assert_eq!(err.layer(), Layer::Archive);
        assert_eq!(err.to_string(), "archive save failed: disk full");

        let err = PersistenceError::Timeout {
            layer: Layer::Persistent,
            operation: "load_sector_statistics",
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.layer(), Layer::Persistent);
    }

    #[test]
    fn test_stale_warning_display() {
        let warning = StaleDataWarning {
            layer: Layer::Archive,
            age: Duration::from_secs(30 * 3600),
            horizon: Duration::from_secs(24 * 3600),
        };
        let msg = warning.to_string();
        assert!(msg.contains("archive"));
        assert!(msg.contains("108000s"));
    }

    #[test]
    fn test_insufficient_data_display() {
        let err: ScopeError = InsufficientDataError.into();
        assert!(err.to_string().contains("empty snapshot batch"));
        assert!(!err.is_retryable());
    }
}
