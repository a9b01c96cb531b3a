//! Error types for pvmonitor.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific condition. There is no backpressure error: a full pool coalesces
//! updates instead of failing.

use std::fmt;

use thiserror::Error;

use crate::monitor::element::MonitorElement;

/// Identity of a snapshot slot inside one engine's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    /// Engine that owns the slot.
    pub engine: crate::monitor::EngineId,
    /// Slot index within the pool.
    pub slot: usize,
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.engine, self.slot)
    }
}

fn describe_expected(expected: &Option<SlotRef>) -> String {
    match expected {
        Some(slot) => slot.to_string(),
        None => "nothing outstanding".to_string(),
    }
}

/// Configuration errors reported before an engine is built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Queue size must be at least {min}, got {actual}")]
    QueueSizeTooSmall {
        min: usize,
        actual: usize,
    },

    #[error("Unknown monitor option '{option}'")]
    UnknownOption {
        option: String,
    },

    #[error("Invalid value '{value}' for monitor option '{option}'")]
    InvalidOptionValue {
        option: String,
        value: String,
    },

    #[error("Field name at index {index} cannot be empty")]
    EmptyFieldName {
        index: usize,
    },

    #[error("Duplicate field name '{name}'")]
    DuplicateField {
        name: String,
    },
}

/// Top-level error type for pvmonitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Resource exhausted: {reason} (capacity {capacity}, free {free})")]
    ResourceExhausted {
        reason: String,
        capacity: usize,
        free: usize,
    },

    #[error("Protocol violation: released {actual}, expected {}", describe_expected(.expected))]
    ProtocolViolation {
        expected: Option<SlotRef>,
        actual: SlotRef,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MonitorError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a resource exhaustion error.
    #[must_use]
    pub const fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }

    /// Returns true if this is a poll/release protocol violation.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    ///
    /// A start that ran out of snapshots may succeed once the consumer releases
    /// what it holds; a timed out receive may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ResourceExhausted { capacity, .. } => *capacity >= 2,
            Self::Timeout { .. } => true,
            Self::ProtocolViolation { .. }
            | Self::InvalidConfig(_)
            | Self::Disconnected { .. }
            | Self::Internal { .. } => false,
        }
    }
}

/// A rejected `release`.
///
/// The element is handed back so the caller can still return it in the
/// right order; dropping it permanently removes one slot from the pool.
pub struct ReleaseError<V> {
    element: MonitorElement<V>,
    expected: Option<SlotRef>,
}

impl<V> ReleaseError<V> {
    pub(crate) fn new(element: MonitorElement<V>, expected: Option<SlotRef>) -> Self {
        Self { element, expected }
    }

    /// The slot the pool expected to be released next, if any was outstanding.
    #[must_use]
    pub const fn expected(&self) -> Option<SlotRef> {
        self.expected
    }

    /// The slot that was offered.
    #[must_use]
    pub fn actual(&self) -> SlotRef {
        self.element.slot_ref()
    }

    /// Borrow the rejected element.
    #[must_use]
    pub const fn element(&self) -> &MonitorElement<V> {
        &self.element
    }

    /// Take the rejected element back.
    #[must_use]
    pub fn into_element(self) -> MonitorElement<V> {
        self.element
    }

    /// The diagnostic error, without the element.
    #[must_use]
    pub fn to_error(&self) -> MonitorError {
        MonitorError::ProtocolViolation {
            expected: self.expected,
            actual: self.actual(),
        }
    }
}

impl<V> fmt::Debug for ReleaseError<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseError")
            .field("expected", &self.expected)
            .field("actual", &self.actual())
            .finish_non_exhaustive()
    }
}

impl<V> fmt::Display for ReleaseError<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_error(), f)
    }
}

impl<V> std::error::Error for ReleaseError<V> {}

/// Result type alias for pvmonitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::EngineId;

    fn slot(slot: usize) -> SlotRef {
        SlotRef {
            engine: EngineId::new(),
            slot,
        }
    }

    #[test]
    fn test_resource_exhausted_message() {
        let err = MonitorError::ResourceExhausted {
            reason: "queue size below 2".to_string(),
            capacity: 1,
            free: 1,
        };
        let msg = format!("{err}");
        assert!(msg.contains("Resource exhausted"));
        assert!(msg.contains("capacity 1"));
        assert!(err.is_resource_exhausted());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_resource_exhausted_retryable_when_capacity_ok() {
        let err = MonitorError::ResourceExhausted {
            reason: "consumer holds snapshots".to_string(),
            capacity: 2,
            free: 0,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_protocol_violation_message() {
        let expected = slot(0);
        let actual = slot(1);
        let err = MonitorError::ProtocolViolation {
            expected: Some(expected),
            actual,
        };
        let msg = format!("{err}");
        assert!(msg.contains("Protocol violation"));
        assert!(msg.contains("#1"));
        assert!(msg.contains("#0"));
        assert!(err.is_protocol_violation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_protocol_violation_nothing_outstanding() {
        let err = MonitorError::ProtocolViolation {
            expected: None,
            actual: slot(3),
        };
        assert!(format!("{err}").contains("nothing outstanding"));
    }

    #[test]
    fn test_config_error_from() {
        let err: MonitorError = ConfigError::QueueSizeTooSmall { min: 2, actual: 0 }.into();
        assert!(err.is_config());
        assert!(format!("{err}").contains("at least 2"));
    }

    #[test]
    fn test_internal_error() {
        let err = MonitorError::internal("double publish");
        assert!(err.is_internal());
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("double publish"));
    }

    #[test]
    fn test_timeout_retryable() {
        let err = MonitorError::Timeout { duration_ms: 25 };
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("25ms"));
    }
}
