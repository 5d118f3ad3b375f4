//! Error types for the worker engine

use spikestream_storage::Step;
use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Severity class carried by every error and by error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Failure while loading; the worker enters its error state
    FatalLoad,
    /// Protocol violation while running; the worker enters its error state
    FatalRuntime,
    /// Device send/receive failure; the device is downgraded for the step
    RecoverableIo,
    /// Malformed request; only the offending operation is rejected
    Validation,
}

impl ErrorKind {
    /// Whether the worker must stop processing
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::FatalLoad | Self::FatalRuntime)
    }
}

/// Errors raised by device transports
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Socket error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        /// Source I/O error
        source: std::io::Error,
    },

    /// Coordinate does not fit the one-byte wire field
    #[error("Coordinate ({x}, {y}) exceeds 255")]
    CoordinateOutOfRange {
        /// X coordinate
        x: u32,
        /// Y coordinate
        y: u32,
    },

    /// No acknowledgment byte arrived
    #[error("Device did not acknowledge")]
    MissingAck,

    /// Acknowledgment byte had the wrong value
    #[error("Unexpected acknowledgment byte {found:#04x}")]
    BadAck {
        /// Byte received instead of ACK
        found: u8,
    },

    /// An input device left its request unanswered; the request stays outstanding
    #[error("Device did not answer within {timeout_ms} ms")]
    InputTimeout {
        /// Read timeout
        timeout_ms: u64,
    },

    /// Connection could not be established in time
    #[error("Could not reach {address} after {attempts} attempts")]
    ConnectTimeout {
        /// Socket address
        address: String,
        /// Number of one-second polls
        attempts: u32,
    },

    /// The socket was closed after an earlier failure
    #[error("Device is disconnected")]
    Disconnected,

    /// Packet or frame that cannot be decoded
    #[error("Malformed packet: {reason}")]
    MalformedPacket {
        /// Reason for rejection
        reason: String,
    },
}

impl DeviceError {
    /// Create a malformed packet error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            reason: reason.into(),
        }
    }
}

/// Errors that can occur in the worker engine
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Storage layer error
    #[error("Storage error: {source}")]
    Storage {
        #[from]
        /// Source storage error
        source: spikestream_storage::StorageError,
    },

    /// Model type or plugin could not be resolved
    #[error("Model {type_id} not found: {reason}")]
    ModelNotFound {
        /// Model type id
        type_id: u32,
        /// What was missing
        reason: String,
    },

    /// Plugin name registered twice
    #[error("Model plugin '{name}' is already registered")]
    DuplicateModel {
        /// Plugin name
        name: String,
    },

    /// Parameter map lacks a required key
    #[error("Model '{model}' is missing parameter '{key}'")]
    MissingParameter {
        /// Plugin name
        model: String,
        /// Missing key
        key: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Topology the worker cannot represent
    #[error("Malformed topology: {reason}")]
    MalformedTopology {
        /// Reason for rejection
        reason: String,
    },

    /// Barrier protocol violation
    #[error("Synchronization fault at step {step}: {reason}")]
    SyncFault {
        /// Worker step when the fault was detected
        step: Step,
        /// Description of the fault
        reason: String,
    },

    /// Event addressed a synapse that does not exist
    #[error("No synapse from neuron {from} to neuron {to}")]
    UnresolvedSynapse {
        /// Source neuron id
        from: u32,
        /// Destination neuron id
        to: u32,
    },

    /// Command not valid in the current worker state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Requested operation
        operation: String,
        /// Current state
        state: String,
    },

    /// Device could not be opened
    #[error("Device {device} failed to open: {source}")]
    DeviceOpen {
        /// Device id
        device: u32,
        /// Transport error
        source: DeviceError,
    },

    /// Device send or receive failure
    #[error("Device {device}: {source}")]
    Device {
        /// Device id
        device: u32,
        /// Transport error
        source: DeviceError,
    },

    /// Malformed request
    #[error("Validation failed: {reason}")]
    Validation {
        /// Reason for rejection
        reason: String,
    },

    /// Fabric endpoint unavailable
    #[error("Channel to {endpoint} is closed")]
    ChannelClosed {
        /// Endpoint description
        endpoint: String,
    },

    /// Worker thread could not be started or joined
    #[error("Worker thread {name}: {reason}")]
    Thread {
        /// Thread name
        name: String,
        /// What failed
        reason: String,
    },

    /// A worker reported an error to the controller
    #[error("Worker {group} failed ({kind:?}): {message}")]
    WorkerFailed {
        /// Failing group
        group: u32,
        /// Reported severity
        kind: ErrorKind,
        /// Reported message
        message: String,
    },

    /// The controller gave up waiting for workers
    #[error("Timed out waiting for {operation}")]
    Timeout {
        /// What was awaited
        operation: String,
    },
}

impl RuntimeError {
    /// Severity of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { .. }
            | Self::ModelNotFound { .. }
            | Self::DuplicateModel { .. }
            | Self::MissingParameter { .. }
            | Self::InvalidParameter { .. }
            | Self::MalformedTopology { .. }
            | Self::DeviceOpen { .. }
            | Self::Thread { .. } => ErrorKind::FatalLoad,
            Self::SyncFault { .. }
            | Self::UnresolvedSynapse { .. }
            | Self::ChannelClosed { .. }
            | Self::Timeout { .. } => ErrorKind::FatalRuntime,
            Self::WorkerFailed { kind, .. } => *kind,
            Self::Device {
                source: DeviceError::CoordinateOutOfRange { .. },
                ..
            } => ErrorKind::Validation,
            Self::Device { .. } => ErrorKind::RecoverableIo,
            Self::InvalidState { .. } | Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    /// Create a model not found error
    pub fn model_not_found(type_id: u32, reason: impl Into<String>) -> Self {
        Self::ModelNotFound {
            type_id,
            reason: reason.into(),
        }
    }

    /// Create a missing parameter error
    pub fn missing_parameter(model: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingParameter {
            model: model.into(),
            key: key.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a malformed topology error
    pub fn malformed_topology(reason: impl Into<String>) -> Self {
        Self::MalformedTopology {
            reason: reason.into(),
        }
    }

    /// Create a synchronization fault
    pub fn sync_fault(step: Step, reason: impl Into<String>) -> Self {
        Self::SyncFault {
            step,
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: impl Into<String>, state: impl ToString) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a channel closed error
    pub fn channel_closed(endpoint: impl ToString) -> Self {
        Self::ChannelClosed {
            endpoint: endpoint.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RuntimeError::model_not_found(3, "no plugin").kind(), ErrorKind::FatalLoad);
        assert_eq!(RuntimeError::missing_parameter("standard", "threshold").kind(), ErrorKind::FatalLoad);
        assert_eq!(RuntimeError::sync_fault(4, "stale batch").kind(), ErrorKind::FatalRuntime);
        assert_eq!(RuntimeError::UnresolvedSynapse { from: 1, to: 2 }.kind(), ErrorKind::FatalRuntime);
        assert_eq!(RuntimeError::validation("bad id").kind(), ErrorKind::Validation);
        assert_eq!(
            RuntimeError::DeviceOpen { device: 1, source: DeviceError::Disconnected }.kind(),
            ErrorKind::FatalLoad
        );
        assert_eq!(
            RuntimeError::Device { device: 1, source: DeviceError::MissingAck }.kind(),
            ErrorKind::RecoverableIo
        );
        assert_eq!(
            RuntimeError::Device { device: 1, source: DeviceError::CoordinateOutOfRange { x: 300, y: 0 } }.kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_fatal_flags() {
        assert!(ErrorKind::FatalLoad.is_fatal());
        assert!(ErrorKind::FatalRuntime.is_fatal());
        assert!(!ErrorKind::RecoverableIo.is_fatal());
        assert!(!ErrorKind::Validation.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = RuntimeError::missing_parameter("standard", "threshold");
        assert_eq!(err.to_string(), "Model 'standard' is missing parameter 'threshold'");

        let err = RuntimeError::invalid_state("start", "Idle");
        assert_eq!(err.to_string(), "Cannot start while Idle");
    }
}
