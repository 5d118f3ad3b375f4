//! Error types for the storage layer

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Invalid magic number in binary format
    #[error("Invalid magic number: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected magic number
        expected: [u8; 4],
        /// Found magic number
        found: [u8; 4]
    },

    /// Unsupported version
    #[error("Unsupported version: {version}, supported: {supported}")]
    UnsupportedVersion {
        /// Version found
        version: u32,
        /// Supported version
        supported: u32
    },

    /// Checksum verification failed
    #[error("Checksum verification failed: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum
        expected: u32,
        /// Computed checksum
        computed: u32
    },

    /// Invalid file format or corrupted data
    #[error("Invalid format: {reason}")]
    InvalidFormat {
        /// Reason for invalid format
        reason: String
    },

    /// Topology rows that cannot describe a valid network
    #[error("Invalid topology: {reason}")]
    InvalidTopology {
        /// Reason the topology was rejected
        reason: String
    },

    /// Neuron group not found
    #[error("Neuron group {group} not found")]
    GroupNotFound {
        /// Group ID that was not found
        group: u32
    },

    /// Model type record not found
    #[error("Model type {type_id} not found")]
    ModelTypeNotFound {
        /// Type ID that was not found
        type_id: u32
    },

    /// Parameter table not found
    #[error("No parameter table for {owner}")]
    ParameterTableNotFound {
        /// Description of the owner (neuron type or connection group)
        owner: String
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        /// Source I/O error
        source: std::io::Error,
    },

    /// JSON encoding or decoding error
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        /// Source serde_json error
        source: serde_json::Error,
    },

    /// Out of bounds access
    #[error("Index {index} out of bounds (max: {max})")]
    OutOfBounds {
        /// Index that was out of bounds
        index: usize,
        /// Maximum allowed index
        max: usize
    },
}

impl StorageError {
    /// Create an invalid format error
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Create an invalid topology error
    pub fn invalid_topology(reason: impl Into<String>) -> Self {
        Self::InvalidTopology {
            reason: reason.into(),
        }
    }

    /// Create a missing parameter table error
    pub fn parameter_table_not_found(owner: impl Into<String>) -> Self {
        Self::ParameterTableNotFound {
            owner: owner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StorageError::invalid_format("test reason");
        assert!(matches!(err, StorageError::InvalidFormat { .. }));

        let err = StorageError::invalid_topology("overlapping groups");
        assert!(matches!(err, StorageError::InvalidTopology { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::InvalidMagic {
            expected: [0x56, 0x57, 0x47, 0x54],
            found: [0x00, 0x00, 0x00, 0x00],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid magic number"));

        let err = StorageError::GroupNotFound { group: 7 };
        assert_eq!(err.to_string(), "Neuron group 7 not found");
    }
}
