//! Error types for LastLayer device operations

use std::path::PathBuf;
use thiserror::Error;

use lastlayer_chip::layout::LayoutError;

/// Result type alias for LastLayer operations
pub type Result<T> = std::result::Result<T, LastLayerError>;

/// Errors that can occur while driving a LastLayer device
#[derive(Debug, Error)]
pub enum LastLayerError {
    /// The collaborator returned a null instance from `alloc`
    #[error("Device allocation failed: {reason}")]
    AllocationFailed {
        /// Reason for failure
        reason: String,
    },

    /// Buffer handed to a memory write does not split into whole words
    #[error("Invalid buffer length {len}: must be a non-zero multiple of {word_bytes} bytes")]
    InvalidBufferLength {
        /// Buffer length in bytes
        len: usize,
        /// Configured word width in bytes
        word_bytes: usize,
    },

    /// Requested read length does not split into whole words
    #[error("Invalid read length {num_elements}: must be a non-zero multiple of {word_bytes} bytes")]
    InvalidLength {
        /// Requested number of bytes
        num_elements: usize,
        /// Configured word width in bytes
        word_bytes: usize,
    },

    /// Cycle count outside `0..=i32::MAX`
    #[error("Invalid cycle count: {cycles}")]
    InvalidCycleCount {
        /// Requested cycle count
        cycles: i64,
    },

    /// Addressing or width parameter out of range
    #[error("Invalid parameter: {reason}")]
    InvalidParameter {
        /// Reason for failure
        reason: String,
    },

    /// The device collaborator failed a call
    #[error("Collaborator fault in {op}: {reason}")]
    CollaboratorFault {
        /// ABI entry point that failed
        op: &'static str,
        /// Reason for failure
        reason: String,
    },

    /// Handle or token does not name a live device instance
    #[error("Unknown device handle: {token:#x}")]
    UnknownHandle {
        /// Offending token
        token: u64,
    },

    /// No operation registered under this name
    #[error("Unknown operation: {name}")]
    UnknownOperation {
        /// Requested operation name
        name: String,
    },

    /// Operation called with the wrong number or kind of arguments
    #[error("Invalid arguments for {op}: {reason}")]
    InvalidArguments {
        /// Operation name
        op: &'static str,
        /// Reason for failure
        reason: String,
    },

    /// Device did not raise its completion flag within the cycle budget
    #[error("Device did not finish within {cycles} cycles")]
    NotFinished {
        /// Cycles spent before giving up
        cycles: i64,
    },

    /// Model library could not be loaded
    #[error("Failed to load device library {path}: {reason}")]
    LibraryLoad {
        /// Library path that was attempted
        path: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// Register/memory layout rejected
    #[error("Invalid device layout: {source}")]
    Layout {
        /// Underlying layout error
        #[from]
        source: LayoutError,
    },
}

impl LastLayerError {
    /// Create an allocation failed error
    pub fn allocation_failed(reason: impl Into<String>) -> Self {
        Self::AllocationFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }

    /// Create a collaborator fault
    pub fn collaborator_fault(op: &'static str, reason: impl Into<String>) -> Self {
        Self::CollaboratorFault {
            op,
            reason: reason.into(),
        }
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(op: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            op,
            reason: reason.into(),
        }
    }

    /// Create a library load error
    pub fn library_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::LibraryLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for faults raised by the device collaborator itself
    pub const fn is_collaborator_fault(&self) -> bool {
        matches!(self, Self::CollaboratorFault { .. })
    }
}
