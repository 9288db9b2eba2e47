// Copyright 2025 Stoolap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for cteflow
//!
//! This module defines all error types used by the recursive CTE engine.

use thiserror::Error;

/// Result type alias for cteflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for recursive CTE evaluation
///
/// Errors are `Clone` because a failure latched on a shared table (or a
/// sticky open failure) is handed to every consumer of the same definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // CTE errors
    // =========================================================================
    /// The producer could not be opened
    #[error("failed to open recursive CTE: {message}")]
    CteOpenFailed { message: String },

    /// The recursion went deeper than the configured maximum
    #[error("recursive query aborted after {iteration} iterations, try increasing max_recursion_depth to a larger value")]
    RecursionDepthExceeded { iteration: usize },

    /// A tracker went over its quota and no action could bring it back
    #[error("{label} memory usage {consumed} bytes exceeds the quota of {quota} bytes")]
    MemoryExceeded {
        label: String,
        consumed: i64,
        quota: i64,
    },

    /// A panic was caught while computing the seed or recursive part
    #[error("panic during recursive CTE evaluation: {message}")]
    Panic { message: String },

    // =========================================================================
    // Storage errors
    // =========================================================================
    /// Batch index past the end of a table
    #[error("batch index {index} out of bounds, table has {len} batches")]
    BatchIndexOutOfBounds { index: usize, len: usize },

    /// Row index past the end of a batch
    #[error("row index {index} out of bounds, batch has {len} rows")]
    RowIndexOutOfBounds { index: usize, len: usize },

    /// Table has been closed and cannot be used
    #[error("storage closed")]
    StorageClosed,

    // =========================================================================
    // Other errors
    // =========================================================================
    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error (wrapped)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal error for unexpected conditions
    #[error("{message}")]
    Internal { message: String },

    /// Query cancelled
    #[error("query cancelled")]
    QueryCancelled,
}

impl Error {
    /// Create a new CteOpenFailed error
    pub fn cte_open_failed(message: impl Into<String>) -> Self {
        Error::CteOpenFailed {
            message: message.into(),
        }
    }

    /// Create a new RecursionDepthExceeded error
    pub fn recursion_depth_exceeded(iteration: usize) -> Self {
        Error::RecursionDepthExceeded { iteration }
    }

    /// Create a new MemoryExceeded error
    pub fn memory_exceeded(label: impl Into<String>, consumed: i64, quota: i64) -> Self {
        Error::MemoryExceeded {
            label: label.into(),
            consumed,
            quota,
        }
    }

    /// Create a new Panic error
    pub fn panic(message: impl Into<String>) -> Self {
        Error::Panic {
            message: message.into(),
        }
    }

    /// Create a new IO error
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
        }
    }

    /// Create a new Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Create a new InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Check if the recursion depth guard fired
    pub fn is_recursion_depth_exceeded(&self) -> bool {
        matches!(self, Error::RecursionDepthExceeded { .. })
    }

    /// Check if a memory quota was exceeded
    pub fn is_memory_exceeded(&self) -> bool {
        matches!(self, Error::MemoryExceeded { .. })
    }

    /// Check if this error was converted from a panic
    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Panic { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
        }
    }
}
