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

//! Core types and definitions for cteflow
//!
//! This module contains the fundamental types used throughout the engine:
//!
//! - [`DataType`] - SQL data types (INTEGER, TEXT, FLOAT, etc.)
//! - [`Value`] - Runtime values with type information
//! - [`Row`] - An ordered tuple of values
//! - [`RowBatch`] - A batch of rows with an optional selection vector
//! - [`RowPtr`] - A (batch, row) reference into a table
//! - [`Error`] - Error types for all operations

pub mod batch;
pub mod error;
pub mod row;
pub mod types;
pub mod value;

// Re-export main types for convenience
pub use batch::{BatchIter, RowBatch, RowPtr};
pub use error::{Error, Result};
pub use row::Row;
pub use types::DataType;
pub use value::Value;
