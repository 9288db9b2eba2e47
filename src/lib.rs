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

//! # cteflow - Recursive CTE evaluation for a batch-at-a-time executor
//!
//! cteflow evaluates `WITH RECURSIVE` expressions inside a pull-based query
//! engine. A CTE definition is evaluated once by a shared producer and read
//! by any number of consumers, each with its own cursor.
//!
//! ## Key Features
//!
//! - **Fixpoint iteration** - Seed part once, recursive part until no new rows
//! - **UNION / UNION ALL** - Collision-safe two-stage hash deduplication
//! - **LIMIT pushdown** - Evaluation stops once enough rows exist
//! - **Bounded memory** - Per-table trackers with spill to temp files
//! - **Correlated CTEs** - Re-evaluation when an outer value changes
//! - **Fault barrier** - Panics in a sub-plan become errors
//!
//! ## Modules
//!
//! - [`core`] - Core types ([`DataType`], [`Value`], [`Row`], [`RowBatch`], [`Error`])
//! - [`common`] - Memory and disk usage trackers
//! - [`storage`] - Spillable CTE tables
//! - [`executor`] - Operators, deduplication and the CTE producer/consumer

pub mod common;
pub mod core;
pub mod executor;
pub mod storage;

// Re-export main types for convenience
pub use core::{DataType, Error, Result, Row, RowBatch, RowPtr, Value};

// Re-export common utilities
pub use common::{ExceedAction, Tracker, TrackerLabel, UNLIMITED};

// Re-export storage types
pub use storage::{CteStorage, SpillDiskAction};

// Re-export executor types
pub use executor::{
    correlated_value, BatchOperator, ColumnInfo, CorrelatedValue, CteConfig, CteDefinition,
    CteExec, CteHandle, CteProducer, CteStats, CteTableReader, DedupStrategy, EmptyOperator,
    MaterializedOperator, ProjectFilterOperator, RowHashIndex, StatementContext, UnionAll,
    UnionDistinct,
};
