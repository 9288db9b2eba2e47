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

//! Recursive CTE executor
//!
//! # Architecture
//!
//! ```text
//! CteExec (one per read of the CTE)
//!   ↓  shared, locked
//! CteProducer
//!   ├── seed part        : BatchOperator
//!   ├── recursive part   : BatchOperator over CteTableReader
//!   ├── DedupStrategy    : UnionAll | UnionDistinct (RowHashIndex)
//!   └── result / iteration input / iteration output : CteStorage
//! ```
//!
//! # Components
//!
//! - [`CteDefinition`] / [`CteHandle`] - Build a CTE and hand out consumers
//! - [`CteProducer`] - Seed and recursive evaluation, table rotation, LIMIT
//! - [`CteExec`] - Per-consumer cursor over the shared result
//! - [`DedupStrategy`] - `UNION` / `UNION ALL` row filtering
//! - [`RowHashIndex`] - Hash index used for deduplication
//! - [`StatementContext`] / [`CteConfig`] - Trackers, cancellation, settings

pub mod config;
pub mod context;
pub mod cte;
pub mod dedup;
pub mod hash_table;
pub mod operator;
pub mod operators;

pub use config::{CteConfig, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_RECURSION_DEPTH};
pub use context::{CancellationHandle, StatementContext};
pub use cte::{
    correlated_value, CorrelatedValue, CteCursor, CteDefinition, CteExec, CteHandle, CteProducer,
    CteStats, RecursivePartBuilder, SharedProducer, TableStats,
};
pub use dedup::{DedupStrategy, UnionAll, UnionDistinct};
pub use hash_table::{ProbeResult, RowHashIndex};
pub use operator::{BatchOperator, ColumnInfo, EmptyOperator, MaterializedOperator};
pub use operators::{CteTableReader, ProjectFilterOperator, RowMapFn};
