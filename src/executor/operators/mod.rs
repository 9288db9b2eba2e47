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

//! Operators used as CTE sub-plans
//!
//! - `CteTableReader` - Streams the current iteration's input rows
//! - `ProjectFilterOperator` - Row-wise map/filter over a child operator
//!
//! The generic sources (`EmptyOperator`, `MaterializedOperator`) live in
//! `executor/operator.rs` next to the `BatchOperator` trait.

pub mod project;
pub mod table_reader;

// Re-export all operators and types
pub use project::{ProjectFilterOperator, RowMapFn};
pub use table_reader::CteTableReader;
