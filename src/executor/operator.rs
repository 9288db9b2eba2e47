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

//! Batch-at-a-time operator interface
//!
//! Every sub-plan a CTE runs (the seed part, the recursive part) is a
//! [`BatchOperator`]. Execution follows the open-next-close pattern, pulling
//! one [`RowBatch`] per call:
//!
//! ```text
//! ┌──────────────┐
//! │ CteExec      │ ← Pulls batches via next_batch()
//! └──────┬───────┘
//!        │
//! ┌──────▼───────┐
//! │ CteProducer  │ ← Runs seed once, recursive part until fixpoint
//! └──────┬───────┘
//!        │
//! ┌──────┴──────┐
//! │             │
//! ▼             ▼
//! ┌─────┐   ┌──────────────┐
//! │Seed │   │Recursive part│ ← Reads the iteration input via CteTableReader
//! └─────┘   └──────────────┘
//! ```

use crate::core::{DataType, Result, Row, RowBatch};

use super::config::DEFAULT_MAX_CHUNK_SIZE;

/// Column information for operator schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Column type
    pub data_type: DataType,
}

impl ColumnInfo {
    /// Create a new column info.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Pull-based operator producing row batches.
///
/// 1. `open()` - Initialize the operator (again after a `close()` to restart)
/// 2. `next_batch()` - Get the next batch (called repeatedly until exhausted)
/// 3. `close()` - Release resources
///
/// # Thread Safety
///
/// Operators are `Send` so a shared CTE producer can be driven from any
/// consumer's thread, but they are not `Sync` - they maintain mutable state.
pub trait BatchOperator: Send {
    /// Initialize the operator.
    fn open(&mut self) -> Result<()>;

    /// Get the next batch from this operator.
    ///
    /// Returns:
    /// - `Ok(Some(batch))` with at least one row - more data
    /// - `Ok(None)` or `Ok(Some(empty))` - exhausted
    /// - `Err(e)` - An error occurred
    ///
    /// Once exhausted the operator stays exhausted until it is closed and
    /// opened again.
    fn next_batch(&mut self) -> Result<Option<RowBatch>>;

    /// Close the operator and release resources.
    fn close(&mut self) -> Result<()>;

    /// Get the schema (column information) for this operator's output.
    fn schema(&self) -> &[ColumnInfo];

    /// Get an estimate of the number of rows this operator will produce.
    fn estimated_rows(&self) -> Option<usize> {
        None
    }

    /// Get a descriptive name for this operator (for EXPLAIN).
    fn name(&self) -> &str;
}

/// An operator that produces no rows.
pub struct EmptyOperator {
    schema: Vec<ColumnInfo>,
    opened: bool,
}

impl EmptyOperator {
    /// Create an empty operator with no schema.
    pub fn new() -> Self {
        Self {
            schema: Vec::new(),
            opened: false,
        }
    }

    /// Create an empty operator with a specific schema.
    pub fn with_schema(schema: Vec<ColumnInfo>) -> Self {
        Self {
            schema,
            opened: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }
}

impl Default for EmptyOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchOperator for EmptyOperator {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }

    fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    fn estimated_rows(&self) -> Option<usize> {
        Some(0)
    }

    fn name(&self) -> &str {
        "Empty"
    }
}

/// An operator that yields pre-materialized rows in fixed-size batches.
///
/// Rows are kept across close/open so the operator can be replayed, which
/// is what a recursive part needs between iterations.
pub struct MaterializedOperator {
    rows: Vec<Row>,
    schema: Vec<ColumnInfo>,
    batch_size: usize,
    current_idx: usize,
    opened: bool,
}

impl MaterializedOperator {
    /// Create an operator from a vector of rows.
    pub fn new(rows: Vec<Row>, schema: Vec<ColumnInfo>) -> Self {
        Self {
            rows,
            schema,
            batch_size: DEFAULT_MAX_CHUNK_SIZE,
            current_idx: 0,
            opened: false,
        }
    }

    /// Set the number of rows per batch (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl BatchOperator for MaterializedOperator {
    fn open(&mut self) -> Result<()> {
        self.current_idx = 0;
        self.opened = true;
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        if !self.opened || self.current_idx >= self.rows.len() {
            return Ok(None);
        }
        let end = (self.current_idx + self.batch_size).min(self.rows.len());
        let rows = self.rows[self.current_idx..end].to_vec();
        self.current_idx = end;
        Ok(Some(RowBatch::from_rows(rows, self.batch_size)))
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }

    fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    fn estimated_rows(&self) -> Option<usize> {
        Some(self.rows.len())
    }

    fn name(&self) -> &str {
        "Materialized"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn rows(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| Row::from_values(vec![Value::integer(i)]))
            .collect()
    }

    #[test]
    fn test_empty_operator() {
        let mut op = EmptyOperator::with_schema(vec![ColumnInfo::new("x", DataType::Integer)]);
        op.open().unwrap();
        assert!(op.is_open());
        assert!(op.next_batch().unwrap().is_none());
        assert_eq!(op.schema().len(), 1);
        op.close().unwrap();
        assert!(!op.is_open());
    }

    #[test]
    fn test_materialized_batches_and_replay() {
        let mut op = MaterializedOperator::new(rows(5), vec![ColumnInfo::new("x", DataType::Integer)])
            .with_batch_size(2);
        assert!(op.next_batch().unwrap().is_none(), "not opened yet");

        op.open().unwrap();
        let sizes: Vec<usize> = std::iter::from_fn(|| op.next_batch().unwrap())
            .map(|b| b.num_rows())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(op.next_batch().unwrap().is_none());

        op.close().unwrap();
        op.open().unwrap();
        let first = op.next_batch().unwrap().unwrap();
        assert_eq!(first.row(0).unwrap()[0], Value::integer(0));
        assert_eq!(op.estimated_rows(), Some(5));
    }
}
