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

//! Reader over the iteration-input table of a recursive CTE.
//!
//! The recursive part of a CTE refers to the CTE itself; that reference is
//! planned as a `CteTableReader`. Each iteration it streams the rows the
//! previous iteration produced. The producer tags the table with the
//! iteration number, and the reader starts over whenever the tag changes,
//! so a reader that is not closed and reopened between iterations still
//! sees every iteration's input exactly once.

use std::sync::Arc;

use crate::core::{RowBatch, Result};
use crate::executor::operator::{BatchOperator, ColumnInfo};
use crate::storage::CteStorage;

/// Operator streaming the current iteration's input rows.
pub struct CteTableReader {
    /// Iteration-input table, shared with the producer
    iter_in: Arc<CteStorage>,
    schema: Vec<ColumnInfo>,
    /// Next batch to emit
    batch_idx: usize,
    /// Iteration the cursor belongs to
    cur_iter: usize,
}

impl CteTableReader {
    /// Create a reader holding a reference on `iter_in` until dropped.
    pub fn new(iter_in: Arc<CteStorage>, schema: Vec<ColumnInfo>) -> Result<Self> {
        iter_in.open_and_ref()?;
        Ok(Self {
            iter_in,
            schema,
            batch_idx: 0,
            cur_iter: 0,
        })
    }

    /// Iteration whose input is being read.
    pub fn current_iteration(&self) -> usize {
        self.cur_iter
    }
}

impl BatchOperator for CteTableReader {
    fn open(&mut self) -> Result<()> {
        self.batch_idx = 0;
        self.cur_iter = 0;
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        let iter = self.iter_in.iter();
        if iter != self.cur_iter {
            self.batch_idx = 0;
            self.cur_iter = iter;
        }
        if self.batch_idx >= self.iter_in.num_batches() {
            return Ok(None);
        }
        let batch = self.iter_in.get_batch(self.batch_idx)?;
        self.batch_idx += 1;
        // Copy so downstream operators can't touch the stored batch.
        Ok(Some(batch.copy_construct_sel()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    fn estimated_rows(&self) -> Option<usize> {
        Some(self.iter_in.num_rows())
    }

    fn name(&self) -> &str {
        "CTETableReader"
    }
}

impl Drop for CteTableReader {
    fn drop(&mut self) {
        if let Err(err) = self.iter_in.deref_and_close() {
            tracing::warn!(error = %err, table = self.iter_in.name(), "failed to release cte table");
        }
    }
}
