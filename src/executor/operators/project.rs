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

//! Row-wise projection and filtering over a child operator.
//!
//! A small building block for recursive parts such as
//! `SELECT n + 1 FROM cte WHERE n < 10`: the closure maps each input row to
//! an output row, or drops it by returning `None`.

use crate::core::{Result, Row, RowBatch};
use crate::executor::operator::{BatchOperator, ColumnInfo};

/// Row mapping function; `Ok(None)` filters the row out.
pub type RowMapFn = Box<dyn FnMut(&Row) -> Result<Option<Row>> + Send>;

/// Operator applying a map/filter closure to every row of its child.
pub struct ProjectFilterOperator {
    /// Child operator
    child: Box<dyn BatchOperator>,
    map: RowMapFn,
    schema: Vec<ColumnInfo>,
    /// Whether the operator has been opened
    opened: bool,
    /// Statistics: rows read from the child
    rows_in: u64,
    /// Statistics: rows emitted
    rows_out: u64,
}

impl ProjectFilterOperator {
    /// Create a new projection over `child` producing rows of `schema`.
    pub fn new(
        child: Box<dyn BatchOperator>,
        schema: Vec<ColumnInfo>,
        map: impl FnMut(&Row) -> Result<Option<Row>> + Send + 'static,
    ) -> Self {
        Self {
            child,
            map: Box::new(map),
            schema,
            opened: false,
            rows_in: 0,
            rows_out: 0,
        }
    }

    /// Get the number of rows read from the child.
    pub fn rows_in(&self) -> u64 {
        self.rows_in
    }

    /// Get the number of rows emitted.
    pub fn rows_out(&self) -> u64 {
        self.rows_out
    }
}

impl BatchOperator for ProjectFilterOperator {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.opened = true;
        self.rows_in = 0;
        self.rows_out = 0;
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        if !self.opened {
            return Ok(None);
        }
        // Skip input batches that filter down to nothing so an empty batch
        // only ever means exhaustion.
        while let Some(input) = self.child.next_batch()? {
            if input.is_empty() {
                break;
            }
            let mut output = RowBatch::new(input.capacity());
            for row in input.iter() {
                self.rows_in += 1;
                if let Some(mapped) = (self.map)(row)? {
                    output.push(mapped);
                }
            }
            if !output.is_empty() {
                self.rows_out += output.num_rows() as u64;
                return Ok(Some(output));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        self.child.close()
    }

    fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    fn name(&self) -> &str {
        "ProjectFilter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Error, Value};
    use crate::executor::operator::MaterializedOperator;

    fn source(values: &[i64]) -> Box<dyn BatchOperator> {
        let rows = values
            .iter()
            .map(|&v| Row::from_values(vec![Value::integer(v)]))
            .collect();
        Box::new(
            MaterializedOperator::new(rows, vec![ColumnInfo::new("n", DataType::Integer)])
                .with_batch_size(2),
        )
    }

    #[test]
    fn test_map_and_filter() {
        let mut op = ProjectFilterOperator::new(
            source(&[1, 2, 8, 9, 3]),
            vec![ColumnInfo::new("n", DataType::Integer)],
            |row| {
                let n = row[0].as_int64().unwrap_or_default();
                Ok((n < 5).then(|| Row::from_values(vec![Value::integer(n * 10)])))
            },
        );
        op.open().unwrap();
        let mut out = Vec::new();
        while let Some(batch) = op.next_batch().unwrap() {
            assert!(!batch.is_empty());
            out.extend(batch.iter().map(|r| r[0].as_int64().unwrap()));
        }
        // [8, 9] filters to nothing and is skipped
        assert_eq!(out, vec![10, 20, 30]);
        assert_eq!(op.rows_in(), 5);
        assert_eq!(op.rows_out(), 3);
        op.close().unwrap();
    }

    #[test]
    fn test_map_error_propagates() {
        let mut op = ProjectFilterOperator::new(source(&[1]), Vec::new(), |_| {
            Err(Error::internal("bad row"))
        });
        op.open().unwrap();
        assert!(op.next_batch().is_err());
    }
}
