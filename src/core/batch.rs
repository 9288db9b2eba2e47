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

//! RowBatch - the unit of data flowing between operators
//!
//! A batch is an ordered run of rows with an optional selection vector. The
//! selection lists the physical row positions that are logically present,
//! so filters (and deduplication) can drop rows without moving any data.
//!
//! ```text
//! rows:  [r0, r1, r2, r3, r4]
//! sel:   Some([0, 2, 3])
//! logical view: [r0, r2, r3]   num_rows() == 3, physical_len() == 5
//! ```

use super::row::Row;

/// Stable reference to a row stored in a table.
///
/// Valid while the referenced batch is not cleared by a table reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RowPtr {
    /// Index of the batch within the table
    pub batch_idx: u32,
    /// Index of the row within the (compacted) batch
    pub row_idx: u32,
}

impl RowPtr {
    #[inline]
    pub fn new(batch_idx: u32, row_idx: u32) -> Self {
        Self { batch_idx, row_idx }
    }
}

/// A fixed-capacity batch of rows with an optional selection vector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    rows: Vec<Row>,
    sel: Option<Vec<usize>>,
    capacity: usize,
}

impl RowBatch {
    /// Create an empty batch that holds up to `capacity` rows
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            sel: None,
            capacity,
        }
    }

    /// Create a batch owning the given rows; capacity is at least the row count
    pub fn from_rows(rows: Vec<Row>, capacity: usize) -> Self {
        let capacity = capacity.max(rows.len());
        Self {
            rows,
            sel: None,
            capacity,
        }
    }

    /// Maximum number of physical rows the batch is meant to hold
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a row. A selection vector, if any, is extended with the new row.
    pub fn push(&mut self, row: Row) {
        let pos = self.rows.len();
        self.rows.push(row);
        if let Some(sel) = self.sel.as_mut() {
            sel.push(pos);
        }
    }

    /// Number of logical (selected) rows
    #[inline]
    pub fn num_rows(&self) -> usize {
        match &self.sel {
            Some(sel) => sel.len(),
            None => self.rows.len(),
        }
    }

    /// Check if there are no logical rows
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Number of physical rows, selected or not
    #[inline]
    pub fn physical_len(&self) -> usize {
        self.rows.len()
    }

    /// Get the `i`-th logical row
    #[inline]
    pub fn row(&self, i: usize) -> Option<&Row> {
        match &self.sel {
            Some(sel) => sel.get(i).and_then(|&p| self.rows.get(p)),
            None => self.rows.get(i),
        }
    }

    /// Get a row by physical position, ignoring the selection
    #[inline]
    pub fn physical_row(&self, pos: usize) -> Option<&Row> {
        self.rows.get(pos)
    }

    /// The selection vector, if any
    #[inline]
    pub fn sel(&self) -> Option<&[usize]> {
        self.sel.as_deref()
    }

    /// Replace the selection vector. Positions must be ordered and in range.
    pub fn set_sel(&mut self, sel: Vec<usize>) {
        debug_assert!(sel.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(sel.iter().all(|&p| p < self.rows.len()));
        self.sel = Some(sel);
    }

    /// Deep copy, keeping the selection vector
    pub fn copy_construct(&self) -> RowBatch {
        self.clone()
    }

    /// Copy of the selected rows only, without a selection vector
    pub fn copy_construct_sel(&self) -> RowBatch {
        let rows: Vec<Row> = self.iter().cloned().collect();
        RowBatch {
            rows,
            sel: None,
            capacity: self.capacity,
        }
    }

    /// Consume the batch, physically removing unselected rows
    pub fn into_compacted(self) -> RowBatch {
        match self.sel {
            None => self,
            Some(sel) => {
                let mut keep = sel.into_iter().peekable();
                let rows = self
                    .rows
                    .into_iter()
                    .enumerate()
                    .filter_map(|(pos, row)| {
                        if keep.peek() == Some(&pos) {
                            keep.next();
                            Some(row)
                        } else {
                            None
                        }
                    })
                    .collect();
                RowBatch {
                    rows,
                    sel: None,
                    capacity: self.capacity,
                }
            }
        }
    }

    /// Append copies of logical rows `[beg, end)` of `src`
    pub fn append_range(&mut self, src: &RowBatch, beg: usize, end: usize) {
        let end = end.min(src.num_rows());
        for i in beg..end {
            if let Some(row) = src.row(i) {
                self.push(row.clone());
            }
        }
    }

    /// Iterate over the logical rows
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            batch: self,
            next: 0,
        }
    }

    /// Consume the batch, returning its logical rows
    pub fn into_rows(self) -> Vec<Row> {
        self.into_compacted().rows
    }

    /// Approximate memory footprint of the physical rows
    pub fn mem_size(&self) -> usize {
        self.rows.iter().map(Row::mem_size).sum::<usize>()
            + self.sel.as_ref().map_or(0, |s| s.len() * std::mem::size_of::<usize>())
    }
}

/// Iterator over the logical rows of a batch
pub struct BatchIter<'a> {
    batch: &'a RowBatch,
    next: usize,
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = &'a Row;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.batch.row(self.next)?;
        self.next += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.batch.num_rows().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl<'a> IntoIterator for &'a RowBatch {
    type Item = &'a Row;
    type IntoIter = BatchIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn int_batch(values: &[i64]) -> RowBatch {
        let rows = values
            .iter()
            .map(|&v| Row::from_values(vec![Value::integer(v)]))
            .collect();
        RowBatch::from_rows(rows, 8)
    }

    fn ints(batch: &RowBatch) -> Vec<i64> {
        batch.iter().filter_map(|r| r[0].as_int64()).collect()
    }

    #[test]
    fn test_selection_filters_logical_view() {
        let mut batch = int_batch(&[10, 11, 12, 13, 14]);
        batch.set_sel(vec![0, 2, 3]);

        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.physical_len(), 5);
        assert_eq!(ints(&batch), vec![10, 12, 13]);
        assert_eq!(batch.row(1), Some(&Row::from_values(vec![Value::integer(12)])));
        assert_eq!(batch.row(3), None);
    }

    #[test]
    fn test_copy_construct_sel_compacts() {
        let mut batch = int_batch(&[1, 2, 3, 4]);
        batch.set_sel(vec![1, 3]);

        let copy = batch.copy_construct_sel();
        assert!(copy.sel().is_none());
        assert_eq!(copy.physical_len(), 2);
        assert_eq!(ints(&copy), vec![2, 4]);

        let kept = batch.copy_construct();
        assert_eq!(kept.sel(), Some(&[1usize, 3][..]));
    }

    #[test]
    fn test_into_compacted_moves_selected_rows() {
        let mut batch = int_batch(&[5, 6, 7]);
        batch.set_sel(vec![2]);
        let compacted = batch.into_compacted();
        assert_eq!(compacted.physical_len(), 1);
        assert_eq!(ints(&compacted), vec![7]);
    }

    #[test]
    fn test_append_range_respects_selection() {
        let mut src = int_batch(&[1, 2, 3, 4, 5]);
        src.set_sel(vec![0, 1, 3, 4]);

        let mut dst = RowBatch::new(8);
        dst.append_range(&src, 1, 3);
        assert_eq!(ints(&dst), vec![2, 4]);

        // End past the logical length is clamped
        dst.append_range(&src, 3, 10);
        assert_eq!(ints(&dst), vec![2, 4, 5]);
    }

    #[test]
    fn test_push_extends_selection() {
        let mut batch = int_batch(&[1, 2]);
        batch.set_sel(vec![1]);
        batch.push(Row::from_values(vec![Value::integer(3)]));
        assert_eq!(ints(&batch), vec![2, 3]);
    }
}
