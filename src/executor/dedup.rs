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

//! Row deduplication for UNION and UNION ALL recursive CTEs
//!
//! The producer is handed one [`DedupStrategy`] when it is built. `UNION ALL`
//! uses [`UnionAll`], which passes batches through untouched. `UNION` uses
//! [`UnionDistinct`], which filters every incoming batch in two stages:
//!
//! 1. rows equal to an earlier row of the same batch are dropped, using a
//!    batch-scoped index keyed by row position;
//! 2. the survivors are probed against the persistent index of the target
//!    table and dropped if an equal row is already stored there.
//!
//! The kept rows come back as the batch's selection vector. Hash matches are
//! always confirmed by comparing the key columns, so a collision never
//! removes a row.

use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

use rustc_hash::FxBuildHasher;

use crate::core::{Error, Result, Row, RowBatch, RowPtr};
use crate::storage::CteStorage;

use super::hash_table::RowHashIndex;

/// Filter applied to every batch before it is stored in a CTE table
pub trait DedupStrategy: Send + Sync + fmt::Debug {
    /// Whether this strategy removes duplicates
    fn is_distinct(&self) -> bool;

    /// Prepare for a fresh evaluation comparing rows on `key_columns`
    fn open(&mut self, key_columns: Vec<usize>);

    /// Start over with an empty persistent index
    fn reset_index(&mut self);

    /// Release the persistent index
    fn drop_index(&mut self);

    /// Rows indexed so far
    fn indexed_rows(&self) -> usize;

    /// Filter `batch` against itself and against the rows already in `target`.
    ///
    /// Kept rows are recorded in the persistent index with pointers into the
    /// batch `target` will assign on the next add, so the caller must add the
    /// returned batch to `target` before deduplicating anything else.
    fn dedup(&mut self, batch: RowBatch, target: &CteStorage) -> Result<RowBatch>;
}

/// Identity filter (`UNION ALL`)
#[derive(Debug, Default, Clone, Copy)]
pub struct UnionAll;

impl DedupStrategy for UnionAll {
    fn is_distinct(&self) -> bool {
        false
    }

    fn open(&mut self, _key_columns: Vec<usize>) {}

    fn reset_index(&mut self) {}

    fn drop_index(&mut self) {}

    fn indexed_rows(&self) -> usize {
        0
    }

    fn dedup(&mut self, batch: RowBatch, _target: &CteStorage) -> Result<RowBatch> {
        Ok(batch)
    }
}

/// Two-stage hash filter (`UNION`)
pub struct UnionDistinct<S = FxBuildHasher> {
    build_hasher: S,
    key_columns: Vec<usize>,
    index: Option<RowHashIndex>,
    batch_index: RowHashIndex,
    /// 0..N, grown on demand for batches without a selection vector
    all_sel: Vec<usize>,
    hashes: Vec<u64>,
}

impl UnionDistinct<FxBuildHasher> {
    pub fn new() -> Self {
        Self::with_hasher(FxBuildHasher)
    }
}

impl Default for UnionDistinct<FxBuildHasher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BuildHasher> UnionDistinct<S> {
    /// Use a custom hasher; mostly useful to force collisions in tests
    pub fn with_hasher(build_hasher: S) -> Self {
        Self {
            build_hasher,
            key_columns: Vec::new(),
            index: None,
            batch_index: RowHashIndex::new(),
            all_sel: Vec::new(),
            hashes: Vec::new(),
        }
    }

    /// Hash the key columns of every selected row, one column at a time.
    /// Fills `self.hashes` in selection order.
    fn hash_rows(&mut self, batch: &RowBatch, sel: &[usize]) {
        let mut states: Vec<S::Hasher> = sel
            .iter()
            .map(|_| self.build_hasher.build_hasher())
            .collect();
        for &col in &self.key_columns {
            for (state, &pos) in states.iter_mut().zip(sel) {
                match batch.physical_row(pos).and_then(|row| row.get(col)) {
                    Some(value) => value.hash(state),
                    // missing column hashes like NULL
                    None => 0u8.hash(state),
                }
            }
        }
        self.hashes.clear();
        self.hashes.extend(states.iter().map(Hasher::finish));
    }

    fn selection(&mut self, batch: &RowBatch) -> Vec<usize> {
        match batch.sel() {
            Some(sel) => sel.to_vec(),
            None => {
                let n = batch.physical_len();
                if self.all_sel.len() < n {
                    let start = self.all_sel.len();
                    self.all_sel.extend(start..n);
                }
                self.all_sel[..n].to_vec()
            }
        }
    }
}

fn keys_equal(a: &Row, b: &Row, key_columns: &[usize]) -> bool {
    key_columns.iter().all(|&col| a.get(col) == b.get(col))
}

impl<S: BuildHasher + Send + Sync> DedupStrategy for UnionDistinct<S> {
    fn is_distinct(&self) -> bool {
        true
    }

    fn open(&mut self, key_columns: Vec<usize>) {
        self.key_columns = key_columns;
        self.index = Some(RowHashIndex::new());
    }

    fn reset_index(&mut self) {
        match &self.index {
            Some(index) => index.clear(),
            None => self.index = Some(RowHashIndex::new()),
        }
    }

    fn drop_index(&mut self) {
        self.index = None;
    }

    fn indexed_rows(&self) -> usize {
        self.index.as_ref().map_or(0, RowHashIndex::len)
    }

    fn dedup(&mut self, mut batch: RowBatch, target: &CteStorage) -> Result<RowBatch> {
        if batch.is_empty() {
            return Ok(batch);
        }
        if self.index.is_none() {
            return Err(Error::internal("dedup index used before open"));
        }
        let sel = self.selection(&batch);
        self.hash_rows(&batch, &sel);

        // Stage 1: duplicates within the batch
        self.batch_index.clear();
        let mut unique: Vec<(usize, u64)> = Vec::with_capacity(sel.len());
        for (&pos, &hash) in sel.iter().zip(&self.hashes) {
            let row = match batch.physical_row(pos) {
                Some(row) => row,
                None => continue,
            };
            let seen = self.batch_index.probe(hash).iter().any(|ptr| {
                batch
                    .physical_row(ptr.row_idx as usize)
                    .is_some_and(|other| keys_equal(row, other, &self.key_columns))
            });
            if !seen {
                self.batch_index.insert(hash, RowPtr::new(0, pos as u32));
                unique.push((pos, hash));
            }
        }

        // Stage 2: rows already stored in the target table
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| Error::internal("dedup index used before open"))?;
        let mut kept: Vec<(usize, u64)> = Vec::with_capacity(unique.len());
        for (pos, hash) in unique {
            let row = match batch.physical_row(pos) {
                Some(row) => row,
                None => continue,
            };
            let mut seen = false;
            for ptr in index.probe(hash) {
                if keys_equal(row, &target.get_row(ptr)?, &self.key_columns) {
                    seen = true;
                    break;
                }
            }
            if !seen {
                kept.push((pos, hash));
            }
        }

        // Kept rows land compacted in the target's next batch.
        let batch_idx = target.num_batches() as u32;
        for (row_idx, &(_, hash)) in kept.iter().enumerate() {
            index.insert(hash, RowPtr::new(batch_idx, row_idx as u32));
        }
        batch.set_sel(kept.into_iter().map(|(pos, _)| pos).collect());
        Ok(batch)
    }
}

impl<S> fmt::Debug for UnionDistinct<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnionDistinct")
            .field("key_columns", &self.key_columns)
            .field(
                "indexed_rows",
                &self.index.as_ref().map_or(0, RowHashIndex::len),
            )
            .finish()
    }
}
