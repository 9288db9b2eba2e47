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

//! Recursive CTE producer
//!
//! One producer exists per CTE definition and is shared by every [`CteExec`]
//! reading it. It runs the seed part once, then the recursive part against
//! the previous iteration's output until an iteration adds nothing new:
//!
//! ```text
//! seed ──► iter_in ──► res
//!             │
//!             ▼
//!      recursive part ──► iter_out ──rotate──► res (dedup)
//!             ▲                          │
//!             └──────── iter_in ◄────────┘ (copy when distinct, swap otherwise)
//! ```
//!
//! The result table is marked done once evaluation finishes; consumers then
//! page through it with their own cursors. An error is latched on the result
//! table so every consumer sees it without evaluating again.
//!
//! [`CteExec`]: super::CteExec

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::common::{ExceedAction, Tracker, TrackerLabel, UNLIMITED};
use crate::core::{DataType, Error, Result, RowBatch};
use crate::executor::context::StatementContext;
use crate::executor::dedup::DedupStrategy;
use crate::executor::operator::{BatchOperator, ColumnInfo};
use crate::storage::{encode_value, CteStorage};

use super::CorrelatedValue;

/// Exhausted-batch count between two iteration log lines
const LOG_SAMPLE_INTERVAL: u64 = 1000;

/// Per-consumer read position over the result table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CteCursor {
    /// Next result batch to read
    pub batch_idx: usize,
    /// Rows passed so far (LIMIT only)
    pub rows: usize,
    /// Whether the batch holding the LIMIT offset was emitted (LIMIT only)
    pub meet_first_batch: bool,
}

impl CteCursor {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Size and location of one CTE table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub batches: usize,
    pub rows: usize,
    pub mem_bytes: i64,
    pub disk_bytes: i64,
    pub spilled: bool,
}

impl TableStats {
    fn of(table: &CteStorage) -> Self {
        Self {
            batches: table.num_batches(),
            rows: table.num_rows(),
            mem_bytes: table.mem_bytes(),
            disk_bytes: table.disk_bytes(),
            spilled: table.is_spilled(),
        }
    }
}

/// Snapshot of an evaluation in progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CteStats {
    /// Current iteration (0 while the seed part runs)
    pub iteration: usize,
    pub result: TableStats,
    pub iter_in: TableStats,
    /// Only present while the recursive part is open
    pub iter_out: Option<TableStats>,
}

/// Shared evaluation state of one CTE definition
pub struct CteProducer {
    ctx: Arc<StatementContext>,
    name: String,

    seed: Option<Box<dyn BatchOperator>>,
    recursive: Option<Box<dyn BatchOperator>>,

    res_tbl: Arc<CteStorage>,
    iter_in_tbl: Arc<CteStorage>,
    /// Owned by the producer between open and close of the recursive part
    iter_out_tbl: Option<Arc<CteStorage>>,

    dedup: Box<dyn DedupStrategy>,
    schema: Vec<ColumnInfo>,
    batch_capacity: usize,

    /// `[limit_beg, limit_end)` over the full output
    limit: Option<(usize, usize)>,

    cor_cols: Vec<CorrelatedValue>,
    cor_col_fingerprints: Vec<Vec<u8>>,

    cur_iter: usize,
    opened: bool,
    closed: bool,
    open_err: Option<Error>,

    mem_tracker: Option<Arc<Tracker>>,
    disk_tracker: Option<Arc<Tracker>>,
}

impl CteProducer {
    /// Create a producer over the shared result and iteration-input tables
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<StatementContext>,
        name: impl Into<String>,
        seed: Option<Box<dyn BatchOperator>>,
        recursive: Option<Box<dyn BatchOperator>>,
        res_tbl: Arc<CteStorage>,
        iter_in_tbl: Arc<CteStorage>,
        dedup: Box<dyn DedupStrategy>,
        schema: Vec<ColumnInfo>,
        limit: Option<(usize, usize)>,
        cor_cols: Vec<CorrelatedValue>,
    ) -> Self {
        let batch_capacity = ctx.config().max_chunk_size.max(1);
        let cor_col_fingerprints = cor_cols.iter().map(fingerprint).collect();
        Self {
            ctx,
            name: name.into(),
            seed,
            recursive,
            res_tbl,
            iter_in_tbl,
            iter_out_tbl: None,
            dedup,
            schema,
            batch_capacity,
            limit,
            cor_cols,
            cor_col_fingerprints,
            cur_iter: 0,
            opened: false,
            closed: false,
            open_err: None,
            mem_tracker: None,
            disk_tracker: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    #[inline]
    pub fn result_table(&self) -> &Arc<CteStorage> {
        &self.res_tbl
    }

    #[inline]
    pub fn iter_in_table(&self) -> &Arc<CteStorage> {
        &self.iter_in_tbl
    }

    #[inline]
    pub fn is_opened(&self) -> bool {
        self.opened
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub fn open_err(&self) -> Option<&Error> {
        self.open_err.as_ref()
    }

    #[inline]
    pub fn cur_iter(&self) -> usize {
        self.cur_iter
    }

    #[inline]
    pub fn is_distinct(&self) -> bool {
        self.dedup.is_distinct()
    }

    /// Producer-level memory tracker, present while open
    pub fn mem_tracker(&self) -> Option<&Arc<Tracker>> {
        self.mem_tracker.as_ref()
    }

    /// Open the sub-plans and set up trackers, remembering any failure.
    pub fn open_producer(&mut self) -> Result<()> {
        let result = self.try_open();
        self.opened = result.is_ok();
        self.open_err = result.as_ref().err().cloned();
        result
    }

    fn try_open(&mut self) -> Result<()> {
        let seed = self
            .seed
            .as_mut()
            .ok_or_else(|| Error::cte_open_failed("seed part of the CTE is missing"))?;
        seed.open()?;

        self.reset_tracker();
        let mem_tracker = Tracker::new(TrackerLabel::CteProducer, UNLIMITED);
        let disk_tracker = Tracker::new(TrackerLabel::CteProducer, UNLIMITED);
        mem_tracker.attach_to(self.ctx.mem_tracker())?;
        disk_tracker.attach_to(self.ctx.disk_tracker())?;
        self.mem_tracker = Some(mem_tracker);
        self.disk_tracker = Some(disk_tracker);

        if let Some(recursive) = self.recursive.as_mut() {
            recursive.open()?;
            // Built here rather than at plan time because close releases it.
            if let Some(stale) = self.iter_out_tbl.take() {
                stale.deref_and_close()?;
            }
            let iter_out = CteStorage::new(
                format!("{} iteration output", self.name),
                self.field_types(),
                self.batch_capacity,
            );
            iter_out.open_and_ref()?;
            self.iter_out_tbl = Some(iter_out);
        }

        if self.dedup.is_distinct() {
            // Every column is part of the key.
            self.dedup.open((0..self.schema.len()).collect());
        }
        Ok(())
    }

    fn field_types(&self) -> Vec<DataType> {
        self.schema.iter().map(|c| c.data_type).collect()
    }

    /// Run the whole evaluation. A no-op once the result table is done;
    /// returns the latched error if an earlier run failed.
    pub fn produce(&mut self) -> Result<()> {
        if let Some(err) = self.res_tbl.error() {
            return Err(err);
        }
        if self.res_tbl.done() {
            return Ok(());
        }

        self.setup_storage_tracker(&self.res_tbl)?;
        self.setup_storage_tracker(&self.iter_in_tbl)?;
        if let Some(iter_out) = &self.iter_out_tbl {
            self.setup_storage_tracker(iter_out)?;
        }

        let result = recover_panic(|| self.compute_seed_part())
            .and_then(|_| recover_panic(|| self.compute_recursive_part()));
        if let Err(err) = result {
            tracing::warn!(
                cte = %self.name,
                iteration = self.cur_iter,
                error = %err,
                "recursive cte evaluation failed"
            );
            self.res_tbl.set_error(err.clone());
            return Err(err);
        }
        self.res_tbl.set_done();
        tracing::debug!(
            cte = %self.name,
            iterations = self.cur_iter,
            rows = self.res_tbl.num_rows(),
            "recursive cte evaluation done"
        );
        Ok(())
    }

    fn compute_seed_part(&mut self) -> Result<()> {
        self.cur_iter = 0;
        self.iter_in_tbl.set_iter(self.cur_iter);

        let mut batches = Vec::new();
        loop {
            if self.limit_done(&self.iter_in_tbl) {
                break;
            }
            let batch = match self.pull(Phase::Seed)? {
                Some(batch) => batch,
                None => break,
            };
            let batch = self.dedup.dedup(batch, &self.iter_in_tbl)?;
            self.iter_in_tbl.add(batch.clone())?;
            batches.push(batch);
        }
        // The result table starts out empty: the seed rows are already unique.
        for batch in batches {
            self.res_tbl.add(batch)?;
        }

        self.cur_iter += 1;
        self.iter_in_tbl.set_iter(self.cur_iter);
        Ok(())
    }

    fn compute_recursive_part(&mut self) -> Result<()> {
        if self.recursive.is_none() || self.iter_in_tbl.num_batches() == 0 {
            return Ok(());
        }
        self.check_depth()?;
        if self.limit_done(&self.res_tbl) {
            return Ok(());
        }

        let mut exhausted: u64 = 0;
        loop {
            match self.pull(Phase::Recursive)? {
                Some(batch) => self.iter_out()?.add(batch)?,
                None => {
                    if exhausted % LOG_SAMPLE_INTERVAL == 0 {
                        self.log_tbls(exhausted);
                    }
                    exhausted += 1;

                    self.setup_tbls_for_new_iteration()?;
                    if self.limit_done(&self.res_tbl) || self.iter_in_tbl.num_batches() == 0 {
                        break;
                    }

                    self.cur_iter += 1;
                    self.iter_in_tbl.set_iter(self.cur_iter);
                    self.check_depth()?;

                    // iter_in is ready before the reopen; some operators read it in open.
                    if let Some(recursive) = self.recursive.as_mut() {
                        recursive.close()?;
                        recursive.open()?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fold the finished iteration's output into the result table and make it
    /// the next iteration's input.
    fn setup_tbls_for_new_iteration(&mut self) -> Result<()> {
        let iter_out = Arc::clone(self.iter_out()?);
        let distinct = self.dedup.is_distinct();

        let mut fresh = Vec::new();
        for idx in 0..iter_out.num_batches() {
            // Always a copy: the stored batch stays shared with iter_out.
            let batch = RowBatch::clone(&*iter_out.get_batch(idx)?);
            let batch = self.dedup.dedup(batch, &self.res_tbl)?;
            self.res_tbl.add(batch.clone())?;
            if distinct {
                fresh.push(batch);
            }
        }

        self.iter_in_tbl.reopen()?;
        self.setup_storage_tracker(&self.iter_in_tbl)?;
        if distinct {
            // Already deduplicated against the result table.
            for batch in fresh {
                self.iter_in_tbl.add(batch)?;
            }
        } else {
            self.iter_in_tbl.swap_data(&iter_out)?;
        }

        iter_out.reopen()?;
        self.setup_storage_tracker(&iter_out)
    }

    /// Pull the next non-empty batch of a sub-plan, `None` once exhausted
    fn pull(&mut self, phase: Phase) -> Result<Option<RowBatch>> {
        self.ctx.check_cancelled()?;
        let plan = match phase {
            Phase::Seed => self.seed.as_mut(),
            Phase::Recursive => self.recursive.as_mut(),
        };
        let plan = plan.ok_or_else(|| Error::internal(format!("{} part is missing", phase)))?;
        Ok(plan.next_batch()?.filter(|batch| !batch.is_empty()))
    }

    fn iter_out(&self) -> Result<&Arc<CteStorage>> {
        self.iter_out_tbl
            .as_ref()
            .ok_or_else(|| Error::internal("iteration output table is not open"))
    }

    fn check_depth(&self) -> Result<()> {
        if self.cur_iter > self.ctx.config().max_recursion_depth {
            return Err(Error::recursion_depth_exceeded(self.cur_iter));
        }
        Ok(())
    }

    /// Whether `tbl` already holds every row the LIMIT can return
    pub fn limit_done(&self, tbl: &CteStorage) -> bool {
        match self.limit {
            Some((_, end)) => tbl.num_rows() >= end,
            None => false,
        }
    }

    /// Attach a table's trackers below the producer's and register its
    /// spill action on the statement tracker.
    fn setup_storage_tracker(&self, tbl: &CteStorage) -> Result<()> {
        let mem = tbl.mem_tracker();
        mem.set_label(TrackerLabel::CteStorage);
        if let Some(parent) = &self.mem_tracker {
            mem.attach_to(parent)?;
        }
        let disk = tbl.disk_tracker();
        disk.set_label(TrackerLabel::CteStorage);
        if let Some(parent) = &self.disk_tracker {
            disk.attach_to(parent)?;
        }
        if self.ctx.config().spill_enabled {
            let action: Arc<dyn ExceedAction> = tbl.action_spill();
            self.ctx
                .mem_tracker()
                .fallback_old_and_set_new_action(action);
        }
        Ok(())
    }

    /// Fill `out` with the next rows for `cursor`. Leaves `out` empty when
    /// the cursor has read everything currently in the result table.
    pub fn get_chunk(&self, cursor: &mut CteCursor, out: &mut RowBatch) -> Result<()> {
        *out = RowBatch::new(self.batch_capacity);
        if self.limit.is_some() {
            return self.next_chunk_limit(cursor, out);
        }
        if cursor.batch_idx < self.res_tbl.num_batches() {
            let batch = self.res_tbl.get_batch(cursor.batch_idx)?;
            // Copied so callers can't change what other consumers read.
            *out = batch.copy_construct_sel();
            cursor.batch_idx += 1;
        }
        Ok(())
    }

    fn next_chunk_limit(&self, cursor: &mut CteCursor, out: &mut RowBatch) -> Result<()> {
        let (limit_beg, limit_end) = self.limit.unwrap_or((0, usize::MAX));
        if !cursor.meet_first_batch {
            while cursor.batch_idx < self.res_tbl.num_batches() {
                let batch = self.res_tbl.get_batch(cursor.batch_idx)?;
                cursor.batch_idx += 1;
                let num_rows = batch.num_rows();
                let new_cursor = cursor.rows + num_rows;
                if new_cursor > limit_beg {
                    cursor.meet_first_batch = true;
                    let beg = limit_beg - cursor.rows;
                    let end = if new_cursor > limit_end {
                        limit_end.saturating_sub(cursor.rows)
                    } else {
                        num_rows
                    };
                    cursor.rows += end;
                    if beg >= end {
                        break;
                    }
                    out.append_range(&batch, beg, end);
                    return Ok(());
                }
                cursor.rows = new_cursor;
            }
        }

        if cursor.batch_idx < self.res_tbl.num_batches() && cursor.rows < limit_end {
            let batch = self.res_tbl.get_batch(cursor.batch_idx)?;
            cursor.batch_idx += 1;
            let mut num_rows = batch.num_rows();
            if cursor.rows + num_rows > limit_end {
                num_rows = limit_end - cursor.rows;
                out.append_range(&batch, 0, num_rows);
            } else {
                *out = batch.copy_construct_sel();
            }
            cursor.rows += num_rows;
        }
        Ok(())
    }

    /// Close both sub-plans and release the iteration output table.
    ///
    /// The shared result and input tables stay readable. Every step runs even
    /// if an earlier one fails; the first error is returned.
    pub fn close_producer(&mut self) -> Result<()> {
        let mut first_err: Option<Error> = None;
        let mut record = |err: Error, what: &str| {
            if first_err.is_none() {
                first_err = Some(err);
            } else {
                tracing::error!(error = %err, step = what, "error while closing cte producer");
            }
        };

        if let Some(seed) = self.seed.as_mut() {
            if let Err(err) = seed.close() {
                record(err, "close seed part");
            }
        }
        if let Some(recursive) = self.recursive.as_mut() {
            if let Err(err) = recursive.close() {
                record(err, "close recursive part");
            }
        }
        if let Some(iter_out) = self.iter_out_tbl.take() {
            if let Err(err) = iter_out.deref_and_close() {
                record(err, "release iteration output");
            }
        }

        // The shared tables outlive the producer's trackers.
        for tbl in [&self.res_tbl, &self.iter_in_tbl] {
            tbl.mem_tracker().detach();
            tbl.disk_tracker().detach();
        }
        self.reset_tracker();
        self.closed = true;

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reset_tracker(&mut self) {
        if let Some(tracker) = self.mem_tracker.take() {
            tracker.reset();
        }
        if let Some(tracker) = self.disk_tracker.take() {
            tracker.reset();
        }
    }

    /// Recompute correlated value fingerprints; true if any changed.
    pub fn check_and_update_cor_col_hash_code(&mut self) -> bool {
        let mut changed = false;
        for (value, old) in self.cor_cols.iter().zip(self.cor_col_fingerprints.iter_mut()) {
            let new = fingerprint(value);
            if *old != new {
                *old = new;
                changed = true;
            }
        }
        changed
    }

    /// Forget the previous evaluation so the next open starts over
    pub fn reset(&mut self) {
        self.cur_iter = 0;
        self.dedup.drop_index();
        self.opened = false;
        self.open_err = None;
        self.closed = false;
    }

    /// Clear the shared tables and start a fresh dedup index
    pub fn reopen_tbls(&mut self) -> Result<()> {
        if self.dedup.is_distinct() {
            self.dedup.reset_index();
        }
        self.res_tbl.reopen()?;
        self.iter_in_tbl.reopen()
    }

    /// Current evaluation state
    pub fn stats(&self) -> CteStats {
        CteStats {
            iteration: self.cur_iter,
            result: TableStats::of(&self.res_tbl),
            iter_in: TableStats::of(&self.iter_in_tbl),
            iter_out: self.iter_out_tbl.as_deref().map(TableStats::of),
        }
    }

    fn log_tbls(&self, exhausted: u64) {
        let stats = self.stats();
        let iter_out = stats.iter_out.unwrap_or_default();
        tracing::debug!(
            cte = %self.name,
            iteration = stats.iteration,
            exhausted_batches = exhausted,
            res_rows = stats.result.rows,
            res_mem_bytes = stats.result.mem_bytes,
            res_disk_bytes = stats.result.disk_bytes,
            iter_in_rows = stats.iter_in.rows,
            iter_in_mem_bytes = stats.iter_in.mem_bytes,
            iter_in_disk_bytes = stats.iter_in.disk_bytes,
            iter_out_rows = iter_out.rows,
            iter_out_mem_bytes = iter_out.mem_bytes,
            iter_out_disk_bytes = iter_out.disk_bytes,
            "cte iteration"
        );
    }
}

impl std::fmt::Debug for CteProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CteProducer")
            .field("name", &self.name)
            .field("cur_iter", &self.cur_iter)
            .field("opened", &self.opened)
            .field("closed", &self.closed)
            .field("open_err", &self.open_err)
            .field("limit", &self.limit)
            .field("dedup", &self.dedup)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Seed,
    Recursive,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Seed => write!(f, "seed"),
            Phase::Recursive => write!(f, "recursive"),
        }
    }
}

fn fingerprint(value: &CorrelatedValue) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value(&mut buf, &value.read());
    buf
}

/// Run `f`, turning a panic into [`Error::Panic`]
fn recover_panic<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(Error::panic(message))
        }
    }
}
