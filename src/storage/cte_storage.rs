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

//! Spillable, reference-counted table used by CTE evaluation
//!
//! A [`CteStorage`] is an ordered, append-only list of row batches plus the
//! flags producers use to talk to readers (iteration tag, done, error). Each
//! table owns a memory and a disk [`Tracker`]; the producer attaches both to
//! its own trackers and registers [`CteStorage::action_spill`] on the
//! statement tracker so a quota overrun moves the table to a temp file.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::common::{ExceedAction, Tracker, TrackerLabel, UNLIMITED};
use crate::core::{DataType, Error, Result, Row, RowBatch, RowPtr};

use super::spill::{SpillExtent, SpillFile};

enum StoredBatch {
    Memory(Arc<RowBatch>),
    Disk { extent: SpillExtent, rows: usize },
}

impl StoredBatch {
    fn num_rows(&self) -> usize {
        match self {
            StoredBatch::Memory(batch) => batch.num_rows(),
            StoredBatch::Disk { rows, .. } => *rows,
        }
    }
}

#[derive(Default)]
struct StorageInner {
    batches: Vec<StoredBatch>,
    spill: Option<SpillFile>,
    num_rows: usize,
    mem_bytes: i64,
    disk_bytes: i64,
    iter: usize,
    done: bool,
    err: Option<Error>,
    closed: bool,
    /// Last batch decoded from the spill file
    cache: Option<(usize, Arc<RowBatch>)>,
}

impl StorageInner {
    fn clear_data(&mut self) -> (i64, i64) {
        let freed = (self.mem_bytes, self.disk_bytes);
        self.batches.clear();
        self.spill = None;
        self.cache = None;
        self.num_rows = 0;
        self.mem_bytes = 0;
        self.disk_bytes = 0;
        freed
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::StorageClosed);
        }
        Ok(())
    }
}

/// Append-only table of row batches shared between a CTE producer and its readers
pub struct CteStorage {
    name: String,
    field_types: Vec<DataType>,
    batch_capacity: usize,
    inner: Mutex<StorageInner>,
    ref_count: AtomicUsize,
    spill_count: AtomicUsize,
    mem_tracker: Arc<Tracker>,
    disk_tracker: Arc<Tracker>,
    spill_action: Arc<SpillDiskAction>,
}

impl CteStorage {
    /// Create an open, empty table with no references taken
    pub fn new(
        name: impl Into<String>,
        field_types: Vec<DataType>,
        batch_capacity: usize,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak| CteStorage {
            spill_action: Arc::new(SpillDiskAction {
                name: format!("spill {}", name),
                storage: weak.clone(),
            }),
            name,
            field_types,
            batch_capacity: batch_capacity.max(1),
            inner: Mutex::new(StorageInner::default()),
            ref_count: AtomicUsize::new(0),
            spill_count: AtomicUsize::new(0),
            mem_tracker: Tracker::new(TrackerLabel::CteStorage, UNLIMITED),
            disk_tracker: Tracker::new(TrackerLabel::CteStorage, UNLIMITED),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn field_types(&self) -> &[DataType] {
        &self.field_types
    }

    /// Capacity used for batches read back from disk
    #[inline]
    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    /// Take a reference, reopening the table if the last one was released
    pub fn open_and_ref(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if self.ref_count.fetch_add(1, Ordering::AcqRel) == 0 && inner.closed {
            inner.closed = false;
            inner.iter = 0;
            inner.done = false;
            inner.err = None;
        }
        Ok(())
    }

    /// Drop a reference; the last one closes the table and frees its data
    pub fn deref_and_close(&self) -> Result<()> {
        let freed = {
            let mut inner = self.inner.lock();
            let prev = self.ref_count.load(Ordering::Acquire);
            if prev == 0 {
                return Err(Error::internal(format!(
                    "{}: released more references than taken",
                    self.name
                )));
            }
            self.ref_count.store(prev - 1, Ordering::Release);
            if prev > 1 {
                return Ok(());
            }
            inner.closed = true;
            inner.clear_data()
        };
        self.release(freed)?;
        self.mem_tracker.detach();
        self.disk_tracker.detach();
        Ok(())
    }

    /// Number of outstanding references
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Append the selected rows of `batch`. Empty batches are ignored.
    pub fn add(&self, batch: RowBatch) -> Result<()> {
        let batch = batch.into_compacted();
        if batch.is_empty() {
            return Ok(());
        }
        let rows = batch.num_rows();
        let (mem_delta, disk_delta) = {
            let mut inner = self.inner.lock();
            inner.check_open()?;
            inner.num_rows += rows;
            match inner.spill.as_mut() {
                Some(file) => {
                    let extent = file.append(&batch)?;
                    inner.batches.push(StoredBatch::Disk { extent, rows });
                    inner.disk_bytes += extent.len as i64;
                    (0, extent.len as i64)
                }
                None => {
                    let bytes = batch.mem_size() as i64;
                    inner.batches.push(StoredBatch::Memory(Arc::new(batch)));
                    inner.mem_bytes += bytes;
                    (bytes, 0)
                }
            }
        };
        // Charged unlocked: a spill triggered here re-enters this table.
        self.disk_tracker.consume(disk_delta)?;
        self.mem_tracker.consume(mem_delta)
    }

    /// Get batch `idx`. Spilled batches are decoded through a one-batch cache.
    pub fn get_batch(&self, idx: usize) -> Result<Arc<RowBatch>> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let len = inner.batches.len();
        let extent = match inner.batches.get(idx) {
            None => return Err(Error::BatchIndexOutOfBounds { index: idx, len }),
            Some(StoredBatch::Memory(batch)) => return Ok(Arc::clone(batch)),
            Some(StoredBatch::Disk { extent, .. }) => *extent,
        };
        if let Some((cached_idx, batch)) = &inner.cache {
            if *cached_idx == idx {
                return Ok(Arc::clone(batch));
            }
        }
        let file = inner
            .spill
            .as_mut()
            .ok_or_else(|| Error::internal("spilled batch without a spill file"))?;
        let batch = Arc::new(file.read(extent, self.batch_capacity)?);
        inner.cache = Some((idx, Arc::clone(&batch)));
        Ok(batch)
    }

    /// Copy of the row a pointer refers to
    pub fn get_row(&self, ptr: RowPtr) -> Result<Row> {
        let batch = self.get_batch(ptr.batch_idx as usize)?;
        batch
            .row(ptr.row_idx as usize)
            .cloned()
            .ok_or(Error::RowIndexOutOfBounds {
                index: ptr.row_idx as usize,
                len: batch.num_rows(),
            })
    }

    pub fn num_batches(&self) -> usize {
        self.inner.lock().batches.len()
    }

    pub fn num_rows(&self) -> usize {
        self.inner.lock().num_rows
    }

    /// Row count of batch `idx` without reading it from disk
    pub fn batch_num_rows(&self, idx: usize) -> Result<usize> {
        let inner = self.inner.lock();
        inner
            .batches
            .get(idx)
            .map(StoredBatch::num_rows)
            .ok_or(Error::BatchIndexOutOfBounds {
                index: idx,
                len: inner.batches.len(),
            })
    }

    pub fn mem_bytes(&self) -> i64 {
        self.inner.lock().mem_bytes
    }

    pub fn disk_bytes(&self) -> i64 {
        self.inner.lock().disk_bytes
    }

    /// Whether the table has been moved to disk since it was last cleared
    pub fn is_spilled(&self) -> bool {
        self.inner.lock().spill.is_some()
    }

    /// Number of spills this table has gone through over its lifetime
    pub fn spill_count(&self) -> usize {
        self.spill_count.load(Ordering::Acquire)
    }

    pub fn set_iter(&self, iter: usize) {
        self.inner.lock().iter = iter;
    }

    pub fn iter(&self) -> usize {
        self.inner.lock().iter
    }

    pub fn set_done(&self) {
        self.inner.lock().done = true;
    }

    pub fn done(&self) -> bool {
        self.inner.lock().done
    }

    pub fn set_error(&self, err: Error) {
        self.inner.lock().err = Some(err);
    }

    pub fn error(&self) -> Option<Error> {
        self.inner.lock().err.clone()
    }

    /// Clear all data and reset the iteration tag, done flag and error
    pub fn reopen(&self) -> Result<()> {
        let freed = {
            let mut inner = self.inner.lock();
            inner.check_open()?;
            inner.iter = 0;
            inner.done = false;
            inner.err = None;
            inner.clear_data()
        };
        self.release(freed)
    }

    /// Exchange batches (and their spill files) with `other`.
    ///
    /// Flags stay with their table; only the data moves.
    pub fn swap_data(&self, other: &CteStorage) -> Result<()> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let (self_before, other_before) = {
            // Fixed lock order avoids deadlocks between concurrent swaps.
            let (mut a, mut b) = if (self as *const Self) < (other as *const Self) {
                let a = self.inner.lock();
                let b = other.inner.lock();
                (a, b)
            } else {
                let b = other.inner.lock();
                let a = self.inner.lock();
                (a, b)
            };
            a.check_open()?;
            b.check_open()?;
            let before = ((a.mem_bytes, a.disk_bytes), (b.mem_bytes, b.disk_bytes));
            std::mem::swap(&mut a.batches, &mut b.batches);
            std::mem::swap(&mut a.spill, &mut b.spill);
            std::mem::swap(&mut a.cache, &mut b.cache);
            std::mem::swap(&mut a.num_rows, &mut b.num_rows);
            std::mem::swap(&mut a.mem_bytes, &mut b.mem_bytes);
            std::mem::swap(&mut a.disk_bytes, &mut b.disk_bytes);
            before
        };
        // Release before charging so the totals never overshoot.
        self.release(self_before)?;
        other.release(other_before)?;
        self.charge(other_before)?;
        other.charge(self_before)
    }

    /// Move every in-memory batch to the spill file
    pub fn spill_to_disk(&self) -> Result<()> {
        let (freed, written) = {
            let mut inner = self.inner.lock();
            if inner.closed || inner.mem_bytes == 0 {
                return Ok(());
            }
            let inner = &mut *inner;
            if inner.spill.is_none() {
                inner.spill = Some(SpillFile::new()?);
                self.spill_count.fetch_add(1, Ordering::AcqRel);
            }
            let file = inner
                .spill
                .as_mut()
                .ok_or_else(|| Error::internal("spill file missing"))?;
            let mut written = 0i64;
            for stored in inner.batches.iter_mut() {
                if let StoredBatch::Memory(batch) = stored {
                    let rows = batch.num_rows();
                    let extent = file.append(batch)?;
                    written += extent.len as i64;
                    *stored = StoredBatch::Disk { extent, rows };
                }
            }
            let freed = inner.mem_bytes;
            inner.mem_bytes = 0;
            inner.disk_bytes += written;
            (freed, written)
        };
        tracing::debug!(
            table = %self.name,
            freed_bytes = freed,
            written_bytes = written,
            "spilled cte table to disk"
        );
        self.mem_tracker.consume(-freed)?;
        self.disk_tracker.consume(written)
    }

    /// Memory tracker of this table
    pub fn mem_tracker(&self) -> &Arc<Tracker> {
        &self.mem_tracker
    }

    /// Disk tracker of this table
    pub fn disk_tracker(&self) -> &Arc<Tracker> {
        &self.disk_tracker
    }

    /// Exceed action spilling this table. Always the same instance, so
    /// registering it again on a tracker replaces rather than duplicates it.
    pub fn action_spill(&self) -> Arc<dyn ExceedAction> {
        Arc::clone(&self.spill_action) as Arc<dyn ExceedAction>
    }

    fn release(&self, (mem, disk): (i64, i64)) -> Result<()> {
        self.mem_tracker.consume(-mem)?;
        self.disk_tracker.consume(-disk)
    }

    fn charge(&self, (mem, disk): (i64, i64)) -> Result<()> {
        self.disk_tracker.consume(disk)?;
        self.mem_tracker.consume(mem)
    }
}

impl fmt::Debug for CteStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CteStorage")
            .field("name", &self.name)
            .field("batches", &inner.batches.len())
            .field("rows", &inner.num_rows)
            .field("mem_bytes", &inner.mem_bytes)
            .field("disk_bytes", &inner.disk_bytes)
            .field("iter", &inner.iter)
            .field("done", &inner.done)
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Spills its table when the tracker it is registered on exceeds its quota
pub struct SpillDiskAction {
    name: String,
    storage: Weak<CteStorage>,
}

impl ExceedAction for SpillDiskAction {
    fn action(&self, _tracker: &Tracker) -> Result<()> {
        match self.storage.upgrade() {
            Some(storage) => storage.spill_to_disk(),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_alive(&self) -> bool {
        self.storage.strong_count() > 0
    }
}
