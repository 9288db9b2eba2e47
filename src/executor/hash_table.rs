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

//! Hash index from row hashes to row pointers, used for CTE deduplication.
//!
//! The layout follows a chained table with a flat entry vector:
//!
//! ```text
//! RowHashIndex
//! ├── bucket_heads: Vec<u32>    [bucket_count]     // First entry index per bucket
//! ├── entries: Vec<HashEntry>   [len]              // One per inserted row
//! └── bucket_mask: u64                             // For fast modulo
//!
//! HashEntry
//! ├── hash: u64     // Full hash for quick rejection
//! ├── ptr: RowPtr   // (batch, row) in the indexed table
//! └── next: u32     // Next in chain (EMPTY = end)
//! ```
//!
//! Entries are never removed; the whole index is cleared when its table is.
//! Hashes are not unique: callers must compare the rows behind every probed
//! pointer before treating them as duplicates.

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::core::RowPtr;

/// Sentinel value indicating end of chain or empty bucket.
const EMPTY: u32 = u32::MAX;

/// Minimum number of buckets (must be power of 2).
const MIN_BUCKETS: usize = 16;

/// Pointers returned by a probe; most probes hit zero or one entry.
pub type ProbeResult = SmallVec<[RowPtr; 4]>;

#[derive(Debug, Clone, Copy)]
struct HashEntry {
    hash: u64,
    ptr: RowPtr,
    next: u32,
}

#[derive(Debug)]
struct IndexInner {
    bucket_heads: Vec<u32>,
    entries: Vec<HashEntry>,
    bucket_mask: u64,
}

impl IndexInner {
    fn with_capacity(rows: usize) -> Self {
        // ~75% load factor
        let bucket_count = (rows * 4 / 3).max(MIN_BUCKETS).next_power_of_two();
        Self {
            bucket_heads: vec![EMPTY; bucket_count],
            entries: Vec::with_capacity(rows),
            bucket_mask: (bucket_count - 1) as u64,
        }
    }

    #[inline]
    fn bucket(&self, hash: u64) -> usize {
        (hash & self.bucket_mask) as usize
    }

    fn insert(&mut self, hash: u64, ptr: RowPtr) {
        if (self.entries.len() + 1) * 4 > self.bucket_heads.len() * 3 {
            self.grow();
        }
        let bucket = self.bucket(hash);
        let entry_idx = self.entries.len() as u32;
        self.entries.push(HashEntry {
            hash,
            ptr,
            next: self.bucket_heads[bucket],
        });
        self.bucket_heads[bucket] = entry_idx;
    }

    /// Double the bucket count and relink every chain
    fn grow(&mut self) {
        let bucket_count = self.bucket_heads.len() * 2;
        self.bucket_heads.clear();
        self.bucket_heads.resize(bucket_count, EMPTY);
        self.bucket_mask = (bucket_count - 1) as u64;
        for idx in 0..self.entries.len() {
            let bucket = self.bucket(self.entries[idx].hash);
            self.entries[idx].next = self.bucket_heads[bucket];
            self.bucket_heads[bucket] = idx as u32;
        }
    }

    fn probe(&self, hash: u64) -> ProbeResult {
        let mut out = ProbeResult::new();
        let mut current = self.bucket_heads[self.bucket(hash)];
        while current != EMPTY {
            let entry = &self.entries[current as usize];
            if entry.hash == hash {
                out.push(entry.ptr);
            }
            current = entry.next;
        }
        out
    }
}

/// Thread-safe multimap from a 64-bit row hash to row pointers.
///
/// # Example
///
/// ```
/// use cteflow::core::RowPtr;
/// use cteflow::executor::RowHashIndex;
///
/// let index = RowHashIndex::new();
/// index.insert(42, RowPtr::new(0, 1));
/// index.insert(42, RowPtr::new(3, 0));
/// assert_eq!(index.probe(42).len(), 2);
/// assert!(index.probe(7).is_empty());
/// ```
#[derive(Debug)]
pub struct RowHashIndex {
    inner: RwLock<IndexInner>,
}

impl RowHashIndex {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an index pre-sized for `rows` entries
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            inner: RwLock::new(IndexInner::with_capacity(rows)),
        }
    }

    /// Map `hash` to `ptr`. Duplicate hashes are kept as separate entries.
    #[inline]
    pub fn insert(&self, hash: u64, ptr: RowPtr) {
        self.inner.write().insert(hash, ptr);
    }

    /// All pointers stored under exactly `hash`, newest first.
    #[inline]
    pub fn probe(&self, hash: u64) -> ProbeResult {
        self.inner.read().probe(hash)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.inner.read().bucket_heads.len()
    }

    /// Remove every entry, keeping the current allocation
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.bucket_heads.fill(EMPTY);
    }
}

impl Default for RowHashIndex {
    fn default() -> Self {
        Self::new()
    }
}
