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

//! Consumer side of a recursive CTE
//!
//! Every place a plan reads the CTE gets its own `CteExec`. All of them share
//! one [`CteProducer`]; the first `next_batch` runs the evaluation and the
//! rest only page through the finished result table with their own cursor.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{Result, RowBatch};
use crate::executor::operator::{BatchOperator, ColumnInfo};
use crate::storage::CteStorage;

use super::producer::{CteCursor, CteProducer};

/// Producer handle shared by the consumers of one CTE definition
pub type SharedProducer = Arc<Mutex<CteProducer>>;

/// Operator reading the result of a (recursive) CTE
pub struct CteExec {
    producer: SharedProducer,
    /// References taken at construction, released on drop
    res_tbl: Arc<CteStorage>,
    iter_in_tbl: Arc<CteStorage>,
    schema: Vec<ColumnInfo>,
    cursor: CteCursor,
    opened: bool,
}

impl CteExec {
    /// Create a consumer, taking a reference on both shared tables
    pub fn new(producer: SharedProducer) -> Result<Self> {
        let (res_tbl, iter_in_tbl, schema) = {
            let p = producer.lock();
            (
                Arc::clone(p.result_table()),
                Arc::clone(p.iter_in_table()),
                p.schema().to_vec(),
            )
        };
        res_tbl.open_and_ref()?;
        if let Err(err) = iter_in_tbl.open_and_ref() {
            res_tbl.deref_and_close()?;
            return Err(err);
        }
        Ok(Self {
            producer,
            res_tbl,
            iter_in_tbl,
            schema,
            cursor: CteCursor::default(),
            opened: false,
        })
    }

    /// Shared producer behind this consumer
    pub fn producer(&self) -> &SharedProducer {
        &self.producer
    }

    /// Read position of this consumer
    pub fn cursor(&self) -> CteCursor {
        self.cursor
    }

    /// Whether the producer was closed while the result is neither done nor
    /// failed, leaving nothing a consumer could read.
    fn closed_unfinished(&self, producer: &CteProducer) -> bool {
        producer.is_closed() && !self.res_tbl.done() && self.res_tbl.error().is_none()
    }
}

impl BatchOperator for CteExec {
    fn open(&mut self) -> Result<()> {
        self.cursor.reset();
        let mut producer = self.producer.lock();

        if producer.check_and_update_cor_col_hash_code() {
            tracing::debug!(cte = producer.name(), "correlated value changed, re-evaluating");
            producer.reset();
            producer.reopen_tbls()?;
        } else if self.closed_unfinished(&producer) {
            // Closed before the evaluation finished; start over.
            producer.reset();
            producer.reopen_tbls()?;
        }

        if let Some(err) = producer.open_err() {
            return Err(err.clone());
        }
        if !producer.is_opened() {
            producer.open_producer()?;
        }
        self.opened = true;
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        if !self.opened {
            return Ok(None);
        }
        let mut producer = self.producer.lock();
        if self.closed_unfinished(&producer) {
            // A sibling consumer closed the producer before anything was
            // produced; its sub-plans are closed, so rebuild before pulling.
            tracing::debug!(cte = producer.name(), "producer closed by a sibling, re-evaluating");
            producer.reset();
            producer.reopen_tbls()?;
            self.cursor.reset();
            producer.open_producer()?;
        }
        if !self.res_tbl.done() {
            producer.produce()?;
        }
        let mut out = RowBatch::default();
        producer.get_chunk(&mut self.cursor, &mut out)?;
        Ok((!out.is_empty()).then_some(out))
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        let mut producer = self.producer.lock();
        if !producer.is_closed() {
            // Leaves the result table readable for sibling consumers.
            producer.close_producer()?;
        }
        Ok(())
    }

    fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    fn estimated_rows(&self) -> Option<usize> {
        self.res_tbl.done().then(|| self.res_tbl.num_rows())
    }

    fn name(&self) -> &str {
        "CTE"
    }
}

impl Drop for CteExec {
    fn drop(&mut self) {
        for tbl in [&self.res_tbl, &self.iter_in_tbl] {
            if let Err(err) = tbl.deref_and_close() {
                tracing::warn!(error = %err, table = tbl.name(), "failed to release cte table");
            }
        }
    }
}
