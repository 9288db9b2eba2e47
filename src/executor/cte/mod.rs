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

//! Recursive common table expressions
//!
//! ```text
//! WITH RECURSIVE cte(n) AS (
//!     SELECT 1              -- seed part
//!     UNION [ALL]
//!     SELECT n + 1 FROM cte WHERE n < 5   -- recursive part
//! )
//! SELECT * FROM cte LIMIT 3 OFFSET 1
//! ```
//!
//! A [`CteDefinition`] describes one such CTE and builds a [`CteHandle`],
//! which owns the shared [`CteProducer`] and the result and iteration-input
//! tables. Every read of the CTE in the outer plan is a [`CteExec`] obtained
//! from the handle.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cteflow::core::{DataType, Row, Value};
//! use cteflow::executor::{
//!     BatchOperator, ColumnInfo, CteConfig, CteDefinition, MaterializedOperator,
//!     ProjectFilterOperator, StatementContext,
//! };
//!
//! let schema = vec![ColumnInfo::new("n", DataType::Integer)];
//! let seed = MaterializedOperator::new(
//!     vec![Row::from_values(vec![Value::integer(1)])],
//!     schema.clone(),
//! );
//! let handle = CteDefinition::new("cte", schema.clone())
//!     .with_seed(Box::new(seed))
//!     .with_recursive(move |input| {
//!         Ok(Box::new(ProjectFilterOperator::new(Box::new(input), schema, |row| {
//!             let n = row[0].as_int64().unwrap_or_default();
//!             Ok((n < 5).then(|| Row::from_values(vec![Value::integer(n + 1)])))
//!         })))
//!     })
//!     .distinct(true)
//!     .build(StatementContext::new(CteConfig::default()))
//!     .unwrap();
//!
//! let mut exec = handle.consumer().unwrap();
//! exec.open().unwrap();
//! let mut values = Vec::new();
//! while let Some(batch) = exec.next_batch().unwrap() {
//!     values.extend(batch.iter().map(|row| row[0].as_int64().unwrap()));
//! }
//! exec.close().unwrap();
//! assert_eq!(values, vec![1, 2, 3, 4, 5]);
//! ```

pub mod consumer;
pub mod producer;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::{Result, Value};
use crate::executor::context::StatementContext;
use crate::executor::dedup::{DedupStrategy, UnionAll, UnionDistinct};
use crate::executor::operator::{BatchOperator, ColumnInfo};
use crate::executor::operators::CteTableReader;
use crate::storage::CteStorage;

pub use consumer::{CteExec, SharedProducer};
pub use producer::{CteCursor, CteProducer, CteStats, TableStats};

/// Outer-scope value a CTE depends on; changing it forces re-evaluation
pub type CorrelatedValue = Arc<RwLock<Value>>;

/// Create a correlated value handle
pub fn correlated_value(value: impl Into<Value>) -> CorrelatedValue {
    Arc::new(RwLock::new(value.into()))
}

/// Builds the recursive part from a reader over the iteration input
pub type RecursivePartBuilder =
    Box<dyn FnOnce(CteTableReader) -> Result<Box<dyn BatchOperator>> + Send>;

/// Description of one CTE, turned into a [`CteHandle`] by [`build`](Self::build)
pub struct CteDefinition {
    name: String,
    schema: Vec<ColumnInfo>,
    seed: Option<Box<dyn BatchOperator>>,
    recursive: Option<RecursivePartBuilder>,
    dedup: Option<Box<dyn DedupStrategy>>,
    limit: Option<(usize, usize)>,
    cor_cols: Vec<CorrelatedValue>,
}

impl CteDefinition {
    pub fn new(name: impl Into<String>, schema: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.into(),
            schema,
            seed: None,
            recursive: None,
            dedup: None,
            limit: None,
            cor_cols: Vec::new(),
        }
    }

    /// Set the non-recursive part
    pub fn with_seed(mut self, seed: Box<dyn BatchOperator>) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the recursive part, built around a reader of the previous
    /// iteration's rows
    pub fn with_recursive<F>(mut self, build: F) -> Self
    where
        F: FnOnce(CteTableReader) -> Result<Box<dyn BatchOperator>> + Send + 'static,
    {
        self.recursive = Some(Box::new(build));
        self
    }

    /// `UNION` (true) or `UNION ALL` (false)
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.dedup = Some(if distinct {
            Box::new(UnionDistinct::new())
        } else {
            Box::new(UnionAll)
        });
        self
    }

    /// Use a specific dedup strategy
    pub fn with_dedup_strategy(mut self, dedup: Box<dyn DedupStrategy>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// `LIMIT count OFFSET offset` over the CTE's output
    pub fn with_limit(mut self, offset: usize, count: usize) -> Self {
        self.limit = Some((offset, offset.saturating_add(count)));
        self
    }

    /// Track an outer value the CTE depends on
    pub fn with_correlated(mut self, value: CorrelatedValue) -> Self {
        self.cor_cols.push(value);
        self
    }

    /// Create the shared tables and producer
    pub fn build(self, ctx: Arc<StatementContext>) -> Result<CteHandle> {
        let schema = match (&self.seed, self.schema.is_empty()) {
            (Some(seed), true) => seed.schema().to_vec(),
            _ => self.schema,
        };
        let field_types: Vec<_> = schema.iter().map(|c| c.data_type).collect();
        let capacity = ctx.config().max_chunk_size;

        let res_tbl = CteStorage::new(
            format!("{} result", self.name),
            field_types.clone(),
            capacity,
        );
        let iter_in_tbl = CteStorage::new(
            format!("{} iteration input", self.name),
            field_types,
            capacity,
        );

        let recursive = match self.recursive {
            Some(build) => Some(build(CteTableReader::new(
                Arc::clone(&iter_in_tbl),
                schema.clone(),
            )?)?),
            None => None,
        };

        let producer = CteProducer::new(
            ctx,
            self.name,
            self.seed,
            recursive,
            Arc::clone(&res_tbl),
            Arc::clone(&iter_in_tbl),
            self.dedup.unwrap_or_else(|| Box::new(UnionAll)),
            schema,
            self.limit,
            self.cor_cols,
        );
        Ok(CteHandle {
            producer: Arc::new(Mutex::new(producer)),
            res_tbl,
            iter_in_tbl,
        })
    }
}

/// A built CTE: hands out consumers of its shared producer
#[derive(Clone)]
pub struct CteHandle {
    producer: SharedProducer,
    res_tbl: Arc<CteStorage>,
    iter_in_tbl: Arc<CteStorage>,
}

impl CteHandle {
    /// New consumer reading the CTE's result
    pub fn consumer(&self) -> Result<CteExec> {
        CteExec::new(Arc::clone(&self.producer))
    }

    /// New reader over the iteration input
    pub fn table_reader(&self) -> Result<CteTableReader> {
        let schema = self.producer.lock().schema().to_vec();
        CteTableReader::new(Arc::clone(&self.iter_in_tbl), schema)
    }

    pub fn producer(&self) -> &SharedProducer {
        &self.producer
    }

    pub fn result_table(&self) -> &Arc<CteStorage> {
        &self.res_tbl
    }

    pub fn iter_in_table(&self) -> &Arc<CteStorage> {
        &self.iter_in_tbl
    }

    /// Current evaluation state
    pub fn stats(&self) -> CteStats {
        self.producer.lock().stats()
    }
}
