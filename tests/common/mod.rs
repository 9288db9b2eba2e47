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

//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cteflow::core::{DataType, Error, Result, Row, RowBatch, Value};
use cteflow::executor::{
    BatchOperator, ColumnInfo, CteConfig, CteDefinition, CteExec, CteHandle, CteTableReader,
    MaterializedOperator, ProjectFilterOperator, StatementContext,
};

pub fn int_schema() -> Vec<ColumnInfo> {
    vec![ColumnInfo::new("n", DataType::Integer)]
}

pub fn int_rows(values: &[i64]) -> Vec<Row> {
    values
        .iter()
        .map(|&v| Row::from_values(vec![Value::integer(v)]))
        .collect()
}

/// Seed operator yielding `values` in batches of `batch_size`
pub fn seed(values: &[i64], batch_size: usize) -> Box<dyn BatchOperator> {
    Box::new(MaterializedOperator::new(int_rows(values), int_schema()).with_batch_size(batch_size))
}

/// Recursive part `SELECT n + 1 FROM cte WHERE n < bound`
pub fn increment_below(
    bound: Option<i64>,
) -> impl FnOnce(CteTableReader) -> Result<Box<dyn BatchOperator>> + Send + 'static {
    move |input: CteTableReader| {
        Ok(Box::new(ProjectFilterOperator::new(
            Box::new(input),
            int_schema(),
            move |row| {
                let n = row[0].as_int64().unwrap_or_default();
                let keep = bound.map_or(true, |b| n < b);
                Ok(keep.then(|| Row::from_values(vec![Value::integer(n + 1)])))
            },
        )) as Box<dyn BatchOperator>)
    }
}

pub fn context(config: CteConfig) -> Arc<StatementContext> {
    StatementContext::new(config)
}

/// `WITH RECURSIVE cte AS (seed UNION [ALL] SELECT n + 1 FROM cte WHERE n < bound)`
pub fn counting_cte(
    seed_values: &[i64],
    bound: Option<i64>,
    distinct: bool,
    config: CteConfig,
) -> CteHandle {
    let batch_size = config.max_chunk_size;
    CteDefinition::new("cte", int_schema())
        .with_seed(seed(seed_values, batch_size))
        .with_recursive(increment_below(bound))
        .distinct(distinct)
        .build(context(config))
        .expect("build cte")
}

/// Open, drain and close a consumer
pub fn run(exec: &mut CteExec) -> Result<Vec<i64>> {
    exec.open()?;
    let values = drain(exec)?;
    exec.close()?;
    Ok(values)
}

pub fn drain(exec: &mut CteExec) -> Result<Vec<i64>> {
    let mut values = Vec::new();
    while let Some(batch) = exec.next_batch()? {
        values.extend(ints(&batch));
    }
    Ok(values)
}

pub fn ints(batch: &RowBatch) -> Vec<i64> {
    batch
        .iter()
        .map(|row| row[0].as_int64().expect("integer column"))
        .collect()
}

pub fn sorted(mut values: Vec<i64>) -> Vec<i64> {
    values.sort_unstable();
    values
}

/// Counters shared with a [`ScriptedOperator`]
#[derive(Debug, Default)]
pub struct Probe {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub pulls: AtomicUsize,
}

impl Probe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

/// Wraps an operator and injects failures
pub struct ScriptedOperator {
    inner: Box<dyn BatchOperator>,
    probe: Arc<Probe>,
    fail_open: Option<Error>,
    fail_close: Option<Error>,
    fail_next: Option<Error>,
    panic_on_next: bool,
    panic_on_close: bool,
}

impl ScriptedOperator {
    pub fn new(inner: Box<dyn BatchOperator>) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        (
            Self {
                inner,
                probe: Arc::clone(&probe),
                fail_open: None,
                fail_close: None,
                fail_next: None,
                panic_on_next: false,
                panic_on_close: false,
            },
            probe,
        )
    }

    pub fn fail_open(mut self, err: Error) -> Self {
        self.fail_open = Some(err);
        self
    }

    pub fn fail_close(mut self, err: Error) -> Self {
        self.fail_close = Some(err);
        self
    }

    pub fn fail_next(mut self, err: Error) -> Self {
        self.fail_next = Some(err);
        self
    }

    pub fn panic_on_next(mut self) -> Self {
        self.panic_on_next = true;
        self
    }

    pub fn panic_on_close(mut self) -> Self {
        self.panic_on_close = true;
        self
    }
}

impl BatchOperator for ScriptedOperator {
    fn open(&mut self) -> Result<()> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_open {
            return Err(err.clone());
        }
        self.inner.open()
    }

    fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        self.probe.pulls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_next {
            return Err(err.clone());
        }
        if self.panic_on_next {
            panic!("scripted failure in next_batch");
        }
        self.inner.next_batch()
    }

    fn close(&mut self) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_close {
            panic!("scripted failure in close");
        }
        let result = self.inner.close();
        match &self.fail_close {
            Some(err) => Err(err.clone()),
            None => result,
        }
    }

    fn schema(&self) -> &[ColumnInfo] {
        self.inner.schema()
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}
