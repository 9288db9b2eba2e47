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

//! Recursive CTE evaluation tests
//!
//! Fixpoint iteration, UNION vs UNION ALL, the recursion depth guard and
//! LIMIT handling through a single consumer.

mod common;

use common::*;
use cteflow::core::Error;
use cteflow::executor::{BatchOperator, CteConfig, CteDefinition};

/// seed {1,2,3}, n + 1 while n < 5, UNION
#[test]
fn test_distinct_counting_reaches_fixpoint() {
    let handle = counting_cte(&[1, 2, 3], Some(5), true, CteConfig::default());
    let mut exec = handle.consumer().unwrap();

    let values = run(&mut exec).unwrap();
    assert_eq!(values, vec![1, 2, 3, 4, 5]);

    let stats = handle.stats();
    assert_eq!(stats.iteration, 3);
    assert_eq!(stats.result.rows, 5);
    assert!(handle.result_table().done());
    assert!(handle.result_table().error().is_none());
}

#[test]
fn test_union_all_keeps_every_path() {
    let handle = counting_cte(&[1, 2, 3], Some(5), false, CteConfig::default());
    let mut exec = handle.consumer().unwrap();

    let values = run(&mut exec).unwrap();
    assert_eq!(sorted(values), vec![1, 2, 2, 3, 3, 3, 4, 4, 4, 5, 5, 5]);
}

#[test]
fn test_duplicate_seed_rows_collapse_under_union() {
    let handle = counting_cte(&[2, 2, 1, 2, 1], Some(3), true, CteConfig::default());
    let mut exec = handle.consumer().unwrap();
    assert_eq!(sorted(run(&mut exec).unwrap()), vec![1, 2, 3]);
}

#[test]
fn test_small_batches_span_many_batches() {
    let config = CteConfig::new().with_max_chunk_size(2);
    let handle = counting_cte(&[1, 2, 3, 4, 5], Some(9), true, config);
    let mut exec = handle.consumer().unwrap();

    let values = run(&mut exec).unwrap();
    assert_eq!(sorted(values), (1..=9).collect::<Vec<_>>());
    assert!(handle.result_table().num_batches() >= 3);
}

#[test]
fn test_depth_guard() {
    let config = CteConfig::new().with_max_recursion_depth(10);
    let handle = counting_cte(&[1], None, false, config);
    let mut exec = handle.consumer().unwrap();
    exec.open().unwrap();

    let err = drain(&mut exec).unwrap_err();
    assert_eq!(err, Error::RecursionDepthExceeded { iteration: 11 });
    assert!(err.is_recursion_depth_exceeded());
    assert!(!handle.result_table().done());
    assert_eq!(handle.result_table().error(), Some(err.clone()));

    // latched: the next pull returns the same error without evaluating again
    assert_eq!(exec.next_batch().unwrap_err(), err);
    exec.close().unwrap();
}

#[test]
fn test_depth_guard_allows_exact_depth() {
    // 1 -> 5 needs iterations up to 5
    let handle = counting_cte(&[1], Some(5), false, CteConfig::new().with_max_recursion_depth(5));
    let mut exec = handle.consumer().unwrap();
    assert_eq!(run(&mut exec).unwrap(), vec![1, 2, 3, 4, 5]);

    let handle = counting_cte(&[1], Some(5), false, CteConfig::new().with_max_recursion_depth(4));
    let mut exec = handle.consumer().unwrap();
    assert_eq!(
        run(&mut exec).unwrap_err(),
        Error::RecursionDepthExceeded { iteration: 5 }
    );
}

#[test]
fn test_depth_zero_rejects_any_recursion() {
    let handle = counting_cte(&[1], Some(3), false, CteConfig::new().with_max_recursion_depth(0));
    let mut exec = handle.consumer().unwrap();
    assert_eq!(
        run(&mut exec).unwrap_err(),
        Error::RecursionDepthExceeded { iteration: 1 }
    );
}

#[test]
fn test_empty_seed_gives_empty_result() {
    let handle = counting_cte(&[], Some(5), true, CteConfig::default());
    let mut exec = handle.consumer().unwrap();
    assert!(run(&mut exec).unwrap().is_empty());
    assert!(handle.result_table().done());
    assert_eq!(handle.stats().iteration, 1);
}

#[test]
fn test_non_recursive_cte() {
    let handle = CteDefinition::new("plain", int_schema())
        .with_seed(seed(&[3, 1, 2], 2))
        .build(context(CteConfig::default()))
        .unwrap();
    let mut exec = handle.consumer().unwrap();
    assert_eq!(run(&mut exec).unwrap(), vec![3, 1, 2]);
    assert!(handle.stats().iter_out.is_none());
}

#[test]
fn test_schema_defaults_to_seed_schema() {
    let handle = CteDefinition::new("plain", Vec::new())
        .with_seed(seed(&[1], 2))
        .build(context(CteConfig::default()))
        .unwrap();
    let exec = handle.consumer().unwrap();
    assert_eq!(exec.schema(), int_schema().as_slice());
}

#[test]
fn test_limit_inside_one_batch() {
    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(seed(&[10, 11, 12, 13, 14, 15], 6))
        .with_limit(2, 3)
        .build(context(CteConfig::default()))
        .unwrap();
    let mut exec = handle.consumer().unwrap();
    assert_eq!(run(&mut exec).unwrap(), vec![12, 13, 14]);
}

#[test]
fn test_limit_spans_batches_and_stops_evaluation() {
    let config = CteConfig::new().with_max_chunk_size(3);
    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(seed(&[1], 3))
        .with_recursive(increment_below(None))
        .with_limit(2, 5)
        .build(context(config))
        .unwrap();
    let mut exec = handle.consumer().unwrap();

    assert_eq!(run(&mut exec).unwrap(), vec![3, 4, 5, 6, 7]);
    // unbounded recursion stopped once the LIMIT was covered
    assert_eq!(handle.result_table().num_rows(), 7);
}

#[test]
fn test_limit_offset_on_batch_boundary() {
    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(seed(&[1, 2, 3, 4, 5, 6, 7], 3))
        .with_limit(3, 3)
        .build(context(CteConfig::default()))
        .unwrap();
    let mut exec = handle.consumer().unwrap();
    assert_eq!(run(&mut exec).unwrap(), vec![4, 5, 6]);
}

#[test]
fn test_limit_zero_and_offset_past_end() {
    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(seed(&[1, 2, 3], 2))
        .with_limit(1, 0)
        .build(context(CteConfig::default()))
        .unwrap();
    let mut exec = handle.consumer().unwrap();
    assert!(run(&mut exec).unwrap().is_empty());

    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(seed(&[1, 2, 3], 2))
        .with_limit(10, 5)
        .build(context(CteConfig::default()))
        .unwrap();
    let mut exec = handle.consumer().unwrap();
    assert!(run(&mut exec).unwrap().is_empty());
}

#[test]
fn test_cancelled_statement_stops_evaluation() {
    let ctx = context(CteConfig::default());
    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(seed(&[1], 4))
        .with_recursive(increment_below(None))
        .build(ctx.clone())
        .unwrap();
    let mut exec = handle.consumer().unwrap();
    exec.open().unwrap();
    ctx.cancel();
    assert_eq!(exec.next_batch().unwrap_err(), Error::QueryCancelled);
}
