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

//! Several consumers sharing one CTE producer

mod common;

use std::thread;

use common::*;
use cteflow::executor::{BatchOperator, CteConfig, CteDefinition};

#[test]
fn test_interleaved_consumers_see_the_same_rows() {
    let config = CteConfig::new().with_max_chunk_size(2);
    let handle = counting_cte(&[1, 2], Some(12), true, config);
    let mut a = handle.consumer().unwrap();
    let mut b = handle.consumer().unwrap();
    a.open().unwrap();
    b.open().unwrap();

    let mut seen_a = Vec::new();
    let mut seen_b = Vec::new();
    let mut a_done = false;
    let mut b_done = false;
    // a reads two batches for every one b reads
    while !(a_done && b_done) {
        for _ in 0..2 {
            if !a_done {
                match a.next_batch().unwrap() {
                    Some(batch) => seen_a.extend(ints(&batch)),
                    None => a_done = true,
                }
            }
        }
        if !b_done {
            match b.next_batch().unwrap() {
                Some(batch) => seen_b.extend(ints(&batch)),
                None => b_done = true,
            }
        }
    }
    a.close().unwrap();
    b.close().unwrap();

    assert_eq!(seen_a, seen_b);
    assert_eq!(sorted(seen_a), (1..=12).collect::<Vec<_>>());
}

#[test]
fn test_evaluation_runs_once() {
    let (scripted, probe) = ScriptedOperator::new(seed(&[1, 2, 3], 8));
    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(Box::new(scripted))
        .with_recursive(increment_below(Some(4)))
        .distinct(true)
        .build(context(CteConfig::default()))
        .unwrap();

    let mut first = handle.consumer().unwrap();
    let expected = run(&mut first).unwrap();
    assert_eq!(expected, vec![1, 2, 3, 4]);

    // the producer is closed now, but the result stays readable
    let mut second = handle.consumer().unwrap();
    assert_eq!(run(&mut second).unwrap(), expected);
    assert_eq!(probe.opens(), 1);
    assert_eq!(probe.closes(), 1);
}

#[test]
fn test_consumers_on_threads() {
    let handle = counting_cte(&[1], Some(200), false, CteConfig::new().with_max_chunk_size(16));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let mut exec = handle.consumer().unwrap();
            thread::spawn(move || run(&mut exec).unwrap())
        })
        .collect();

    let results: Vec<Vec<i64>> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    for values in &results {
        assert_eq!(values, &(1..=200).collect::<Vec<_>>());
    }
}

#[test]
fn test_last_consumer_releases_result_table() {
    let handle = counting_cte(&[1], Some(3), true, CteConfig::default());
    let mut a = handle.consumer().unwrap();
    let b = handle.consumer().unwrap();
    assert_eq!(handle.result_table().ref_count(), 2);
    // the recursive part's reader holds one more on the input table
    assert_eq!(handle.iter_in_table().ref_count(), 3);

    run(&mut a).unwrap();
    drop(a);
    assert!(!handle.result_table().is_closed());
    assert_eq!(handle.result_table().num_rows(), 3);

    drop(b);
    assert!(handle.result_table().is_closed());
    assert_eq!(handle.result_table().mem_tracker().bytes_consumed(), 0);
    assert_eq!(handle.iter_in_table().ref_count(), 1);
}

#[test]
fn test_reader_follows_iteration_input() {
    let handle = counting_cte(&[1, 2], Some(5), true, CteConfig::default());
    let mut reader = handle.table_reader().unwrap();
    let mut exec = handle.consumer().unwrap();
    run(&mut exec).unwrap();

    // evaluation ended with an empty iteration input
    reader.open().unwrap();
    assert!(reader.next_batch().unwrap().is_none());
    assert_eq!(reader.name(), "CTETableReader");
}

#[test]
fn test_sibling_close_before_production_re_evaluates() {
    let handle = counting_cte(&[1, 2], Some(5), true, CteConfig::new());
    let mut a = handle.consumer().unwrap();
    let mut b = handle.consumer().unwrap();
    a.open().unwrap();
    b.open().unwrap();

    // a closes the shared producer before anything was pulled
    a.close().unwrap();
    assert!(handle.producer().lock().is_closed());
    assert!(!handle.result_table().done());

    assert_eq!(drain(&mut b).unwrap(), vec![1, 2, 3, 4, 5]);
    assert!(handle.result_table().done());

    let mut c = handle.consumer().unwrap();
    assert_eq!(run(&mut c).unwrap(), vec![1, 2, 3, 4, 5]);
    b.close().unwrap();
    assert!(handle.producer().lock().is_closed());
}

#[test]
fn test_sibling_close_reopens_sub_plans_once() {
    let (seed_op, probe) = ScriptedOperator::new(seed(&[3], 4));
    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(Box::new(seed_op))
        .with_recursive(increment_below(Some(6)))
        .build(context(CteConfig::new()))
        .unwrap();
    let mut a = handle.consumer().unwrap();
    let mut b = handle.consumer().unwrap();
    a.open().unwrap();
    b.open().unwrap();
    a.close().unwrap();
    assert_eq!((probe.opens(), probe.closes()), (1, 1));

    assert_eq!(drain(&mut b).unwrap(), vec![3, 4, 5, 6]);
    assert_eq!(probe.opens(), 2);
    // done now: further reads don't rebuild anything
    assert!(b.next_batch().unwrap().is_none());
    assert_eq!(probe.opens(), 2);
}
