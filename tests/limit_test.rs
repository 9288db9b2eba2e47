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

//! LIMIT / OFFSET over CTE output
//!
//! Whatever the batch layout, a limited read must equal the unlimited
//! output sliced to `[offset, offset + count)`.

mod common;

use common::*;
use cteflow::executor::{CteConfig, CteDefinition};
use proptest::prelude::*;

fn full_output(seed_values: &[i64], bound: i64, batch_size: usize) -> Vec<i64> {
    let handle = counting_cte(
        seed_values,
        Some(bound),
        false,
        CteConfig::new().with_max_chunk_size(batch_size),
    );
    let mut exec = handle.consumer().unwrap();
    run(&mut exec).unwrap()
}

fn limited_output(
    seed_values: &[i64],
    bound: i64,
    batch_size: usize,
    offset: usize,
    count: usize,
) -> Vec<i64> {
    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(seed(seed_values, batch_size))
        .with_recursive(increment_below(Some(bound)))
        .with_limit(offset, count)
        .build(context(CteConfig::new().with_max_chunk_size(batch_size)))
        .unwrap();
    let mut exec = handle.consumer().unwrap();
    run(&mut exec).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn limit_equals_sliced_full_output(
        seed_values in prop::collection::vec(0i64..10, 0..12),
        bound in 0i64..15,
        batch_size in 1usize..6,
        offset in 0usize..60,
        count in 0usize..30,
    ) {
        let full = full_output(&seed_values, bound, batch_size);
        let limited = limited_output(&seed_values, bound, batch_size, offset, count);

        let beg = offset.min(full.len());
        let end = (offset + count).min(full.len());
        prop_assert_eq!(limited, full[beg..end].to_vec());
    }
}

#[test]
fn test_two_limited_consumers_each_get_the_slice() {
    let handle = CteDefinition::new("cte", int_schema())
        .with_seed(seed(&[1, 2, 3, 4, 5, 6, 7, 8, 9], 2))
        .with_limit(3, 4)
        .build(context(CteConfig::new().with_max_chunk_size(2)))
        .unwrap();
    let mut a = handle.consumer().unwrap();
    let mut b = handle.consumer().unwrap();
    assert_eq!(run(&mut a).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(run(&mut b).unwrap(), vec![4, 5, 6, 7]);
}
