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

//! Table storage for CTE evaluation
//!
//! - [`cte_storage`] - Spillable, reference-counted batch tables
//! - [`spill`] - Temp-file batch encoding used when a table spills

pub mod cte_storage;
pub mod spill;

pub use cte_storage::{CteStorage, SpillDiskAction};
pub use spill::{decode_value, encode_value, SpillExtent, SpillFile};
