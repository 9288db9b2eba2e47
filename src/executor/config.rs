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

//! CTE execution configuration
//!

/// Default `cte_max_recursion_depth`
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Default number of rows per batch
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1024;

/// Configuration options for recursive CTE evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteConfig {
    /// Highest iteration number a recursive CTE may reach
    /// Default: 1000
    pub max_recursion_depth: usize,

    /// Capacity of the batches handed to consumers
    /// Default: 1024
    pub max_chunk_size: usize,

    /// Statement memory quota in bytes, -1 for no limit
    /// Default: -1
    pub mem_quota: i64,

    /// Move CTE tables to disk when the memory quota is exceeded
    /// Default: true
    pub spill_enabled: bool,
}

impl Default for CteConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            mem_quota: -1,
            spill_enabled: true,
        }
    }
}

impl CteConfig {
    /// Creates a new CteConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the recursion depth limit
    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    /// Builder method to set the batch capacity (at least 1)
    pub fn with_max_chunk_size(mut self, rows: usize) -> Self {
        self.max_chunk_size = rows.max(1);
        self
    }

    /// Builder method to set the statement memory quota
    pub fn with_mem_quota(mut self, bytes: i64) -> Self {
        self.mem_quota = bytes;
        self
    }

    /// Builder method to enable/disable spilling to disk
    pub fn with_spill_enabled(mut self, enabled: bool) -> Self {
        self.spill_enabled = enabled;
        self
    }
}
