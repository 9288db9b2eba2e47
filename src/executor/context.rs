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

//! Statement context for CTE execution
//!
//! Holds what every operator of one statement shares: configuration, the
//! statement-level memory and disk trackers, and the cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::{Tracker, TrackerLabel, UNLIMITED};
use crate::core::Result;

use super::config::CteConfig;

/// Per-statement execution context
///
/// Cheap to share: operators hold it behind an `Arc`.
#[derive(Debug)]
pub struct StatementContext {
    config: CteConfig,
    mem_tracker: Arc<Tracker>,
    disk_tracker: Arc<Tracker>,
    /// Cancellation flag
    cancelled: Arc<AtomicBool>,
}

impl StatementContext {
    /// Create a context; the memory quota comes from `config`
    pub fn new(config: CteConfig) -> Arc<Self> {
        let mem_tracker = Tracker::new(TrackerLabel::Statement, config.mem_quota);
        let disk_tracker = Tracker::new(TrackerLabel::Statement, UNLIMITED);
        Arc::new(Self {
            config,
            mem_tracker,
            disk_tracker,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    #[inline]
    pub fn config(&self) -> &CteConfig {
        &self.config
    }

    /// Statement memory tracker; spill actions are registered here
    #[inline]
    pub fn mem_tracker(&self) -> &Arc<Tracker> {
        &self.mem_tracker
    }

    #[inline]
    pub fn disk_tracker(&self) -> &Arc<Tracker> {
        &self.disk_tracker
    }

    /// Check if the statement has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Cancel the statement
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Get a cancellation handle that can be used from another thread
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Check for cancellation and return an error if cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(crate::core::Error::QueryCancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for StatementContext {
    fn default() -> Self {
        let config = CteConfig::default();
        Self {
            mem_tracker: Tracker::new(TrackerLabel::Statement, config.mem_quota),
            disk_tracker: Tracker::new(TrackerLabel::Statement, UNLIMITED),
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Handle for cancelling a statement from another thread
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    /// Cancel the statement
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Check if the statement has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
