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

//! Hierarchical memory and disk usage tracking
//!
//! Every table a recursive CTE touches owns a memory tracker and a disk
//! tracker. They are attached under the producer's trackers, which in turn
//! hang off the statement-wide trackers:
//!
//! ```text
//! statement (quota, exceed actions)
//! └── cte producer
//!     ├── result table
//!     ├── iteration input table
//!     └── iteration output table
//! ```
//!
//! Consumption propagates to every ancestor. When a tracker with a quota
//! goes above it, its registered [`ExceedAction`]s run newest first until
//! usage drops back under the quota; if none manage it the caller gets
//! [`Error::MemoryExceeded`].

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::{Error, Result};

/// Quota value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// What a tracker accounts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerLabel {
    /// Statement-wide root
    Statement,
    /// One recursive CTE producer
    CteProducer,
    /// A table owned by a CTE evaluation
    CteStorage,
}

impl fmt::Display for TrackerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerLabel::Statement => write!(f, "statement"),
            TrackerLabel::CteProducer => write!(f, "cte producer"),
            TrackerLabel::CteStorage => write!(f, "cte storage"),
        }
    }
}

/// Callback run when a tracker goes over its quota
pub trait ExceedAction: Send + Sync {
    /// Try to bring `tracker` back under quota (e.g. by spilling to disk).
    ///
    /// Returning `Ok(())` without freeing anything is fine; the next,
    /// older action is tried after it.
    fn action(&self, tracker: &Tracker) -> Result<()>;

    /// Name for logging
    fn name(&self) -> &str;

    /// False once the action can no longer do anything (e.g. the table it
    /// spills is gone). Dead actions are dropped on the next registration.
    fn is_alive(&self) -> bool {
        true
    }
}

/// A node in the usage tracking tree
pub struct Tracker {
    label: RwLock<TrackerLabel>,
    consumed: AtomicI64,
    max_consumed: AtomicI64,
    quota: AtomicI64,
    parent: RwLock<Option<Arc<Tracker>>>,
    /// Oldest first; the last entry is tried first.
    actions: Mutex<Vec<Arc<dyn ExceedAction>>>,
}

impl Tracker {
    /// Create a detached tracker. Use [`UNLIMITED`] for no quota.
    pub fn new(label: TrackerLabel, quota: i64) -> Arc<Self> {
        Arc::new(Self {
            label: RwLock::new(label),
            consumed: AtomicI64::new(0),
            max_consumed: AtomicI64::new(0),
            quota: AtomicI64::new(quota),
            parent: RwLock::new(None),
            actions: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn label(&self) -> TrackerLabel {
        *self.label.read()
    }

    pub fn set_label(&self, label: TrackerLabel) {
        *self.label.write() = label;
    }

    /// Bytes currently accounted to this tracker and its descendants
    #[inline]
    pub fn bytes_consumed(&self) -> i64 {
        self.consumed.load(Ordering::Acquire)
    }

    /// High-water mark of [`bytes_consumed`](Self::bytes_consumed)
    #[inline]
    pub fn max_consumed(&self) -> i64 {
        self.max_consumed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn quota(&self) -> i64 {
        self.quota.load(Ordering::Acquire)
    }

    /// Whether usage is above a configured quota
    pub fn is_exceeded(&self) -> bool {
        let quota = self.quota();
        quota >= 0 && self.bytes_consumed() > quota
    }

    pub fn parent(&self) -> Option<Arc<Tracker>> {
        self.parent.read().clone()
    }

    /// Move this tracker (and its current usage) under `parent`.
    ///
    /// A previous parent, if any, is released first.
    pub fn attach_to(&self, parent: &Arc<Tracker>) -> Result<()> {
        if let Some(old) = self.parent() {
            if Arc::ptr_eq(&old, parent) {
                return Ok(());
            }
        }
        self.detach();
        *self.parent.write() = Some(Arc::clone(parent));
        let bytes = self.bytes_consumed();
        if bytes != 0 {
            parent.consume(bytes)?;
        }
        Ok(())
    }

    /// Remove this tracker from its parent, taking its usage with it
    pub fn detach(&self) {
        let parent = self.parent.write().take();
        if let Some(parent) = parent {
            let bytes = self.bytes_consumed();
            if bytes != 0 {
                parent.release(bytes);
            }
        }
    }

    /// Detach and zero all counters
    pub fn reset(&self) {
        self.detach();
        self.consumed.store(0, Ordering::Release);
        self.max_consumed.store(0, Ordering::Release);
    }

    /// Account `bytes` (negative to release) here and in every ancestor.
    ///
    /// Usage is recorded even when an exceed action fails.
    pub fn consume(&self, bytes: i64) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        let mut result = Ok(());
        if self.add(bytes) {
            result = self.run_actions();
        }
        let mut next = self.parent();
        while let Some(tracker) = next {
            if tracker.add(bytes) && result.is_ok() {
                result = tracker.run_actions();
            }
            next = tracker.parent();
        }
        result
    }

    /// Register `action`, keeping the previously registered ones as fallbacks.
    /// Registering an action that is already present moves it to the front.
    pub fn fallback_old_and_set_new_action(&self, action: Arc<dyn ExceedAction>) {
        let mut actions = self.actions.lock();
        actions.retain(|existing| existing.is_alive() && !same_action(existing, &action));
        actions.push(action);
    }

    /// Number of registered exceed actions
    pub fn action_count(&self) -> usize {
        self.actions.lock().len()
    }

    /// Release without running any action; never fails.
    fn release(&self, bytes: i64) {
        self.add(-bytes);
        let mut next = self.parent();
        while let Some(tracker) = next {
            tracker.add(-bytes);
            next = tracker.parent();
        }
    }

    /// Returns true when a positive delta pushed usage above the quota
    fn add(&self, bytes: i64) -> bool {
        let now = self.consumed.fetch_add(bytes, Ordering::AcqRel) + bytes;
        if bytes > 0 {
            self.max_consumed.fetch_max(now, Ordering::AcqRel);
            let quota = self.quota();
            return quota >= 0 && now > quota;
        }
        false
    }

    fn run_actions(&self) -> Result<()> {
        // Actions re-enter the tree (a spill releases memory), so the list
        // lock must not be held while they run.
        let actions: Vec<Arc<dyn ExceedAction>> = self.actions.lock().iter().rev().cloned().collect();
        for action in actions.into_iter().filter(|a| a.is_alive()) {
            tracing::debug!(
                tracker = %self.label(),
                action = action.name(),
                consumed = self.bytes_consumed(),
                quota = self.quota(),
                "quota exceeded, running action"
            );
            action.action(self)?;
            if !self.is_exceeded() {
                return Ok(());
            }
        }
        Err(Error::memory_exceeded(
            self.label().to_string(),
            self.bytes_consumed(),
            self.quota(),
        ))
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("label", &self.label())
            .field("consumed", &self.bytes_consumed())
            .field("max_consumed", &self.max_consumed())
            .field("quota", &self.quota())
            .field("attached", &self.parent.read().is_some())
            .finish()
    }
}

fn same_action(a: &Arc<dyn ExceedAction>, b: &Arc<dyn ExceedAction>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
