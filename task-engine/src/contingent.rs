// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! The contingent-properties block: everything a task needs only if it
//! actually fails, is waited on, is canceled, or has children attached.
//! Allocated lazily (most tasks never touch any of this) and then lives for
//! the task's lifetime once created.

use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

use parking_lot::Mutex;

use crate::cancellation::CancellationRegistration;
use crate::error::{CapturedFailure, ExceptionHolder};
use crate::id::TaskId;

/// A child task's captured failure, surfaced to the parent's aggregate
/// exception when the parent finishes and finds unobserved exceptional
/// children.
#[derive(Debug, Clone)]
pub struct ChildFailure {
    pub child_id: TaskId,
    pub failures: Vec<CapturedFailure>,
}

pub struct ContingentProperties {
    pub exception_holder: ExceptionHolder,
    pub cancellation_registration: Mutex<Option<CancellationRegistration>>,
    /// Set when `InternalCancel` fires before the body has had a chance to
    /// observe the source's own flag (e.g. a `Delay`-style pre-check).
    pub internal_cancellation_requested: AtomicBool,
    /// Starts at 1 (the task's own body) and is incremented once per
    /// attached child; reaching 0 via `fetch_sub` (from either the task's
    /// own completion or any child's) is what triggers stage two of
    /// `finish`. Commutative regardless of completion order.
    pub child_countdown: AtomicIsize,
    pub exceptional_children: Mutex<Vec<ChildFailure>>,
}

impl ContingentProperties {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            exception_holder: ExceptionHolder::new(task_id),
            cancellation_registration: Mutex::new(None),
            internal_cancellation_requested: AtomicBool::new(false),
            child_countdown: AtomicIsize::new(1),
            exceptional_children: Mutex::new(Vec::new()),
        }
    }

    pub fn add_child(&self) {
        self.child_countdown.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the shared countdown, returning whether this decrement was
    /// the one that brought it to zero (i.e. every required participant —
    /// the task's own body plus every attached child — has now finished).
    pub fn decrement_countdown(&self) -> bool {
        self.child_countdown.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn record_child_failure(&self, child_id: TaskId, failures: Vec<CapturedFailure>) {
        if failures.is_empty() {
            return;
        }
        self.exceptional_children.lock().push(ChildFailure { child_id, failures });
    }

    pub fn drain_child_failures(&self) -> Vec<ChildFailure> {
        std::mem::take(&mut *self.exceptional_children.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_reaches_zero_exactly_once() {
        let props = ContingentProperties::new(crate::id::LazyTaskId::unassigned().get_or_assign());
        props.add_child();
        props.add_child();
        assert!(!props.decrement_countdown()); // self
        assert!(!props.decrement_countdown()); // child 1
        assert!(props.decrement_countdown()); // child 2 -> hits zero
    }

    #[test]
    fn no_children_means_self_decrement_alone_finishes() {
        let props = ContingentProperties::new(crate::id::LazyTaskId::unassigned().get_or_assign());
        assert!(props.decrement_countdown());
    }
}
