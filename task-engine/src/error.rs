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

//! Captured-failure storage (`ExceptionHolder`) and the error taxonomy that
//! crosses the crate's public API boundary (`TaskError`, `SchedulerError`).
//! The two are distinct: a holder may accumulate many causes (e.g. from
//! several failed children); `TaskError`/`AggregateException` is what a
//! caller of `wait`/`result` actually sees.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::id::TaskId;

/// A single captured failure: either a user body panic or a propagated
/// cancellation signal.
#[derive(Debug, Clone)]
pub struct CapturedFailure {
    pub message: String,
    pub is_cancellation: bool,
}

impl CapturedFailure {
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task body panicked with a non-string payload".to_string()
        };
        Self { message, is_cancellation: false }
    }

    pub fn cancellation(message: impl Into<String>) -> Self {
        Self { message: message.into(), is_cancellation: true }
    }
}

impl fmt::Display for CapturedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Flattened collection of every captured failure belonging to a faulted
/// task (its own plus any unobserved exceptional children it absorbed).
#[derive(Debug, Clone)]
pub struct AggregateException {
    pub task_id: TaskId,
    pub failures: Vec<CapturedFailure>,
}

impl fmt::Display for AggregateException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "one or more errors occurred in {} (", self.task_id)?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        f.write_str(")")
    }
}

impl std::error::Error for AggregateException {}

/// A task's own captured-failure storage. Lives inside the contingent
/// properties block; allocated only for tasks that actually fail.
///
/// Dropping a holder whose failures were never observed (via `mark_observed`)
/// emits a `tracing::warn!` rather than silently discarding the failure —
/// the closest equivalent this crate has to .NET's `UnobservedTaskException`,
/// since Rust has no finalizer queue to hook a dedicated surface into.
#[derive(Debug)]
pub struct ExceptionHolder {
    task_id: TaskId,
    failures: Mutex<Vec<CapturedFailure>>,
    observed: AtomicBool,
}

impl ExceptionHolder {
    pub fn new(task_id: TaskId) -> Self {
        Self { task_id, failures: Mutex::new(Vec::new()), observed: AtomicBool::new(false) }
    }

    pub fn add(&self, failure: CapturedFailure) {
        self.failures.lock().push(failure);
    }

    pub fn extend(&self, failures: impl IntoIterator<Item = CapturedFailure>) {
        self.failures.lock().extend(failures);
    }

    pub fn mark_observed(&self) {
        self.observed.store(true, Ordering::Release);
    }

    pub fn is_observed(&self) -> bool {
        self.observed.load(Ordering::Acquire)
    }

    pub fn is_cancellation(&self) -> bool {
        self.failures.lock().iter().all(|f| f.is_cancellation) && !self.failures.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<CapturedFailure> {
        self.failures.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }

    pub fn to_aggregate(&self) -> AggregateException {
        self.mark_observed();
        AggregateException { task_id: self.task_id, failures: self.snapshot() }
    }
}

impl Drop for ExceptionHolder {
    fn drop(&mut self) {
        if self.observed.load(Ordering::Acquire) {
            return;
        }
        let failures = self.failures.lock();
        if failures.is_empty() || failures.iter().all(|f| f.is_cancellation) {
            return;
        }
        tracing::warn!(
            task_id = %self.task_id,
            failures = ?failures.iter().map(|f| f.message.as_str()).collect::<Vec<_>>(),
            "exception holder dropped without being observed"
        );
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler refused to queue task: {0}")]
    QueueFailed(String),
    #[error("scheduler does not support inline execution")]
    InlineUnsupported,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("invalid task state: {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("operation canceled")]
    OperationCanceled { token_id: Option<u64> },

    #[error(transparent)]
    Aggregate(AggregateException),

    #[error("wait timed out before the task completed")]
    Timeout,
}

impl From<AggregateException> for TaskError {
    fn from(agg: AggregateException) -> Self {
        TaskError::Aggregate(agg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unobserved_non_cancellation_failure_does_not_panic_on_drop() {
        let holder = ExceptionHolder::new(crate::id::LazyTaskId::unassigned().get_or_assign());
        holder.add(CapturedFailure { message: "boom".into(), is_cancellation: false });
        drop(holder);
    }

    #[test]
    fn observed_holder_suppresses_warning_path() {
        let holder = ExceptionHolder::new(crate::id::LazyTaskId::unassigned().get_or_assign());
        holder.add(CapturedFailure { message: "boom".into(), is_cancellation: false });
        holder.mark_observed();
        assert!(holder.is_observed());
    }

    #[test]
    fn aggregate_display_joins_messages() {
        let holder = ExceptionHolder::new(crate::id::LazyTaskId::unassigned().get_or_assign());
        holder.add(CapturedFailure { message: "a".into(), is_cancellation: false });
        holder.add(CapturedFailure { message: "b".into(), is_cancellation: false });
        let agg = holder.to_aggregate();
        assert!(agg.to_string().contains("a; b"));
    }
}
