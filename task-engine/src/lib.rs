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

//! A general-purpose asynchronous task runtime.
//!
//! A [`Task`](handle::Task) represents a deferred unit of work: constructed,
//! optionally attached to a parent, started on a [`Scheduler`](scheduler::Scheduler),
//! run to completion exactly once, and observed by any number of
//! continuations or waiters. The runtime itself never executes task bodies —
//! that is the scheduler's job — it only maintains the lifecycle state
//! machine, the continuation graph, and the cancellation/wait plumbing atop
//! whatever scheduler a caller supplies.
//!
//! See [`prelude`] for the common entry points.

pub mod cancellation;
pub mod combinators;
pub mod contingent;
pub mod continuation;
pub mod current;
pub mod error;
pub mod handle;
pub mod id;
pub mod options;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod wait;

pub mod prelude;

pub use current::current_id;
pub use error::{AggregateException, SchedulerError, TaskError};
pub use handle::{Task, TaskBuilder, TaskCompletionSource};
pub use id::TaskId;
pub use options::{ContinuationOptions, CreationOptions};
pub use scheduler::{InlineScheduler, Scheduler, ThreadPerTaskScheduler};
pub use state::Status;
pub use wait::{wait_all, wait_any};

#[cfg(test)]
mod integration_tests {
    use super::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn a_task_runs_and_yields_its_result() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let task = TaskBuilder::new(|_ctx| 1 + 1).start(scheduler);
        assert_eq!(task.wait_for_result().unwrap(), 2);
    }

    #[test]
    fn continuations_run_after_the_antecedent_completes() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let order = Arc::new(AtomicUsize::new(0));
        let first = order.clone();
        let second = order.clone();

        let task = TaskBuilder::new(move |_ctx| {
            first.fetch_add(1, Ordering::SeqCst);
            10
        })
        .start(scheduler.clone());

        let continuation = task.then(scheduler, move |antecedent| {
            let value = antecedent.wait_for_result().unwrap();
            second.fetch_add(1, Ordering::SeqCst);
            value * 2
        });

        assert_eq!(continuation.wait_for_result().unwrap(), 20);
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn attached_children_propagate_failures_to_waiting_parent() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let cancel_source = CancellationTokenSource::new();
        cancel_source.cancel();
        let cancel_token = cancel_source.token();

        let sched_for_body = scheduler.clone();
        let parent = TaskBuilder::new(move |_ctx| {
            TaskBuilder::new(|_ctx: &TaskContext| -> i32 { panic!("E1") })
                .with_options(CreationOptions::ATTACHED_TO_PARENT)
                .start(sched_for_body.clone());
            TaskBuilder::new(|_ctx| 1).with_options(CreationOptions::ATTACHED_TO_PARENT).start(sched_for_body.clone());
            TaskBuilder::new(|_ctx| 2)
                .with_options(CreationOptions::ATTACHED_TO_PARENT)
                .with_cancellation(cancel_token)
                .start(sched_for_body);
            99
        })
        .start(scheduler);

        match parent.wait_for_result() {
            Err(TaskError::Aggregate(agg)) => assert_eq!(agg.failures.len(), 2),
            other => panic!("expected an aggregate of the fault and the cancellation, got {other:?}"),
        }
    }

    #[test]
    fn deny_child_attach_rejects_attachment() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let sched_for_body = scheduler.clone();
        let parent = TaskBuilder::new(move |_ctx| {
            let child = TaskBuilder::new(|_ctx: &TaskContext| -> i32 { panic!("should not affect parent") })
                .with_options(CreationOptions::ATTACHED_TO_PARENT)
                .start(sched_for_body);
            assert!(child.is_faulted());
            7
        })
        .with_options(CreationOptions::DENY_CHILD_ATTACH)
        .start(scheduler);

        assert_eq!(parent.wait_for_result().unwrap(), 7);
    }
}
