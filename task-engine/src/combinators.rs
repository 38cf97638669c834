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

//! `WhenAll`/`WhenAny`/`Delay`/`Unwrap`/`Run`: combinators built entirely out
//! of `TaskCompletionSource` plus `on_completed`, the same way every other
//! completion-driven reaction in this crate is wired up. None of these poll
//! on a fixed interval; each attaches itself as a completion action on its
//! constituent(s) and only does work when one actually fires.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::error::TaskError;
use crate::handle::{Task, TaskBuilder, TaskCompletionSource};
use crate::options::CreationOptions;
use crate::scheduler::Scheduler;
use crate::state::Status;
use crate::task::TaskContext;

/// Joins `tasks`, completing once every one of them has.
///
/// Zero inputs yield an already-`RanToCompletion` task with an empty vector.
/// Otherwise: any faulted constituent makes the join faulted, with every
/// faulted constituent's failures concatenated (canceled constituents are
/// subsumed by a fault and contribute nothing); absent any fault, any
/// canceled constituent makes the join canceled, adopting the first such
/// constituent's token; otherwise the join runs to completion with results
/// in input order.
pub fn when_all<T>(tasks: Vec<Task<T>>) -> Task<Vec<T>>
where
    T: Clone + Send + 'static,
{
    if tasks.is_empty() {
        let tcs: TaskCompletionSource<Vec<T>> = TaskCompletionSource::new(CreationOptions::NONE_EXPLICIT);
        tcs.try_set_result(Vec::new());
        return tcs.task();
    }

    let tcs = Arc::new(TaskCompletionSource::<Vec<T>>::new(CreationOptions::NONE_EXPLICIT));
    let out = tcs.task();
    let tasks = Arc::new(tasks);
    let remaining = Arc::new(AtomicUsize::new(tasks.len()));

    for constituent in tasks.iter() {
        let remaining = remaining.clone();
        let tcs = tcs.clone();
        let tasks = tasks.clone();
        constituent.core().on_completed(false, move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                settle_when_all(&tcs, &tasks);
            }
        });
    }

    out
}

fn settle_when_all<T>(tcs: &TaskCompletionSource<Vec<T>>, tasks: &[Task<T>])
where
    T: Clone + Send + 'static,
{
    let mut failures = Vec::new();
    for t in tasks {
        if t.is_faulted() {
            failures.extend(t.core().exception_snapshot().failures);
        }
    }
    if !failures.is_empty() {
        tcs.try_set_exceptions(failures);
        return;
    }

    if let Some(canceled) = tasks.iter().find(|t| t.is_canceled()) {
        tcs.try_set_canceled_with_token(canceled.core().cancellation_token_id());
        return;
    }

    let results = tasks.iter().map(|t| t.wait_for_result().expect("every constituent ran to completion")).collect();
    tcs.try_set_result(results);
}

/// Completes with whichever of `tasks` finishes first (the task handle
/// itself is the result; the others' eventual outcomes don't affect it).
/// Rejects zero inputs, mirroring `WhenAny`'s argument-error edge case.
pub fn when_any<T>(tasks: Vec<Task<T>>) -> Result<Task<Task<T>>, TaskError>
where
    T: Clone + Send + 'static,
{
    if tasks.is_empty() {
        return Err(TaskError::InvalidState("WhenAny requires at least one task"));
    }

    let tcs = Arc::new(TaskCompletionSource::<Task<T>>::new(CreationOptions::NONE_EXPLICIT));
    let out = tcs.task();

    for constituent in &tasks {
        let tcs = tcs.clone();
        let winner = constituent.clone();
        constituent.core().on_completed(false, move || {
            tcs.try_set_result(winner.clone());
        });
    }

    Ok(out)
}

/// A promise armed with a timer and (if `token` can be canceled) a
/// cancellation registration; whichever fires first settles the task. Both
/// are disposed once the task completes.
pub fn delay(duration: Duration, token: CancellationToken) -> Task<()> {
    let tcs = Arc::new(TaskCompletionSource::<()>::new(CreationOptions::NONE_EXPLICIT));
    let task = tcs.task();

    {
        let tcs = tcs.clone();
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            tcs.try_set_result(());
        });
    }

    if token.can_be_canceled() {
        let token_id = token.id();
        let tcs_for_cancel = tcs.clone();
        let registration = token.register(move || {
            tcs_for_cancel.try_set_canceled_with_token(Some(token_id));
        });
        let mut registration = Some(registration);
        task.core().on_completed(true, move || {
            if let Some(reg) = registration.take() {
                reg.dispose();
            }
        });
    }

    task
}

/// Given a task-of-a-task, produces a task that mirrors the inner task's
/// eventual completion rather than the outer's (whose own successful
/// completion is merely "the inner task now exists").
pub fn unwrap<T>(outer: Task<Task<T>>) -> Task<T>
where
    T: Clone + Send + 'static,
{
    let tcs = Arc::new(TaskCompletionSource::<T>::new(CreationOptions::NONE_EXPLICIT));
    let task = tcs.task();

    let outer_for_closure = outer.clone();
    let settle_outer = tcs.clone();
    outer.core().on_completed(false, move || match outer_for_closure.status() {
        Status::Faulted => {
            settle_outer.try_set_exceptions(outer_for_closure.core().exception_snapshot().failures);
        }
        Status::Canceled => {
            settle_outer.try_set_canceled_with_token(outer_for_closure.core().cancellation_token_id());
        }
        Status::RanToCompletion => {
            let inner = outer_for_closure.wait_for_result().expect("outer task ran to completion");
            let settle_inner = settle_outer.clone();
            inner.core().on_completed(false, move || match inner.status() {
                Status::Faulted => {
                    settle_inner.try_set_exceptions(inner.core().exception_snapshot().failures);
                }
                Status::Canceled => {
                    settle_inner.try_set_canceled_with_token(inner.core().cancellation_token_id());
                }
                Status::RanToCompletion => {
                    settle_inner.try_set_result(inner.wait_for_result().expect("inner task ran to completion"));
                }
                _ => {}
            });
        }
        _ => {}
    });

    task
}

/// Shorthand for constructing and starting a non-attached task on
/// `scheduler`.
pub fn run<T, F>(scheduler: Arc<dyn Scheduler>, body: F) -> Task<T>
where
    T: Send + 'static,
    F: FnOnce(&TaskContext) -> T + Send + 'static,
{
    TaskBuilder::new(body).start(scheduler)
}

/// `Run` for a body that itself returns a task: equivalent to `unwrap`
/// applied to the task `run` would otherwise yield.
pub fn run_and_unwrap<T, F>(scheduler: Arc<dyn Scheduler>, body: F) -> Task<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(&TaskContext) -> Task<T> + Send + 'static,
{
    unwrap(TaskBuilder::new(body).start(scheduler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::InlineScheduler;

    fn inline() -> Arc<dyn Scheduler> {
        Arc::new(InlineScheduler::new())
    }

    #[test]
    fn when_all_empty_completes_immediately_with_empty_vec() {
        let joined: Task<Vec<i32>> = when_all(Vec::new());
        assert_eq!(joined.wait_for_result().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn when_all_preserves_input_order() {
        let scheduler = inline();
        let tasks = vec![
            TaskBuilder::new(|_ctx| 1).start(scheduler.clone()),
            TaskBuilder::new(|_ctx| 2).start(scheduler.clone()),
            TaskBuilder::new(|_ctx| 3).start(scheduler),
        ];
        let joined = when_all(tasks);
        assert_eq!(joined.wait_for_result().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn when_all_faults_if_any_constituent_faults() {
        let scheduler = inline();
        let tasks = vec![TaskBuilder::new(|_ctx| 1).start(scheduler.clone()), TaskBuilder::new(|_ctx: &TaskContext| -> i32 { panic!("boom") }).start(scheduler)];
        let joined = when_all(tasks);
        assert!(joined.is_faulted());
    }

    #[test]
    fn when_any_rejects_empty_input() {
        let empty: Vec<Task<i32>> = Vec::new();
        assert!(when_any(empty).is_err());
    }

    #[test]
    fn when_any_completes_with_one_of_the_inputs() {
        let scheduler = inline();
        let tasks = vec![TaskBuilder::new(|_ctx| 10).start(scheduler.clone()), TaskBuilder::new(|_ctx| 20).start(scheduler)];
        let first = when_any(tasks).unwrap();
        let winner = first.wait_for_result().unwrap();
        let value = winner.wait_for_result().unwrap();
        assert!(value == 10 || value == 20);
    }

    #[test]
    fn delay_with_no_cancellation_runs_to_completion() {
        let task = delay(Duration::from_millis(1), CancellationToken::none());
        task.wait_for_result().unwrap();
    }

    #[test]
    fn delay_canceled_before_firing_completes_as_canceled() {
        let source = crate::cancellation::CancellationTokenSource::new();
        source.cancel();
        let task = delay(Duration::from_secs(5), source.token());
        assert!(task.is_canceled());
    }

    #[test]
    fn unwrap_mirrors_the_inner_tasks_result() {
        let scheduler = inline();
        let inner_scheduler = scheduler.clone();
        let outer: Task<Task<i32>> = TaskBuilder::new(move |_ctx| TaskBuilder::new(|_ctx| 99).start(inner_scheduler)).start(scheduler);
        let mirrored = unwrap(outer);
        assert_eq!(mirrored.wait_for_result().unwrap(), 99);
    }

    #[test]
    fn run_and_unwrap_flattens_a_task_returning_body() {
        let scheduler = inline();
        let inner_scheduler = scheduler.clone();
        let mirrored = run_and_unwrap(scheduler, move |_ctx| TaskBuilder::new(|_ctx| 7).start(inner_scheduler));
        assert_eq!(mirrored.wait_for_result().unwrap(), 7);
    }
}
