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

//! The public, typed surface: `Task<T>` wraps the type-erased `TaskCore` and
//! downcasts its result; `TaskBuilder` constructs and starts one;
//! `TaskCompletionSource` exposes the promise-task surface.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::error::{CapturedFailure, TaskError};
use crate::id::TaskId;
use crate::options::{ContinuationOptions, CreationOptions};
use crate::scheduler::Scheduler;
use crate::state::Status;
use crate::task::{BodyOutput, TaskContext, TaskCore};
use crate::wait;

/// A handle to a deferred unit of work yielding `T` on success. Cheap to
/// clone (an `Arc` underneath); every clone observes the same underlying
/// task.
pub struct Task<T> {
    core: Arc<TaskCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone(), _marker: PhantomData }
    }
}

impl<T: Send + 'static> Task<T> {
    pub(crate) fn from_core(core: Arc<TaskCore>) -> Self {
        Self { core, _marker: PhantomData }
    }

    pub(crate) fn core(&self) -> &Arc<TaskCore> {
        &self.core
    }

    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    pub fn status(&self) -> Status {
        self.core.state().status()
    }

    pub fn is_completed(&self) -> bool {
        self.core.state().is_completed()
    }

    /// Mirrors `Task.FromResult`: an already `RanToCompletion` task, built
    /// without ever touching a scheduler.
    pub fn from_result(value: T) -> Self {
        let tcs = TaskCompletionSource::new(CreationOptions::NONE_EXPLICIT);
        tcs.try_set_result(value);
        tcs.task()
    }

    /// Mirrors `Task.FromException`: an already `Faulted` task.
    pub fn from_exception(message: impl Into<String>) -> Self {
        let tcs: TaskCompletionSource<T> = TaskCompletionSource::new(CreationOptions::NONE_EXPLICIT);
        tcs.try_set_exception(message);
        tcs.task()
    }

    /// Mirrors `Task.FromCanceled`: an already `Canceled` task carrying
    /// `token`'s identity, so a subsequent `wait` attributes the
    /// cancellation to that specific token.
    pub fn from_canceled(token: &CancellationToken) -> Self {
        let tcs: TaskCompletionSource<T> = TaskCompletionSource::new(CreationOptions::NONE_EXPLICIT);
        let token_id = token.can_be_canceled().then(|| token.id());
        tcs.try_set_canceled_with_token(token_id);
        tcs.task()
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.status(), Status::Canceled)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.status(), Status::Faulted)
    }

    /// Blocks (optionally bounded by `timeout`, optionally interruptible by
    /// `token`) until the task completes. Does not itself return the result
    /// or propagate a failure — see [`Task::wait_for_result`] for that.
    /// Returns whether the task completed before the wait ended.
    pub fn wait(&self, timeout: Option<Duration>, token: Option<&CancellationToken>) -> Result<bool, TaskError> {
        let millis = timeout.map_or(-1, |d| d.as_millis() as i64);
        wait::wait_core(&self.core, millis, token)
    }

    /// Blocks until completion and returns the result, or the classified
    /// failure (`OperationCanceled`/`Aggregate`).
    pub fn wait_for_result(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        wait::wait_core(&self.core, -1, None)?;
        Ok(self.cloned_result())
    }

    fn cloned_result(&self) -> T
    where
        T: Clone,
    {
        self.core.cloned_result::<T>().expect("task completed successfully but has no stored result of this type")
    }

    /// Registers a continuation that runs after this task completes,
    /// returning a new task representing the continuation's own work.
    /// Honors `NotOnRanToCompletion`/`NotOnFaulted`/`NotOnCanceled` filters;
    /// if the antecedent's terminal state is filtered out, the continuation
    /// task is canceled rather than run.
    pub fn continue_with<U, F>(&self, scheduler: Arc<dyn Scheduler>, options: ContinuationOptions, f: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(Task<T>) -> U + Send + 'static,
    {
        let antecedent = self.clone();
        let continuation_core = TaskCore::new_root(Box::new(move |_ctx: &TaskContext| Box::new(f(antecedent)) as BodyOutput), CreationOptions::NONE_EXPLICIT);

        if options.contains(ContinuationOptions::ATTACHED_TO_PARENT) {
            if let Some(parent) = crate::current::current() {
                if !parent.creation_options().contains(CreationOptions::DENY_CHILD_ATTACH) {
                    continuation_core.set_parent(&parent);
                }
            }
        }

        let continuation = continuation_core.clone();
        let execute_sync = options.contains(ContinuationOptions::EXECUTE_SYNCHRONOUSLY);
        let sched = scheduler.clone();
        let status_filter = options;
        let me = self.core.clone();

        self.core.on_completed(execute_sync, move || {
            if should_run_continuation(me.state().status(), status_filter) {
                let _ = continuation.start(sched);
            } else {
                continuation.internal_cancel(true);
            }
        });

        Task::from_core(continuation_core)
    }
}

impl Task<()> {
    /// Mirrors `Task.CompletedTask`: a fresh, already `RanToCompletion` unit
    /// task. Each call returns a distinct task (this runtime has no shared
    /// static singleton), but every observable property matches the
    /// teacher-language original.
    pub fn completed() -> Self {
        Self::from_result(())
    }
}

fn should_run_continuation(antecedent_status: Status, options: ContinuationOptions) -> bool {
    match antecedent_status {
        Status::RanToCompletion => !options.contains(ContinuationOptions::NOT_ON_RAN_TO_COMPLETION),
        Status::Faulted => !options.contains(ContinuationOptions::NOT_ON_FAULTED),
        Status::Canceled => !options.contains(ContinuationOptions::NOT_ON_CANCELED),
        _ => true,
    }
}

/// Convenience entry point mirroring the shorthand `continue_with` that
/// defaults to an inline scheduler and no filtering, for the common case of
/// chaining a continuation without spelling out every option.
impl<T: Send + 'static> Task<T> {
    pub fn then<U, F>(&self, scheduler: Arc<dyn Scheduler>, f: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(Task<T>) -> U + Send + 'static,
    {
        self.continue_with(scheduler, ContinuationOptions::NONE_EXPLICIT, f)
    }
}

/// Builds and starts a root task.
pub struct TaskBuilder<T> {
    body: Box<dyn FnOnce(&TaskContext) -> T + Send>,
    creation_options: CreationOptions,
    token: CancellationToken,
    parent: Option<Arc<TaskCore>>,
}

impl<T: Send + 'static> TaskBuilder<T> {
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&TaskContext) -> T + Send + 'static,
    {
        Self { body: Box::new(body), creation_options: CreationOptions::NONE_EXPLICIT, token: CancellationToken::none(), parent: None }
    }

    pub fn with_options(mut self, options: CreationOptions) -> Self {
        self.creation_options = options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Attaches to `parent` if `AttachedToParent` is set in the creation
    /// options (`AttachedToParent` is ignored for tasks
    /// with no current parent).
    pub fn with_parent(mut self, parent: Arc<TaskCore>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn start(self, scheduler: Arc<dyn Scheduler>) -> Task<T> {
        let body = self.body;
        let wrapped: crate::task::BodyFn = Box::new(move |ctx| Box::new(body(ctx)) as BodyOutput);
        let core = TaskCore::new_with_token(wrapped, self.creation_options, self.token);

        let parent = self.parent.or_else(crate::current::current);
        if self.creation_options.contains(CreationOptions::ATTACHED_TO_PARENT) {
            if let Some(parent) = parent {
                if !parent.creation_options().contains(CreationOptions::DENY_CHILD_ATTACH) {
                    core.set_parent(&parent);
                }
            }
        }

        core.start(scheduler).ok();
        Task::from_core(core)
    }
}

/// The promise-task surface: a `Task<T>` whose result is supplied
/// externally rather than by running a body.
pub struct TaskCompletionSource<T> {
    core: Arc<TaskCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> TaskCompletionSource<T> {
    pub fn new(options: CreationOptions) -> Self {
        Self { core: TaskCore::new_promise(options), _marker: PhantomData }
    }

    pub fn task(&self) -> Task<T> {
        Task::from_core(self.core.clone())
    }

    pub fn try_set_result(&self, value: T) -> bool {
        self.core.try_set_result(Box::new(value))
    }

    pub fn try_set_exception(&self, message: impl Into<String>) -> bool {
        self.core.try_set_exception(CapturedFailure { message: message.into(), is_cancellation: false })
    }

    pub fn try_set_canceled(&self) -> bool {
        self.core.try_set_canceled()
    }

    /// Like [`Self::try_set_canceled`], but attributes the cancellation to a
    /// specific token (e.g. the token of whichever constituent task actually
    /// canceled) rather than this source's own, nonexistent one.
    pub(crate) fn try_set_canceled_with_token(&self, token_id: Option<u64>) -> bool {
        self.core.try_set_canceled_with_token(token_id)
    }

    /// Settles as faulted with every failure recorded at once.
    pub(crate) fn try_set_exceptions(&self, failures: Vec<CapturedFailure>) -> bool {
        self.core.try_fault_with(failures)
    }
}

impl<T: Send + 'static> Default for TaskCompletionSource<T> {
    fn default() -> Self {
        Self::new(CreationOptions::NONE_EXPLICIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::InlineScheduler;

    #[test]
    fn builder_runs_and_yields_result() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let task = TaskBuilder::new(|_ctx| 41 + 1).start(scheduler);
        assert_eq!(task.wait_for_result().unwrap(), 42);
    }

    #[test]
    fn completion_source_delivers_externally_set_result() {
        let tcs: TaskCompletionSource<&'static str> = TaskCompletionSource::new(CreationOptions::NONE_EXPLICIT);
        let task = tcs.task();
        assert!(tcs.try_set_result("done"));
        assert_eq!(task.wait_for_result().unwrap(), "done");
    }

    #[test]
    fn then_chains_a_continuation() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let task = TaskBuilder::new(|_ctx| 2).start(scheduler.clone());
        let chained = task.then(scheduler, |antecedent| antecedent.wait_for_result().unwrap() * 10);
        assert_eq!(chained.wait_for_result().unwrap(), 20);
    }

    #[test]
    fn filtered_continuation_is_canceled_when_antecedent_succeeds() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let task = TaskBuilder::new(|_ctx| 1).start(scheduler.clone());
        let chained = task.continue_with(scheduler, ContinuationOptions::ONLY_ON_FAULTED, |_| 99);
        assert!(chained.is_canceled());
    }

    #[test]
    fn from_result_is_already_ran_to_completion() {
        let task = Task::from_result(5);
        assert_eq!(task.status(), Status::RanToCompletion);
        assert_eq!(task.wait_for_result().unwrap(), 5);
    }

    #[test]
    fn from_exception_is_already_faulted() {
        let task: Task<i32> = Task::from_exception("boom");
        assert!(task.is_faulted());
    }

    #[test]
    fn from_canceled_is_already_canceled_and_carries_the_token() {
        let source = crate::cancellation::CancellationTokenSource::new();
        source.cancel();
        let token = source.token();
        let task: Task<i32> = Task::from_canceled(&token);
        assert!(task.is_canceled());
        assert_eq!(task.core().cancellation_token_id(), Some(token.id()));
    }

    #[test]
    fn completed_task_is_an_immediately_ran_to_completion_unit() {
        let task = Task::completed();
        assert_eq!(task.status(), Status::RanToCompletion);
    }
}
