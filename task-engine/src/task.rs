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

//! The non-generic task core: type-erased so the lifecycle state machine,
//! continuation engine, and parent/child accounting live in one place
//! regardless of a task's result type. `Task<T>` (in `handle`) is a thin
//! typed wrapper around `Arc<TaskCore>`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::cancellation::{CancellationSignal, CancellationToken};
use crate::contingent::ContingentProperties;
use crate::continuation::ContinuationList;
use crate::current;
use crate::error::{AggregateException, CapturedFailure, TaskError};
use crate::id::{LazyTaskId, TaskId};
use crate::options::CreationOptions;
use crate::scheduler::{PriorityHint, ScheduledTask, Scheduler};
use crate::state::{internal_flags, lifecycle, StateWord};

pub type BodyOutput = Box<dyn Any + Send>;
pub type BodyFn = Box<dyn FnOnce(&TaskContext) -> BodyOutput + Send>;

/// Passed to a task body on invocation; the body's window into its own
/// cancellation token and identity. Schedulers never see this type.
pub struct TaskContext {
    pub(crate) token: CancellationToken,
    pub(crate) task_id: TaskId,
}

impl TaskContext {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Throws a [`CancellationSignal`] (via `panic_any`) if this task's own
    /// token has had cancellation requested, to be caught by the executor
    /// and classified as an acknowledged cancellation rather than a fault.
    /// Lets a body cooperatively observe and acknowledge its own cancellation.
    pub fn throw_if_cancellation_requested(&self) {
        if self.token.is_cancellation_requested() {
            panic::panic_any(CancellationSignal(self.token.id()));
        }
    }
}

pub struct TaskCore {
    id: LazyTaskId,
    state: StateWord,
    body: Mutex<Option<BodyFn>>,
    scheduler: OnceLock<Arc<dyn Scheduler>>,
    parent: Mutex<Option<Weak<TaskCore>>>,
    continuations: ContinuationList,
    contingent: OnceLock<Box<ContingentProperties>>,
    /// Set at most once, by either `execute`'s success path or a promise's
    /// `try_set_result`. `BodyOutput` (`Box<dyn Any + Send>`) is not `Sync`,
    /// so this is guarded by a `Mutex` rather than held in a `OnceLock` —
    /// `parking_lot::Mutex<T>` is `Sync` whenever `T: Send`, which is what
    /// lets `TaskCore` itself be `Sync` and therefore `Arc<TaskCore>: Send`.
    /// A `Task<T>` shared across clones can still read its result any number
    /// of times; it just does so through the lock instead of a bare `&`.
    result_slot: Mutex<Option<BodyOutput>>,
    /// Overrides `cancellation_token_id()` for a promise settled via
    /// `try_set_canceled_with_token`, e.g. a `WhenAll` surfacing the specific
    /// token that canceled one of its constituents rather than its own
    /// (nonexistent) token.
    external_cancel_token: OnceLock<u64>,
    creation_options: CreationOptions,
    /// Token supplied at construction time (e.g. via `TaskBuilder::with_cancellation`).
    /// Defaults to `CancellationToken::none()`.
    token: CancellationToken,
    /// A weak handle to this task's own `Arc`, populated at construction via
    /// `Arc::new_cyclic`. Lets an `&self` method hand out an `Arc<TaskCore>`
    /// (to a scheduler, or to the current-task guard) without requiring
    /// callers to route every call through an explicit `Arc`.
    self_weak: Weak<TaskCore>,
}

impl TaskCore {
    fn self_arc(&self) -> Arc<TaskCore> {
        self.self_weak.upgrade().expect("task core dropped while one of its own methods was still executing")
    }

    fn contingent(&self) -> &ContingentProperties {
        self.contingent.get_or_init(|| Box::new(ContingentProperties::new(self.id())))
    }

    fn contingent_if_present(&self) -> Option<&ContingentProperties> {
        self.contingent.get()
    }

    pub fn id(&self) -> TaskId {
        self.id.get_or_assign()
    }

    pub fn id_for_display(&self) -> u32 {
        self.id().get()
    }

    pub fn state(&self) -> &StateWord {
        &self.state
    }

    pub fn creation_options(&self) -> CreationOptions {
        self.creation_options
    }

    pub fn priority_hint(&self) -> PriorityHint {
        if self.creation_options.contains(CreationOptions::LONG_RUNNING) {
            PriorityHint::LongRunning
        } else {
            PriorityHint::Normal
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancellation_token_id(&self) -> Option<u64> {
        self.external_cancel_token.get().copied().or_else(|| self.token.can_be_canceled().then(|| self.token.id()))
    }

    /// Constructs a fresh, unstarted root task (not a continuation, not a
    /// promise) wrapping `body`.
    pub fn new_root(body: BodyFn, creation_options: CreationOptions) -> Arc<Self> {
        Self::new_with_token(body, creation_options, CancellationToken::none())
    }

    pub fn new_with_token(body: BodyFn, creation_options: CreationOptions, token: CancellationToken) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: LazyTaskId::unassigned(),
            state: StateWord::new(creation_options.bits(), 0, false),
            body: Mutex::new(Some(body)),
            scheduler: OnceLock::new(),
            parent: Mutex::new(None),
            continuations: ContinuationList::new(),
            contingent: OnceLock::new(),
            result_slot: Mutex::new(None),
            external_cancel_token: OnceLock::new(),
            creation_options,
            token,
            self_weak: weak.clone(),
        })
    }

    /// Constructs an already-`WaitingForActivation` promise task (no body;
    /// completed externally via `try_set_*`).
    pub fn new_promise(creation_options: CreationOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: LazyTaskId::unassigned(),
            state: StateWord::new(creation_options.bits(), internal_flags::PROMISE, true),
            body: Mutex::new(None),
            scheduler: OnceLock::new(),
            parent: Mutex::new(None),
            continuations: ContinuationList::new(),
            contingent: OnceLock::new(),
            result_slot: Mutex::new(None),
            external_cancel_token: OnceLock::new(),
            creation_options,
            token: CancellationToken::none(),
            self_weak: weak.clone(),
        })
    }

    pub fn set_parent(&self, parent: &Arc<TaskCore>) {
        *self.parent.lock() = Some(Arc::downgrade(parent));
        parent.contingent().add_child();
    }

    /// Starts the task on `scheduler`. Fails if the task was already started,
    /// is a promise (promises are never scheduled), or has already been
    /// canceled via a token that fired before `Start` ran.
    pub fn start(&self, scheduler: Arc<dyn Scheduler>) -> Result<(), TaskError> {
        if self.state.is_promise() {
            return Err(TaskError::InvalidState("a promise task cannot be started"));
        }
        if !self.state.mark_started() {
            return Err(TaskError::InvalidState("task already started or already canceled"));
        }
        self.scheduler.set(scheduler.clone()).ok();

        if self.token.can_be_canceled() {
            let weak = self.self_weak.clone();
            let reg = self.token.register(move || {
                if let Some(core) = weak.upgrade() {
                    core.internal_cancel(false);
                }
            });
            *self.contingent().cancellation_registration.lock() = Some(reg);
        }

        match scheduler.queue(ScheduledTask(self.self_arc())) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fault_from_scheduler_error(&e);
                Err(e.into())
            }
        }
    }

    fn fault_from_scheduler_error(&self, error: &crate::error::SchedulerError) {
        self.contingent().exception_holder.add(CapturedFailure { message: error.to_string(), is_cancellation: false });
        self.state.atomic_update(lifecycle::DELEGATE_INVOKED, 0);
        self.finish(false);
    }

    /// Executes the body on the calling thread. Called by a `Scheduler`
    /// exactly once per task; enforced via a CAS on `DELEGATE_INVOKED`.
    pub fn execute(&self) {
        if !self.state.atomic_update(lifecycle::DELEGATE_INVOKED, lifecycle::DELEGATE_INVOKED | lifecycle::CANCELED) {
            if self.state.has_any(lifecycle::CANCELED) {
                return;
            }
            tracing::error!(task_id = %self.id(), "scheduler invoked a task's body more than once");
            return;
        }

        let Some(body) = self.body.lock().take() else {
            self.finish(true);
            return;
        };

        let arc_self = self.self_arc();
        let _guard = current::enter(&arc_self);
        let ctx = TaskContext { token: self.token.clone(), task_id: self.id() };

        tracing::debug!(task_id = %self.id(), "task body starting");
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx)));
        match result {
            Ok(value) => {
                *self.result_slot.lock() = Some(value);
                self.finish(true);
            }
            Err(payload) => {
                self.handle_body_failure(payload);
                self.finish(true);
            }
        }
    }

    fn handle_body_failure(&self, payload: Box<dyn Any + Send>) {
        if let Some(signal) = payload.downcast_ref::<CancellationSignal>() {
            if self.token.can_be_canceled() && signal.0 == self.token.id() && self.token.is_cancellation_requested() {
                self.state.atomic_update(lifecycle::CANCELLATION_ACKNOWLEDGED, 0);
                self.contingent().exception_holder.add(CapturedFailure::cancellation("task canceled cooperatively"));
                tracing::debug!(task_id = %self.id(), "task body acknowledged cancellation");
                return;
            }
        }
        let failure = CapturedFailure::from_panic(payload.as_ref());
        tracing::debug!(task_id = %self.id(), message = %failure.message, "task body panicked");
        self.contingent().exception_holder.add(failure);
    }

    /// Stage one of completion: if the body never ran (e.g. the task was
    /// canceled before a scheduler got to it), skip straight to stage
    /// two/three without touching the countdown. Otherwise decrement the
    /// completion countdown (the task's own body plus every attached child);
    /// reaching zero proceeds to stage two/three, else this just publishes
    /// `WAITING_ON_CHILDREN` and returns — the last child to complete will
    /// drive stage two/three on its own thread.
    pub fn finish(&self, user_delegate_ran: bool) {
        if !user_delegate_ran || self.contingent_if_present().is_none() {
            self.finish_stage_three();
            return;
        }
        if self.contingent().decrement_countdown() {
            self.finish_stage_three();
        } else {
            self.state.atomic_update(lifecycle::WAITING_ON_CHILDREN, 0);
        }
    }

    fn finish_stage_three(&self) {
        self.state.clear(lifecycle::WAITING_ON_CHILDREN);

        if let Some(contingent) = self.contingent_if_present() {
            let child_failures = contingent.drain_child_failures();
            if !child_failures.is_empty() {
                for child in child_failures {
                    contingent.exception_holder.extend(child.failures);
                }
            }
        }

        let is_cancellation = self.contingent_if_present().map(|c| !c.exception_holder.is_empty() && c.exception_holder.is_cancellation()).unwrap_or(false);
        let has_failures = self.contingent_if_present().map(|c| !c.exception_holder.is_empty()).unwrap_or(false);

        if has_failures && is_cancellation {
            self.state.atomic_update(lifecycle::CANCELED, 0);
        } else if has_failures {
            self.state.atomic_update(lifecycle::FAULTED, 0);
        } else {
            self.state.atomic_update(lifecycle::RAN_TO_COMPLETION, 0);
        }

        tracing::debug!(task_id = %self.id(), status = ?self.state.status(), "task finished");

        let continuations = self.continuations.finish();
        for continuation in continuations {
            if continuation.execute_synchronously {
                (continuation.action)();
            } else {
                self.queue_continuation(continuation.action);
            }
        }

        self.notify_parent();
    }

    /// Dispatches an asynchronous continuation's action onto this task's own
    /// scheduler, the same way any other unit of work reaches a thread,
    /// rather than a raw `std::thread::spawn` that would bypass a
    /// scheduler's fairness/affinity contract entirely (spec: "continuations
    /// marked as running arbitrary code are queued to the scheduler"). Wraps
    /// the action in a fire-and-forget task core so it goes through the same
    /// `Scheduler::queue` path, panic handling included, as any other body. A
    /// promise never ran a body through a scheduler and so has none on
    /// record; its continuations fall back to a dedicated thread, since
    /// there is nowhere else to queue them.
    fn queue_continuation(&self, action: Box<dyn FnOnce() + Send>) {
        let Some(scheduler) = self.scheduler.get().cloned() else {
            std::thread::spawn(action);
            return;
        };
        let body: BodyFn = Box::new(move |_ctx: &TaskContext| {
            action();
            Box::new(()) as BodyOutput
        });
        let runner = TaskCore::new_root(body, CreationOptions::NONE_EXPLICIT);
        if let Err(e) = runner.start(scheduler) {
            tracing::warn!(task_id = %self.id(), error = %e, "failed to queue an asynchronous continuation");
        }
    }

    fn notify_parent(&self) {
        let parent = self.parent.lock().as_ref().and_then(Weak::upgrade);
        if let Some(parent) = parent {
            if self.state.has_any(lifecycle::FAULTED | lifecycle::CANCELED) {
                if let Some(contingent) = self.contingent_if_present() {
                    parent.contingent().record_child_failure(self.id(), contingent.exception_holder.snapshot());
                }
            }
            if parent.contingent().decrement_countdown() {
                parent.finish_stage_three();
            }
        }
    }

    /// `InternalCancel`: cancels a task that never ran. `dequeue_only` mirrors the
    /// "cancel before it had a chance to run" fast path a scheduler may take
    /// when it can still pull the task out of its queue.
    pub fn internal_cancel(&self, dequeue_only: bool) {
        let illegal = lifecycle::DELEGATE_INVOKED | lifecycle::CANCELED;
        if dequeue_only {
            if let Some(scheduler) = self.scheduler.get() {
                if !scheduler.try_dequeue(&ScheduledTask(self.self_arc())) {
                    return;
                }
            }
        }
        if !self.state.atomic_update(lifecycle::CANCELED, illegal) {
            return;
        }
        self.contingent().exception_holder.add(CapturedFailure::cancellation("task canceled before running"));
        tracing::debug!(task_id = %self.id(), "task canceled before its body ran");
        self.finish_stage_three();
    }

    pub fn try_run_inline_while_waiting(&self) {
        if let Some(scheduler) = self.scheduler.get() {
            if self.state.has_all(lifecycle::STARTED) && !self.state.has_any(lifecycle::DELEGATE_INVOKED) {
                scheduler.try_inline(&ScheduledTask(self.self_arc()), true);
            }
        }
    }

    pub fn exception_snapshot(&self) -> AggregateException {
        match self.contingent_if_present() {
            Some(c) => c.exception_holder.to_aggregate(),
            None => AggregateException { task_id: self.id(), failures: Vec::new() },
        }
    }

    /// Clones the stored result downcast to `T`, if the task completed
    /// successfully with a value of that type. Callable any number of times
    /// (each call takes the lock briefly rather than handing back a
    /// reference into it, since `result_slot` is `Mutex`-guarded).
    pub fn cloned_result<T: Clone + 'static>(&self) -> Option<T> {
        self.result_slot.lock().as_ref().and_then(|output| output.downcast_ref::<T>()).cloned()
    }

    /// Registers a continuation action to run once this task completes,
    /// running it immediately (on the calling thread) if the task has
    /// already completed.
    pub fn on_completed(&self, execute_synchronously: bool, action: impl FnOnce() + Send + 'static) {
        match self.continuations.add(execute_synchronously, Box::new(action)) {
            Ok(_id) => {}
            Err(continuation) => (continuation.action)(),
        }
    }

    // --- promise surface -------------------------------------------------

    /// A promise task is completed directly via one of these, never by a
    /// scheduler; the `DELEGATE_INVOKED` bit still gates them so a promise
    /// can only be settled once.
    fn settle_illegal_bits() -> u32 {
        lifecycle::COMPLETED_MASK | lifecycle::DELEGATE_INVOKED
    }

    pub fn try_set_result(&self, value: BodyOutput) -> bool {
        if !self.state.atomic_update(lifecycle::DELEGATE_INVOKED, Self::settle_illegal_bits()) {
            return false;
        }
        *self.result_slot.lock() = Some(value);
        self.finish(true);
        true
    }

    pub fn try_set_exception(&self, failure: CapturedFailure) -> bool {
        if !self.state.atomic_update(lifecycle::DELEGATE_INVOKED, Self::settle_illegal_bits()) {
            return false;
        }
        self.contingent().exception_holder.add(failure);
        self.finish(true);
        true
    }

    pub fn try_set_canceled(&self) -> bool {
        self.try_set_canceled_with_token(None)
    }

    /// Like [`Self::try_set_canceled`], but records `token_id` as the token
    /// to surface from `cancellation_token_id()` — used by combinators that
    /// adopt a constituent task's token rather than their own.
    pub fn try_set_canceled_with_token(&self, token_id: Option<u64>) -> bool {
        if !self.state.atomic_update(lifecycle::DELEGATE_INVOKED, Self::settle_illegal_bits()) {
            return false;
        }
        if let Some(id) = token_id {
            self.external_cancel_token.set(id).ok();
        }
        self.contingent().exception_holder.add(CapturedFailure::cancellation("promise canceled"));
        self.finish(true);
        true
    }

    /// Settles the promise as faulted with a full set of captured failures
    /// at once (used by `WhenAll` to report every faulted constituent in a
    /// single aggregate rather than one failure per `try_set_exception` call,
    /// which would only ever record the first since the state is settled
    /// after the first call).
    pub fn try_fault_with(&self, failures: Vec<CapturedFailure>) -> bool {
        if !self.state.atomic_update(lifecycle::DELEGATE_INVOKED, Self::settle_illegal_bits()) {
            return false;
        }
        self.contingent().exception_holder.extend(failures);
        self.finish(true);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::InlineScheduler;

    fn make_body(value: i64) -> BodyFn {
        Box::new(move |_ctx| Box::new(value) as BodyOutput)
    }

    #[test]
    fn a_started_task_runs_and_completes() {
        let task = TaskCore::new_root(make_body(5), CreationOptions::NONE_EXPLICIT);
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        task.start(scheduler).unwrap();
        assert!(task.state().has_all(lifecycle::RAN_TO_COMPLETION));
        assert_eq!(task.cloned_result::<i64>().unwrap(), 5);
    }

    #[test]
    fn double_start_fails() {
        let task = TaskCore::new_root(make_body(5), CreationOptions::NONE_EXPLICIT);
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        task.start(scheduler.clone()).unwrap();
        assert!(task.start(scheduler).is_err());
    }

    #[test]
    fn panicking_body_faults_the_task() {
        let body: BodyFn = Box::new(|_ctx| panic!("boom"));
        let task = TaskCore::new_root(body, CreationOptions::NONE_EXPLICIT);
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        task.start(scheduler).unwrap();
        assert!(task.state().has_all(lifecycle::FAULTED));
    }

    #[test]
    fn cancel_before_start_is_rejected_after_start() {
        let task = TaskCore::new_root(make_body(1), CreationOptions::NONE_EXPLICIT);
        task.internal_cancel(false);
        assert!(task.state().has_all(lifecycle::CANCELED));
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        assert!(task.start(scheduler).is_err());
    }
}
