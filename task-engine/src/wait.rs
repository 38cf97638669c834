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

//! Blocking wait support: a manual-reset [`CompletionEvent`] plus the
//! `wait_core` sequence (fast path → try-inline → block-with-timeout) that
//! every blocking `wait`/`wait_for_result` call goes through.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancellation::CancellationToken;
use crate::error::{AggregateException, TaskError};
use crate::handle::Task;
use crate::state::Status;
use crate::task::TaskCore;

/// Manual-reset event: once `set`, stays set. Cheap to poll, composes with a
/// timeout and with a parallel cancellation-token wakeup.
#[derive(Debug, Default)]
pub struct CompletionEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl CompletionEvent {
    pub fn new() -> Self {
        Self { signaled: Mutex::new(false), condvar: Condvar::new() }
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            *signaled = true;
            self.condvar.notify_all();
        }
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Blocks until signaled or `timeout` elapses (`None` blocks forever).
    /// Returns whether it was signaled.
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> bool {
        let mut signaled = self.signaled.lock();
        match timeout {
            None => {
                while !*signaled {
                    self.condvar.wait(&mut signaled);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*signaled {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    let result = self.condvar.wait_for(&mut signaled, remaining);
                    if result.timed_out() && !*signaled {
                        return false;
                    }
                }
                true
            }
        }
    }
}

/// Implements the wait sequence: already-complete fast path, then
/// (for schedulers that support it) an attempt to run the task inline on the
/// calling thread, then blocking on the completion event with an optional
/// timeout and an optional cancellation-token race. `timeout_ms < 0` blocks
/// forever; `timeout_ms == 0` never blocks past the fast paths.
pub fn wait_core(core: &Arc<TaskCore>, timeout_ms: i64, token: Option<&CancellationToken>) -> Result<bool, TaskError> {
    if core.state().is_completed() {
        return finalize_wait_result(core, token);
    }

    if let Some(token) = token {
        if token.is_cancellation_requested() {
            return Err(TaskError::OperationCanceled { token_id: Some(token.id()) });
        }
    }

    if timeout_ms == 0 {
        return Ok(false);
    }

    core.try_run_inline_while_waiting();
    if core.state().is_completed() {
        return finalize_wait_result(core, token);
    }

    // Registering the wakeup as a continuation (rather than checking
    // `is_completed()` and then separately fetching a possibly-lazily-shared
    // event) is what makes this race-free: `on_completed` either queues the
    // closure, to be run by whichever thread drains the antecedent's
    // continuation list, or — if the task finished in the window between the
    // check above and this call — hands it back and runs it inline, right
    // here, before this function ever blocks on it.
    let event = Arc::new(CompletionEvent::new());
    {
        let event = event.clone();
        core.on_completed(true, move || event.set());
    }
    let timeout = if timeout_ms < 0 { None } else { Some(Duration::from_millis(timeout_ms as u64)) };

    let completed = match (token, timeout) {
        (None, timeout) => event.wait_timeout(timeout),
        (Some(token), timeout) => wait_with_cancellation(&event, token, timeout),
    };

    if !completed {
        return Ok(false);
    }
    finalize_wait_result(core, token)
}

fn wait_with_cancellation(event: &CompletionEvent, token: &CancellationToken, timeout: Option<Duration>) -> bool {
    let poll_interval = Duration::from_millis(15);
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if event.is_set() {
            return true;
        }
        if token.is_cancellation_requested() {
            return event.is_set();
        }
        let slice = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return false;
                }
                remaining.min(poll_interval)
            }
            None => poll_interval,
        };
        if event.wait_timeout(Some(slice)) {
            return true;
        }
    }
}

/// Translates a completed task's terminal state into a `wait` result,
/// applying the precedence rule: if the *caller's own* token is what
/// caused the cancellation, prefer surfacing `OperationCanceled` over a
/// generic `Aggregate` even when the task also recorded other failures.
fn finalize_wait_result(core: &Arc<TaskCore>, token: Option<&CancellationToken>) -> Result<bool, TaskError> {
    use crate::state::lifecycle;

    let state = core.state().load(std::sync::atomic::Ordering::Acquire);
    if state & lifecycle::FAULTED != 0 {
        return Err(core.exception_snapshot().into());
    }
    if state & lifecycle::CANCELED != 0 {
        if let Some(token) = token {
            if token.is_cancellation_requested() {
                return Err(TaskError::OperationCanceled { token_id: Some(token.id()) });
            }
        }
        return Err(TaskError::OperationCanceled { token_id: core.cancellation_token_id() });
    }
    Ok(true)
}

/// A one-shot "N participants must check in" barrier, used to block on a
/// snapshot of tasks without building a `Task<Vec<_>>` join the way
/// `when_all` does — `WaitAll`/`WaitAny` are plain blocking calls, not
/// combinators that hand back a new task.
struct CountdownEvent {
    remaining: Mutex<usize>,
    condvar: Condvar,
}

impl CountdownEvent {
    fn new(count: usize) -> Self {
        Self { remaining: Mutex::new(count), condvar: Condvar::new() }
    }

    fn signal(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
        }
        if *remaining == 0 {
            self.condvar.notify_all();
        }
    }

    fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.condvar.wait(&mut remaining);
        }
    }
}

/// Blocks until every task in `tasks` has completed, inlining any that an
/// unoccupied scheduler is willing to run on this thread first. Completes
/// successfully iff every constituent ran to completion; otherwise fails
/// with an aggregate containing every fault and cancellation encountered
/// (cancellations are not subsumed by faults the way `when_all` subsumes
/// them — `WaitAll` surfaces everything it saw).
pub fn wait_all<T: Send + 'static>(tasks: &[Task<T>]) -> Result<(), TaskError> {
    if tasks.is_empty() {
        return Ok(());
    }

    for t in tasks {
        t.core().try_run_inline_while_waiting();
    }

    let incomplete: Vec<&Task<T>> = tasks.iter().filter(|t| !t.is_completed()).collect();
    if !incomplete.is_empty() {
        let countdown = Arc::new(CountdownEvent::new(incomplete.len()));
        for t in &incomplete {
            let countdown = countdown.clone();
            t.core().on_completed(false, move || countdown.signal());
        }
        countdown.wait();
    }

    let mut failures = Vec::new();
    for t in tasks {
        match t.status() {
            Status::Faulted | Status::Canceled => failures.extend(t.core().exception_snapshot().failures),
            _ => {}
        }
    }
    if !failures.is_empty() {
        return Err(TaskError::Aggregate(AggregateException { task_id: tasks[0].id(), failures }));
    }
    Ok(())
}

/// Blocks until the first of `tasks` completes (any terminal state counts),
/// returning its index. Built on the same one-shot "first one wins, the
/// rest don't matter" shape as `when_any`, but blocking rather than
/// returning a new task.
pub fn wait_any<T: Send + 'static>(tasks: &[Task<T>]) -> Result<usize, TaskError> {
    if tasks.is_empty() {
        return Err(TaskError::InvalidState("WaitAny requires at least one task"));
    }

    for t in tasks {
        t.core().try_run_inline_while_waiting();
    }
    if let Some(pos) = tasks.iter().position(|t| t.is_completed()) {
        return Ok(pos);
    }

    let winner: Arc<(Mutex<Option<usize>>, Condvar)> = Arc::new((Mutex::new(None), Condvar::new()));
    for (index, t) in tasks.iter().enumerate() {
        let winner = winner.clone();
        t.core().on_completed(false, move || {
            let mut slot = winner.0.lock();
            if slot.is_none() {
                *slot = Some(index);
                winner.1.notify_all();
            }
        });
    }

    let mut slot = winner.0.lock();
    while slot.is_none() {
        winner.1.wait(&mut slot);
    }
    Ok(slot.unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering as AtomicOrdering;
    use std::thread;

    #[test]
    fn wait_timeout_zero_returns_immediately_when_unset() {
        let event = CompletionEvent::new();
        assert!(!event.wait_timeout(Some(Duration::from_millis(0))));
    }

    #[test]
    fn set_wakes_a_blocked_waiter() {
        let event = Arc::new(CompletionEvent::new());
        let waiter = event.clone();
        let handle = thread::spawn(move || waiter.wait_timeout(None));
        thread::sleep(Duration::from_millis(10));
        event.set();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn double_set_is_idempotent() {
        let event = CompletionEvent::new();
        event.set();
        event.set();
        assert!(event.is_set());
        let _ = AtomicOrdering::SeqCst;
    }

    #[test]
    fn wait_all_empty_input_succeeds() {
        let tasks: Vec<Task<i32>> = Vec::new();
        assert!(wait_all(&tasks).is_ok());
    }

    #[test]
    fn wait_all_succeeds_once_every_constituent_completes() {
        use crate::handle::TaskBuilder;
        use crate::scheduler::{InlineScheduler, Scheduler};

        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let tasks = vec![
            TaskBuilder::new(|_ctx| 1).start(scheduler.clone()),
            TaskBuilder::new(|_ctx| 2).start(scheduler),
        ];
        assert!(wait_all(&tasks).is_ok());
    }

    #[test]
    fn wait_all_reports_every_fault() {
        use crate::handle::TaskBuilder;
        use crate::scheduler::{InlineScheduler, Scheduler};
        use crate::task::TaskContext;

        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let tasks = vec![
            TaskBuilder::new(|_ctx: &TaskContext| -> i32 { panic!("a") }).start(scheduler.clone()),
            TaskBuilder::new(|_ctx: &TaskContext| -> i32 { panic!("b") }).start(scheduler),
        ];
        match wait_all(&tasks) {
            Err(TaskError::Aggregate(agg)) => assert_eq!(agg.failures.len(), 2),
            other => panic!("expected an aggregate of both faults, got {other:?}"),
        }
    }

    #[test]
    fn wait_any_rejects_empty_input() {
        let tasks: Vec<Task<i32>> = Vec::new();
        assert!(wait_any(&tasks).is_err());
    }

    #[test]
    fn wait_any_returns_index_of_a_completed_constituent() {
        use crate::handle::TaskBuilder;
        use crate::scheduler::{InlineScheduler, Scheduler};

        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let tasks = vec![
            TaskBuilder::new(|_ctx| 10).start(scheduler.clone()),
            TaskBuilder::new(|_ctx| 20).start(scheduler),
        ];
        let winner = wait_any(&tasks).unwrap();
        assert!(winner == 0 || winner == 1);
    }
}
