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

//! The scheduler boundary: the runtime hands a started task to a `Scheduler`
//! and never runs task bodies itself. Two reference schedulers ship here so
//! the crate is usable without writing one first; neither is a general
//! work-stealing pool, which is explicitly out of scope.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::SchedulerError;
use crate::task::TaskCore;

/// Opaque handle a `Scheduler` uses to execute a task it has been given.
/// Wraps the type-erased task core; schedulers never see `Task<T>` directly.
#[derive(Clone)]
pub struct ScheduledTask(pub(crate) Arc<TaskCore>);

impl ScheduledTask {
    /// Runs the task body to completion on the calling thread. Schedulers
    /// call this exactly once per task, from whatever thread they choose.
    pub fn execute(&self) {
        self.0.execute();
    }

    pub fn priority_hint(&self) -> PriorityHint {
        self.0.priority_hint()
    }

    pub fn id(&self) -> u32 {
        self.0.id_for_display()
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScheduledTask(#{})", self.id())
    }
}

/// Derived from `CreationOptions::LONG_RUNNING`/`PREFER_FAIRNESS`; schedulers
/// may use this as a dispatch hint but are not required to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PriorityHint {
    Normal,
    LongRunning,
}

/// External collaborator that actually runs task bodies. The runtime's only
/// contract with a scheduler is this trait; everything else (work-stealing,
/// affinity, fairness) is the scheduler's business.
pub trait Scheduler: Send + Sync {
    /// Accepts a started task for eventual execution. Schedulers that run
    /// synchronously may execute it before returning.
    fn queue(&self, task: ScheduledTask) -> Result<(), SchedulerError>;

    /// Gives the scheduler a chance to run `task` synchronously on the
    /// calling thread right now (used by `Task::run_synchronously` and by
    /// `wait`'s best-effort "run it myself while I'm blocked anyway" path).
    /// Returns whether it did. `was_previously_queued` tells the scheduler
    /// whether it must also cancel the task's pending queue entry on success.
    fn try_inline(&self, task: &ScheduledTask, was_previously_queued: bool) -> bool;

    /// Attempts to remove a previously queued task before it starts running.
    /// Returns whether the removal succeeded (false means it's already
    /// running or already ran).
    fn try_dequeue(&self, task: &ScheduledTask) -> bool;

    /// Whether `start`'s CAS-guarded transition to `DELEGATE_INVOKED` must be
    /// atomic because this scheduler may run queued tasks concurrently with
    /// an in-flight cancellation/dequeue race.
    fn requires_atomic_start_transition(&self) -> bool;
}

/// Runs every task synchronously, inline, on whichever thread calls `queue`.
/// No concurrency, so no start-transition race is possible.
#[derive(Debug, Default)]
pub struct InlineScheduler;

impl InlineScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for InlineScheduler {
    fn queue(&self, task: ScheduledTask) -> Result<(), SchedulerError> {
        task.execute();
        Ok(())
    }

    fn try_inline(&self, task: &ScheduledTask, _was_previously_queued: bool) -> bool {
        task.execute();
        true
    }

    fn try_dequeue(&self, _task: &ScheduledTask) -> bool {
        false
    }

    fn requires_atomic_start_transition(&self) -> bool {
        false
    }
}

struct Slot {
    task: ScheduledTask,
    claimed: AtomicBool,
}

/// Spawns one dedicated OS thread per queued task. `PreferFairness` and
/// `LongRunning` are accepted as hints, logged, and otherwise ignored — a
/// full priority-aware pool is out of scope for this crate.
pub struct ThreadPerTaskScheduler {
    pending: Mutex<VecDeque<Arc<Slot>>>,
    running: Condvar,
    thread_count: AtomicU8,
}

impl fmt::Debug for ThreadPerTaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPerTaskScheduler")
            .field("threads_spawned", &self.thread_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl ThreadPerTaskScheduler {
    pub fn new() -> Self {
        Self { pending: Mutex::new(VecDeque::new()), running: Condvar::new(), thread_count: AtomicU8::new(0) }
    }

    /// Number of threads spawned over this scheduler's lifetime, for tests
    /// and diagnostics.
    pub fn threads_spawned(&self) -> u8 {
        self.thread_count.load(Ordering::Relaxed)
    }
}

impl Default for ThreadPerTaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadPerTaskScheduler {
    fn queue(&self, task: ScheduledTask) -> Result<(), SchedulerError> {
        if task.priority_hint() == PriorityHint::LongRunning {
            tracing::debug!(task_id = task.id(), "scheduling long-running task on a dedicated thread");
        }
        let slot = Arc::new(Slot { task, claimed: AtomicBool::new(false) });
        self.pending.lock().unwrap().push_back(slot.clone());

        let builder = std::thread::Builder::new().name(format!("task-engine-worker-{}", slot.task.id()));
        let pending = self.pending_handle();
        let spawn_result = builder.spawn(move || {
            if slot.claimed.swap(true, Ordering::AcqRel) {
                return;
            }
            pending.lock().unwrap().retain(|s| !Arc::ptr_eq(s, &slot));
            slot.task.execute();
        });

        match spawn_result {
            Ok(_) => {
                self.thread_count.fetch_add(1, Ordering::Relaxed);
                self.running.notify_all();
                Ok(())
            }
            Err(e) => Err(SchedulerError::QueueFailed(e.to_string())),
        }
    }

    fn try_inline(&self, task: &ScheduledTask, was_previously_queued: bool) -> bool {
        if was_previously_queued && !self.try_dequeue(task) {
            return false;
        }
        task.execute();
        true
    }

    fn try_dequeue(&self, task: &ScheduledTask) -> bool {
        let mut pending = self.pending.lock().unwrap();
        if let Some(pos) = pending.iter().position(|s| s.task.id() == task.id()) {
            let slot = pending.remove(pos).unwrap();
            return !slot.claimed.swap(true, Ordering::AcqRel);
        }
        false
    }

    fn requires_atomic_start_transition(&self) -> bool {
        true
    }
}

impl ThreadPerTaskScheduler {
    fn pending_handle(&self) -> &Mutex<VecDeque<Arc<Slot>>> {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TaskBuilder;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn inline_scheduler_runs_synchronously() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let task = TaskBuilder::new(move |_ctx| {
            ran2.fetch_add(1, Ordering::SeqCst);
            7
        })
        .start(scheduler);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(task.wait_for_result().unwrap(), 7);
    }

    #[test]
    fn thread_per_task_scheduler_completes_task() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(ThreadPerTaskScheduler::new());
        let task = TaskBuilder::new(|_ctx| {
            std::thread::sleep(Duration::from_millis(5));
            21
        })
        .start(scheduler);
        assert_eq!(task.wait_for_result().unwrap(), 21);
    }
}
