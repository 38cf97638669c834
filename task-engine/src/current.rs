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

//! Thread-local "currently executing task" slot, analogous to
//! `Task.CurrentId`. Set for the duration of a task body's execution via an
//! RAII guard so a panic unwinding through the body still restores whatever
//! was there before (relevant when one task's scheduler runs another task's
//! body synchronously on the same thread, e.g. `TryInline`).

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use crate::id::TaskId;
use crate::task::TaskCore;

thread_local! {
    static CURRENT_TASK: RefCell<Option<Weak<TaskCore>>> = const { RefCell::new(None) };
}

/// Returns the task currently executing on this thread, if any.
pub fn current() -> Option<Arc<TaskCore>> {
    CURRENT_TASK.with(|slot| slot.borrow().as_ref().and_then(Weak::upgrade))
}

/// Mirrors `Task.CurrentId`: the id of the task executing on this thread, if
/// any body is currently running on it.
pub fn current_id() -> Option<TaskId> {
    current().map(|task| task.id())
}

#[must_use = "the previous current-task value is restored when this guard drops"]
pub struct CurrentTaskGuard {
    previous: Option<Weak<TaskCore>>,
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|slot| {
            *slot.borrow_mut() = self.previous.take();
        });
    }
}

/// Installs `task` as the current task for this thread until the returned
/// guard drops.
pub fn enter(task: &Arc<TaskCore>) -> CurrentTaskGuard {
    let previous = CURRENT_TASK.with(|slot| slot.borrow_mut().replace(Arc::downgrade(task)));
    CurrentTaskGuard { previous }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CreationOptions;
    use crate::scheduler::InlineScheduler;
    use std::sync::Arc;

    #[test]
    fn guard_restores_previous_value_on_drop() {
        assert!(current().is_none());
        let outer = TaskCore::new_root(Box::new(|_ctx| Box::new(()) as Box<dyn std::any::Any + Send>), CreationOptions::NONE_EXPLICIT);
        {
            let _guard = enter(&outer);
            assert!(current().is_some());
            {
                let inner = TaskCore::new_root(Box::new(|_ctx| Box::new(()) as Box<dyn std::any::Any + Send>), CreationOptions::NONE_EXPLICIT);
                let _inner_guard = enter(&inner);
                assert!(Arc::ptr_eq(&current().unwrap(), &inner));
            }
            assert!(Arc::ptr_eq(&current().unwrap(), &outer));
        }
        assert!(current().is_none());
        let _ = InlineScheduler::new();
    }

    #[test]
    fn current_id_tracks_current_task() {
        assert!(current_id().is_none());
        let task = TaskCore::new_root(Box::new(|_ctx| Box::new(()) as Box<dyn std::any::Any + Send>), CreationOptions::NONE_EXPLICIT);
        let expected = task.id();
        {
            let _guard = enter(&task);
            assert_eq!(current_id(), Some(expected));
        }
        assert!(current_id().is_none());
    }
}
